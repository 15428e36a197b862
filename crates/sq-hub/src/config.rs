//! # Backend Configuration
//!
//! The backend config document: per-organism reference genomes and schema,
//! loaded once at startup from a JSON file. Field names follow the backend's
//! camelCase wire format. Each request converts its organism's entry into
//! the engine's [`OrganismContext`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use sq_engine::{DataUseTermsPolicy, EarliestReleaseDatePolicy, OrganismContext};

use crate::error::HubError;

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceSequence {
    pub name: String,
    pub sequence: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceGenome {
    #[serde(default)]
    pub nucleotide_sequences: Vec<ReferenceSequence>,
    #[serde(default)]
    pub genes: Vec<ReferenceSequence>,
}

impl ReferenceGenome {
    pub fn nucleotide_sequence(&self, segment: &str) -> Option<&str> {
        self.nucleotide_sequences
            .iter()
            .find(|s| s.name == segment)
            .map(|s| s.sequence.as_str())
    }

    pub fn gene_sequence(&self, gene: &str) -> Option<&str> {
        self.genes
            .iter()
            .find(|g| g.name == gene)
            .map(|g| g.sequence.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataFieldConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarliestReleaseDateConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub external_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUseTermsConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaConfig {
    pub organism_name: String,
    #[serde(default)]
    pub metadata: Vec<MetadataFieldConfig>,
    #[serde(default)]
    pub earliest_release_date: EarliestReleaseDateConfig,
    #[serde(default)]
    pub data_use_terms: DataUseTermsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganismConfig {
    pub reference_genome: ReferenceGenome,
    pub schema: SchemaConfig,
}

/// URLs advertised for each data-use-terms class.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUseTermsUrls {
    pub open: Option<String>,
    pub restricted: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub organisms: BTreeMap<String, OrganismConfig>,
    pub accession_prefix: String,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub data_use_terms_urls: DataUseTermsUrls,
}

impl BackendConfig {
    pub fn load(path: &Path) -> Result<BackendConfig, HubError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HubError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| HubError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    pub fn organism(&self, organism: &str) -> Result<&OrganismConfig, HubError> {
        self.organisms
            .get(organism)
            .ok_or_else(|| HubError::UnknownOrganism(organism.to_string()))
    }

    /// The engine-side view of one organism's schema.
    pub fn organism_context(&self, organism: &str) -> Result<OrganismContext, HubError> {
        let cfg = self.organism(organism)?;
        Ok(OrganismContext {
            organism: organism.to_string(),
            metadata_fields: cfg.schema.metadata.iter().map(|f| f.name.clone()).collect(),
            earliest_release_date: EarliestReleaseDatePolicy {
                enabled: cfg.schema.earliest_release_date.enabled,
                external_fields: cfg.schema.earliest_release_date.external_fields.clone(),
            },
            data_use_terms: DataUseTermsPolicy {
                enabled: cfg.schema.data_use_terms.enabled,
                open_url: self.data_use_terms_urls.open.clone(),
                restricted_url: self.data_use_terms_urls.restricted.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BackendConfig {
        serde_json::from_value(serde_json::json!({
            "organisms": {
                "west-nile": {
                    "referenceGenome": {
                        "nucleotideSequences": [{"name": "main", "sequence": "ATGC"}],
                        "genes": [{"name": "E", "sequence": "MKV"}]
                    },
                    "schema": {
                        "organismName": "West Nile Virus",
                        "metadata": [
                            {"name": "geoLocCountry", "type": "string"},
                            {"name": "length", "type": "int"}
                        ],
                        "earliestReleaseDate": {
                            "enabled": true,
                            "externalFields": ["ncbiReleaseDate"]
                        },
                        "dataUseTerms": {"enabled": true}
                    }
                }
            },
            "accessionPrefix": "LOC_",
            "dataUseTermsUrls": {
                "open": "https://example.org/terms/open",
                "restricted": "https://example.org/terms/restricted"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_organism_context_conversion() {
        let config = sample();
        let ctx = config.organism_context("west-nile").unwrap();
        assert_eq!(ctx.organism, "west-nile");
        assert_eq!(ctx.metadata_fields, vec!["geoLocCountry", "length"]);
        assert!(ctx.earliest_release_date.enabled);
        assert_eq!(ctx.earliest_release_date.external_fields, vec!["ncbiReleaseDate"]);
        assert!(ctx.data_use_terms.enabled);
        assert_eq!(
            ctx.data_use_terms.open_url.as_deref(),
            Some("https://example.org/terms/open")
        );
    }

    #[test]
    fn test_unknown_organism_is_an_error() {
        let config = sample();
        assert!(matches!(
            config.organism_context("ebola"),
            Err(HubError::UnknownOrganism(_))
        ));
    }

    #[test]
    fn test_reference_genome_lookup() {
        let config = sample();
        let genome = &config.organism("west-nile").unwrap().reference_genome;
        assert_eq!(genome.nucleotide_sequence("main"), Some("ATGC"));
        assert_eq!(genome.nucleotide_sequence("seg2"), None);
        assert_eq!(genome.gene_sequence("E"), Some("MKV"));
    }
}
