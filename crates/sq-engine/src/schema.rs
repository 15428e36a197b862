//! # Organism Schema Context
//!
//! Per-organism configuration the compiler needs: the declared metadata
//! fields (to expand "select all fields") and the policies that shape the
//! `earliestReleaseDate` and `dataUseTerms*` projections.
//!
//! The context is built by the caller once per request and passed explicitly
//! into every `build_*_query` function. The compiler holds no global
//! configuration state.

use serde::{Deserialize, Serialize};

/// Policy for the `earliestReleaseDate` computed field.
///
/// When enabled, the field takes the earliest of `released_at` and the
/// configured external date fields (metadata-JSON keys cast to timestamps),
/// inherited across versions of the same accession.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EarliestReleaseDatePolicy {
    pub enabled: bool,
    #[serde(default)]
    pub external_fields: Vec<String>,
}

/// Policy for the `dataUseTerms*` computed fields.
///
/// When disabled, the fields collapse to constants (`'OPEN'` / `NULL`) and
/// the data-use-terms join is not emitted at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataUseTermsPolicy {
    pub enabled: bool,
    #[serde(default)]
    pub open_url: Option<String>,
    #[serde(default)]
    pub restricted_url: Option<String>,
}

/// Everything the compiler knows about one organism.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganismContext {
    /// Organism key, bound as the `:organism` parameter of every query.
    pub organism: String,
    /// Metadata field names declared in the organism's schema.
    pub metadata_fields: Vec<String>,
    #[serde(default)]
    pub earliest_release_date: EarliestReleaseDatePolicy,
    #[serde(default)]
    pub data_use_terms: DataUseTermsPolicy,
}

impl OrganismContext {
    /// A minimal context with no metadata fields and all policies disabled.
    pub fn new(organism: impl Into<String>) -> Self {
        OrganismContext {
            organism: organism.into(),
            ..Default::default()
        }
    }
}
