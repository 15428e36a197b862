//! # Field Registry
//!
//! Maps a logical field name to its SQL capabilities: projection expression,
//! staging requirement, auxiliary joins, and ordering behavior.
//!
//! Registered computed fields are a closed set dispatched through the sealed
//! [`FieldKind`] enum. Any name outside that set resolves to a metadata-JSON
//! lookup — resolution is total and never fails. A typo'd field name simply
//! yields SQL `NULL` at execution time; that leniency is deliberate and must
//! not be tightened without flagging the behavior change.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::schema::OrganismContext;

/// The wide view every query reads from.
pub const BASE_TABLE: &str = "sequence_entries_view";

/// Auxiliary joins a field may require. The enum order is the canonical
/// order in which join clauses are emitted, so generated SQL stays
/// deterministic no matter which fields pulled the joins in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Join {
    Groups,
    DataUseTerms,
}

impl Join {
    /// The LEFT JOIN clause for this join. Emitted at most once per query.
    pub fn clause(self) -> &'static str {
        match self {
            Join::Groups => {
                "LEFT JOIN groups_table ON sequence_entries_view.group_id = groups_table.group_id"
            }
            Join::DataUseTerms => {
                "LEFT JOIN data_use_terms_table ON sequence_entries_view.accession = data_use_terms_table.accession"
            }
        }
    }
}

/// How a timestamp column is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateForm {
    /// `YYYY-MM-DD` text.
    DateOnly,
    /// Whole epoch seconds as a bigint.
    EpochSeconds,
}

/// The closed set of field behaviors. Every request field name resolves to
/// exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A column of the base view, projected as-is.
    DirectColumn(&'static str),
    /// A timestamp column rendered as a date string or epoch seconds.
    Timestamp { column: &'static str, form: DateForm },
    /// `joint_metadata -> 'metadata' ->> '<key>'`.
    Metadata(String),
    /// `accession || '.' || version`; orders by the underlying pair.
    AccessionVersion,
    /// LATEST_VERSION / REVOKED / REVISED classification. Window-dependent,
    /// so it must be staged before it can be filtered or grouped.
    VersionStatus,
    /// Earliest release-triggering timestamp, inherited across versions.
    /// Window-dependent like `VersionStatus`.
    EarliestReleaseDate,
    /// `groups_table.group_name` via the groups join.
    GroupName,
    /// Data-use-terms status over the data-use-terms join.
    DataUseTerms,
    /// Restriction expiry date, NULL unless restricted.
    DataUseTermsRestrictedUntil,
    /// Terms URL chosen by restriction status.
    DataUseTermsUrl,
}

/// A resolved field: everything the synthesizer needs to project, filter,
/// group and order by this name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    /// True when the projection uses window functions or correlated
    /// subqueries and therefore cannot appear in WHERE/GROUP BY without
    /// being materialized in a CTE first.
    pub requires_staging: bool,
    /// Fields whose expressions an ORDER BY on this field delegates to.
    pub order_dependencies: &'static [&'static str],
}

impl FieldDefinition {
    fn registered(
        name: &'static str,
        kind: FieldKind,
        requires_staging: bool,
        order_dependencies: &'static [&'static str],
    ) -> Arc<FieldDefinition> {
        Arc::new(FieldDefinition {
            name: name.to_string(),
            kind,
            requires_staging,
            order_dependencies,
        })
    }

    fn metadata(name: &str) -> FieldDefinition {
        FieldDefinition {
            name: name.to_string(),
            kind: FieldKind::Metadata(name.to_string()),
            requires_staging: false,
            order_dependencies: &[],
        }
    }

    /// The raw SQL expression computing this field, without an alias.
    pub fn projection(&self, ctx: &OrganismContext) -> String {
        match &self.kind {
            FieldKind::DirectColumn(column) => (*column).to_string(),
            FieldKind::Timestamp { column, form } => match form {
                DateForm::DateOnly => format!("to_char({column}, 'YYYY-MM-DD')"),
                DateForm::EpochSeconds => {
                    format!("floor(extract(epoch from {column}))::bigint")
                }
            },
            FieldKind::Metadata(key) => {
                format!("joint_metadata -> 'metadata' ->> '{}'", escape_json_key(key))
            }
            FieldKind::AccessionVersion => "accession || '.' || version".to_string(),
            FieldKind::VersionStatus => version_status_expr(),
            FieldKind::EarliestReleaseDate => earliest_release_date_expr(ctx),
            FieldKind::GroupName => "groups_table.group_name".to_string(),
            FieldKind::DataUseTerms => {
                if ctx.data_use_terms.enabled {
                    "CASE WHEN data_use_terms_table.data_use_terms_type = 'RESTRICTED' \
                     THEN 'RESTRICTED' ELSE 'OPEN' END"
                        .to_string()
                } else {
                    "'OPEN'".to_string()
                }
            }
            FieldKind::DataUseTermsRestrictedUntil => {
                if ctx.data_use_terms.enabled {
                    "CASE WHEN data_use_terms_table.data_use_terms_type = 'RESTRICTED' \
                     THEN to_char(data_use_terms_table.restricted_until, 'YYYY-MM-DD') END"
                        .to_string()
                } else {
                    "NULL".to_string()
                }
            }
            FieldKind::DataUseTermsUrl => {
                if ctx.data_use_terms.enabled {
                    let open = sql_string_literal(
                        ctx.data_use_terms.open_url.as_deref().unwrap_or_default(),
                    );
                    let restricted = sql_string_literal(
                        ctx.data_use_terms
                            .restricted_url
                            .as_deref()
                            .unwrap_or_default(),
                    );
                    format!(
                        "CASE WHEN data_use_terms_table.data_use_terms_type = 'RESTRICTED' \
                         THEN {restricted} ELSE {open} END"
                    )
                } else {
                    "NULL".to_string()
                }
            }
        }
    }

    /// Projection with its quoted alias, for SELECT lists. Quoting preserves
    /// camelCase field names through the round trip to the client.
    pub fn select_expr(&self, ctx: &OrganismContext) -> String {
        format!("{} AS {}", self.projection(ctx), quote_ident(&self.name))
    }

    /// Expression a WHERE clause compares against. Same as the projection
    /// for every current field kind.
    pub fn filter_expr(&self, ctx: &OrganismContext) -> String {
        self.projection(ctx)
    }

    /// Expression a GROUP BY groups on.
    pub fn group_expr(&self, ctx: &OrganismContext) -> String {
        self.projection(ctx)
    }

    /// ORDER BY fragments in raw-expression form, for single-pass queries.
    /// Composite fields order by their underlying columns.
    pub fn order_fragments_base(&self, ctx: &OrganismContext) -> Vec<String> {
        match self.kind {
            FieldKind::AccessionVersion => vec!["accession".to_string(), "version".to_string()],
            _ => vec![self.projection(ctx)],
        }
    }

    /// ORDER BY fragments in alias form, for the outer half of staged
    /// queries where the field is only visible under its alias.
    pub fn order_fragments_alias(&self) -> Vec<String> {
        match self.kind {
            FieldKind::AccessionVersion => {
                vec![quote_ident("accession"), quote_ident("version")]
            }
            _ => vec![quote_ident(&self.name)],
        }
    }

    /// Joins this field needs, given the organism's policies. Disabled
    /// data-use-terms projections are constants and need no join.
    pub fn joins(&self, ctx: &OrganismContext) -> &'static [Join] {
        match self.kind {
            FieldKind::GroupName => &[Join::Groups],
            FieldKind::DataUseTerms
            | FieldKind::DataUseTermsRestrictedUntil
            | FieldKind::DataUseTermsUrl => {
                if ctx.data_use_terms.enabled {
                    &[Join::DataUseTerms]
                } else {
                    &[]
                }
            }
            _ => &[],
        }
    }
}

fn version_status_expr() -> String {
    format!(
        "CASE \
         WHEN version = MAX(version) OVER (PARTITION BY accession) THEN 'LATEST_VERSION' \
         WHEN EXISTS (\
         SELECT 1 FROM {BASE_TABLE} later \
         WHERE later.accession = {BASE_TABLE}.accession \
         AND later.version > {BASE_TABLE}.version \
         AND later.is_revocation \
         AND later.released_at IS NOT NULL\
         ) THEN 'REVOKED' \
         ELSE 'REVISED' END"
    )
}

fn earliest_release_date_expr(ctx: &OrganismContext) -> String {
    // Later versions inherit the earliest of all prior and current
    // release-triggering timestamps, hence the running MIN over versions.
    let mut sources = vec!["released_at".to_string()];
    if ctx.earliest_release_date.enabled {
        for field in &ctx.earliest_release_date.external_fields {
            sources.push(format!(
                "(joint_metadata -> 'metadata' ->> '{}')::timestamp",
                escape_json_key(field)
            ));
        }
    }
    let least = if sources.len() == 1 {
        sources.remove(0)
    } else {
        format!("LEAST({})", sources.join(", "))
    };
    format!(
        "to_char(LEAST({least}, MIN({least}) OVER \
         (PARTITION BY accession ORDER BY version ROWS UNBOUNDED PRECEDING)), 'YYYY-MM-DD')"
    )
}

/// Doubles single quotes so a metadata key or segment name can be embedded
/// as a JSON path literal. Field names are never interpolated unescaped.
pub fn escape_json_key(key: &str) -> String {
    key.replace('\'', "''")
}

/// Renders a trusted configuration string as a SQL string literal.
pub fn sql_string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quotes an identifier, doubling embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

//-----------------------------------------------------------------------------

/// The process-lifetime field registry.
///
/// Registered entries are fixed at startup. Metadata-field definitions are
/// synthesized on first use and memoized; entries are pure functions of the
/// name, so concurrent insert-if-absent is idempotent.
pub struct FieldRegistry {
    computed: HashMap<String, Arc<FieldDefinition>>,
    metadata_cache: RwLock<HashMap<String, Arc<FieldDefinition>>>,
}

/// Field names a details query projects when no explicit selection is given,
/// in addition to the organism's schema metadata fields.
pub const DISPLAY_FIELDS: &[&str] = &[
    "accession",
    "version",
    "accessionVersion",
    "displayName",
    "submitter",
    "groupId",
    "groupName",
    "submissionId",
    "isRevocation",
    "versionComment",
    "submittedDate",
    "submittedAtTimestamp",
    "releasedDate",
    "releasedAtTimestamp",
    "versionStatus",
    "earliestReleaseDate",
    "dataUseTerms",
    "dataUseTermsRestrictedUntil",
    "dataUseTermsUrl",
];

impl FieldRegistry {
    fn new() -> Self {
        use FieldKind::*;
        let defs = [
            FieldDefinition::registered("accession", DirectColumn("accession"), false, &[]),
            FieldDefinition::registered("version", DirectColumn("version"), false, &[]),
            FieldDefinition::registered("submitter", DirectColumn("submitter"), false, &[]),
            FieldDefinition::registered("submissionId", DirectColumn("submission_id"), false, &[]),
            FieldDefinition::registered("groupId", DirectColumn("group_id"), false, &[]),
            FieldDefinition::registered("isRevocation", DirectColumn("is_revocation"), false, &[]),
            FieldDefinition::registered(
                "versionComment",
                DirectColumn("version_comment"),
                false,
                &[],
            ),
            FieldDefinition::registered(
                "accessionVersion",
                AccessionVersion,
                false,
                &["accession", "version"],
            ),
            FieldDefinition::registered(
                "displayName",
                AccessionVersion,
                false,
                &["accession", "version"],
            ),
            FieldDefinition::registered(
                "submittedDate",
                Timestamp {
                    column: "submitted_at",
                    form: DateForm::DateOnly,
                },
                false,
                &[],
            ),
            FieldDefinition::registered(
                "releasedDate",
                Timestamp {
                    column: "released_at",
                    form: DateForm::DateOnly,
                },
                false,
                &[],
            ),
            FieldDefinition::registered(
                "submittedAtTimestamp",
                Timestamp {
                    column: "submitted_at",
                    form: DateForm::EpochSeconds,
                },
                false,
                &[],
            ),
            FieldDefinition::registered(
                "releasedAtTimestamp",
                Timestamp {
                    column: "released_at",
                    form: DateForm::EpochSeconds,
                },
                false,
                &[],
            ),
            FieldDefinition::registered("versionStatus", VersionStatus, true, &[]),
            FieldDefinition::registered("earliestReleaseDate", EarliestReleaseDate, true, &[]),
            FieldDefinition::registered("groupName", GroupName, false, &[]),
            FieldDefinition::registered("dataUseTerms", DataUseTerms, false, &[]),
            FieldDefinition::registered(
                "dataUseTermsRestrictedUntil",
                DataUseTermsRestrictedUntil,
                false,
                &[],
            ),
            FieldDefinition::registered("dataUseTermsUrl", DataUseTermsUrl, false, &[]),
        ];

        let mut computed = HashMap::new();
        for def in defs {
            computed.insert(def.name.clone(), def);
        }

        FieldRegistry {
            computed,
            metadata_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves a field name. Total: unregistered names become metadata-JSON
    /// lookups, memoized per name for the process lifetime.
    pub fn resolve(&self, name: &str) -> Arc<FieldDefinition> {
        if let Some(def) = self.computed.get(name) {
            return Arc::clone(def);
        }
        {
            let cache = self
                .metadata_cache
                .read()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(def) = cache.get(name) {
                return Arc::clone(def);
            }
        }
        let def = Arc::new(FieldDefinition::metadata(name));
        let mut cache = self
            .metadata_cache
            .write()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(cache.entry(name.to_string()).or_insert(def))
    }

    /// True if the name belongs to the closed computed set.
    pub fn is_registered(&self, name: &str) -> bool {
        self.computed.contains_key(name)
    }
}

/// The shared registry instance.
pub fn registry() -> &'static FieldRegistry {
    static REGISTRY: OnceLock<FieldRegistry> = OnceLock::new();
    REGISTRY.get_or_init(FieldRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataUseTermsPolicy;

    fn ctx() -> OrganismContext {
        OrganismContext::new("west-nile")
    }

    #[test]
    fn test_unregistered_name_resolves_to_metadata_lookup() {
        let def = registry().resolve("geoLocCountry");
        assert_eq!(
            def.projection(&ctx()),
            "joint_metadata -> 'metadata' ->> 'geoLocCountry'"
        );
        assert!(!def.requires_staging);
    }

    #[test]
    fn test_metadata_definitions_are_memoized() {
        let first = registry().resolve("someAdHocField");
        let second = registry().resolve("someAdHocField");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_json_key_is_escaped() {
        let def = registry().resolve("bad'key");
        assert_eq!(
            def.projection(&ctx()),
            "joint_metadata -> 'metadata' ->> 'bad''key'"
        );
    }

    #[test]
    fn test_staging_fields() {
        assert!(registry().resolve("versionStatus").requires_staging);
        assert!(registry().resolve("earliestReleaseDate").requires_staging);
        assert!(!registry().resolve("accession").requires_staging);
        assert!(!registry().resolve("groupName").requires_staging);
    }

    #[test]
    fn test_accession_version_orders_by_underlying_pair() {
        let def = registry().resolve("accessionVersion");
        assert_eq!(def.order_dependencies, &["accession", "version"]);
        assert_eq!(def.order_fragments_base(&ctx()), vec!["accession", "version"]);
        assert_eq!(
            def.order_fragments_alias(),
            vec!["\"accession\"", "\"version\""]
        );
    }

    #[test]
    fn test_data_use_terms_disabled_is_constant_without_join() {
        let def = registry().resolve("dataUseTerms");
        let disabled = ctx();
        assert_eq!(def.projection(&disabled), "'OPEN'");
        assert!(def.joins(&disabled).is_empty());

        let mut enabled = ctx();
        enabled.data_use_terms = DataUseTermsPolicy {
            enabled: true,
            open_url: None,
            restricted_url: None,
        };
        assert!(def.projection(&enabled).starts_with("CASE WHEN"));
        assert_eq!(def.joins(&enabled), &[Join::DataUseTerms]);
    }

    #[test]
    fn test_earliest_release_date_includes_external_fields() {
        let def = registry().resolve("earliestReleaseDate");
        let mut ctx = ctx();
        ctx.earliest_release_date.enabled = true;
        ctx.earliest_release_date.external_fields = vec!["ncbiReleaseDate".to_string()];
        let expr = def.projection(&ctx);
        assert!(expr.contains("LEAST(released_at, (joint_metadata -> 'metadata' ->> 'ncbiReleaseDate')::timestamp)"));
        assert!(expr.contains("ROWS UNBOUNDED PRECEDING"));

        // Disabled policy degrades to released_at alone.
        let plain = def.projection(&OrganismContext::new("x"));
        assert!(!plain.contains("ncbiReleaseDate"));
        assert!(plain.contains("MIN(released_at) OVER"));
    }

    #[test]
    fn test_version_status_expr_classifies_three_ways() {
        let expr = registry().resolve("versionStatus").projection(&ctx());
        assert!(expr.contains("'LATEST_VERSION'"));
        assert!(expr.contains("'REVOKED'"));
        assert!(expr.contains("'REVISED'"));
        assert!(expr.contains("MAX(version) OVER (PARTITION BY accession)"));
    }
}
