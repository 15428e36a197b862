//! # sq-engine: The Compiler
//!
//! Compiles declarative query requests — filters, grouping, ordering, field
//! selection, pagination — into parameterized Postgres SQL over the
//! released-sequence view of a genomic sequence database.
//!
//! The crate is pure: no I/O, no database handles, no failure modes.
//! [`build_aggregated_query`], [`build_details_query`] and
//! [`build_sequence_query`] (plus the insertion and aligned-metadata
//! shapes) each take a [`QueryRequest`] and an [`OrganismContext`] and
//! return a [`CompiledQuery`] holding SQL text and named bind parameters.
//! Filter values never appear in the SQL text; unknown field names degrade
//! to JSONB metadata lookups instead of erroring.

pub mod bind;
pub mod fields;
pub mod request;
pub mod resolve;
pub mod schema;
pub mod synth;

pub use bind::{BindValue, ParamBinder};
pub use fields::{registry, FieldDefinition, FieldRegistry, Join, BASE_TABLE, DISPLAY_FIELDS};
pub use request::{FilterValue, OrderByField, OrderDirection, QueryRequest};
pub use resolve::FilterOp;
pub use schema::{DataUseTermsPolicy, EarliestReleaseDatePolicy, OrganismContext};
pub use synth::{
    all_details_fields, build_aggregated_query, build_aligned_metadata_query,
    build_details_query, build_insertions_query, build_sequence_query, CompiledQuery,
    InsertionKind, SequenceSelector, SequenceSource,
};
