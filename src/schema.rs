//! Structural validation of table documents.
//!
//! Table documents are validated against a published JSON Schema. The crate
//! ships an embedded copy of that schema so validation never depends on the
//! network; [`fetch_published_schema`] retrieves the live copy for callers
//! that want to check the embedded one is still current, falling back to the
//! embedded copy if the network is unreachable.

use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Where the published table schema lives.
pub const TABLE_SCHEMA_URL: &str =
    "https://moj-analytical-services.github.io/metadata_schema/table/v1.4.0.json";

static TABLE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../specs/table_schema.json"))
        .expect("embedded table schema is valid JSON")
});

static TABLE_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    jsonschema::validator_for(&TABLE_SCHEMA).expect("embedded table schema compiles")
});

/// A table document failed structural validation.
#[derive(Debug, Clone, Error)]
#[error("table document failed schema validation: {reasons}")]
pub struct SchemaViolation {
    pub reasons: String,
}

/// The embedded table document schema.
pub fn table_schema() -> &'static Value {
    &TABLE_SCHEMA
}

/// Validate a table document against the table schema.
///
/// All violations are accumulated into one error rather than stopping at the
/// first.
pub fn validate_table_document(document: &Value) -> Result<(), SchemaViolation> {
    let reasons: Vec<String> = TABLE_VALIDATOR
        .iter_errors(document)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(SchemaViolation {
            reasons: reasons.join("; "),
        })
    }
}

/// Fetch the published table schema, falling back to the embedded copy when
/// the published location is unreachable.
pub async fn fetch_published_schema() -> Value {
    match fetch_schema_from(TABLE_SCHEMA_URL).await {
        Ok(schema) => schema,
        Err(e) => {
            warn!(
                "could not fetch published table schema ({}); using embedded copy",
                e
            );
            TABLE_SCHEMA.clone()
        }
    }
}

async fn fetch_schema_from(url: &str) -> Result<Value, reqwest::Error> {
    reqwest::get(url).await?.error_for_status()?.json().await
}
