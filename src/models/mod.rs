//! Metadata models.
//!
//! Defines the agnostic table and database entities plus the shared error
//! type for metadata operations. Entities validate their own invariants on
//! construction and after every mutation — there is no reliance on callers
//! keeping state consistent.

pub mod column;
pub mod database;
pub mod table;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clients::ClientError;
use crate::schema::SchemaViolation;
use crate::types::TypeError;
use crate::validation::ValidationError;

pub use column::{Column, ColumnUpdate, Sensitivity};
pub use database::{read_database_folder, DatabaseContext, DatabaseMeta};
pub use table::{read_table_json, TableMeta};

/// Supported table data formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Avro,
    Csv,
    CsvQuotedNodate,
    Regex,
    Orc,
    #[serde(alias = "par")]
    Parquet,
    Json,
}

impl DataFormat {
    pub const ALL: [DataFormat; 7] = [
        DataFormat::Avro,
        DataFormat::Csv,
        DataFormat::CsvQuotedNodate,
        DataFormat::Regex,
        DataFormat::Orc,
        DataFormat::Parquet,
        DataFormat::Json,
    ];

    /// Name of the embedded catalogue template for this format.
    pub(crate) fn spec_name(self) -> &'static str {
        match self {
            DataFormat::Avro => "avro",
            DataFormat::Csv => "csv",
            DataFormat::CsvQuotedNodate => "csv_quoted_nodate",
            DataFormat::Regex => "regex",
            DataFormat::Orc => "orc",
            DataFormat::Parquet => "parquet",
            DataFormat::Json => "json",
        }
    }
}

/// One column whose type disagrees across tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTypeMismatch {
    /// Column name shared by more than one table
    pub column: String,
    /// Every (table, type) occurrence of the column
    pub occurrences: Vec<(String, String)>,
}

/// Errors from metadata operations.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InvalidType(#[from] TypeError),

    #[error(transparent)]
    Schema(#[from] SchemaViolation),

    #[error("column `{0}` already exists in table")]
    DuplicateColumn(String),

    #[error("column `{0}` does not exist in table")]
    UnknownColumn(String),

    #[error("no recognised column fields were specified")]
    NoFieldsSpecified,

    #[error("column order is missing existing column `{0}`")]
    MissingColumn(String),

    #[error("table `{0}` already exists in database")]
    DuplicateTable(String),

    #[error("table `{0}` does not exist in database")]
    UnknownTable(String),

    #[error("a full database path or an owning database is required to compile the definition")]
    MissingLocationContext,

    #[error("a staging location or an owning database is required to run the query")]
    MissingStagingLocation,

    #[error("a database name or an owning database is required to run the query")]
    MissingDatabaseName,

    #[error("column types do not align across tables: {}", format_mismatches(.0))]
    ColumnTypeMismatches(Vec<ColumnTypeMismatch>),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("query entered unexpected state `{0}`")]
    UnexpectedQueryState(String),

    #[error("query did not complete within {0} seconds")]
    QueryTimeout(u64),

    #[error("invalid metadata document: {0}")]
    Document(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_mismatches(mismatches: &[ColumnTypeMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| {
            let occurrences: Vec<String> = m
                .occurrences
                .iter()
                .map(|(table, ty)| format!("{}={}", table, ty))
                .collect();
            format!("{} [{}]", m.column, occurrences.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}
