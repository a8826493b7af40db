//! ETL Metadata SDK - Agnostic table metadata, catalogue compilation and
//! batch job management
//!
//! Provides unified interfaces for:
//! - Agnostic column/table/database metadata with validating setters
//! - A recursive column type grammar and its Glue type mapping
//! - Compiling metadata to Glue Data Catalog table definitions
//! - Creating, updating and reverse-reading catalogue databases
//! - Packaging, submitting and polling Glue batch jobs
//! - Partition repair via Athena

pub mod clients;
pub mod job;
pub mod merge;
pub mod models;
pub mod schema;
pub mod specs;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use clients::{
    AthenaQuery, CatalogueClient, ClientError, DatabaseEntry, ExecutionClient, GlueCatalogue,
    GlueExecution, JobDefinition, ObjectStoreClient, QueryClient, QueryStatus, RunStatus, S3Store,
};
pub use job::poll::{Observation, Outcome, PollPolicy, PollState, Step};
pub use job::{GlueJob, GlueJobBuilder, JobError, WorkerKind};
pub use models::{
    read_database_folder, read_table_json, Column, ColumnUpdate, DataFormat, DatabaseContext,
    DatabaseMeta, MetaError, Sensitivity, TableMeta,
};
pub use types::{TypeError, TypeExpr};
pub use validation::ValidationError;
