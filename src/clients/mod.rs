//! Service client traits.
//!
//! Every remote interaction goes through one of the traits here so the models
//! and job runner can be exercised against in-process fakes. The AWS-backed
//! implementations live in [`aws`].

pub mod aws;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use aws::{AthenaQuery, GlueCatalogue, GlueExecution, S3Store};

/// Error returned by any service client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The named entity does not exist in the remote service.
    #[error("not found: {entity}")]
    NotFound { entity: String },
    /// The service asked us to back off.
    #[error("throttled: {0}")]
    Throttling(String),
    /// Any other service-side failure.
    #[error("{operation} failed: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },
    /// A definition we produced was rejected before the call was attempted.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
}

impl ClientError {
    pub fn is_throttling(&self) -> bool {
        matches!(self, ClientError::Throttling(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

/// A database entry as returned by the catalogue.
#[derive(Debug, Clone)]
pub struct DatabaseEntry {
    pub name: String,
    pub description: String,
    pub location_uri: Option<String>,
}

/// Status of a submitted query.
#[derive(Debug, Clone)]
pub struct QueryStatus {
    pub state: String,
    pub reason: Option<String>,
}

/// Status of a submitted job run.
#[derive(Debug, Clone)]
pub struct RunStatus {
    pub state: String,
    pub error_message: Option<String>,
    pub execution_time_seconds: Option<i32>,
}

/// Everything needed to register a batch job with the execution service.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub name: String,
    pub role: String,
    pub script_location: String,
    pub temp_dir: String,
    pub default_arguments: BTreeMap<String, String>,
    pub max_retries: i32,
    pub max_concurrent_runs: i32,
    pub worker_type: String,
    pub number_of_workers: i32,
    pub timeout_minutes: i32,
    pub glue_version: String,
    pub python_version: String,
    pub tags: BTreeMap<String, String>,
}

/// Operations against the table catalogue.
#[async_trait]
pub trait CatalogueClient: Send + Sync {
    async fn create_database(&self, name: &str, description: &str) -> Result<(), ClientError>;

    async fn update_database(&self, name: &str, description: &str) -> Result<(), ClientError>;

    /// Returns `false` when the database did not exist.
    async fn delete_database(&self, name: &str) -> Result<bool, ClientError>;

    async fn create_table(
        &self,
        database: &str,
        definition: &serde_json::Value,
    ) -> Result<(), ClientError>;

    async fn update_table(
        &self,
        database: &str,
        definition: &serde_json::Value,
    ) -> Result<(), ClientError>;

    async fn table_exists(&self, database: &str, table: &str) -> Result<bool, ClientError>;

    async fn get_database(&self, name: &str) -> Result<DatabaseEntry, ClientError>;

    async fn get_tables(&self, database: &str) -> Result<Vec<serde_json::Value>, ClientError>;
}

/// Operations against the object store.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn upload(&self, local: &Path, bucket: &str, key: &str) -> Result<(), ClientError>;

    async fn delete_by_prefix(&self, bucket: &str, prefix: &str) -> Result<(), ClientError>;
}

/// Operations against the query service.
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Submit a query; returns the execution id.
    async fn start_query(&self, sql: &str, output_location: &str) -> Result<String, ClientError>;

    async fn query_status(&self, execution_id: &str) -> Result<QueryStatus, ClientError>;
}

/// Operations against the batch execution service.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn create_job(&self, definition: &JobDefinition) -> Result<(), ClientError>;

    /// Returns `false` when the job definition did not exist.
    async fn delete_job(&self, name: &str) -> Result<bool, ClientError>;

    /// Start a run; returns the run id.
    async fn start_run(
        &self,
        name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<String, ClientError>;

    async fn get_run(&self, name: &str, run_id: &str) -> Result<RunStatus, ClientError>;
}
