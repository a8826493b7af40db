//! AWS-backed client implementations.
//!
//! Thin wrappers over the AWS SDK clients that translate SDK errors into
//! [`ClientError`] so callers can react to throttling and missing entities
//! without knowing the SDK's error shapes.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_glue::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_glue::types::{
    Column as GlueColumn, DatabaseInput, ExecutionProperty, JobCommand, SerDeInfo,
    StorageDescriptor, TableInput, WorkerType,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::clients::{
    CatalogueClient, ClientError, DatabaseEntry, ExecutionClient, JobDefinition,
    ObjectStoreClient, QueryClient, QueryStatus, RunStatus,
};

/// Map an SDK error onto [`ClientError`] by inspecting its error code.
fn classify<E, R>(operation: &'static str, entity: &str, err: SdkError<E, R>) -> ClientError
where
    SdkError<E, R>: ProvideErrorMetadata + std::fmt::Display,
{
    let code = err.code().unwrap_or_default().to_string();
    let message = match err.message() {
        Some(message) => message.to_string(),
        None => err.to_string(),
    };
    debug!(operation, %code, "service call failed");
    if code.contains("Throttling") || code.contains("TooManyRequests") {
        ClientError::Throttling(message)
    } else if code.contains("NotFound") {
        ClientError::NotFound {
            entity: entity.to_string(),
        }
    } else {
        ClientError::Service { operation, message }
    }
}

fn string_map(map: &BTreeMap<String, String>) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Glue Data Catalog client.
#[derive(Debug, Clone)]
pub struct GlueCatalogue {
    client: aws_sdk_glue::Client,
}

impl GlueCatalogue {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_glue::Client::new(config),
        }
    }
}

#[async_trait]
impl CatalogueClient for GlueCatalogue {
    async fn create_database(&self, name: &str, description: &str) -> Result<(), ClientError> {
        let input = DatabaseInput::builder()
            .name(name)
            .description(description)
            .build()
            .map_err(|e| ClientError::InvalidDefinition(e.to_string()))?;
        self.client
            .create_database()
            .database_input(input)
            .send()
            .await
            .map_err(|e| classify("create_database", name, e))?;
        Ok(())
    }

    async fn update_database(&self, name: &str, description: &str) -> Result<(), ClientError> {
        let input = DatabaseInput::builder()
            .name(name)
            .description(description)
            .build()
            .map_err(|e| ClientError::InvalidDefinition(e.to_string()))?;
        self.client
            .update_database()
            .name(name)
            .database_input(input)
            .send()
            .await
            .map_err(|e| classify("update_database", name, e))?;
        Ok(())
    }

    async fn delete_database(&self, name: &str) -> Result<bool, ClientError> {
        match self.client.delete_database().name(name).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = classify("delete_database", name, e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn create_table(
        &self,
        database: &str,
        definition: &Value,
    ) -> Result<(), ClientError> {
        let input = table_input_from_value(definition)?;
        self.client
            .create_table()
            .database_name(database)
            .table_input(input)
            .send()
            .await
            .map_err(|e| classify("create_table", database, e))?;
        Ok(())
    }

    async fn update_table(
        &self,
        database: &str,
        definition: &Value,
    ) -> Result<(), ClientError> {
        let input = table_input_from_value(definition)?;
        self.client
            .update_table()
            .database_name(database)
            .table_input(input)
            .send()
            .await
            .map_err(|e| classify("update_table", database, e))?;
        Ok(())
    }

    async fn table_exists(&self, database: &str, table: &str) -> Result<bool, ClientError> {
        match self
            .client
            .get_table()
            .database_name(database)
            .name(table)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = classify("get_table", table, e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn get_database(&self, name: &str) -> Result<DatabaseEntry, ClientError> {
        let out = self
            .client
            .get_database()
            .name(name)
            .send()
            .await
            .map_err(|e| classify("get_database", name, e))?;
        let database = out.database().ok_or_else(|| ClientError::NotFound {
            entity: name.to_string(),
        })?;
        Ok(DatabaseEntry {
            name: database.name().to_string(),
            description: database.description().unwrap_or_default().to_string(),
            location_uri: database.location_uri().map(|s| s.to_string()),
        })
    }

    async fn get_tables(&self, database: &str) -> Result<Vec<Value>, ClientError> {
        let mut out = Vec::new();
        let mut pages = self
            .client
            .get_tables()
            .database_name(database)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| classify("get_tables", database, e))?;
            for table in page.table_list() {
                out.push(table_to_value(table));
            }
        }
        Ok(out)
    }
}

/// Convert a compiled table definition into the SDK's `TableInput`.
fn table_input_from_value(def: &Value) -> Result<TableInput, ClientError> {
    let name = def["Name"]
        .as_str()
        .ok_or_else(|| ClientError::InvalidDefinition("table definition missing Name".into()))?;
    let sd = &def["StorageDescriptor"];

    let mut columns = Vec::new();
    for raw in sd["Columns"].as_array().into_iter().flatten() {
        columns.push(glue_column(raw)?);
    }

    let mut serde_info = SerDeInfo::builder();
    if let Some(library) = sd["SerdeInfo"]["SerializationLibrary"].as_str() {
        serde_info = serde_info.serialization_library(library);
    }
    if let Some(params) = sd["SerdeInfo"]["Parameters"].as_object() {
        for (key, value) in params {
            serde_info = serde_info.parameters(key, value.as_str().unwrap_or_default());
        }
    }

    let mut storage = StorageDescriptor::builder()
        .set_columns(Some(columns))
        .serde_info(serde_info.build())
        .compressed(sd["Compressed"].as_bool().unwrap_or(false))
        .number_of_buckets(sd["NumberOfBuckets"].as_i64().unwrap_or(-1) as i32)
        .stored_as_sub_directories(sd["StoredAsSubDirectories"].as_bool().unwrap_or(false));
    if let Some(location) = sd["Location"].as_str() {
        storage = storage.location(location);
    }
    if let Some(input_format) = sd["InputFormat"].as_str() {
        storage = storage.input_format(input_format);
    }
    if let Some(output_format) = sd["OutputFormat"].as_str() {
        storage = storage.output_format(output_format);
    }
    if let Some(params) = sd["Parameters"].as_object() {
        for (key, value) in params {
            storage = storage.parameters(key, value.as_str().unwrap_or_default());
        }
    }

    let mut input = TableInput::builder()
        .name(name)
        .storage_descriptor(storage.build());
    if let Some(description) = def["Description"].as_str() {
        input = input.description(description);
    }
    if let Some(owner) = def["Owner"].as_str() {
        input = input.owner(owner);
    }
    if let Some(retention) = def["Retention"].as_i64() {
        input = input.retention(retention as i32);
    }
    if let Some(table_type) = def["TableType"].as_str() {
        input = input.table_type(table_type);
    }
    if let Some(params) = def["Parameters"].as_object() {
        for (key, value) in params {
            input = input.parameters(key, value.as_str().unwrap_or_default());
        }
    }
    if let Some(keys) = def["PartitionKeys"].as_array() {
        let mut partition_keys = Vec::new();
        for raw in keys {
            partition_keys.push(glue_column(raw)?);
        }
        input = input.set_partition_keys(Some(partition_keys));
    }
    input
        .build()
        .map_err(|e| ClientError::InvalidDefinition(e.to_string()))
}

fn glue_column(raw: &Value) -> Result<GlueColumn, ClientError> {
    let name = raw["Name"]
        .as_str()
        .ok_or_else(|| ClientError::InvalidDefinition("column missing Name".into()))?;
    let mut column = GlueColumn::builder().name(name);
    if let Some(data_type) = raw["Type"].as_str() {
        column = column.r#type(data_type);
    }
    if let Some(comment) = raw["Comment"].as_str() {
        column = column.comment(comment);
    }
    column
        .build()
        .map_err(|e| ClientError::InvalidDefinition(e.to_string()))
}

fn table_to_value(table: &aws_sdk_glue::types::Table) -> Value {
    let columns: Vec<Value> = table
        .storage_descriptor()
        .map(|sd| sd.columns().iter().map(column_to_value).collect())
        .unwrap_or_default();
    let partition_keys: Vec<Value> =
        table.partition_keys().iter().map(column_to_value).collect();
    let library = table
        .storage_descriptor()
        .and_then(|sd| sd.serde_info())
        .and_then(|si| si.serialization_library());
    json!({
        "Name": table.name(),
        "Description": table.description().unwrap_or_default(),
        "StorageDescriptor": {
            "Columns": columns,
            "Location": table.storage_descriptor().and_then(|sd| sd.location()),
            "SerdeInfo": {"SerializationLibrary": library},
        },
        "PartitionKeys": partition_keys,
    })
}

fn column_to_value(column: &GlueColumn) -> Value {
    json!({
        "Name": column.name(),
        "Type": column.r#type().unwrap_or("string"),
        "Comment": column.comment().unwrap_or_default(),
    })
}

/// S3 object store client.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
        }
    }
}

#[async_trait]
impl ObjectStoreClient for S3Store {
    async fn upload(&self, local: &Path, bucket: &str, key: &str) -> Result<(), ClientError> {
        let body = aws_sdk_s3::primitives::ByteStream::from_path(local)
            .await
            .map_err(|e| ClientError::Service {
                operation: "upload",
                message: e.to_string(),
            })?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| classify("put_object", key, e))?;
        Ok(())
    }

    async fn delete_by_prefix(&self, bucket: &str, prefix: &str) -> Result<(), ClientError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| classify("list_objects", prefix, e))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    self.client
                        .delete_object()
                        .bucket(bucket)
                        .key(key)
                        .send()
                        .await
                        .map_err(|e| classify("delete_object", key, e))?;
                }
            }
        }
        Ok(())
    }
}

/// Athena query client.
#[derive(Debug, Clone)]
pub struct AthenaQuery {
    client: aws_sdk_athena::Client,
}

impl AthenaQuery {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_athena::Client::new(config),
        }
    }
}

#[async_trait]
impl QueryClient for AthenaQuery {
    async fn start_query(&self, sql: &str, output_location: &str) -> Result<String, ClientError> {
        let config = aws_sdk_athena::types::ResultConfiguration::builder()
            .output_location(output_location)
            .build();
        let out = self
            .client
            .start_query_execution()
            .query_string(sql)
            .result_configuration(config)
            .send()
            .await
            .map_err(|e| classify("start_query_execution", sql, e))?;
        out.query_execution_id()
            .map(|id| id.to_string())
            .ok_or_else(|| ClientError::Service {
                operation: "start_query_execution",
                message: "no execution id returned".into(),
            })
    }

    async fn query_status(&self, execution_id: &str) -> Result<QueryStatus, ClientError> {
        let out = self
            .client
            .get_query_execution()
            .query_execution_id(execution_id)
            .send()
            .await
            .map_err(|e| classify("get_query_execution", execution_id, e))?;
        let status = out
            .query_execution()
            .and_then(|q| q.status())
            .ok_or_else(|| ClientError::Service {
                operation: "get_query_execution",
                message: "no status returned".into(),
            })?;
        Ok(QueryStatus {
            state: status
                .state()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            reason: status.state_change_reason().map(|s| s.to_string()),
        })
    }
}

/// Glue job execution client.
#[derive(Debug, Clone)]
pub struct GlueExecution {
    client: aws_sdk_glue::Client,
}

impl GlueExecution {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_glue::Client::new(config),
        }
    }
}

#[async_trait]
impl ExecutionClient for GlueExecution {
    async fn create_job(&self, definition: &JobDefinition) -> Result<(), ClientError> {
        let command = JobCommand::builder()
            .name("glueetl")
            .script_location(&definition.script_location)
            .python_version(&definition.python_version)
            .build();
        self.client
            .create_job()
            .name(&definition.name)
            .role(&definition.role)
            .command(command)
            .set_default_arguments(Some(string_map(&definition.default_arguments)))
            .max_retries(definition.max_retries)
            .execution_property(
                ExecutionProperty::builder()
                    .max_concurrent_runs(definition.max_concurrent_runs)
                    .build(),
            )
            .worker_type(WorkerType::from(definition.worker_type.as_str()))
            .number_of_workers(definition.number_of_workers)
            .timeout(definition.timeout_minutes)
            .glue_version(&definition.glue_version)
            .set_tags(Some(string_map(&definition.tags)))
            .send()
            .await
            .map_err(|e| classify("create_job", &definition.name, e))?;
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> Result<bool, ClientError> {
        match self.client.delete_job().job_name(name).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = classify("delete_job", name, e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn start_run(
        &self,
        name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<String, ClientError> {
        let out = self
            .client
            .start_job_run()
            .job_name(name)
            .set_arguments(Some(string_map(arguments)))
            .send()
            .await
            .map_err(|e| classify("start_job_run", name, e))?;
        out.job_run_id()
            .map(|id| id.to_string())
            .ok_or_else(|| ClientError::Service {
                operation: "start_job_run",
                message: "no run id returned".into(),
            })
    }

    async fn get_run(&self, name: &str, run_id: &str) -> Result<RunStatus, ClientError> {
        let out = self
            .client
            .get_job_run()
            .job_name(name)
            .run_id(run_id)
            .send()
            .await
            .map_err(|e| classify("get_job_run", run_id, e))?;
        let run = out.job_run().ok_or_else(|| ClientError::NotFound {
            entity: run_id.to_string(),
        })?;
        Ok(RunStatus {
            state: run
                .job_run_state()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            error_message: run.error_message().map(|s| s.to_string()),
            execution_time_seconds: Some(run.execution_time()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_input_from_value_requires_name() {
        let def = json!({"StorageDescriptor": {"Columns": []}});
        assert!(matches!(
            table_input_from_value(&def),
            Err(ClientError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_table_input_from_value_maps_columns() {
        let def = json!({
            "Name": "employees",
            "Description": "HR",
            "TableType": "EXTERNAL_TABLE",
            "StorageDescriptor": {
                "Columns": [{"Name": "id", "Type": "int", "Comment": "pk"}],
                "Location": "s3://bucket/db/employees/",
                "SerdeInfo": {
                    "SerializationLibrary": "org.apache.hadoop.hive.serde2.OpenCSVSerde",
                    "Parameters": {"escapeChar": "\\"}
                }
            },
            "PartitionKeys": [{"Name": "day", "Type": "date", "Comment": ""}]
        });
        let input = table_input_from_value(&def).unwrap();
        assert_eq!(input.name(), "employees");
        let sd = input.storage_descriptor().unwrap();
        assert_eq!(sd.columns().len(), 1);
        assert_eq!(sd.location(), Some("s3://bucket/db/employees/"));
        assert_eq!(input.partition_keys().len(), 1);
    }
}
