//! Table metadata model.
//!
//! [`TableMeta`] holds a table's agnostic description and enforces its
//! invariants through validating setters: column names are unique and
//! well-formed, types parse against the grammar, partition and primary key
//! entries always name real columns, and partition columns sit at the end of
//! the column list in partition order.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::clients::QueryClient;
use crate::merge::merge;
use crate::models::database::DatabaseContext;
use crate::models::{Column, ColumnUpdate, DataFormat, MetaError, Sensitivity};
use crate::schema::{validate_table_document, TABLE_SCHEMA_URL};
use crate::specs::{base_spec, format_spec};
use crate::types;
use crate::validation::{join_path, validate_location, validate_name};

const QUERY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Agnostic metadata for a single table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    #[serde(rename = "$schema", default = "default_schema")]
    schema: String,
    name: String,
    description: String,
    data_format: DataFormat,
    location: String,
    columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    partitions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    glue_specific: Value,
    #[serde(skip)]
    database: Option<DatabaseContext>,
}

fn default_schema() -> String {
    TABLE_SCHEMA_URL.to_string()
}

impl TableMeta {
    /// Create an empty table with the given name and storage location.
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Result<Self, MetaError> {
        let name = name.into();
        let location = location.into();
        validate_name("name", &name)?;
        validate_location(&location)?;
        Ok(Self {
            schema: default_schema(),
            name,
            description: String::new(),
            data_format: DataFormat::Csv,
            location,
            columns: Vec::new(),
            partitions: Vec::new(),
            primary_key: Vec::new(),
            glue_specific: Value::Null,
            database: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn data_format(&self) -> DataFormat {
        self.data_format
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn glue_specific(&self) -> &Value {
        &self.glue_specific
    }

    pub fn database(&self) -> Option<&DatabaseContext> {
        self.database.as_ref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), MetaError> {
        let name = name.into();
        validate_name("name", &name)?;
        self.name = name;
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn set_data_format(&mut self, data_format: DataFormat) {
        self.data_format = data_format;
    }

    pub fn set_location(&mut self, location: impl Into<String>) -> Result<(), MetaError> {
        let location = location.into();
        validate_location(&location)?;
        self.location = location;
        Ok(())
    }

    /// Overrides merged into the compiled catalogue definition last.
    pub fn set_glue_specific(&mut self, glue_specific: Value) {
        self.glue_specific = glue_specific;
    }

    pub(crate) fn set_database(&mut self, context: DatabaseContext) {
        self.database = Some(context);
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Add a column, keeping partition columns at the end of the list.
    pub fn add_column(&mut self, column: Column) -> Result<(), MetaError> {
        column.validate()?;
        if self.columns.iter().any(|c| c.name == column.name) {
            return Err(MetaError::DuplicateColumn(column.name));
        }
        self.columns.push(column);
        self.apply_partition_ordering();
        Ok(())
    }

    /// Remove a column, cascading its removal from partitions and primary key.
    pub fn remove_column(&mut self, name: &str) -> Result<(), MetaError> {
        let index = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| MetaError::UnknownColumn(name.to_string()))?;
        self.columns.remove(index);
        self.partitions.retain(|p| p != name);
        self.primary_key.retain(|k| k != name);
        Ok(())
    }

    /// Apply a partial update to the named column.
    ///
    /// Every populated field is validated before any change is committed, so
    /// a rejected update leaves the table untouched.
    pub fn update_column(&mut self, name: &str, update: ColumnUpdate) -> Result<(), MetaError> {
        update.validate()?;
        if !self.columns.iter().any(|c| c.name == name) {
            return Err(MetaError::UnknownColumn(name.to_string()));
        }
        if let Some(new_name) = &update.name {
            if new_name != name && self.columns.iter().any(|c| &c.name == new_name) {
                return Err(MetaError::DuplicateColumn(new_name.clone()));
            }
        }

        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| MetaError::UnknownColumn(name.to_string()))?;
        if let Some(data_type) = update.data_type {
            column.data_type = data_type;
        }
        if let Some(description) = update.description {
            column.description = description;
        }
        if let Some(nullable) = update.nullable {
            column.nullable = Some(nullable);
        }
        if let Some(values) = update.enum_values {
            column.enum_values = Some(values);
        }
        if let Some(pattern) = update.pattern {
            column.pattern = Some(pattern);
        }
        if let Some(sensitivity) = update.sensitivity {
            column.sensitivity = Some(sensitivity);
        }
        if let Some(redacted) = update.redacted {
            column.redacted = Some(redacted);
        }
        if let Some(new_name) = update.name {
            column.name = new_name.clone();
            for p in &mut self.partitions {
                if p == name {
                    *p = new_name.clone();
                }
            }
            for k in &mut self.primary_key {
                if k == name {
                    *k = new_name.clone();
                }
            }
        }
        Ok(())
    }

    /// Reorder columns to follow `order`. Names in `order` that are not
    /// current columns are ignored, but every current column must appear.
    /// Partition columns are moved back to the end afterwards.
    pub fn reorder_columns(&mut self, order: &[&str]) -> Result<(), MetaError> {
        for column in &self.columns {
            if !order.contains(&column.name.as_str()) {
                return Err(MetaError::MissingColumn(column.name.clone()));
            }
        }
        self.columns.sort_by_key(|c| {
            order
                .iter()
                .position(|n| *n == c.name)
                .unwrap_or(usize::MAX)
        });
        self.apply_partition_ordering();
        Ok(())
    }

    /// Set the partition columns. Each must name an existing column; the
    /// column list is reordered so partitions come last, in the given order,
    /// with the relative order of the remaining columns preserved.
    pub fn set_partitions(&mut self, partitions: &[&str]) -> Result<(), MetaError> {
        for name in partitions {
            if !self.columns.iter().any(|c| &c.name == name) {
                return Err(MetaError::UnknownColumn(name.to_string()));
            }
        }
        self.partitions = partitions.iter().map(|n| n.to_string()).collect();
        self.apply_partition_ordering();
        Ok(())
    }

    /// Set the primary key columns. Each must name an existing column.
    pub fn set_primary_key(&mut self, primary_key: &[&str]) -> Result<(), MetaError> {
        for name in primary_key {
            if !self.columns.iter().any(|c| &c.name == name) {
                return Err(MetaError::UnknownColumn(name.to_string()));
            }
        }
        self.primary_key = primary_key.iter().map(|n| n.to_string()).collect();
        Ok(())
    }

    /// Derived sensitivity of the whole table: the sorted distinct set of
    /// every classified column's sensitivity.
    pub fn sensitivity(&self) -> Vec<Sensitivity> {
        let mut out: Vec<Sensitivity> =
            self.columns.iter().filter_map(|c| c.sensitivity).collect();
        out.sort();
        out.dedup();
        out
    }

    fn apply_partition_ordering(&mut self) {
        if self.partitions.is_empty() {
            return;
        }
        let mut data: Vec<Column> = Vec::with_capacity(self.columns.len());
        let mut parts: Vec<Column> = Vec::new();
        for column in self.columns.drain(..) {
            if self.partitions.contains(&column.name) {
                parts.push(column);
            } else {
                data.push(column);
            }
        }
        parts.sort_by_key(|c| self.partitions.iter().position(|p| *p == c.name));
        data.extend(parts);
        self.columns = data;
    }

    fn non_partition_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(move |c| !self.partitions.contains(&c.name))
    }

    /// Compile this table to its catalogue (Glue `TableInput`) definition.
    ///
    /// The layers merge in order: base template, format template, fields
    /// derived from this table, then `glue_specific` overrides last.
    pub fn glue_table_definition(
        &self,
        full_database_path: Option<&str>,
    ) -> Result<Value, MetaError> {
        let mut spec = merge(&base_spec(), &format_spec(self.data_format));

        spec["Name"] = json!(self.name);
        spec["Description"] = json!(self.description);

        let glue_columns: Vec<Value> = self
            .non_partition_columns()
            .map(|c| {
                Ok(json!({
                    "Name": c.name,
                    "Type": types::to_glue_type(&c.data_type)?,
                    "Comment": c.description,
                }))
            })
            .collect::<Result<_, MetaError>>()?;
        spec["StorageDescriptor"]["Columns"] = Value::Array(glue_columns);

        let base_path = match full_database_path {
            Some(path) => path.to_string(),
            None => self
                .database
                .as_ref()
                .map(DatabaseContext::s3_database_path)
                .ok_or(MetaError::MissingLocationContext)?,
        };
        spec["StorageDescriptor"]["Location"] = json!(join_path(&base_path, &self.location));

        if !self.partitions.is_empty() {
            let keys: Vec<Value> = self
                .partitions
                .iter()
                .map(|name| {
                    let column = self
                        .column(name)
                        .ok_or_else(|| MetaError::UnknownColumn(name.clone()))?;
                    Ok(json!({
                        "Name": column.name,
                        "Type": types::to_glue_type(&column.data_type)?,
                        "Comment": column.description,
                    }))
                })
                .collect::<Result<_, MetaError>>()?;
            spec["PartitionKeys"] = Value::Array(keys);
        }

        if self.data_format == DataFormat::Json {
            let paths: Vec<&str> = self.non_partition_columns().map(|c| c.name.as_str()).collect();
            spec["StorageDescriptor"]["SerdeInfo"]["Parameters"]["paths"] =
                json!(paths.join(","));
        }

        if !self.glue_specific.is_null() {
            spec = merge(&spec, &self.glue_specific);
        }
        Ok(spec)
    }

    /// Repair the catalogue's partition listing for this table by running
    /// `MSCK REPAIR TABLE` and polling until the query settles.
    ///
    /// A table without partitions has nothing to repair, so this returns
    /// immediately without issuing a query. The staging location and
    /// database name default to the owning database's scratch folder and
    /// name when not given.
    pub async fn refresh_partitions(
        &self,
        query: &dyn QueryClient,
        output_location: Option<&str>,
        database_name: Option<&str>,
        timeout: Duration,
    ) -> Result<(), MetaError> {
        if self.partitions.is_empty() {
            return Ok(());
        }
        let context = self.database.as_ref();
        let output_location = match output_location {
            Some(location) => location.to_string(),
            None => context
                .map(DatabaseContext::s3_athena_temp_folder)
                .ok_or(MetaError::MissingStagingLocation)?,
        };
        let database_name = match database_name {
            Some(name) => name,
            None => context
                .map(|c| c.name.as_str())
                .ok_or(MetaError::MissingDatabaseName)?,
        };
        let sql = format!("MSCK REPAIR TABLE {database_name}.{}", self.name);
        info!(table = %self.name, "repairing partitions");
        let execution_id = query.start_query(&sql, &output_location).await?;

        let mut waited = Duration::ZERO;
        loop {
            let status = query.query_status(&execution_id).await?;
            match status.state.as_str() {
                "SUCCEEDED" => return Ok(()),
                "QUEUED" | "RUNNING" => {}
                "FAILED" | "CANCELLED" => {
                    return Err(MetaError::QueryFailed(
                        status.reason.unwrap_or_else(|| status.state.clone()),
                    ))
                }
                other => return Err(MetaError::UnexpectedQueryState(other.to_string())),
            }
            if waited >= timeout {
                return Err(MetaError::QueryTimeout(timeout.as_secs()));
            }
            tokio::time::sleep(QUERY_POLL_INTERVAL).await;
            waited += QUERY_POLL_INTERVAL;
        }
    }

    /// Check structural invariants of a deserialized table.
    pub fn validate(&self) -> Result<(), MetaError> {
        validate_name("name", &self.name)?;
        validate_location(&self.location)?;
        let mut seen: Vec<&str> = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            column.validate()?;
            if seen.contains(&column.name.as_str()) {
                return Err(MetaError::DuplicateColumn(column.name.clone()));
            }
            seen.push(&column.name);
        }
        for name in self.partitions.iter().chain(self.primary_key.iter()) {
            if !seen.contains(&name.as_str()) {
                return Err(MetaError::UnknownColumn(name.clone()));
            }
        }
        Ok(())
    }

    /// Serialize to the agnostic JSON document form.
    pub fn to_value(&self) -> Result<Value, MetaError> {
        serde_json::to_value(self).map_err(|e| MetaError::Document(e.to_string()))
    }

    /// Deserialize from an agnostic JSON document, validating against the
    /// table schema first and the structural invariants after.
    pub fn from_value(value: &Value) -> Result<Self, MetaError> {
        validate_table_document(value)?;
        let mut table: TableMeta =
            serde_json::from_value(value.clone()).map_err(|e| MetaError::Document(e.to_string()))?;
        table.validate()?;
        table.apply_partition_ordering();
        Ok(table)
    }

    /// Write the table document as pretty-printed JSON.
    pub fn write_to_json(&self, path: impl AsRef<Path>) -> Result<(), MetaError> {
        let value = self.to_value()?;
        let text =
            serde_json::to_string_pretty(&value).map_err(|e| MetaError::Document(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Read a table document from a JSON file.
pub fn read_table_json(path: impl AsRef<Path>) -> Result<TableMeta, MetaError> {
    let text = std::fs::read_to_string(path)?;
    let value: Value =
        serde_json::from_str(&text).map_err(|e| MetaError::Document(e.to_string()))?;
    TableMeta::from_value(&value)
}
