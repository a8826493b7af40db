//! Database metadata model.
//!
//! A [`DatabaseMeta`] is a named collection of [`TableMeta`] plus the storage
//! coordinates (bucket and base folder) every table location resolves
//! against. It also carries the catalogue synchronisation operations:
//! create, update, delete and reverse-read from the remote catalogue.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::clients::{CatalogueClient, ObjectStoreClient, QueryClient};
use crate::models::table::{read_table_json, TableMeta};
use crate::models::{Column, ColumnTypeMismatch, DataFormat, MetaError};
use crate::types;
use crate::validation::{end_with_slash, validate_bucket_name, validate_location, validate_name};

const DATABASE_FILE: &str = "database.json";
const ATHENA_TEMP_FOLDER: &str = "__temp_athena__";

/// Storage coordinates a table inherits from its database.
///
/// A plain value copied into each table on [`DatabaseMeta::add_table`], so
/// tables can resolve their full location without holding a reference back
/// to the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseContext {
    pub name: String,
    pub bucket: String,
    pub base_folder: String,
}

impl DatabaseContext {
    /// Full object store path of the database, e.g. `s3://bucket/folder/`.
    pub fn s3_database_path(&self) -> String {
        format!("s3://{}/{}", self.bucket, end_with_slash(&self.base_folder))
    }

    /// Scratch output location for query executions.
    pub fn s3_athena_temp_folder(&self) -> String {
        format!("s3://{}/{ATHENA_TEMP_FOLDER}/", self.bucket)
    }
}

/// Agnostic metadata for a database and its tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseMeta {
    name: String,
    bucket: String,
    base_folder: String,
    #[serde(default)]
    description: String,
    #[serde(skip)]
    tables: Vec<TableMeta>,
}

impl DatabaseMeta {
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        base_folder: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, MetaError> {
        let name = name.into();
        let bucket = bucket.into();
        let base_folder = base_folder.into();
        validate_name("name", &name)?;
        validate_bucket_name(&bucket)?;
        validate_location(&base_folder)?;
        Ok(Self {
            name,
            bucket,
            base_folder,
            description: description.into(),
            tables: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn base_folder(&self) -> &str {
        &self.base_folder
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), MetaError> {
        let name = name.into();
        validate_name("name", &name)?;
        self.name = name;
        self.refresh_contexts();
        Ok(())
    }

    pub fn set_bucket(&mut self, bucket: impl Into<String>) -> Result<(), MetaError> {
        let bucket = bucket.into();
        validate_bucket_name(&bucket)?;
        self.bucket = bucket;
        self.refresh_contexts();
        Ok(())
    }

    pub fn set_base_folder(&mut self, base_folder: impl Into<String>) -> Result<(), MetaError> {
        let base_folder = base_folder.into();
        validate_location(&base_folder)?;
        self.base_folder = base_folder;
        self.refresh_contexts();
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn context(&self) -> DatabaseContext {
        DatabaseContext {
            name: self.name.clone(),
            bucket: self.bucket.clone(),
            base_folder: self.base_folder.clone(),
        }
    }

    pub fn s3_database_path(&self) -> String {
        self.context().s3_database_path()
    }

    pub fn s3_athena_temp_folder(&self) -> String {
        self.context().s3_athena_temp_folder()
    }

    fn refresh_contexts(&mut self) {
        let context = DatabaseContext {
            name: self.name.clone(),
            bucket: self.bucket.clone(),
            base_folder: self.base_folder.clone(),
        };
        for table in &mut self.tables {
            table.set_database(context.clone());
        }
    }

    pub fn tables(&self) -> &[TableMeta] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name()).collect()
    }

    pub fn table(&self, name: &str) -> Result<&TableMeta, MetaError> {
        self.tables
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| MetaError::UnknownTable(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut TableMeta, MetaError> {
        self.tables
            .iter_mut()
            .find(|t| t.name() == name)
            .ok_or_else(|| MetaError::UnknownTable(name.to_string()))
    }

    /// Attach a table, wiring the database context into it.
    pub fn add_table(&mut self, mut table: TableMeta) -> Result<(), MetaError> {
        if self.tables.iter().any(|t| t.name() == table.name()) {
            return Err(MetaError::DuplicateTable(table.name().to_string()));
        }
        if table.database().is_none() {
            table.set_database(self.context());
        }
        self.tables.push(table);
        Ok(())
    }

    pub fn remove_table(&mut self, name: &str) -> Result<TableMeta, MetaError> {
        let index = self
            .tables
            .iter()
            .position(|t| t.name() == name)
            .ok_or_else(|| MetaError::UnknownTable(name.to_string()))?;
        Ok(self.tables.remove(index))
    }

    /// Check that columns sharing a name across tables share a type too.
    ///
    /// All mismatches are accumulated and reported together rather than
    /// stopping at the first.
    pub fn test_column_types_align(&self, exclude: &[&str]) -> Result<(), MetaError> {
        let mut mismatches: Vec<ColumnTypeMismatch> = Vec::new();
        let mut seen: Vec<(&str, Vec<(&str, &str)>)> = Vec::new();
        for table in &self.tables {
            for column in table.columns() {
                if exclude.contains(&column.name.as_str()) {
                    continue;
                }
                match seen.iter_mut().find(|(name, _)| *name == column.name) {
                    Some((_, occurrences)) => {
                        occurrences.push((table.name(), column.data_type.as_str()))
                    }
                    None => seen.push((
                        &column.name,
                        vec![(table.name(), column.data_type.as_str())],
                    )),
                }
            }
        }
        for (name, occurrences) in seen {
            let first = occurrences[0].1;
            if occurrences.iter().any(|(_, ty)| *ty != first) {
                mismatches.push(ColumnTypeMismatch {
                    column: name.to_string(),
                    occurrences: occurrences
                        .iter()
                        .map(|(t, ty)| (t.to_string(), ty.to_string()))
                        .collect(),
                });
            }
        }
        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(MetaError::ColumnTypeMismatches(mismatches))
        }
    }

    /// Register the database and every table in the catalogue. Stops on the
    /// first failure.
    pub async fn create_catalogue_database(
        &self,
        catalogue: &dyn CatalogueClient,
        delete_if_exists: bool,
    ) -> Result<(), MetaError> {
        if delete_if_exists {
            self.delete_catalogue_database(catalogue).await?;
        }
        info!(database = %self.name, "creating catalogue database");
        catalogue.create_database(&self.name, &self.description).await?;
        let base_path = self.s3_database_path();
        for table in &self.tables {
            let definition = table.glue_table_definition(Some(&base_path))?;
            catalogue.create_table(&self.name, &definition).await?;
        }
        Ok(())
    }

    /// Upsert the database and tables in the catalogue.
    ///
    /// When `update_tables_if_exist` is false, existing tables are left
    /// untouched and only new ones are created.
    pub async fn update_catalogue_database(
        &self,
        catalogue: &dyn CatalogueClient,
        update_tables_if_exist: bool,
    ) -> Result<(), MetaError> {
        match catalogue.update_database(&self.name, &self.description).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                catalogue.create_database(&self.name, &self.description).await?;
            }
            Err(e) => return Err(e.into()),
        }
        let base_path = self.s3_database_path();
        for table in &self.tables {
            let definition = table.glue_table_definition(Some(&base_path))?;
            if catalogue.table_exists(&self.name, table.name()).await? {
                if update_tables_if_exist {
                    catalogue.update_table(&self.name, &definition).await?;
                } else {
                    info!(table = %table.name(), "table exists, skipping");
                }
            } else {
                catalogue.create_table(&self.name, &definition).await?;
            }
        }
        Ok(())
    }

    /// Remove the database from the catalogue. Returns `false` when it did
    /// not exist; absence is not an error.
    pub async fn delete_catalogue_database(
        &self,
        catalogue: &dyn CatalogueClient,
    ) -> Result<bool, MetaError> {
        match catalogue.delete_database(&self.name).await {
            Ok(existed) => Ok(existed),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the stored data under the database's base path.
    ///
    /// With `tables_only`, each table's own location prefix is deleted and
    /// anything else under the base folder is left alone.
    pub async fn delete_data_in_database(
        &self,
        store: &dyn ObjectStoreClient,
        tables_only: bool,
    ) -> Result<(), MetaError> {
        if tables_only {
            for table in &self.tables {
                let prefix = format!(
                    "{}{}",
                    end_with_slash(&self.base_folder),
                    table.location()
                );
                warn!(bucket = %self.bucket, %prefix, "deleting table data");
                store.delete_by_prefix(&self.bucket, &prefix).await?;
            }
        } else {
            let prefix = end_with_slash(&self.base_folder);
            warn!(bucket = %self.bucket, %prefix, "deleting database data");
            store.delete_by_prefix(&self.bucket, &prefix).await?;
        }
        Ok(())
    }

    /// Repair partitions for every partitioned table.
    pub async fn refresh_all_table_partitions(
        &self,
        query: &dyn QueryClient,
        timeout: Duration,
    ) -> Result<(), MetaError> {
        let output = self.s3_athena_temp_folder();
        for table in &self.tables {
            table
                .refresh_partitions(query, Some(&output), Some(&self.name), timeout)
                .await?;
        }
        Ok(())
    }

    /// Reverse-read a database out of the catalogue into agnostic metadata.
    pub async fn from_catalogue(
        catalogue: &dyn CatalogueClient,
        name: &str,
        bucket: &str,
        base_folder: &str,
    ) -> Result<Self, MetaError> {
        let entry = catalogue.get_database(name).await?;
        let mut database = DatabaseMeta::new(name, bucket, base_folder, entry.description)?;
        for raw in catalogue.get_tables(name).await? {
            database.add_table(table_from_glue(&raw)?)?;
        }
        Ok(database)
    }

    /// Serialize the database document (tables are separate documents).
    pub fn to_value(&self) -> Result<Value, MetaError> {
        serde_json::to_value(self).map_err(|e| MetaError::Document(e.to_string()))
    }

    /// Write `database.json` plus, optionally, one JSON file per table.
    pub fn write_to_json(
        &self,
        folder: impl AsRef<Path>,
        write_tables: bool,
    ) -> Result<(), MetaError> {
        let folder = folder.as_ref();
        std::fs::create_dir_all(folder)?;
        let value = self.to_value()?;
        let text =
            serde_json::to_string_pretty(&value).map_err(|e| MetaError::Document(e.to_string()))?;
        std::fs::write(folder.join(DATABASE_FILE), text)?;
        if write_tables {
            for table in &self.tables {
                table.write_to_json(folder.join(format!("{}.json", table.name())))?;
            }
        }
        Ok(())
    }
}

/// Read a database folder: `database.json` plus one JSON document per table.
pub fn read_database_folder(folder: impl AsRef<Path>) -> Result<DatabaseMeta, MetaError> {
    let folder = folder.as_ref();
    let text = std::fs::read_to_string(folder.join(DATABASE_FILE))?;
    let mut database: DatabaseMeta =
        serde_json::from_str(&text).map_err(|e| MetaError::Document(e.to_string()))?;
    validate_name("name", &database.name)?;
    validate_bucket_name(&database.bucket)?;
    validate_location(&database.base_folder)?;

    let mut entries: Vec<std::path::PathBuf> = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "json").unwrap_or(false)
            && path.file_name().map(|n| n != DATABASE_FILE).unwrap_or(false)
        {
            entries.push(path);
        }
    }
    entries.sort();
    for path in entries {
        database.add_table(read_table_json(&path)?)?;
    }
    Ok(database)
}

/// Convert a catalogue table entry back to agnostic table metadata.
fn table_from_glue(raw: &Value) -> Result<TableMeta, MetaError> {
    let name = raw["Name"]
        .as_str()
        .ok_or_else(|| MetaError::Document("catalogue table missing Name".into()))?;
    let mut table = TableMeta::new(name, format!("{name}/"))?;
    table.set_description(raw["Description"].as_str().unwrap_or("").to_string());

    if let Some(format) = data_format_from_glue(raw) {
        table.set_data_format(format);
    }

    let mut partition_names: Vec<String> = Vec::new();
    let empty = Vec::new();
    let data_columns = raw["StorageDescriptor"]["Columns"].as_array().unwrap_or(&empty);
    let partition_keys = raw["PartitionKeys"].as_array().unwrap_or(&empty);
    for (raw_column, is_partition) in data_columns
        .iter()
        .map(|c| (c, false))
        .chain(partition_keys.iter().map(|c| (c, true)))
    {
        let column_name = raw_column["Name"]
            .as_str()
            .ok_or_else(|| MetaError::Document("catalogue column missing Name".into()))?;
        let glue_type = raw_column["Type"].as_str().unwrap_or("string");
        let agnostic = types::from_glue_type(glue_type)?;
        table.add_column(Column::new(
            column_name,
            agnostic,
            raw_column["Comment"].as_str().unwrap_or(""),
        ))?;
        if is_partition {
            partition_names.push(column_name.to_string());
        }
    }
    if !partition_names.is_empty() {
        let refs: Vec<&str> = partition_names.iter().map(|s| s.as_str()).collect();
        table.set_partitions(&refs)?;
    }
    Ok(table)
}

/// Best-effort recovery of the data format from a catalogue entry's serde
/// library.
fn data_format_from_glue(raw: &Value) -> Option<DataFormat> {
    let library = raw["StorageDescriptor"]["SerdeInfo"]["SerializationLibrary"].as_str()?;
    for format in DataFormat::ALL {
        let template = crate::specs::format_spec(format);
        let candidate =
            template["StorageDescriptor"]["SerdeInfo"]["SerializationLibrary"].as_str();
        if candidate == Some(library) {
            return Some(format);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_database() -> DatabaseMeta {
        let mut db = DatabaseMeta::new("workforce", "my-bucket", "workforce/", "HR data").unwrap();
        let mut employees = TableMeta::new("employees", "employees/").unwrap();
        employees
            .add_column(Column::new("employee_id", "int", "id"))
            .unwrap();
        employees
            .add_column(Column::new("region", "character", ""))
            .unwrap();
        db.add_table(employees).unwrap();
        db
    }

    #[test]
    fn test_paths() {
        let db = sample_database();
        assert_eq!(db.s3_database_path(), "s3://my-bucket/workforce/");
        assert_eq!(db.s3_athena_temp_folder(), "s3://my-bucket/__temp_athena__/");
    }

    #[test]
    fn test_add_table_wires_context() {
        let db = sample_database();
        let table = db.table("employees").unwrap();
        assert_eq!(table.database().unwrap().bucket, "my-bucket");
        let def = table.glue_table_definition(None).unwrap();
        assert_eq!(
            def["StorageDescriptor"]["Location"],
            "s3://my-bucket/workforce/employees/"
        );
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut db = sample_database();
        let other = TableMeta::new("employees", "elsewhere/").unwrap();
        assert!(matches!(
            db.add_table(other),
            Err(MetaError::DuplicateTable(_))
        ));
    }

    #[test]
    fn test_rename_bucket_updates_tables() {
        let mut db = sample_database();
        db.set_bucket("other-bucket").unwrap();
        let def = db
            .table("employees")
            .unwrap()
            .glue_table_definition(None)
            .unwrap();
        assert_eq!(
            def["StorageDescriptor"]["Location"],
            "s3://other-bucket/workforce/employees/"
        );
    }

    #[test]
    fn test_column_types_align_reports_all_mismatches() {
        let mut db = sample_database();
        let mut sales = TableMeta::new("sales", "sales/").unwrap();
        sales
            .add_column(Column::new("employee_id", "long", ""))
            .unwrap();
        sales
            .add_column(Column::new("region", "int", ""))
            .unwrap();
        db.add_table(sales).unwrap();

        let err = db.test_column_types_align(&[]).unwrap_err();
        match err {
            MetaError::ColumnTypeMismatches(mismatches) => {
                assert_eq!(mismatches.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        db.test_column_types_align(&["employee_id", "region"]).unwrap();
    }

    #[test]
    fn test_format_recovery_from_serde_library() {
        let raw = serde_json::json!({
            "Name": "t",
            "StorageDescriptor": {
                "Columns": [{"Name": "a", "Type": "bigint", "Comment": ""}],
                "SerdeInfo": {
                    "SerializationLibrary":
                        "org.apache.hadoop.hive.ql.io.parquet.serde.ParquetHiveSerDe"
                }
            }
        });
        let table = table_from_glue(&raw).unwrap();
        assert_eq!(table.data_format(), DataFormat::Parquet);
        assert_eq!(table.column("a").unwrap().data_type, "long");
    }
}
