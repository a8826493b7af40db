//! Column model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::MetaError;
use crate::types;
use crate::validation::validate_column_name;

/// Sensitivity classification of a column's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    PersonalData,
    SpecialCategoryData,
}

impl Sensitivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Sensitivity::PersonalData => "personal_data",
            Sensitivity::SpecialCategoryData => "special_category_data",
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single column in a table's agnostic metadata.
///
/// `data_type` is an agnostic type string validated against the type grammar
/// (see [`crate::types`]). Optional properties carry data-quality and
/// classification metadata through to downstream consumers; they are not
/// interpreted by the catalogue compiler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    /// Column name (lowercase, underscores only)
    pub name: String,
    /// Agnostic type string, e.g. `character` or `array<struct<a:int>>`
    #[serde(rename = "type")]
    pub data_type: String,
    /// Column description
    #[serde(default)]
    pub description: String,
    /// Whether the column may contain nulls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    /// Permitted values, if the column is an enumeration
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Regex pattern values are expected to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Sensitivity classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<Sensitivity>,
    /// Whether the column has been redacted at source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted: Option<bool>,
}

impl Column {
    /// Create a column with just a name, type and description.
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            description: description.into(),
            nullable: None,
            enum_values: None,
            pattern: None,
            sensitivity: None,
            redacted: None,
        }
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = Some(sensitivity);
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_redacted(mut self, redacted: bool) -> Self {
        self.redacted = Some(redacted);
        self
    }

    /// Check the column's own invariants: name rule and type grammar.
    pub fn validate(&self) -> Result<(), MetaError> {
        validate_column_name(&self.name)?;
        types::TypeExpr::parse(&self.data_type)?;
        Ok(())
    }
}

/// A partial update to an existing column.
///
/// Every populated field is validated independently before any of them is
/// committed; an update with no populated fields is rejected.
#[derive(Debug, Clone, Default)]
pub struct ColumnUpdate {
    pub name: Option<String>,
    pub data_type: Option<String>,
    pub description: Option<String>,
    pub nullable: Option<bool>,
    pub enum_values: Option<Vec<String>>,
    pub pattern: Option<String>,
    pub sensitivity: Option<Sensitivity>,
    pub redacted: Option<bool>,
}

impl ColumnUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn enum_values(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = Some(sensitivity);
        self
    }

    pub fn redacted(mut self, redacted: bool) -> Self {
        self.redacted = Some(redacted);
        self
    }

    /// True when no field is populated.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.data_type.is_none()
            && self.description.is_none()
            && self.nullable.is_none()
            && self.enum_values.is_none()
            && self.pattern.is_none()
            && self.sensitivity.is_none()
            && self.redacted.is_none()
    }

    /// Validate every populated field without applying anything.
    pub fn validate(&self) -> Result<(), MetaError> {
        if self.is_empty() {
            return Err(MetaError::NoFieldsSpecified);
        }
        if let Some(name) = &self.name {
            validate_column_name(name)?;
        }
        if let Some(data_type) = &self.data_type {
            crate::types::TypeExpr::parse(data_type)?;
        }
        Ok(())
    }
}
