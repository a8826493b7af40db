//! Input validation for names, locations and identifiers.
//!
//! These functions are used by the metadata models and the job runner to
//! reject bad identifiers before they reach a remote service. Catalogue and
//! execution services are case-sensitive and punctuation-hostile, so the
//! rules here are deliberately stricter than what the services would accept.

use thiserror::Error;

/// Errors that can occur during input validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Input is empty when a value is required
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Input contains uppercase characters where lowercase is required
    #[error("{field} must be lowercase: {value}")]
    NotLowercase { field: &'static str, value: String },

    /// Input contains punctuation outside the allow-list
    #[error("{field} may only contain punctuation from ({allowed}): {value}")]
    InvalidCharacters {
        field: &'static str,
        allowed: &'static str,
        value: String,
    },

    /// Input has invalid format
    #[error("{0}: {1}")]
    InvalidFormat(&'static str, String),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a string against the lowercase/punctuation rules shared by all
/// metadata identifiers.
///
/// `allowed` lists the punctuation characters permitted in addition to
/// alphanumerics. When `allow_upper` is false (the default for names),
/// any uppercase character is rejected.
pub fn validate_string(
    field: &'static str,
    value: &str,
    allowed: &'static str,
    allow_upper: bool,
) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::Empty(field));
    }

    if !allow_upper && value.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::NotLowercase {
            field,
            value: value.to_string(),
        });
    }

    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            continue;
        }
        if !c.is_ascii_punctuation() || !allowed.contains(c) {
            return Err(ValidationError::InvalidCharacters {
                field,
                allowed,
                value: value.to_string(),
            });
        }
    }

    Ok(())
}

/// Validate a table or database name: lowercase, underscores only.
pub fn validate_name(field: &'static str, name: &str) -> ValidationResult<()> {
    validate_string(field, name, "_", false)
}

/// Validate a column name: lowercase, underscores only.
pub fn validate_column_name(name: &str) -> ValidationResult<()> {
    validate_string("column name", name, "_", false)
}

/// Validate a bucket name: lowercase with dots and hyphens.
pub fn validate_bucket_name(bucket: &str) -> ValidationResult<()> {
    if bucket.starts_with("s3://") {
        return Err(ValidationError::InvalidFormat(
            "bucket",
            "must be a bare bucket name, not an s3:// path".to_string(),
        ));
    }
    validate_string("bucket", bucket, ".-", false)
}

/// Validate a table storage location.
///
/// Locations are relative folder paths under the database path. Uppercase is
/// passed through because some upstream systems write mixed-case folders.
pub fn validate_location(location: &str) -> ValidationResult<()> {
    if location.is_empty() {
        return Err(ValidationError::Empty("location"));
    }
    if location.starts_with('/') {
        return Err(ValidationError::InvalidFormat(
            "location",
            "must be a relative path (no leading slash)".to_string(),
        ));
    }
    validate_string("location", location, "_/-.", true)
}

/// Validate a job name: lowercase with separators used in run identifiers.
pub fn validate_job_name(name: &str) -> ValidationResult<()> {
    validate_string("job name", name, "-_:", false)
}

/// Ensure a folder path ends with exactly one trailing slash.
pub fn end_with_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Strip a single trailing slash if present.
pub fn remove_final_slash(path: &str) -> &str {
    path.strip_suffix('/').unwrap_or(path)
}

/// Join a base path (local or `s3://`) with a relative part, normalising the
/// separator between them.
pub fn join_path(base: &str, relative: &str) -> String {
    format!("{}/{}", remove_final_slash(base), relative)
}
