//! Embedded catalogue definition templates.
//!
//! One base Glue `TableInput` template plus a format-specific fragment per
//! supported data format. Templates are compiled into the binary and parsed
//! once on first use.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::models::DataFormat;

static TEMPLATES: Lazy<HashMap<&'static str, Value>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let entries: [(&str, &str); 8] = [
        ("base", include_str!("../specs/base.json")),
        ("avro", include_str!("../specs/avro_specific.json")),
        ("csv", include_str!("../specs/csv_specific.json")),
        (
            "csv_quoted_nodate",
            include_str!("../specs/csv_quoted_nodate_specific.json"),
        ),
        ("regex", include_str!("../specs/regex_specific.json")),
        ("orc", include_str!("../specs/orc_specific.json")),
        ("parquet", include_str!("../specs/parquet_specific.json")),
        ("json", include_str!("../specs/json_specific.json")),
    ];
    for (name, raw) in entries {
        let value: Value =
            serde_json::from_str(raw).unwrap_or_else(|e| panic!("embedded spec `{}`: {}", name, e));
        m.insert(name, value);
    }
    m
});

/// The base catalogue table definition template.
pub fn base_spec() -> Value {
    TEMPLATES["base"].clone()
}

/// The format-specific template fragment for a data format.
pub fn format_spec(format: DataFormat) -> Value {
    TEMPLATES[format.spec_name()].clone()
}
