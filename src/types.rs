//! Agnostic column type grammar.
//!
//! Column types are written in a vendor-neutral string syntax:
//!
//! ```text
//! TypeExpr := Primitive | "decimal(" Int "," Int ")"
//!           | "struct<" Field ("," Field)* ">" | "array<" TypeExpr ">"
//! Field    := Identifier ":" TypeExpr
//! ```
//!
//! The grammar is exact-match: no whitespace is tolerated anywhere in a type
//! string. A proper recursive-descent parser produces a typed AST, which makes
//! validation of nested types like `array<struct<a:int,b:array<character>>>`
//! straightforward and turns the Glue dialect conversion into an AST transform
//! rather than string substitution.

use std::fmt;

use thiserror::Error;

/// Errors from parsing or converting a column type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    /// The type string does not satisfy the grammar
    #[error("invalid column type `{input}`: {reason}")]
    Parse { input: String, reason: String },

    /// The type name is not part of the supported vocabulary
    #[error("unsupported type `{0}`")]
    Unsupported(String),
}

/// Agnostic primitive column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Character,
    Int,
    Long,
    Float,
    Double,
    Date,
    Datetime,
    Boolean,
    Binary,
}

impl Primitive {
    /// All primitive names recognised by the grammar.
    pub const NAMES: [&'static str; 9] = [
        "character", "int", "long", "float", "double", "date", "datetime", "boolean", "binary",
    ];

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "character" => Self::Character,
            "int" => Self::Int,
            "long" => Self::Long,
            "float" => Self::Float,
            "double" => Self::Double,
            "date" => Self::Date,
            "datetime" => Self::Datetime,
            "boolean" => Self::Boolean,
            "binary" => Self::Binary,
            _ => None?,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
        }
    }

    /// The Glue catalogue name for this primitive.
    fn glue_name(self) -> &'static str {
        match self {
            Self::Character => "string",
            Self::Int => "int",
            Self::Long => "bigint",
            Self::Float => "float",
            Self::Double => "double",
            Self::Date => "date",
            Self::Datetime => "timestamp",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
        }
    }

    fn from_glue_name(name: &str) -> Option<Self> {
        Some(match name {
            "string" => Self::Character,
            "int" | "integer" | "smallint" | "tinyint" => Self::Int,
            "bigint" => Self::Long,
            "float" => Self::Float,
            "double" => Self::Double,
            "date" => Self::Date,
            "timestamp" => Self::Datetime,
            "boolean" => Self::Boolean,
            "binary" => Self::Binary,
            _ => None?,
        })
    }
}

/// Parsed column type expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Primitive(Primitive),
    Decimal { precision: u32, scale: u32 },
    Struct(Vec<(String, TypeExpr)>),
    Array(Box<TypeExpr>),
}

impl TypeExpr {
    /// Parse an agnostic type string.
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let mut parser = Parser {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        };
        let expr = parser.parse_type()?;
        if parser.pos != parser.bytes.len() {
            return Err(parser.error("trailing characters after type expression"));
        }
        Ok(expr)
    }

    /// The root kind of the expression: a primitive name, or
    /// `struct` / `array` / `decimal`.
    pub fn root_kind(&self) -> &'static str {
        match self {
            Self::Primitive(p) => p.name(),
            Self::Decimal { .. } => "decimal",
            Self::Struct(_) => "struct",
            Self::Array(_) => "array",
        }
    }

    /// Render the expression in the Glue catalogue dialect.
    ///
    /// Primitive names are substituted token by token as the structure is
    /// walked; decimal parameters are carried through unchanged.
    pub fn to_glue_type(&self) -> String {
        match self {
            Self::Primitive(p) => p.glue_name().to_string(),
            Self::Decimal { precision, scale } => format!("decimal({},{})", precision, scale),
            Self::Struct(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(name, ty)| format!("{}:{}", name, ty.to_glue_type()))
                    .collect();
                format!("struct<{}>", inner.join(","))
            }
            Self::Array(elem) => format!("array<{}>", elem.to_glue_type()),
        }
    }

    /// Render the expression back in the agnostic dialect.
    pub fn to_agnostic(&self) -> String {
        match self {
            Self::Primitive(p) => p.name().to_string(),
            Self::Decimal { precision, scale } => format!("decimal({},{})", precision, scale),
            Self::Struct(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(name, ty)| format!("{}:{}", name, ty.to_agnostic()))
                    .collect();
                format!("struct<{}>", inner.join(","))
            }
            Self::Array(elem) => format!("array<{}>", elem.to_agnostic()),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_agnostic())
    }
}

/// Check whether a type string satisfies the grammar.
pub fn validate(type_string: &str) -> bool {
    TypeExpr::parse(type_string).is_ok()
}

/// Convert an agnostic type string into the Glue catalogue dialect.
pub fn to_glue_type(type_string: &str) -> Result<String, TypeError> {
    Ok(TypeExpr::parse(type_string)?.to_glue_type())
}

/// The root kind of an agnostic type string.
pub fn root_kind(type_string: &str) -> Result<&'static str, TypeError> {
    Ok(TypeExpr::parse(type_string)?.root_kind())
}

/// Convert a Glue catalogue type string back into the agnostic dialect.
///
/// Used when reconstructing metadata from an existing catalogue entry. An
/// unknown Glue type name fails with [`TypeError::Unsupported`], which is
/// distinct from a parse failure of the surrounding structure.
pub fn from_glue_type(glue_type: &str) -> Result<String, TypeError> {
    let expr = parse_glue(glue_type)?;
    Ok(expr.to_agnostic())
}

fn parse_glue(input: &str) -> Result<TypeExpr, TypeError> {
    let mut parser = Parser {
        input,
        bytes: input.as_bytes(),
        pos: 0,
    };
    let expr = parser.parse_glue_type()?;
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("trailing characters after type expression"));
    }
    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> TypeError {
        TypeError::Parse {
            input: self.input.to_string(),
            reason: format!("{} at position {}", reason, self.pos),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), TypeError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected `{}`", c as char)))
        }
    }

    /// Consume a run of identifier characters (letters, digits, `_`).
    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    fn integer(&mut self) -> Result<u32, TypeError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|_| self.error("expected an unsigned integer"))
    }

    fn parse_type(&mut self) -> Result<TypeExpr, TypeError> {
        let word = self.word();
        match word {
            "decimal" => self.parse_decimal(),
            "struct" => self.parse_struct(Self::parse_type),
            "array" => self.parse_array(Self::parse_type),
            "" => Err(self.error("expected a type name")),
            other => Primitive::from_name(other)
                .map(TypeExpr::Primitive)
                .ok_or_else(|| self.error(&format!("unknown type name `{}`", other))),
        }
    }

    fn parse_glue_type(&mut self) -> Result<TypeExpr, TypeError> {
        let word = self.word();
        match word {
            "decimal" => self.parse_decimal(),
            "struct" => self.parse_struct(Self::parse_glue_type),
            "array" => self.parse_array(Self::parse_glue_type),
            "" => Err(self.error("expected a type name")),
            other => Primitive::from_glue_name(other)
                .map(TypeExpr::Primitive)
                .ok_or_else(|| TypeError::Unsupported(other.to_string())),
        }
    }

    fn parse_decimal(&mut self) -> Result<TypeExpr, TypeError> {
        self.expect(b'(')?;
        let precision = self.integer()?;
        self.expect(b',')?;
        let scale = self.integer()?;
        self.expect(b')')?;
        Ok(TypeExpr::Decimal { precision, scale })
    }

    // Bare `struct` without angle brackets is invalid: at least one field is
    // mandatory.
    fn parse_struct(
        &mut self,
        elem: fn(&mut Self) -> Result<TypeExpr, TypeError>,
    ) -> Result<TypeExpr, TypeError> {
        self.expect(b'<')?;
        let mut fields = Vec::new();
        loop {
            let name = self.word();
            if name.is_empty() {
                return Err(self.error("expected a struct field name"));
            }
            if name.as_bytes()[0].is_ascii_digit() {
                return Err(self.error("struct field names must not start with a digit"));
            }
            self.expect(b':')?;
            let ty = elem(self)?;
            fields.push((name.to_string(), ty));
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b'>') => {
                    self.pos += 1;
                    return Ok(TypeExpr::Struct(fields));
                }
                _ => return Err(self.error("expected `,` or `>` in struct")),
            }
        }
    }

    fn parse_array(
        &mut self,
        elem: fn(&mut Self) -> Result<TypeExpr, TypeError>,
    ) -> Result<TypeExpr, TypeError> {
        self.expect(b'<')?;
        let ty = elem(self)?;
        self.expect(b'>')?;
        Ok(TypeExpr::Array(Box::new(ty)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_type_strings() {
        let valid = [
            "character",
            "int",
            "long",
            "float",
            "double",
            "decimal(38,0)",
            "date",
            "datetime",
            "boolean",
            "binary",
            "struct<num:int>",
            "array<int>",
            "array<array<int>>",
            "struct<num:int,newnum:int>",
            "struct<num:int,arr:array<int>>",
            "array<struct<num:int,desc:character>>",
            "struct<num:int,desc:character>",
            "array<decimal(38,0)>",
        ];
        for t in valid {
            assert!(validate(t), "expected `{}` to be valid", t);
        }
    }

    #[test]
    fn test_invalid_type_strings() {
        let invalid = [
            "struct",
            "array",
            "struct<>",
            "array<>",
            "array<int",
            "struct<num:int",
            "string",
            "decimal(38)",
            "decimal(38,)",
            "array< int>",
            "struct<num: int>",
            "int ",
            "",
            "array()",
        ];
        for t in invalid {
            assert!(!validate(t), "expected `{}` to be invalid", t);
        }
    }

    #[test]
    fn test_root_kind() {
        assert_eq!(root_kind("character").unwrap(), "character");
        assert_eq!(root_kind("decimal(10,2)").unwrap(), "decimal");
        assert_eq!(root_kind("struct<a:int>").unwrap(), "struct");
        assert_eq!(root_kind("array<int>").unwrap(), "array");
    }

    #[test]
    fn test_glue_conversion_primitives() {
        assert_eq!(to_glue_type("character").unwrap(), "string");
        assert_eq!(to_glue_type("long").unwrap(), "bigint");
        assert_eq!(to_glue_type("datetime").unwrap(), "timestamp");
        assert_eq!(to_glue_type("int").unwrap(), "int");
        assert_eq!(to_glue_type("binary").unwrap(), "binary");
    }

    #[test]
    fn test_glue_conversion_decimal_parameters_unchanged() {
        assert_eq!(to_glue_type("decimal(38,0)").unwrap(), "decimal(38,0)");
        assert_eq!(
            to_glue_type("array<decimal(38,0)>").unwrap(),
            "array<decimal(38,0)>"
        );
    }

    #[test]
    fn test_glue_conversion_recurses_into_nested_types() {
        // `character` must become `string` inside nested structures, not just
        // at top level.
        assert_eq!(
            to_glue_type("array<struct<a:int,b:array<character>>>").unwrap(),
            "array<struct<a:int,b:array<string>>>"
        );
        assert_eq!(
            to_glue_type("struct<arr_key:array<character>,n:long>").unwrap(),
            "struct<arr_key:array<string>,n:bigint>"
        );
    }

    #[test]
    fn test_glue_conversion_is_deterministic() {
        let t = "struct<num:int,arr:array<decimal(10,2)>>";
        assert_eq!(to_glue_type(t).unwrap(), to_glue_type(t).unwrap());
    }

    #[test]
    fn test_from_glue_type() {
        assert_eq!(from_glue_type("string").unwrap(), "character");
        assert_eq!(from_glue_type("bigint").unwrap(), "long");
        assert_eq!(from_glue_type("timestamp").unwrap(), "datetime");
        assert_eq!(
            from_glue_type("array<struct<a:string,b:bigint>>").unwrap(),
            "array<struct<a:character,b:long>>"
        );
        assert_eq!(from_glue_type("decimal(38,0)").unwrap(), "decimal(38,0)");
    }

    #[test]
    fn test_from_glue_type_unsupported_is_distinct_from_parse_error() {
        match from_glue_type("varchar").unwrap_err() {
            TypeError::Unsupported(name) => assert_eq!(name, "varchar"),
            other => panic!("expected Unsupported, got {:?}", other),
        }
        match from_glue_type("array<string").unwrap_err() {
            TypeError::Parse { .. } => {}
            other => panic!("expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_agnostic_round_trip() {
        let t = "struct<num:int,arr:array<struct<x:character,y:decimal(5,1)>>>";
        let parsed = TypeExpr::parse(t).unwrap();
        assert_eq!(parsed.to_agnostic(), t);
    }
}
