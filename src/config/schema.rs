//! Explicit config schema descriptor
//!
//! An ordered list of typed fields consumed uniformly by the flag generator,
//! the resolver and the schema printer.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{Error, Result};

/// Declared type of a config field.
///
/// Serialized as a short type name (`float`, `list[int]`, ...), which is also
/// the form used in entry-point manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    /// `true` / `false`
    Bool,
    /// Signed 64-bit integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 string
    Str,
    /// Homogeneous list of a scalar type
    List(Box<FieldType>),
    /// Arbitrary value (not representable as a CLI flag)
    Any,
}

impl FieldType {
    /// Whether the type is a scalar (bool, int, float, str).
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(self, Self::Bool | Self::Int | Self::Float | Self::Str)
    }

    /// Whether a CLI flag can carry values of this type.
    #[must_use]
    pub fn is_cli_representable(&self) -> bool {
        match self {
            Self::List(inner) => inner.is_scalar(),
            Self::Any => false,
            _ => true,
        }
    }

    /// JSON-Schema type keyword.
    #[must_use]
    pub const fn json_type(&self) -> &'static str {
        match self {
            Self::Bool => "boolean",
            Self::Int => "integer",
            Self::Float => "number",
            Self::Str => "string",
            Self::List(_) => "array",
            Self::Any => "object",
        }
    }

    /// Convert `value` to this type.
    ///
    /// Lossless widening is accepted (an integer for a float field, an
    /// integral float for an int field); anything else is rejected.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch.
    pub fn convert(&self, value: &Value) -> std::result::Result<Value, String> {
        match (self, value) {
            (Self::Any, v) => Ok(v.clone()),
            (Self::Bool, Value::Bool(_)) | (Self::Str, Value::String(_)) => Ok(value.clone()),
            (Self::Int, Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Value::from(i));
                }
                match n.as_f64() {
                    #[allow(clippy::cast_possible_truncation)]
                    Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Value::from(f as i64)),
                    _ => Err(format!("expected int, got {value}")),
                }
            }
            (Self::Float, Value::Number(n)) => n
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| format!("expected float, got {value}")),
            (Self::List(inner), Value::Array(items)) => items
                .iter()
                .map(|item| inner.convert(item))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err(format!("expected {self}, got {}", describe(value))),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "list".to_string(),
        Value::Object(_) => "mapping".to_string(),
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Str => f.write_str("str"),
            Self::List(inner) => write!(f, "list[{inner}]"),
            Self::Any => f.write_str("any"),
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("list[").and_then(|r| r.strip_suffix(']')) {
            return Ok(Self::List(Box::new(inner.parse()?)));
        }
        match s {
            "bool" | "boolean" => Ok(Self::Bool),
            "int" | "integer" => Ok(Self::Int),
            "float" | "number" => Ok(Self::Float),
            "str" | "string" => Ok(Self::Str),
            "any" | "object" => Ok(Self::Any),
            other => Err(format!("unknown field type `{other}`")),
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.to_string()
    }
}

/// One declared config field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name (also the flag name, with `_` shown as `-`)
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Default value; `None` makes the field required unless `optional`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// Inclusive lower bound for numeric values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
    /// Accepts null, and defaults to null when no default is declared
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl FieldSpec {
    /// Create a required field of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            help: None,
            min: None,
            max: None,
            choices: None,
            optional: false,
        }
    }

    /// `bool` field.
    #[must_use]
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bool)
    }

    /// `int` field.
    #[must_use]
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Int)
    }

    /// `float` field.
    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    /// `str` field.
    #[must_use]
    pub fn str(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Str)
    }

    /// `list[inner]` field.
    #[must_use]
    pub fn list(name: impl Into<String>, inner: FieldType) -> Self {
        Self::new(name, FieldType::List(Box::new(inner)))
    }

    /// Set the default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set the help text.
    #[must_use]
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Set the inclusive lower bound.
    #[must_use]
    pub const fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Set the inclusive upper bound.
    #[must_use]
    pub const fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Restrict values to the given set.
    #[must_use]
    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    /// Allow null values.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// The value used when no source supplies the field.
    #[must_use]
    pub fn effective_default(&self) -> Option<Value> {
        match &self.default {
            Some(v) => Some(v.clone()),
            None if self.optional => Some(Value::Null),
            None => None,
        }
    }

    /// Check `value` against the type and constraints, returning the
    /// converted value.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation.
    pub fn check(&self, value: &Value) -> std::result::Result<Value, String> {
        if value.is_null() {
            return if self.optional {
                Ok(Value::Null)
            } else {
                Err("must not be null".to_string())
            };
        }

        let converted = self.ty.convert(value)?;

        let numbers: Vec<f64> = match &converted {
            Value::Number(n) => n.as_f64().into_iter().collect(),
            Value::Array(items) => items.iter().filter_map(Value::as_f64).collect(),
            _ => Vec::new(),
        };
        for n in numbers {
            if let Some(min) = self.min {
                if n < min {
                    return Err(format!("{n} is below the minimum {min}"));
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Err(format!("{n} is above the maximum {max}"));
                }
            }
        }

        if let Some(choices) = &self.choices {
            let candidates: Vec<&Value> = match &converted {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for candidate in candidates {
                if !choices.iter().any(|c| same_value(c, candidate)) {
                    let allowed: Vec<String> = choices.iter().map(ToString::to_string).collect();
                    return Err(format!(
                        "{candidate} is not one of [{}]",
                        allowed.join(", ")
                    ));
                }
            }
        }

        Ok(converted)
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Introspected view of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Field name
    pub name: String,
    /// Type descriptor (`float`, `list[int]`, ...)
    pub type_descriptor: String,
    /// Default value, if any
    pub default: Option<Value>,
    /// Help text, if any
    pub help: Option<String>,
}

/// Ordered, validated set of field specs.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSchema {
    title: String,
    fields: Vec<FieldSpec>,
}

impl ConfigSchema {
    /// Build a schema.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` when a name cannot be a `--flag`, when two
    /// names map to the same flag (`a_b` and `a-b`), or when a default
    /// violates its own field spec.
    pub fn new(title: impl Into<String>, fields: Vec<FieldSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &fields {
            let valid = field
                .name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric())
                && field
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(Error::Schema(format!(
                    "field name `{}` must start with a letter or digit and contain only letters, digits, `_` or `-`",
                    field.name
                )));
            }
            // `--a-b` and `--a_b` are the same flag.
            if !seen.insert(field.name.replace('_', "-")) {
                return Err(Error::Schema(format!(
                    "duplicate field `{}` (`_` and `-` are interchangeable in flags)",
                    field.name
                )));
            }
            if let Some(default) = &field.default {
                field.check(default).map_err(|msg| {
                    Error::Schema(format!("default for `{}` is invalid: {msg}", field.name))
                })?;
            }
        }

        Ok(Self {
            title: title.into(),
            fields,
        })
    }

    /// Schema title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Ordered (name, type, default, help) view of the schema.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if a field's type has no CLI representation.
    pub fn introspect(&self) -> Result<Vec<FieldInfo>> {
        self.fields
            .iter()
            .map(|field| {
                if !field.ty.is_cli_representable() {
                    return Err(Error::Schema(format!(
                        "field `{}` has type `{}`, which cannot be expressed as a CLI flag",
                        field.name, field.ty
                    )));
                }
                Ok(FieldInfo {
                    name: field.name.clone(),
                    type_descriptor: field.ty.to_string(),
                    default: field.effective_default(),
                    help: field.help.clone(),
                })
            })
            .collect()
    }

    /// Render a JSON-Schema style document.
    ///
    /// # Errors
    ///
    /// Same as [`ConfigSchema::introspect`].
    pub fn json_schema(&self) -> Result<Value> {
        self.introspect()?;

        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in &self.fields {
            let mut prop = Map::new();
            prop.insert("title".to_string(), Value::from(title_case(&field.name)));
            if field.optional {
                prop.insert(
                    "anyOf".to_string(),
                    json!([{ "type": field.ty.json_type() }, { "type": "null" }]),
                );
            } else {
                prop.insert("type".to_string(), Value::from(field.ty.json_type()));
            }
            if let FieldType::List(inner) = &field.ty {
                prop.insert("items".to_string(), json!({ "type": inner.json_type() }));
            }
            match field.effective_default() {
                Some(default) => {
                    prop.insert("default".to_string(), default);
                }
                None => required.push(Value::from(field.name.clone())),
            }
            if let Some(help) = &field.help {
                prop.insert("description".to_string(), Value::from(help.clone()));
            }
            if let Some(min) = field.min {
                prop.insert("minimum".to_string(), Value::from(min));
            }
            if let Some(max) = field.max {
                prop.insert("maximum".to_string(), Value::from(max));
            }
            if let Some(choices) = &field.choices {
                prop.insert("enum".to_string(), Value::Array(choices.clone()));
            }
            properties.insert(field.name.clone(), Value::Object(prop));
        }

        let mut doc = Map::new();
        doc.insert("title".to_string(), Value::from(self.title.clone()));
        doc.insert("type".to_string(), Value::from("object"));
        doc.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            doc.insert("required".to_string(), Value::Array(required));
        }
        Ok(Value::Object(doc))
    }
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
