//! Three-layer config resolution
//!
//! Precedence, lowest to highest: schema defaults, YAML file, CLI overrides.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use super::schema::ConfigSchema;
use super::Config;
use crate::{Error, Result};

/// Merge defaults, `file` and `overrides` into a validated [`Config`].
///
/// All problems found are reported together in one `Error::Validation`.
///
/// # Errors
///
/// Returns `Error::Validation` if a required field is missing from every
/// source, a value cannot be converted to its declared type, a value violates
/// a constraint, or a source names a field the schema does not declare.
///
/// # Example
///
/// ```
/// use ox_lab::config::{resolve, ConfigSchema, FieldSpec};
/// use serde_json::{json, Map};
///
/// let schema = ConfigSchema::new(
///     "Config",
///     vec![FieldSpec::float("lr").default(0.1), FieldSpec::int("epochs").default(5)],
/// )?;
/// let mut file = Map::new();
/// file.insert("lr".into(), json!(0.01));
///
/// let config = resolve(&schema, &file, &Map::new())?;
/// assert_eq!(config.f64("lr")?, 0.01);
/// assert_eq!(config.i64("epochs")?, 5);
/// # Ok::<(), ox_lab::Error>(())
/// ```
pub fn resolve(
    schema: &ConfigSchema,
    file: &Map<String, Value>,
    overrides: &Map<String, Value>,
) -> Result<Config> {
    let mut problems = Vec::new();

    for (source, mapping) in [("config file", file), ("overrides", overrides)] {
        for key in mapping.keys() {
            if schema.field(key).is_none() {
                problems.push(format!("{source}: unknown field `{key}`"));
            }
        }
    }

    let mut values = Map::new();
    for field in schema.fields() {
        let candidate = overrides
            .get(&field.name)
            .or_else(|| file.get(&field.name))
            .cloned()
            .or_else(|| field.effective_default());

        match candidate {
            None => problems.push(format!("`{}`: field required", field.name)),
            Some(value) => match field.check(&value) {
                Ok(value) => {
                    values.insert(field.name.clone(), value);
                }
                Err(msg) => problems.push(format!("`{}`: {msg}", field.name)),
            },
        }
    }

    if problems.is_empty() {
        Ok(Config::from_map(values))
    } else {
        Err(Error::Validation(problems.join("; ")))
    }
}

/// Read a YAML mapping from `path` for the file layer.
///
/// A file holding only comments or whitespace is an empty mapping.
///
/// # Errors
///
/// Returns `Error::NotFound` if the file is missing, `Error::Serialization`
/// on malformed YAML, and `Error::Validation` if the document is not a
/// mapping.
pub fn load_yaml_mapping(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Err(Error::not_found("Config file", path.display().to_string()));
    }
    debug!(path = %path.display(), "loading config file");
    let raw = fs::read_to_string(path)?;
    parse_yaml_mapping(&raw)
}

/// Parse a YAML mapping from text. See [`load_yaml_mapping`].
///
/// # Errors
///
/// Returns `Error::Serialization` on malformed YAML and `Error::Validation`
/// if the document is not a mapping.
pub fn parse_yaml_mapping(raw: &str) -> Result<Map<String, Value>> {
    let blank = raw
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'));
    if blank {
        return Ok(Map::new());
    }

    match serde_yaml::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(Error::Validation(format!(
            "config file must contain a mapping, found {other}"
        ))),
    }
}
