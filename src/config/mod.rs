//! Schema-driven experiment configuration
//!
//! ```text
//! ConfigSchema ──> FlagSet (CLI overrides)
//!      │                 │
//!      └──> resolve(defaults < YAML file < overrides) ──> Config
//! ```
//!
//! The schema is an explicit descriptor (ordered fields with type tags), so
//! the flag generator, the resolver and the schema printer all read the same
//! representation.

mod flags;
mod resolve;
mod schema;

pub use flags::FlagSet;
pub use resolve::{load_yaml_mapping, parse_yaml_mapping, resolve};
pub use schema::{ConfigSchema, FieldInfo, FieldSpec, FieldType};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// A resolved, validated configuration.
///
/// Keys are kept sorted so that serialized snapshots are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: Map<String, Value>,
}

impl Config {
    /// Wrap an already-validated mapping.
    #[must_use]
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Raw value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Float value of a field (integers widen).
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the field is absent or not numeric.
    pub fn f64(&self, name: &str) -> Result<f64> {
        self.typed(name, "float", Value::as_f64)
    }

    /// Integer value of a field.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the field is absent or not an integer.
    pub fn i64(&self, name: &str) -> Result<i64> {
        self.typed(name, "int", Value::as_i64)
    }

    /// Boolean value of a field.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the field is absent or not a bool.
    pub fn bool(&self, name: &str) -> Result<bool> {
        self.typed(name, "bool", Value::as_bool)
    }

    /// String value of a field.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the field is absent or not a string.
    pub fn str(&self, name: &str) -> Result<&str> {
        self.typed(name, "str", Value::as_str)
    }

    fn typed<'a, T>(
        &'a self,
        name: &str,
        expected: &str,
        extract: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| Error::Validation(format!("config has no field `{name}`")))?;
        extract(value).ok_or_else(|| {
            Error::Validation(format!("config field `{name}` is not a {expected}: {value}"))
        })
    }

    /// Underlying mapping.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the config has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(name, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Serialize as a YAML document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if encoding fails.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.values)?)
    }
}
