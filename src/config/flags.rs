//! Schema-derived CLI flags
//!
//! Builds a `clap::Command` at runtime with one `--flag` per schema field and
//! turns the flags actually present on the command line into an override
//! mapping for the resolver.

use clap::builder::BoolishValueParser;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::{Map, Value};

use super::schema::{ConfigSchema, FieldSpec, FieldType};
use crate::{Error, Result};

/// Flag definitions synthesized from a [`ConfigSchema`].
#[derive(Debug, Clone)]
pub struct FlagSet {
    command: Command,
    fields: Vec<(String, FieldType)>,
}

impl FlagSet {
    /// Synthesize flags for every field of `schema`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if a field has no CLI representation.
    pub fn from_schema(schema: &ConfigSchema) -> Result<Self> {
        schema.introspect()?;

        let mut command = Command::new(schema.title().to_string())
            .no_binary_name(true)
            .disable_help_flag(true)
            .disable_version_flag(true);
        for field in schema.fields() {
            command = command.arg(flag_for(field));
        }

        Ok(Self {
            command,
            fields: schema
                .fields()
                .iter()
                .map(|f| (f.name.clone(), f.ty.clone()))
                .collect(),
        })
    }

    /// Render a usage/help text listing the flags.
    #[must_use]
    pub fn help(&self) -> String {
        self.command.clone().render_help().to_string()
    }

    /// Parse override arguments such as `["--lr", "0.01", "--debug"]`.
    ///
    /// Only flags present in `args` appear in the returned mapping.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` on unknown flags, missing values or values
    /// that do not parse as the declared type.
    pub fn parse<I, S>(&self, args: I) -> Result<Map<String, Value>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let matches = self
            .command
            .clone()
            .try_get_matches_from(&args)
            .map_err(|e| {
                Error::Validation(format!(
                    "invalid config override: {}",
                    e.render().to_string().trim()
                ))
            })?;

        let mut overrides = Map::new();
        for (name, ty) in &self.fields {
            if let Some(value) = extract(&matches, name, ty) {
                overrides.insert(name.clone(), value);
            }
        }
        Ok(overrides)
    }
}

fn flag_for(field: &FieldSpec) -> Arg {
    let long = field.name.replace('_', "-");
    let mut arg = Arg::new(field.name.clone()).long(long.clone());
    if long != field.name {
        arg = arg.alias(field.name.clone());
    }
    if let Some(help) = &field.help {
        arg = arg.help(help.clone());
    }

    match &field.ty {
        // Toggle: `--debug` means true, `--debug false` is accepted too.
        FieldType::Bool => arg
            .action(ArgAction::Set)
            .num_args(0..=1)
            .default_missing_value("true")
            .value_parser(BoolishValueParser::new()),
        FieldType::List(inner) => with_parser(
            arg.action(ArgAction::Append).value_delimiter(','),
            inner,
        ),
        scalar => with_parser(arg.action(ArgAction::Set), scalar),
    }
}

fn with_parser(arg: Arg, ty: &FieldType) -> Arg {
    match ty {
        FieldType::Int => arg
            .value_parser(value_parser!(i64))
            .allow_negative_numbers(true),
        FieldType::Float => arg
            .value_parser(value_parser!(f64))
            .allow_negative_numbers(true),
        FieldType::Bool => arg.value_parser(BoolishValueParser::new()),
        _ => arg.value_parser(value_parser!(String)),
    }
}

fn extract(matches: &ArgMatches, name: &str, ty: &FieldType) -> Option<Value> {
    match ty {
        FieldType::Bool => one::<bool>(matches, name),
        FieldType::Int => one::<i64>(matches, name),
        FieldType::Float => one::<f64>(matches, name),
        FieldType::List(inner) => match inner.as_ref() {
            FieldType::Bool => many::<bool>(matches, name),
            FieldType::Int => many::<i64>(matches, name),
            FieldType::Float => many::<f64>(matches, name),
            _ => many::<String>(matches, name),
        },
        _ => one::<String>(matches, name),
    }
}

fn one<T>(matches: &ArgMatches, name: &str) -> Option<Value>
where
    T: Clone + Send + Sync + Into<Value> + 'static,
{
    matches.get_one::<T>(name).cloned().map(Into::into)
}

fn many<T>(matches: &ArgMatches, name: &str) -> Option<Value>
where
    T: Clone + Send + Sync + Into<Value> + 'static,
{
    matches
        .get_many::<T>(name)
        .map(|values| Value::Array(values.cloned().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flags() -> FlagSet {
        let schema = ConfigSchema::new(
            "Config",
            vec![
                FieldSpec::float("learning_rate").default(0.001),
                FieldSpec::int("epochs").default(10),
                FieldSpec::bool("debug").default(false),
                FieldSpec::str("name").default("run"),
                FieldSpec::list("layers", FieldType::Int).default(json!([32])),
            ],
        )
        .unwrap();
        FlagSet::from_schema(&schema).unwrap()
    }

    #[test]
    fn test_parse_typed_values() {
        let overrides = flags()
            .parse(["--learning-rate", "0.01", "--epochs", "3", "--name", "a"])
            .unwrap();
        assert_eq!(overrides["learning_rate"], json!(0.01));
        assert_eq!(overrides["epochs"], json!(3));
        assert_eq!(overrides["name"], json!("a"));
        assert!(!overrides.contains_key("debug"));
    }

    #[test]
    fn test_underscore_alias() {
        let overrides = flags().parse(["--learning_rate", "0.5"]).unwrap();
        assert_eq!(overrides["learning_rate"], json!(0.5));
    }

    #[test]
    fn test_bool_toggle() {
        let overrides = flags().parse(["--debug"]).unwrap();
        assert_eq!(overrides["debug"], json!(true));

        let overrides = flags().parse(["--debug", "false", "--epochs", "1"]).unwrap();
        assert_eq!(overrides["debug"], json!(false));
        assert_eq!(overrides["epochs"], json!(1));
    }

    #[test]
    fn test_negative_number() {
        let overrides = flags().parse(["--learning-rate", "-0.5"]).unwrap();
        assert_eq!(overrides["learning_rate"], json!(-0.5));
    }

    #[test]
    fn test_list_values() {
        let overrides = flags().parse(["--layers", "64,128"]).unwrap();
        assert_eq!(overrides["layers"], json!([64, 128]));
    }

    #[test]
    fn test_invalid_value_is_validation_error() {
        let err = flags().parse(["--epochs", "many"]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_unknown_flag_is_validation_error() {
        let err = flags().parse(["--momentum", "0.9"]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_help_lists_flags() {
        let help = flags().help();
        assert!(help.contains("--learning-rate"));
        assert!(help.contains("--layers"));
    }
}
