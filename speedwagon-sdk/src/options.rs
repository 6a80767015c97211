//! Job option descriptors and validated job arguments
//!
//! A workflow describes its inputs as a list of [`JobOption`]s. Front ends
//! render them however they like; the engine only needs the data. User input
//! becomes an immutable [`JobArguments`] through [`JobArgumentsBuilder`].

use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigurationError;

/// Option type enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptionType {
    Text,
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Boolean,
    Choice {
        options: Vec<String>,
    },
    DirectorySelect,
    FileSelect {
        #[serde(skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
}

/// Data-only description of one user-facing job option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOption {
    pub name: String,
    pub label: String,
    pub description: String,
    pub option_type: OptionType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl JobOption {
    pub fn new(name: impl Into<String>, label: impl Into<String>, option_type: OptionType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            description: String::new(),
            option_type,
            required: true,
            default: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Convert a raw string (CLI flag, text box) into a value of this option's type
    pub fn coerce(&self, raw: &str) -> Result<Value, ConfigurationError> {
        let raw = raw.trim();
        match &self.option_type {
            OptionType::Number { .. } => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| ConfigurationError::invalid(&self.name, format!("'{}' is not a whole number", raw))),
            OptionType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" | "on" => Ok(Value::Bool(true)),
                "false" | "no" | "n" | "0" | "off" => Ok(Value::Bool(false)),
                _ => Err(ConfigurationError::invalid(
                    &self.name,
                    format!("'{}' is not a boolean", raw),
                )),
            },
            _ => Ok(Value::String(raw.to_string())),
        }
    }

    /// Strings stored for numeric or boolean options are coerced; everything else passes through
    fn normalize(&self, value: Value) -> Result<Value, ConfigurationError> {
        match (&self.option_type, &value) {
            (OptionType::Number { .. } | OptionType::Boolean, Value::String(raw)) => {
                self.coerce(raw)
            }
            _ => Ok(value),
        }
    }

    /// Check a single value against this option's declared rules
    pub fn validate(&self, value: Option<&Value>) -> Result<(), ConfigurationError> {
        let value = match value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(v) => Some(v),
        };

        let Some(value) = value else {
            return if self.required {
                Err(ConfigurationError::missing(&self.name))
            } else {
                Ok(())
            };
        };

        match &self.option_type {
            OptionType::Text => {
                self.expect_str(value)?;
            }
            OptionType::Number { min, max } => {
                let n = value.as_i64().ok_or_else(|| {
                    ConfigurationError::invalid(&self.name, format!("expected a whole number, got {}", value))
                })?;
                if let Some(min) = min {
                    if n < *min {
                        return Err(ConfigurationError::invalid(
                            &self.name,
                            format!("{} is below the minimum of {}", n, min),
                        ));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return Err(ConfigurationError::invalid(
                            &self.name,
                            format!("{} is above the maximum of {}", n, max),
                        ));
                    }
                }
            }
            OptionType::Boolean => {
                if !value.is_boolean() {
                    return Err(ConfigurationError::invalid(
                        &self.name,
                        format!("expected true or false, got {}", value),
                    ));
                }
            }
            OptionType::Choice { options } => {
                let choice = self.expect_str(value)?;
                if !options.iter().any(|o| o == choice) {
                    return Err(ConfigurationError::invalid(
                        &self.name,
                        format!("'{}' is not one of: {}", choice, options.join(", ")),
                    ));
                }
            }
            OptionType::DirectorySelect => {
                let path = Path::new(self.expect_str(value)?);
                if !path.is_dir() {
                    return Err(ConfigurationError::invalid(
                        &self.name,
                        format!("directory '{}' does not exist", path.display()),
                    ));
                }
            }
            OptionType::FileSelect { pattern } => {
                let path = Path::new(self.expect_str(value)?);
                if !path.is_file() {
                    return Err(ConfigurationError::invalid(
                        &self.name,
                        format!("file '{}' does not exist", path.display()),
                    ));
                }
                if let Some(pattern) = pattern {
                    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                    if !file_pattern(&self.name, pattern)?.matches(file_name) {
                        return Err(ConfigurationError::invalid(
                            &self.name,
                            format!("'{}' does not match {}", file_name, pattern),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    fn expect_str<'a>(&self, value: &'a Value) -> Result<&'a str, ConfigurationError> {
        value.as_str().ok_or_else(|| {
            ConfigurationError::invalid(&self.name, format!("expected text, got {}", value))
        })
    }
}

/// Run every option's validator against the arguments.
///
/// Arguments that name no declared option are rejected as well.
pub fn validate_job_arguments(
    options: &[JobOption],
    args: &JobArguments,
) -> Result<(), ConfigurationError> {
    for name in args.values.keys() {
        if !options.iter().any(|o| &o.name == name) {
            return Err(ConfigurationError::unknown(name));
        }
    }
    for option in options {
        option.validate(args.get(&option.name))?;
    }
    Ok(())
}

/// Compile a wildcard pattern such as `*.md5` supplied for `option`
///
/// `*` may span `/`, so `*` alone selects files in subfolders too.
pub fn file_pattern(option: &str, pattern: &str) -> Result<Pattern, ConfigurationError> {
    Pattern::new(pattern).map_err(|e| {
        ConfigurationError::invalid(option, format!("bad pattern '{}': {}", pattern, e.msg))
    })
}

/// Immutable mapping of option name to user-supplied value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobArguments {
    values: BTreeMap<String, Value>,
}

impl JobArguments {
    pub fn builder(options: &[JobOption]) -> JobArgumentsBuilder<'_> {
        JobArgumentsBuilder {
            options,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_path(&self, name: &str) -> Option<PathBuf> {
        self.get_str(name).map(PathBuf::from)
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ConfigurationError> {
        match self.get(name) {
            None | Some(Value::Null) => Err(ConfigurationError::missing(name)),
            Some(value) => value
                .as_str()
                .ok_or_else(|| ConfigurationError::invalid(name, format!("expected text, got {}", value))),
        }
    }

    pub fn require_path(&self, name: &str) -> Result<PathBuf, ConfigurationError> {
        self.require_str(name).map(PathBuf::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Export as a flat `label -> value` object, the persisted job configuration format
    pub fn to_labeled(&self, options: &[JobOption]) -> Map<String, Value> {
        options
            .iter()
            .filter_map(|o| {
                self.values
                    .get(&o.name)
                    .map(|v| (o.label.clone(), v.clone()))
            })
            .collect()
    }

    /// Import a flat `label -> value` object; unknown labels are rejected
    pub fn from_labeled(
        options: &[JobOption],
        labeled: &Map<String, Value>,
    ) -> Result<Self, ConfigurationError> {
        let mut builder = Self::builder(options);
        for (label, value) in labeled {
            builder = builder.set_by_label(label, value.clone())?;
        }
        builder.build()
    }
}

/// Collects user input for a set of options before freezing it into [`JobArguments`]
pub struct JobArgumentsBuilder<'a> {
    options: &'a [JobOption],
    values: BTreeMap<String, Value>,
}

impl<'a> JobArgumentsBuilder<'a> {
    fn option(&self, name: &str) -> Result<&'a JobOption, ConfigurationError> {
        self.options
            .iter()
            .find(|o| o.name == name)
            .ok_or_else(|| ConfigurationError::unknown(name))
    }

    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Result<Self, ConfigurationError> {
        let option = self.option(name)?;
        let value = option.normalize(value.into())?;
        self.values.insert(option.name.clone(), value);
        Ok(self)
    }

    /// Set from a raw string, coercing to the option's type
    pub fn set_raw(mut self, name: &str, raw: &str) -> Result<Self, ConfigurationError> {
        let option = self.option(name)?;
        let value = option.coerce(raw)?;
        self.values.insert(option.name.clone(), value);
        Ok(self)
    }

    /// Set by display label; accepts the option name as well
    pub fn set_by_label(self, label: &str, value: impl Into<Value>) -> Result<Self, ConfigurationError> {
        let name = self
            .options
            .iter()
            .find(|o| o.label == label || o.name == label)
            .map(|o| o.name.clone())
            .ok_or_else(|| ConfigurationError::unknown(label))?;
        self.set(&name, value)
    }

    /// Fill in declared defaults for anything left unset and freeze the mapping
    pub fn build(mut self) -> Result<JobArguments, ConfigurationError> {
        for option in self.options {
            if self.values.contains_key(&option.name) {
                continue;
            }
            if let Some(default) = &option.default {
                let value = option.normalize(default.clone())?;
                self.values.insert(option.name.clone(), value);
            }
        }
        Ok(JobArguments {
            values: self.values,
        })
    }
}
