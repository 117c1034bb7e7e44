use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::errors::{Error, Result};
use crate::functions::Registry;
use crate::value::Value;

/// Evaluation context of one step: the data expressions see plus the
/// functions they may call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    data: Value,
    functions: Registry,
}

impl Context {
    pub fn new(data: Value, functions: Registry) -> Self {
        Self { data, functions }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn functions(&self) -> &Registry {
        &self.functions
    }
}

/// Run configuration, usually read from a YAML file.
///
/// ```yaml
/// timeout_ms: 500
/// color: true
/// vars:
///   user: alice
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Deadline of each deferred evaluation attempt.
    pub timeout_ms: Option<u64>,
    /// Colorize document excerpts in error messages.
    pub color: bool,
    /// Variables exposed to templates as `vars`.
    pub vars: serde_yaml::Value,
}

impl Options {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).map_err(|e| Error::Parse(format!("invalid options: {e}")))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Base data for templates.
    pub fn data(&self) -> Value {
        let mut data = IndexMap::new();
        data.insert("vars".to_string(), Value::from(self.vars.clone()));
        Value::Object(data)
    }
}
