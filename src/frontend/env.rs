//! Input variable values supplied from outside the configuration.
//!
//! Values arrive from `*.tfvars` files, the CLI and `tfgraph.toml`. Later
//! sources override earlier ones.
//!
//! # Example
//! ```
//! use tfgraph::frontend::env::InputVars;
//! use hcl::Value;
//!
//! let mut vars = InputVars::default();
//! vars.insert_raw("count", "3");
//! vars.insert_raw("size", "t3.micro");
//! assert_eq!(vars.get("count"), Some(&Value::from(3)));
//! assert_eq!(vars.get("size"), Some(&Value::from("t3.micro")));
//! ```

use anyhow::{Context as _, Result};
use hcl::eval::Evaluate;
use hcl::value::Map;
use hcl::Value;

use super::builtins::create_context;
use super::parse_expression;

#[derive(Default, Clone, Debug, PartialEq)]
pub struct InputVars {
    values: Map<String, Value>,
}

impl InputVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Insert a string as written on a command line.
    pub fn insert_raw(&mut self, name: impl Into<String>, raw: &str) {
        self.insert(name, parse_input(raw));
    }

    /// Insert a structured value given as JSON.
    pub fn insert_json(&mut self, name: impl Into<String>, json: serde_json::Value) -> Result<()> {
        let value = match json {
            serde_json::Value::String(s) => parse_input(&s),
            other => from_json(other)?,
        };
        self.insert(name, value);
        Ok(())
    }

    /// Overlay `other` on top of `self`.
    pub fn extend(&mut self, other: InputVars) {
        self.values.extend(other.values);
    }

    /// Parse the body of a `.tfvars` file. Values that do not evaluate on
    /// their own, such as references to locals, are skipped so the
    /// variable keeps its default.
    pub fn from_tfvars(src: &str) -> Result<Self> {
        let body: hcl::Body = hcl::from_str(src).context("failed to parse variable file")?;
        let ctx = create_context();
        let mut vars = InputVars::default();
        for attr in body.attributes() {
            match attr.expr().evaluate(&ctx) {
                Ok(value) => vars.insert(attr.key(), value),
                Err(err) => log::warn!("ignoring variable {}: {}", attr.key(), err),
            }
        }
        Ok(vars)
    }

    /// Parse a `.tfvars.json` file: one JSON object of variable values.
    /// Strings stay strings.
    pub fn from_tfvars_json(src: &str) -> Result<Self> {
        let json: serde_json::Value =
            serde_json::from_str(src).context("failed to parse variable file")?;
        let serde_json::Value::Object(map) = json else {
            anyhow::bail!("variable file must hold a JSON object");
        };
        let mut vars = InputVars::default();
        for (name, value) in map {
            vars.insert(name, from_json(value)?);
        }
        Ok(vars)
    }
}

impl FromIterator<(String, Value)> for InputVars {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Interpret a raw string as an HCL expression when it evaluates on its own,
/// otherwise keep it as a plain string.
pub fn parse_input(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::from(raw);
    }
    match parse_expression(trimmed).and_then(|expr| {
        expr.evaluate(&create_context())
            .map_err(|e| anyhow::anyhow!(e.to_string()))
    }) {
        Ok(value) => value,
        Err(_) => Value::from(raw),
    }
}

/// Normalize a JSON value into an HCL value with string keys.
pub fn from_json(json: serde_json::Value) -> Result<Value> {
    serde_json::from_value(json).context("failed to convert JSON input value")
}
