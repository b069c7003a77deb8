use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use log::debug;
use minijinja::value::ValueKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("syntax error in `{expression}`: {reason}")]
    Syntax { expression: String, reason: String },

    #[error("`{expression}` references `{name}`, which is not set in the environment")]
    UnknownVariable { expression: String, name: String },

    #[error("`{expression}` evaluated to {kind}, expected a boolean")]
    NonBoolean { expression: String, kind: String },

    #[error("evaluate `{expression}`: {reason}")]
    Evaluate { expression: String, reason: String },
}

#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("expected KEY=VALUE, got `{0}`")]
    MalformedPair(String),

    #[error("environment key `{0}` holds a nested value; only scalars are allowed")]
    NotScalar(String),

    #[error("deserialize: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// A scalar value a conditional expression can refer to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum EnvValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl EnvValue {
    /// Read a raw string as the narrowest scalar it spells.
    pub fn parse(raw: &str) -> Self {
        if let Ok(b) = raw.parse::<bool>() {
            return Self::Bool(b);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Self::Integer(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return Self::Float(f);
            }
        }
        Self::String(raw.to_string())
    }
}

impl Display for EnvValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Runtime variables a task's `when` condition is evaluated against.
/// Supplied fresh for every rollout phase.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct TaskEnvironment(BTreeMap<String, EnvValue>);

impl TaskEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: EnvValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EnvValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse `KEY=VALUE` pairs, as given on the command line.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, EnvironmentError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut env = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() => env.insert(key, EnvValue::parse(value)),
                _ => return Err(EnvironmentError::MalformedPair(pair.to_string())),
            }
        }
        Ok(env)
    }

    /// Parse a flat JSON object of scalars, as written by the step that
    /// resolves build variables ahead of a rollout.
    pub fn from_json(json: &str) -> Result<Self, EnvironmentError> {
        let object: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;
        object
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::Bool(b) => EnvValue::Bool(b),
                    serde_json::Value::String(s) => EnvValue::String(s),
                    serde_json::Value::Number(n) => match n.as_i64() {
                        Some(i) => EnvValue::Integer(i),
                        None => EnvValue::Float(n.as_f64().unwrap_or_default()),
                    },
                    _ => return Err(EnvironmentError::NotScalar(key)),
                };
                Ok((key, value))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }

    /// Pick up the listed keys from the process environment, if they are set.
    pub fn from_process_env<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut env = Self::new();
        for key in keys {
            if let Ok(value) = std::env::var(key) {
                env.insert(key, EnvValue::parse(&value));
            }
        }
        env
    }

    /// Layer `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: TaskEnvironment) {
        self.0.extend(other.0);
    }
}

/// Evaluate a conditional expression against the environment.
///
/// Only a boolean result counts as success. A number, string or any other
/// kind of value is an error, as is a reference to a variable the
/// environment does not define.
pub fn evaluate(expression: &str, environment: &TaskEnvironment) -> Result<bool, EvaluationError> {
    let engine = minijinja::Environment::new();
    let compiled = engine
        .compile_expression(expression)
        .map_err(|err| EvaluationError::Syntax {
            expression: expression.to_string(),
            reason: err.to_string(),
        })?;

    let mut undeclared: Vec<String> = compiled
        .undeclared_variables(false)
        .into_iter()
        .filter(|name| !environment.contains_key(name))
        .collect();
    undeclared.sort();
    if let Some(name) = undeclared.into_iter().next() {
        return Err(EvaluationError::UnknownVariable {
            expression: expression.to_string(),
            name,
        });
    }

    let value = compiled
        .eval(environment)
        .map_err(|err| EvaluationError::Evaluate {
            expression: expression.to_string(),
            reason: err.to_string(),
        })?;
    debug!("Condition `{expression}` evaluated to {value:?}");

    match value.kind() {
        ValueKind::Bool => Ok(value.is_true()),
        kind => Err(EvaluationError::NonBoolean {
            expression: expression.to_string(),
            kind: kind.to_string(),
        }),
    }
}
