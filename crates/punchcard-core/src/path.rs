//! Field paths into vendor records.
//!
//! A [`FieldPath`] is an ordered list of steps (object keys or array indexes)
//! that locates a value inside an arbitrary JSON tree. Format descriptors hold
//! one path per field, so the same resolver serves the entry point, the
//! employee number, the date and the time lookups.
//!
//! Paths are stored either as a JSON array (`["data", 0, "emp"]`) or as a
//! dotted string (`"data.0.emp"`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::AppError;

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Key(key) => write!(f, "{key}"),
            PathStep::Index(i) => write!(f, "{i}"),
        }
    }
}

/// Location of a value inside a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath {
    steps: Vec<PathStep>,
}

impl FieldPath {
    /// The empty path, which resolves to the record itself.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Walk `record` step by step and return the located value.
    ///
    /// Key steps read array elements when they parse as an index, and index
    /// steps read object members by their decimal name. A `null` at the end
    /// of the walk is treated as absent.
    pub fn resolve<'a>(&self, record: &'a Value) -> Result<&'a Value, AppError> {
        let mut current = record;
        for step in &self.steps {
            let next = match (step, current) {
                (PathStep::Key(key), Value::Object(map)) => map.get(key),
                (PathStep::Key(key), Value::Array(items)) => {
                    key.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                (PathStep::Index(i), Value::Array(items)) => items.get(*i),
                (PathStep::Index(i), Value::Object(map)) => map.get(&i.to_string()),
                _ => None,
            };
            current = next.ok_or_else(|| AppError::PathNotFound(self.to_string()))?;
        }
        if current.is_null() {
            return Err(AppError::PathNotFound(self.to_string()));
        }
        Ok(current)
    }

    /// Resolve and render the value as trimmed text.
    ///
    /// Strings are returned as-is, numbers and booleans in their JSON form.
    /// Objects, arrays and blank strings are treated as not found.
    pub fn resolve_text(&self, record: &Value) -> Result<String, AppError> {
        let text = match self.resolve(record)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => String::new(),
        };
        if text.is_empty() {
            return Err(AppError::PathNotFound(self.to_string()));
        }
        Ok(text)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "$");
        }
        let rendered: Vec<String> = self.steps.iter().map(ToString::to_string).collect();
        write!(f, "{}", rendered.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "$" {
            return Ok(Self::root());
        }
        let steps = s
            .split('.')
            .map(|segment| {
                if segment.is_empty() {
                    return Err(AppError::ConfigurationError(format!(
                        "Empty segment in path '{s}'"
                    )));
                }
                Ok(PathStep::Key(segment.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { steps })
    }
}

impl From<Vec<&str>> for FieldPath {
    fn from(keys: Vec<&str>) -> Self {
        Self {
            steps: keys
                .into_iter()
                .map(|k| PathStep::Key(k.to_string()))
                .collect(),
        }
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let steps: Vec<Value> = self
            .steps
            .iter()
            .map(|step| match step {
                PathStep::Key(key) => Value::String(key.clone()),
                PathStep::Index(i) => Value::from(*i),
            })
            .collect();
        steps.serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStep {
    Index(usize),
    Key(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPath {
    Dotted(String),
    Steps(Vec<RawStep>),
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawPath::deserialize(deserializer)? {
            RawPath::Dotted(s) => s.parse().map_err(serde::de::Error::custom),
            RawPath::Steps(steps) => Ok(Self {
                steps: steps
                    .into_iter()
                    .map(|step| match step {
                        RawStep::Index(i) => PathStep::Index(i),
                        RawStep::Key(key) => PathStep::Key(key),
                    })
                    .collect(),
            }),
        }
    }
}
