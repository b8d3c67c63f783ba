//! Deterministic cache keys built from a resource name and its parameters.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

/// Render a cache key as `name:key:JSON(value)|key:JSON(value)`.
///
/// Null parameters are dropped and the rest are sorted by key, so the same
/// logical request always renders the same way. No parameters gives the bare
/// name.
pub fn serialize_scope(name: &str, params: &Map<String, Value>) -> String {
  let mut entries: Vec<(&String, &Value)> = params.iter().filter(|(_, v)| !v.is_null()).collect();
  if entries.is_empty() {
    return name.to_string();
  }
  entries.sort_by(|a, b| a.0.cmp(b.0));

  let rendered: Vec<String> = entries
    .into_iter()
    .map(|(key, value)| format!("{}:{}", key, value))
    .collect();

  format!("{}:{}", name, rendered.join("|"))
}

/// A cache partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
  key: String,
}

impl Scope {
  /// A scope with no parameters.
  pub fn new(name: &str) -> Self {
    Self {
      key: name.to_string(),
    }
  }

  /// Start building a scope with parameters.
  pub fn builder(name: &str) -> ScopeBuilder {
    ScopeBuilder {
      name: name.to_string(),
      params: Map::new(),
    }
  }

  /// Wrap an already-rendered key, e.g. one returned by store enumeration.
  pub fn from_key(key: impl Into<String>) -> Self {
    Self { key: key.into() }
  }

  /// The logical resource name (everything before the first `:`).
  pub fn name(&self) -> &str {
    self.key.split(':').next().unwrap_or_default()
  }

  pub fn as_str(&self) -> &str {
    &self.key
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.key)
  }
}

/// Collects parameters in any order; `build` canonicalizes them.
#[derive(Debug, Clone)]
pub struct ScopeBuilder {
  name: String,
  params: Map<String, Value>,
}

impl ScopeBuilder {
  /// Add a parameter. Values that fail to serialize or are `None` are skipped.
  pub fn param(mut self, key: &str, value: impl Serialize) -> Self {
    if let Ok(value) = serde_json::to_value(value) {
      self.params.insert(key.to_string(), value);
    }
    self
  }

  pub fn build(self) -> Scope {
    Scope {
      key: serialize_scope(&self.name, &self.params),
    }
  }
}
