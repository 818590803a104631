//! Shared key/value state for one workflow run.
//!
//! A [`Context`] is a cheap handle: clones share the same underlying maps, so
//! every concurrently running step of a run observes the same data. All map
//! operations go through [`DashMap`] and are safe under concurrent access.
//! Steps that depend on each other's data should still communicate through
//! their declared output keys instead of racing on a shared key.

use crate::Value;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
struct ContextInner {
    data: DashMap<String, Value>,
    variables: DashMap<String, Value>,
    metadata: DashMap<String, Value>,
}

/// Mutable state visible to every step during a workflow run
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context whose data map is seeded from `data`.
    pub fn from_map(data: HashMap<String, Value>) -> Self {
        let ctx = Self::new();
        ctx.update(data);
        ctx
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.data.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.get(key).unwrap_or_else(|| default.into())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.data.insert(key.into(), value.into());
    }

    pub fn update<I, K>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in entries {
            self.inner.data.insert(key.into(), value);
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.data.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.data.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.data.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Point-in-time copy of the data map.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.inner.variables.get(name).map(|entry| entry.value().clone())
    }

    pub fn get_variable_or(&self, name: &str, default: impl Into<Value>) -> Value {
        self.get_variable(name).unwrap_or_else(|| default.into())
    }

    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner.variables.insert(name.into(), value.into());
    }

    pub fn variables(&self) -> HashMap<String, Value> {
        self.inner
            .variables
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        self.inner.metadata.get(key).map(|entry| entry.value().clone())
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.metadata.insert(key.into(), value.into());
    }

    pub fn remove_metadata(&self, key: &str) -> Option<Value> {
        self.inner.metadata.remove(key).map(|(_, value)| value)
    }

    /// Resolve a path expression such as `orders[0].total` or `cache[user42]`
    /// against the data map.
    ///
    /// Missing segments, out-of-range indices, type mismatches and malformed
    /// paths all resolve to `None`; resolution never fails.
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let tokens = tokenize(path)?;
        let (first, rest) = tokens.split_first()?;
        let root = self.inner.data.get(first.as_key())?;
        walk(root.value(), rest).cloned()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("data", &self.snapshot())
            .field("variables", &self.variables())
            .field("metadata_keys", &self.inner.metadata.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PathToken {
    /// Plain dotted segment
    Key(String),
    /// Bracketed segment; may be an index or a key
    Bracket(String),
}

impl PathToken {
    fn as_key(&self) -> &str {
        match self {
            PathToken::Key(k) | PathToken::Bracket(k) => k,
        }
    }
}

fn tokenize(path: &str) -> Option<Vec<PathToken>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    tokens.push(PathToken::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    tokens.push(PathToken::Key(std::mem::take(&mut current)));
                }
                let mut inner = String::new();
                loop {
                    match chars.next()? {
                        ']' => break,
                        '[' => return None,
                        other => inner.push(other),
                    }
                }
                if inner.is_empty() {
                    return None;
                }
                tokens.push(PathToken::Bracket(inner));
            }
            ']' => return None,
            other => current.push(other),
        }
    }
    if !current.is_empty() {
        tokens.push(PathToken::Key(current));
    }

    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

fn walk<'a>(mut current: &'a Value, tokens: &[PathToken]) -> Option<&'a Value> {
    for token in tokens {
        current = match (token, current) {
            (PathToken::Key(key), Value::Object(map)) => map.get(key)?,
            (PathToken::Bracket(raw), Value::Array(items)) => {
                let index: usize = raw.trim().parse().ok()?;
                items.get(index)?
            }
            (PathToken::Bracket(raw), Value::Object(map)) => map.get(raw.as_str())?,
            _ => return None,
        };
    }
    Some(current)
}

