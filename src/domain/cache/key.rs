//! Cache key derivation
//!
//! A cache key is `{prefix}:{hash}` where the hash covers a canonical JSON
//! rendering of the call's arguments. Positional arguments keep their order,
//! named arguments are sorted by name, and excluded arguments are dropped
//! before anything is serialized.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display};

use serde::Serialize;
use serde_json::{json, Value};
use xxhash_rust::xxh3::xxh3_128;

use crate::domain::DomainError;

/// Prefix used to derive the lock key guarding a cache key
pub const LOCK_KEY_PREFIX: &str = "lock";

/// A single argument as captured for key derivation
#[derive(Debug, Clone, PartialEq)]
enum KeyArg {
    Value(Value),
    /// Serialization failed; only an error if the argument is not excluded
    Unserializable(String),
}

impl KeyArg {
    fn capture<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => KeyArg::Value(value),
            Err(e) => KeyArg::Unserializable(e.to_string()),
        }
    }

    fn into_value(self, position: &str) -> Result<Value, DomainError> {
        match self {
            KeyArg::Value(value) => Ok(value),
            KeyArg::Unserializable(reason) => Err(DomainError::encoding(format!(
                "Argument {} is not serializable: {}",
                position, reason
            ))),
        }
    }
}

/// Parameters for cache key generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheKeyParams {
    /// Logical identity of the cached computation (e.g. `book:detail`)
    pub prefix: String,
    positional: Vec<KeyArg>,
    named: BTreeMap<String, KeyArg>,
}

impl CacheKeyParams {
    /// Creates new cache key parameters with the given prefix and no arguments
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            positional: Vec::new(),
            named: BTreeMap::new(),
        }
    }

    /// Appends a positional argument
    pub fn with_arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.positional.push(KeyArg::capture(value));
        self
    }

    /// Appends a positional argument rendered through its `Display` impl
    pub fn with_display_arg(mut self, value: impl Display) -> Self {
        self.positional.push(KeyArg::Value(Value::String(value.to_string())));
        self
    }

    /// Adds a named argument; a repeated name replaces the earlier value
    pub fn with_named<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.named.insert(name.into(), KeyArg::capture(value));
        self
    }

    /// Adds a named argument rendered through its `Display` impl
    pub fn with_named_display(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.named
            .insert(name.into(), KeyArg::Value(Value::String(value.to_string())));
        self
    }

    /// Number of positional arguments captured so far
    pub fn positional_len(&self) -> usize {
        self.positional.len()
    }

    /// Renders the filtered arguments as canonical JSON
    pub fn canonical(&self, exclusions: &KeyExclusions) -> Result<String, DomainError> {
        let mut args = Vec::with_capacity(self.positional.len());

        for (index, arg) in self.positional.iter().enumerate() {
            if exclusions.excludes_position(index) {
                continue;
            }
            args.push(sorted(arg.clone().into_value(&format!("#{}", index))?));
        }

        let mut kwargs = serde_json::Map::new();

        for (name, arg) in &self.named {
            if exclusions.excludes_name(name) {
                continue;
            }
            kwargs.insert(
                name.clone(),
                sorted(arg.clone().into_value(&format!("'{}'", name))?),
            );
        }

        serde_json::to_string(&json!({ "args": args, "kwargs": kwargs }))
            .map_err(|e| DomainError::encoding(format!("Failed to serialize key arguments: {}", e)))
    }
}

/// Sorts object keys at every depth
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// Arguments left out of key derivation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyExclusions {
    positions: BTreeSet<usize>,
    names: BTreeSet<String>,
}

impl KeyExclusions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Excludes the positional argument at `index`
    pub fn with_position(mut self, index: usize) -> Self {
        self.positions.insert(index);
        self
    }

    /// Excludes the named argument `name`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    pub fn excludes_position(&self, index: usize) -> bool {
        self.positions.contains(&index)
    }

    pub fn excludes_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.names.is_empty()
    }
}

/// Trait for generating cache keys from call parameters
pub trait CacheKeyGenerator: Send + Sync + Debug {
    /// Generates the cache key for the given parameters
    fn generate(
        &self,
        params: &CacheKeyParams,
        exclusions: &KeyExclusions,
    ) -> Result<String, DomainError>;

    /// Derives the key of the lease guarding `cache_key`
    fn lock_key(&self, cache_key: &str) -> String {
        format!("{}:{}", LOCK_KEY_PREFIX, cache_key)
    }
}

/// Default generator: `{prefix}:{xxh3-128 of the canonical arguments}`
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyGenerator;

impl DefaultKeyGenerator {
    pub fn new() -> Self {
        Self
    }

    fn hash_canonical(input: &str) -> String {
        format!("{:032x}", xxh3_128(input.as_bytes()))
    }
}

impl CacheKeyGenerator for DefaultKeyGenerator {
    fn generate(
        &self,
        params: &CacheKeyParams,
        exclusions: &KeyExclusions,
    ) -> Result<String, DomainError> {
        if params.prefix.trim().is_empty() {
            return Err(DomainError::encoding("Cache key prefix must be set"));
        }

        let canonical = params.canonical(exclusions)?;

        Ok(format!("{}:{}", params.prefix, Self::hash_canonical(&canonical)))
    }
}
