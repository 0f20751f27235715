//! Attribute store.
//!
//! Attributes are the named scalar fields of a machine instance (`hunger`,
//! `sleepiness`, ...). Conditions and operations only refer to them by name.

use crate::error::CoreError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named attribute table owned by a single machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an attribute, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Looks up an attribute, failing if it was never declared.
    pub fn require(&self, name: &str) -> Result<&Value, CoreError> {
        self.0.get(name).ok_or_else(|| CoreError::UnknownAttribute {
            name: name.to_string(),
        })
    }

    /// Overwrites an existing attribute. Unknown names are rejected rather
    /// than created.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<Value, CoreError> {
        match self.0.get_mut(name) {
            Some(slot) => Ok(std::mem::replace(slot, value.into())),
            None => Err(CoreError::UnknownAttribute {
                name: name.to_string(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
