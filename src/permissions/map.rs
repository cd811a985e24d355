use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Permission key -> value, as delivered with the identity.
///
/// Values are kept as raw JSON because the wire is not trusted to send booleans;
/// only a literal `true` grants anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMap(BTreeMap<String, Value>);

impl PermissionMap {
    pub fn new() -> Self { Self::default() }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Build from a JSON object; anything else yields an empty (deny-all) map.
    pub fn from_value(value: &Value) -> Self {
        match value.as_object() {
            Some(obj) => Self(obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            None => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> { self.0.get(key) }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Keys whose value is exactly `true`, in sorted order.
    pub fn granted_keys(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, v)| matches!(v, Value::Bool(true)))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for PermissionMap {
    fn from_iter<T: IntoIterator<Item = (K, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), Value::Bool(v))).collect())
    }
}
