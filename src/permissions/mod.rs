//! Permission evaluation: deny-by-default, strict `true` only.
//!
//! This is a presentation gate. The backend enforces the same keys on its own
//! (see `devserver::require_permission`).

mod gate;
mod map;

use serde::Serialize;
use serde_json::Value;

pub use gate::{gate, with_permission, Guarded};
pub use map::PermissionMap;

/// Whether `key` is granted: only a literal JSON `true` allows.
pub fn allows(map: &PermissionMap, key: &str) -> bool {
    matches!(map.get(key), Some(Value::Bool(true)))
}

pub fn allows_all(map: &PermissionMap, keys: &[&str]) -> bool {
    keys.iter().all(|k| allows(map, k))
}

pub fn allows_any(map: &PermissionMap, keys: &[&str]) -> bool {
    keys.iter().any(|k| allows(map, k))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allow: bool,
    pub reason: &'static str,
}

/// Same answer as [`allows`], with the reason spelled out for diagnostics.
pub fn evaluate(map: &PermissionMap, key: &str) -> Decision {
    match map.get(key) {
        Some(Value::Bool(true)) => Decision { allow: true, reason: "granted" },
        Some(Value::Bool(false)) => Decision { allow: false, reason: "revoked" },
        Some(_) => Decision { allow: false, reason: "malformed" },
        None => Decision { allow: false, reason: "missing" },
    }
}

/// Missing permission, for `?`-style call sites.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("permission '{0}' is required")]
pub struct Denied(pub String);

pub fn require(map: &PermissionMap, key: &str) -> Result<(), Denied> {
    if allows(map, key) { Ok(()) } else { Err(Denied(key.to_string())) }
}
