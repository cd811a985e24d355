//! Presentation-side call shapes. Each one defers to [`super::allows`]; none of them
//! adds rules of its own.

use super::{allows, PermissionMap};

/// Declarative gate: `render` when the key is granted, otherwise `fallback`.
pub fn gate<T, R, F>(map: &PermissionMap, key: &str, render: R, fallback: F) -> T
where
    R: FnOnce() -> T,
    F: FnOnce() -> T,
{
    if allows(map, key) { render() } else { fallback() }
}

/// A UI unit wrapped so that it renders nothing without the permission.
#[derive(Debug, Clone)]
pub struct Guarded<U> {
    key: String,
    unit: U,
}

impl<U> Guarded<U> {
    pub fn key(&self) -> &str { &self.key }

    pub fn into_inner(self) -> U { self.unit }
}

impl<U, T> Guarded<U>
where
    U: Fn() -> T,
{
    pub fn render(&self, map: &PermissionMap) -> Option<T> {
        if allows(map, &self.key) { Some((self.unit)()) } else { None }
    }
}

/// Wrap an existing unit behind `key`.
pub fn with_permission<U, K: Into<String>>(key: K, unit: U) -> Guarded<U> {
    Guarded { key: key.into(), unit }
}
