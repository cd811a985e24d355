use serde::{Deserialize, Serialize};

use crate::permissions::PermissionMap;

/// The authenticated user as delivered by the identity backend at login.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: PermissionMap,
}

impl Identity {
    pub fn new<S: Into<String>>(user_id: S, permissions: PermissionMap) -> Self {
        Self { user_id: user_id.into(), permissions, ..Default::default() }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}
