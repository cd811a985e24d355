//! Access layer configuration.
//!
//! Layering: built-in defaults, then an optional JSON file named by `COLLEGIUM_CONFIG`,
//! then individual `COLLEGIUM_*` environment variables. Binaries apply CLI flags last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_CONFIG_FILE: &str = "COLLEGIUM_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccessConfig {
    /// Base URL of the business backend; operation endpoints are joined onto it.
    pub api_base_url: String,
    /// Base URL of the identity backend (login/refresh/logout).
    pub identity_base_url: String,
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    /// Remote error sink. Ignored when `remote_logging_enabled` is false.
    pub logging_endpoint: String,
    pub remote_logging_enabled: bool,
    /// Transport-level timeout. The executor itself never times out.
    pub request_timeout_ms: u64,
    /// Durable side-channel for the session store. `None` keeps the session in memory only.
    pub session_file: Option<PathBuf>,
    /// Directory holding the single-slot diagnostic cache. `None` keeps it in memory only.
    pub diagnostics_dir: Option<PathBuf>,
    /// Reported as the record url when a capture site does not supply one.
    pub app_url: String,
    /// Where the error boundary sends users after a failure.
    pub home_path: String,
    pub login_route: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:7979".to_string(),
            identity_base_url: "http://127.0.0.1:7979".to_string(),
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            logout_path: "/auth/logout".to_string(),
            logging_endpoint: "http://127.0.0.1:7979/client-errors".to_string(),
            remote_logging_enabled: false,
            request_timeout_ms: 30_000,
            session_file: None,
            diagnostics_dir: None,
            app_url: "collegium://app".to_string(),
            home_path: "/dashboard".to_string(),
            login_route: "/login".to_string(),
        }
    }
}

impl AccessConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Defaults, then the file named by `COLLEGIUM_CONFIG` (if set), then env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var(ENV_CONFIG_FILE) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        cfg.apply_env(|name| std::env::var(name).ok())?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })
    }

    /// Overlay `COLLEGIUM_*` variables using the supplied lookup (injectable for tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COLLEGIUM_API_BASE") { self.api_base_url = v; }
        if let Some(v) = lookup("COLLEGIUM_IDENTITY_BASE") { self.identity_base_url = v; }
        if let Some(v) = lookup("COLLEGIUM_LOGGING_ENDPOINT") { self.logging_endpoint = v; }
        if let Some(v) = lookup("COLLEGIUM_REMOTE_LOGGING") {
            self.remote_logging_enabled = parse_bool(&v)
                .ok_or_else(|| ConfigError::InvalidValue { name: "COLLEGIUM_REMOTE_LOGGING".into(), value: v.clone() })?;
        }
        if let Some(v) = lookup("COLLEGIUM_TIMEOUT_MS") {
            self.request_timeout_ms = v
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue { name: "COLLEGIUM_TIMEOUT_MS".into(), value: v.clone() })?;
        }
        if let Some(v) = lookup("COLLEGIUM_SESSION_FILE") { self.session_file = non_empty_path(&v); }
        if let Some(v) = lookup("COLLEGIUM_DIAGNOSTICS_DIR") { self.diagnostics_dir = non_empty_path(&v); }
        if let Some(v) = lookup("COLLEGIUM_APP_URL") { self.app_url = v; }
        Ok(())
    }
}

/// Accepts 1/true/yes/on and 0/false/no/off, case-insensitive.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty_path(raw: &str) -> Option<PathBuf> {
    let t = raw.trim();
    if t.is_empty() { None } else { Some(PathBuf::from(t)) }
}
