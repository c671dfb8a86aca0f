//! The runtime configuration plane.
//!
//! [`RuntimeConfig`] holds the handful of keys recognized by the admin
//! config endpoint (`§4.7` of the design). It is seeded from the process
//! environment at boot, persisted in `system_config`, and republished to
//! every replica over the config bus whenever it changes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// All keys the admin config endpoint understands. Any other key present
/// in a `POST /admin/config` body is ignored.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "OPENROUTER_API_KEY",
    "ADMIN_API_KEY",
    "OPENROUTER_HTTP_REFERER",
    "OPENROUTER_X_TITLE",
    "LOG_MODE",
    "REDIS_URL",
    "DATABASE_URL",
    "WEBUI_DATABASE_URL",
];

/// Every recognized key is required; there is no built-in default.
fn is_required(_key: &str) -> bool {
    true
}

/// Severity of a single configuration problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub key: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.key, self.message)
    }
}

/// The effective runtime configuration, keyed by recognized key name.
///
/// Values are plain strings (as stored in `system_config`); typed accessors
/// are provided for the handful of call sites that need them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    values: BTreeMap<String, String>,
}

impl RuntimeConfig {
    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Seed a config map from the process environment, one entry per
    /// recognized key that is set and non-empty.
    pub fn seed_from_env() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for key in RECOGNIZED_KEYS {
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    map.insert((*key).to_string(), value);
                }
            }
        }
        map
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.values
    }

    /// Merge `updates` (restricted to recognized keys) into this config,
    /// returning the list of keys that actually changed value.
    pub fn merge(&mut self, updates: &BTreeMap<String, String>) -> Vec<String> {
        let mut changed = Vec::new();
        for (key, value) in updates {
            if !RECOGNIZED_KEYS.contains(&key.as_str()) {
                continue;
            }
            if self.values.get(key) != Some(value) {
                changed.push(key.clone());
            }
            self.values.insert(key.clone(), value.clone());
        }
        changed
    }

    /// Validate that every required key is present and non-blank.
    ///
    /// Returns the ordered list of missing keys; the caller renders this as
    /// `Missing required config: <list>` on boot failure, or HTTP 400 on an
    /// admin write.
    pub fn missing_required(&self) -> Vec<String> {
        RECOGNIZED_KEYS
            .iter()
            .filter(|k| is_required(k))
            .filter(|k| {
                self.values
                    .get(**k)
                    .map(|v| v.trim().is_empty())
                    .unwrap_or(true)
            })
            .map(|k| k.to_string())
            .collect()
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        self.missing_required()
            .into_iter()
            .map(|key| ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "required config key is missing or blank".to_string(),
                key,
            })
            .collect()
    }

    // ── Typed accessors for the hot path ────────────────────────────

    pub fn openrouter_api_key(&self) -> Option<&str> {
        self.get("OPENROUTER_API_KEY")
    }

    pub fn admin_api_key(&self) -> Option<&str> {
        self.get("ADMIN_API_KEY")
    }

    pub fn openrouter_http_referer(&self) -> Option<&str> {
        self.get("OPENROUTER_HTTP_REFERER")
    }

    pub fn openrouter_x_title(&self) -> Option<&str> {
        self.get("OPENROUTER_X_TITLE")
    }

    pub fn log_mode(&self) -> LogMode {
        match self.get("LOG_MODE") {
            Some("off") => LogMode::Off,
            _ => LogMode::Metadata,
        }
    }

    pub fn redis_url(&self) -> Option<&str> {
        self.get("REDIS_URL")
    }

    pub fn database_url(&self) -> Option<&str> {
        self.get("DATABASE_URL")
    }

    pub fn webui_database_url(&self) -> Option<&str> {
        self.get("WEBUI_DATABASE_URL")
    }

    /// Render the masked view returned by `GET /admin/config`: any key
    /// containing `KEY`, `PASSWORD`, or `SECRET` is masked as a function of
    /// its value length alone.
    pub fn masked(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| {
                let masked = if key_is_sensitive(k) {
                    mask_value(v)
                } else {
                    v.clone()
                };
                (k.clone(), masked)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Metadata,
    Off,
}

fn key_is_sensitive(key: &str) -> bool {
    let upper = key.to_uppercase();
    upper.contains("KEY") || upper.contains("PASSWORD") || upper.contains("SECRET")
}

/// `len <= 8 -> "********"`; else first 4 + `"********"` + last 4.
pub fn mask_value(value: &str) -> String {
    if value.len() <= 8 {
        "********".to_string()
    } else {
        let bytes = value.as_bytes();
        let head = String::from_utf8_lossy(&bytes[..4]);
        let tail = String::from_utf8_lossy(&bytes[bytes.len() - 4..]);
        format!("{head}********{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_short_value() {
        assert_eq!(mask_value("short"), "********");
        assert_eq!(mask_value("12345678"), "********");
    }

    #[test]
    fn mask_long_value() {
        assert_eq!(mask_value("sk-or-v1-abcdef1234567890"), "sk-o********7890");
    }

    #[test]
    fn missing_required_lists_all_unset_keys() {
        let cfg = RuntimeConfig::default();
        let missing = cfg.missing_required();
        assert_eq!(missing.len(), RECOGNIZED_KEYS.len());
    }

    #[test]
    fn merge_reports_only_changed_keys_and_ignores_unknown() {
        let mut cfg = RuntimeConfig::from_map(BTreeMap::from([(
            "LOG_MODE".to_string(),
            "metadata".to_string(),
        )]));
        let mut updates = BTreeMap::new();
        updates.insert("LOG_MODE".to_string(), "metadata".to_string()); // unchanged
        updates.insert("REDIS_URL".to_string(), "redis://x".to_string()); // changed
        updates.insert("UNKNOWN_KEY".to_string(), "ignored".to_string());

        let changed = cfg.merge(&updates);
        assert_eq!(changed, vec!["REDIS_URL".to_string()]);
        assert_eq!(cfg.get("UNKNOWN_KEY"), None);
    }

    #[test]
    fn masked_view_only_masks_sensitive_keys() {
        let mut values = BTreeMap::new();
        values.insert("OPENROUTER_API_KEY".to_string(), "sk-or-v1-1234567890".to_string());
        values.insert("OPENROUTER_HTTP_REFERER".to_string(), "https://example.com".to_string());
        let cfg = RuntimeConfig::from_map(values);
        let masked = cfg.masked();
        assert_eq!(masked["OPENROUTER_API_KEY"], "sk-o********7890");
        assert_eq!(masked["OPENROUTER_HTTP_REFERER"], "https://example.com");
    }
}
