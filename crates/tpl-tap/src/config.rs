//! Tap configuration
//!
//! Read from the JSON file passed with `--config`, then overridden by
//! `TPL_*` environment variables (a `.env` file is loaded first).

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tpl_common::types::parse_datetime;
use tpl_common::{Result, TapError};

// ============================================================================
// Configuration Constants
// ============================================================================

pub const DEFAULT_BASE_URL: &str = "https://secure-wms.com";

pub const DEFAULT_AUTH_PATH: &str = "AuthServer/api/Token";

/// Prefix of environment variables overriding file values
pub const ENV_PREFIX: &str = "TPL_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_auth_path")]
    pub auth_path: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub tpl_key: String,
    #[serde(default)]
    pub user_login_id: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub customer_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub facility_id: String,
    #[serde(default)]
    pub start_date: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_auth_path() -> String {
    DEFAULT_AUTH_PATH.to_string()
}

/// Ids are written either way in existing config files
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, found {}",
            other
        ))),
    }
}

impl TapConfig {
    /// Load `.env`, the optional config file, and `TPL_*` overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_value(Value::Object(Default::default()))?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| TapError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| TapError::config(e.to_string()))
    }

    /// Override fields from `TPL_<FIELD>` variables found by `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields: [(&str, &mut String); 10] = [
            ("BASE_URL", &mut self.base_url),
            ("AUTH_PATH", &mut self.auth_path),
            ("CLIENT_ID", &mut self.client_id),
            ("CLIENT_SECRET", &mut self.client_secret),
            ("TPL_KEY", &mut self.tpl_key),
            ("USER_LOGIN_ID", &mut self.user_login_id),
            ("USER_AGENT", &mut self.user_agent),
            ("CUSTOMER_ID", &mut self.customer_id),
            ("FACILITY_ID", &mut self.facility_id),
            ("START_DATE", &mut self.start_date),
        ];
        for (name, field) in fields {
            if let Some(value) = lookup(&format!("{}{}", ENV_PREFIX, name)) {
                *field = value;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("base_url", &self.base_url),
            ("auth_path", &self.auth_path),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("tpl_key", &self.tpl_key),
            ("user_login_id", &self.user_login_id),
            ("user_agent", &self.user_agent),
            ("customer_id", &self.customer_id),
            ("facility_id", &self.facility_id),
            ("start_date", &self.start_date),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(TapError::config(format!(
                "missing required config keys: {}",
                missing.join(", ")
            )));
        }
        self.start_date()?;
        Ok(())
    }

    /// Bookmark floor for datetime streams with no stored bookmark
    pub fn start_date(&self) -> Result<DateTime<Utc>> {
        parse_datetime(&self.start_date).ok_or_else(|| {
            TapError::config(format!("start_date '{}' is not a valid datetime", self.start_date))
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_path: DEFAULT_AUTH_PATH.to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            tpl_key: "key".to_string(),
            user_login_id: "1".to_string(),
            user_agent: "tap-3plcentral <ops@example.com>".to_string(),
            customer_id: "3".to_string(),
            facility_id: "7".to_string(),
            start_date: "2021-01-01T00:00:00Z".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_and_numeric_ids() {
        let config = TapConfig::from_value(json!({
            "client_id": "c",
            "client_secret": "s",
            "tpl_key": "k",
            "user_login_id": "9",
            "user_agent": "agent",
            "customer_id": 3,
            "facility_id": "7",
            "start_date": "2021-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.auth_path, DEFAULT_AUTH_PATH);
        assert_eq!(config.customer_id, "3");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_keys_are_listed() {
        let config = TapConfig::from_value(json!({"client_id": "c"})).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("client_secret"));
        assert!(err.contains("start_date"));
        assert!(!err.contains("client_id,"));
    }

    #[test]
    fn test_invalid_start_date() {
        let mut config = TapConfig::for_tests();
        config.start_date = "last tuesday".into();
        assert!(matches!(config.validate(), Err(TapError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<String, String> = [
            ("TPL_FACILITY_ID".to_string(), "12".to_string()),
            ("TPL_BASE_URL".to_string(), "http://localhost:9000".to_string()),
        ]
        .into();
        let mut config = TapConfig::for_tests();
        config.apply_overrides(|key| env.get(key).cloned());
        assert_eq!(config.facility_id, "12");
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.customer_id, "3");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string(&TapConfig::for_tests()).unwrap()).unwrap();
        assert_eq!(TapConfig::from_file(&path).unwrap(), TapConfig::for_tests());

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(TapConfig::from_file(&path), Err(TapError::Config(_))));
    }
}
