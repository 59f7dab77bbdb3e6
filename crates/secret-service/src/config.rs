//! Client configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::SERVICE_PATH;
use crate::session::Algorithm;
use crate::value::ObjectPath;

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Object path of the service root
    #[serde(default = "default_service_path")]
    pub service_path: ObjectPath,

    /// Alias resolved by `Service::get_default_collection`
    #[serde(default = "default_alias")]
    pub default_alias: String,

    /// Window identifier handed to every prompt (empty for none)
    #[serde(default)]
    pub window_id: String,

    /// Session algorithm
    #[serde(default)]
    pub algorithm: Algorithm,
}

fn default_service_path() -> ObjectPath {
    ObjectPath::from_static(SERVICE_PATH)
}

fn default_alias() -> String {
    "default".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_path: default_service_path(),
            default_alias: default_alias(),
            window_id: String::new(),
            algorithm: Algorithm::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the default path, or defaults if absent
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: ClientConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("secret-service")
            .join("config.json")
    }

    /// Path of the collection behind `default_alias`
    ///
    /// Fails when the alias is not a valid path segment.
    pub fn default_collection(&self) -> crate::error::Result<ObjectPath> {
        self.service_path.join("aliases")?.join(&self.default_alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_COLLECTION;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.service_path.as_str(), SERVICE_PATH);
        assert_eq!(config.window_id, "");
        assert_eq!(config.algorithm, Algorithm::Plain);
        assert_eq!(config.default_collection().unwrap().as_str(), DEFAULT_COLLECTION);
    }

    #[test]
    fn test_invalid_paths_are_rejected() {
        assert!(serde_json::from_str::<ClientConfig>(r#"{"service_path": "secrets"}"#).is_err());

        let config = ClientConfig {
            default_alias: "my-login".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.default_collection(),
            Err(crate::error::Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"window_id": "x11:42"}"#).unwrap();
        assert_eq!(config.window_id, "x11:42");
        assert_eq!(config.default_alias, "default");
        assert_eq!(config.service_path.as_str(), SERVICE_PATH);
    }

    #[test]
    fn test_algorithm_names() {
        let json = r#"{"algorithm": "dh-ietf1024-sha256-aes128-cbc-pkcs7"}"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.algorithm, Algorithm::DhIetf1024Sha256Aes128CbcPkcs7);

        assert!(serde_json::from_str::<ClientConfig>(r#"{"algorithm": "rot13"}"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"default_alias": "login"}"#).unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(
            config.default_collection().unwrap().as_str(),
            "/org/freedesktop/secrets/aliases/login"
        );

        std::fs::write(&path, "not json").unwrap();
        assert!(ClientConfig::load_from(&path).is_err());
    }
}
