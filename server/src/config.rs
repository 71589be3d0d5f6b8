//! Server configuration, loaded once at startup from a TOML file.
//!
//! Unlike the teacher's `toml_edit`-based layered config, this is a
//! single flat file loaded with plain `toml` + `serde`: the server never
//! needs to rewrite its own config, so there is nothing here that needs
//! format-preserving editing.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use scriptura_core::access::InstallationMode;
use scriptura_core::usfm::SaveLimits;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub listen_address: String,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub installation_mode: ConfigInstallationMode,
    pub require_secure_transport: bool,
    pub login_cooldown_seconds: u64,
    pub moderator_address: String,
    pub smtp: SmtpConfig,
    pub save_limits: SaveLimits,
    pub revision_retention: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8080".to_string(),
            data_dir: PathBuf::from("./data/chapters"),
            database_path: PathBuf::from("./data/scriptura.sqlite3"),
            installation_mode: ConfigInstallationMode::Restricted,
            require_secure_transport: true,
            login_cooldown_seconds: 1,
            moderator_address: "moderator@example.invalid".to_string(),
            smtp: SmtpConfig::default(),
            save_limits: SaveLimits::default(),
            revision_retention: scriptura_core::store::DEFAULT_RETAINED_REVISIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInstallationMode {
    #[default]
    Restricted,
    Open,
}

impl From<ConfigInstallationMode> for InstallationMode {
    fn from(mode: ConfigInstallationMode) -> Self {
        match mode {
            ConfigInstallationMode::Restricted => InstallationMode::Restricted,
            ConfigInstallationMode::Open => InstallationMode::Open,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub relay: String,
    pub from_address: String,
    pub username: String,
    pub password: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_restricted_and_secure() {
        let config = Config::default();
        assert_eq!(config.installation_mode, ConfigInstallationMode::Restricted);
        assert!(config.require_secure_transport);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            listen_address = "0.0.0.0:9090"
            installation-mode = "open"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:9090");
        assert_eq!(config.installation_mode, ConfigInstallationMode::Open);
        assert!(config.require_secure_transport);
    }
}
