// src/config.rs
//! Configuration file
//!
//! ```toml
//! ledger = "/var/lib/capsule/ledger.ndjson"
//! signing_key = "~/.config/capsule/release.private"
//! trusted_keys = ["base64 public key"]
//! trusted_key_files = ["/etc/capsule/release.public"]
//!
//! [run]
//! timeout_secs = 300     # 0 = no timeout
//! work_dir = "/var/tmp"
//!
//! [format]
//! payload_wrap = 76
//! ```
//!
//! Lookup order: an explicit path, then `$CAPSULE_CONFIG`, then
//! `<config dir>/capsule/config.toml`. Only the default location may be
//! missing.

use crate::capsule::format::DEFAULT_PAYLOAD_WRAP;
use crate::capsule::runner::RunOptions;
use crate::capsule::verify::Keyring;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "CAPSULE_CONFIG";

fn default_ledger() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("capsule")
        .join("ledger.ndjson")
}

fn default_payload_wrap() -> usize {
    DEFAULT_PAYLOAD_WRAP
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// NDJSON ledger path
    #[serde(default = "default_ledger")]
    pub ledger: PathBuf,
    /// Private key used by `mint`
    #[serde(default)]
    pub signing_key: Option<PathBuf>,
    /// Base64 Ed25519 public keys trusted for verification
    #[serde(default)]
    pub trusted_keys: Vec<String>,
    /// Public key files trusted for verification
    #[serde(default)]
    pub trusted_key_files: Vec<PathBuf>,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub format: FormatConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Payload timeout in seconds (0 = none)
    #[serde(default)]
    pub timeout_secs: u64,
    /// Parent directory for staging temp dirs
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatConfig {
    /// Base64 line width of the payload block
    #[serde(default = "default_payload_wrap")]
    pub payload_wrap: usize,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            payload_wrap: DEFAULT_PAYLOAD_WRAP,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger: default_ledger(),
            signing_key: None,
            trusted_keys: Vec::new(),
            trusted_key_files: Vec::new(),
            run: RunConfig::default(),
            format: FormatConfig::default(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("capsule").join("config.toml"))
    }

    /// Load using the standard lookup order
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from a file that must exist
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let wrap = self.format.payload_wrap;
        if wrap == 0 || wrap % 4 != 0 {
            return Err(Error::Config(format!(
                "format.payload_wrap must be a positive multiple of 4, got {}",
                wrap
            )));
        }
        Ok(())
    }

    /// Keyring from the configured trusted keys plus `extra_keys`/`extra_files`
    pub fn keyring(&self, extra_keys: &[String], extra_files: &[PathBuf]) -> Result<Keyring> {
        let mut keyring = Keyring::from_sources(&self.trusted_keys, &self.trusted_key_files)?;
        for key in extra_keys {
            keyring.add_base64(key, None)?;
        }
        for file in extra_files {
            keyring.add_file(file)?;
        }
        Ok(keyring)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            timeout: (self.run.timeout_secs > 0).then(|| Duration::from_secs(self.run.timeout_secs)),
            work_root: self.run.work_dir.clone(),
            capture_output: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::SigningKeyPair;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.format.payload_wrap, 76);
        assert!(config.run_options().timeout.is_none());
        assert!(config.ledger.ends_with("capsule/ledger.ndjson"));
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml(
            r#"
ledger = "/srv/ledger.ndjson"
signing_key = "/srv/release.private"

[run]
timeout_secs = 30
work_dir = "/var/tmp"

[format]
payload_wrap = 64
"#,
        )
        .unwrap();
        assert_eq!(config.ledger, PathBuf::from("/srv/ledger.ndjson"));
        assert_eq!(config.format.payload_wrap, 64);
        let opts = config.run_options();
        assert_eq!(opts.timeout, Some(Duration::from_secs(30)));
        assert_eq!(opts.work_root, Some(PathBuf::from("/var/tmp")));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Config::from_toml("[format]\npayload_wrap = 10\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(Config::from_toml("unknown = 1\n"), Err(Error::Config(_))));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(Error::Config(_))));
    }

    #[test]
    fn test_keyring_merges_sources() {
        let temp_dir = TempDir::new().unwrap();
        let a = SigningKeyPair::generate();
        let b = SigningKeyPair::generate();
        let c = SigningKeyPair::generate();
        let c_pub = temp_dir.path().join("c.public");
        c.save_to_files(&temp_dir.path().join("c.private"), &c_pub).unwrap();

        let config = Config {
            trusted_keys: vec![a.public_key_base64()],
            ..Config::default()
        };
        let keyring = config.keyring(&[b.public_key_base64()], &[c_pub]).unwrap();
        assert_eq!(keyring.len(), 3);
    }
}
