//! The vault `config` file.
//!
//! A flat `key=value` file at the vault root. Blank lines and `#` comments
//! are ignored, as are unknown keys.

use crate::error::{Error, Result};
use crate::hash::Algorithm;
use crate::payload::DEFAULT_COMPRESSION_THRESHOLD;
use std::path::Path;

/// Quota given to new accounts when none is requested (10 MiB).
pub const DEFAULT_QUOTA: u64 = 10 * 1024 * 1024;

/// Request budget stored on new accounts.
pub const DEFAULT_RATE_LIMIT_CALLS: u32 = 2;

const CONFIG_VERSION: &str = "1";

/// Settings read from the vault's `config` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    pub algorithm: Algorithm,
    pub default_quota: u64,
    pub rate_limit_calls: u32,
    pub compression_threshold: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Blake3,
            default_quota: DEFAULT_QUOTA,
            rate_limit_calls: DEFAULT_RATE_LIMIT_CALLS,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl VaultConfig {
    /// Parse the contents of a config file.
    ///
    /// `version` and `algo` are required; the remaining keys fall back to
    /// their defaults.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let mut version = None;
        let mut algo = None;
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::invalid_store(
                    path,
                    format!("malformed config line: {:?}", line),
                ));
            };
            let value = value.trim();

            match key.trim() {
                "version" => version = Some(value),
                "algo" => algo = Some(value),
                "default_quota" => config.default_quota = parse_number(value, key, path)?,
                "rate_limit_calls" => config.rate_limit_calls = parse_number(value, key, path)?,
                "compression_threshold" => {
                    config.compression_threshold = parse_number(value, key, path)?
                }
                _ => {}
            }
        }

        if version != Some(CONFIG_VERSION) {
            return Err(Error::invalid_store(
                path,
                format!("unsupported config version: {:?}", version),
            ));
        }

        let algo = algo.ok_or_else(|| Error::invalid_store(path, "missing algo in config"))?;
        config.algorithm = Algorithm::parse(algo)?;

        Ok(config)
    }

    /// Render the config file contents.
    pub fn render(&self) -> String {
        format!(
            "version={}\nalgo={}\ndefault_quota={}\nrate_limit_calls={}\ncompression_threshold={}\n",
            CONFIG_VERSION,
            self.algorithm.as_str(),
            self.default_quota,
            self.rate_limit_calls,
            self.compression_threshold,
        )
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str, path: &Path) -> Result<T> {
    value.parse().map_err(|_| {
        Error::invalid_store(
            path,
            format!("invalid value for {}: {:?}", key.trim(), value),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<VaultConfig> {
        VaultConfig::parse(content, Path::new("config"))
    }

    #[test]
    fn test_render_parse_roundtrip() {
        let config = VaultConfig {
            default_quota: 1000,
            rate_limit_calls: 7,
            compression_threshold: 128,
            ..VaultConfig::default()
        };
        assert_eq!(parse(&config.render()).unwrap(), config);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("version=1\nalgo=blake3-256\n").unwrap();
        assert_eq!(config, VaultConfig::default());
        assert_eq!(config.default_quota, 10_485_760);
    }

    #[test]
    fn test_comments_and_unknown_keys_ignored() {
        let config = parse("# vault\n\nversion = 1\nalgo = blake3-256\ncolor=blue\n").unwrap();
        assert_eq!(config.algorithm, Algorithm::Blake3);
    }

    #[test]
    fn test_rejects_bad_configs() {
        assert!(parse("algo=blake3-256\n").is_err());
        assert!(parse("version=2\nalgo=blake3-256\n").is_err());
        assert!(parse("version=1\n").is_err());
        assert!(parse("version=1\nalgo=sha1\n").is_err());
        assert!(parse("version=1\nalgo=blake3-256\ndefault_quota=lots\n").is_err());
        assert!(parse("version=1\nalgo=blake3-256\njunk\n").is_err());
    }
}
