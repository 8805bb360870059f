//! Loading configuration from INI files.

use std::path::Path;

use ini::Ini;
use thiserror::Error;

use super::settings::ClusterConfig;

/// Configuration file errors.
///
/// Only an unreadable or syntactically broken file is an error; bad values
/// inside a well-formed file are clamped with a warning instead.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Config text is not valid INI
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] ini::ParseError),
}

/// Entry points for loading a [`ClusterConfig`].
pub struct ConfigFile;

impl ConfigFile {
    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<ClusterConfig, ConfigFileError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(ClusterConfig::default());
        }

        let ini = Ini::load_from_file(path)?;
        Ok(super::parser::parse_ini(&ini))
    }

    /// Parse configuration from INI text.
    pub fn parse(text: &str) -> Result<ClusterConfig, ConfigFileError> {
        let ini = Ini::load_from_str(text)?;
        Ok(super::parser::parse_ini(&ini))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ClusterTypeId;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.ini");

        let config = ConfigFile::load_from(&config_path).unwrap();

        assert_eq!(config, ClusterConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("clusters.ini");
        std::fs::write(
            &config_path,
            r#"
[placement]
batch_size = 64

[cluster.coal]
material = 16
spawn_rate = 12
"#,
        )
        .unwrap();

        let config = ConfigFile::load_from(&config_path).unwrap();

        assert_eq!(config.placement.batch_size, 64);
        let coal = config.cluster(&ClusterTypeId::new("coal")).unwrap();
        assert_eq!(coal.spawn_rate, 12.0);
    }

    #[test]
    fn test_parse_rejects_broken_syntax() {
        let result = ConfigFile::parse("[placement\nbatch_size = 1\n");
        assert!(matches!(result, Err(ConfigFileError::ParseError(_))));
    }
}
