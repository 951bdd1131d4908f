use super::{get_config_dir, HarnessConfig};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

const CONFIG_FILE: &str = "config.toml";

/// Resolves the harness configuration from file and environment
pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(explicit_path: Option<PathBuf>) -> Self {
        Self { explicit_path }
    }

    /// Load the configuration.
    ///
    /// An explicitly requested file must exist. Without one, the file in the
    /// platform config directory is used when present, otherwise the
    /// built-in defaults. Environment overrides are applied last.
    pub async fn load(&self) -> Result<HarnessConfig> {
        let mut config = match &self.explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(anyhow!("Config file {} does not exist", path.display()));
                }
                Self::load_file(path).await?
            }
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_file(&path).await?,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    HarnessConfig::default()
                }
            },
        };

        config.merge_env_vars();
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        get_config_dir().ok().map(|dir| dir.join(CONFIG_FILE))
    }

    async fn load_file(path: &Path) -> Result<HarnessConfig> {
        tracing::debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }
}
