use std::path::{Path, PathBuf};
use tracing::{info, warn};

use vigil_core::{Result, VigilError};

use crate::schema::VigilConfig;

/// Loads the Vigil configuration from disk with environment overrides.
#[derive(Debug)]
pub struct ConfigLoader {
    config: VigilConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > VIGIL_CONFIG env > ~/.vigil/vigil.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("VIGIL_CONFIG") {
            return PathBuf::from(p);
        }
        crate::schema::default_state_dir().join("vigil.toml")
    }

    /// Load the config from disk, falling back to defaults when the file is
    /// absent. Missing required secrets fail here: the process must not
    /// start without an LLM key.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<VigilConfig>(&raw).map_err(|e| {
                VigilError::Config(format!("failed to parse {}: {}", config_path.display(), e))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            VigilConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(VigilError::Config(e)),
        }

        Ok(Self { config, config_path })
    }

    /// The loaded configuration.
    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    /// Consume the loader, yielding the configuration.
    pub fn into_config(self) -> VigilConfig {
        self.config
    }

    /// Path the config was resolved from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides. The config file takes priority for the API
    /// key; env vars are the fallback.
    fn apply_env_overrides(mut config: VigilConfig) -> VigilConfig {
        if let Ok(v) = std::env::var("VIGIL_MODEL") {
            config.agent.model = v;
        }
        if let Ok(v) = std::env::var("VIGIL_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("VIGIL_STATE_DIR") {
            let dir = PathBuf::from(v);
            config.memory.root_dir = dir.join("memory");
            config.scheduler.state_path = dir.join("scheduler.json");
            config.skills.dir = dir.join("skills");
        }
        if config.llm.api_key.is_none() {
            if let Ok(v) = std::env::var("VIGIL_API_KEY") {
                config.llm.api_key = Some(v);
            }
        }
        if config.llm.api_key.is_none() {
            if let Ok(v) = std::env::var("OPENAI_API_KEY") {
                config.llm.api_key = Some(v);
            }
        }
        config
    }
}
