use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Name of the project configuration file expected in the working directory.
pub const CONFIG_FILE_NAME: &str = "nao_config.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// LLM provider credentials, passed to the chat server via its environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: String,
}

/// Project configuration loaded from `nao_config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaoConfig {
    pub project_name: String,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
}

impl NaoConfig {
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(dir.join(CONFIG_FILE_NAME))?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Load the config for `dir`, returning `None` when the file is missing
    /// or unparseable.
    pub fn try_load(dir: &Path) -> Option<Self> {
        match Self::load(dir) {
            Ok(config) => Some(config),
            Err(e) => {
                debug!("no usable project config: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "project_name: warehouse\nllm:\n  provider: openai\n  api_key: sk-test\n",
        )
        .unwrap();

        let config = NaoConfig::try_load(dir.path()).unwrap();
        assert_eq!(config.project_name, "warehouse");
        let llm = config.llm.unwrap();
        assert_eq!(llm.provider, "openai");
        assert_eq!(llm.api_key, "sk-test");
    }

    #[test]
    fn test_try_load_without_llm_section() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "project_name: warehouse\n").unwrap();

        let config = NaoConfig::try_load(dir.path()).unwrap();
        assert!(config.llm.is_none());
    }

    #[test]
    fn test_try_load_missing_or_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(NaoConfig::try_load(dir.path()).is_none());

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "llm: [not, a, config").unwrap();
        assert!(NaoConfig::try_load(dir.path()).is_none());
    }
}
