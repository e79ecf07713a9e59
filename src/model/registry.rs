use crate::config::Config;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Record of a model whose weights have been fetched into the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub hf_repo_id: String,
    pub file: String,
    pub weights_path: PathBuf,
    pub downloaded_at: String,
}

impl ModelInfo {
    pub fn is_present(&self) -> bool {
        self.weights_path.is_file()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelInfo>,
}

impl ModelRegistry {
    pub fn load(config: &Config) -> Result<Self> {
        if !config.registry_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config.registry_path)?;
        let registry: ModelRegistry = toml::from_str(&content)?;
        Ok(registry)
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(&config.registry_path, content)?;
        Ok(())
    }

    pub fn add_model(&mut self, model: ModelInfo) {
        self.models.insert(model.name.clone(), model);
    }

    /// Cached record for `name`, if its weights file is still on disk.
    pub fn cached(&self, name: &str) -> Option<&ModelInfo> {
        self.models.get(name).filter(|info| info.is_present())
    }

    pub fn list_models(&self) -> Vec<&ModelInfo> {
        self.models.values().collect()
    }
}
