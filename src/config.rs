use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "YOLO_EXPORT_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub data_dir: PathBuf,
	pub models_dir: PathBuf,
	pub registry_path: PathBuf,
}

impl Config {
	pub fn new() -> crate::error::Result<Self> {
		let project_dirs = ProjectDirs::from("", "", "yolo-export")
			.ok_or_else(|| crate::error::Error::Config("Could not determine data directory".to_string()))?;

		Self::at(project_dirs.data_dir())
	}

	pub fn from_env() -> crate::error::Result<Self> {
		match std::env::var(DATA_DIR_ENV) {
			Ok(data_dir) if !data_dir.is_empty() => Self::at(data_dir),
			_ => Self::new(),
		}
	}

	/// Lays out the data directory under `data_dir`, creating it if needed.
	pub fn at(data_dir: impl AsRef<Path>) -> crate::error::Result<Self> {
		let data_dir = data_dir.as_ref().to_path_buf();
		let models_dir = data_dir.join("models");
		let registry_path = data_dir.join("models.toml");

		std::fs::create_dir_all(&data_dir)?;
		std::fs::create_dir_all(&models_dir)?;

		Ok(Self {
			data_dir,
			models_dir,
			registry_path,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_at_creates_layout() {
		let temp_dir = TempDir::new().unwrap();
		let root = temp_dir.path().join("data");

		let config = Config::at(&root).unwrap();

		assert!(config.models_dir.is_dir());
		assert_eq!(config.registry_path, root.join("models.toml"));
		assert!(!config.registry_path.exists());
	}
}
