use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::catalog::{self, CatalogEntry};
use crate::model::{ModelInfo, ModelRegistry};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::api::sync::{ApiBuilder, ApiError};
use std::fmt;
use std::path::{Path, PathBuf};

/// Source of pretrained weight files.
pub trait ModelFetcher {
    /// Fetches the weights described by `entry` into `cache_dir` and returns the local path.
    fn fetch(&self, entry: &CatalogEntry, cache_dir: &Path) -> Result<PathBuf>;
}

/// Fetches weights from the Hugging Face Hub, reusing the hub cache when warm.
#[derive(Debug, Default)]
pub struct HubFetcher;

impl ModelFetcher for HubFetcher {
    fn fetch(&self, entry: &CatalogEntry, cache_dir: &Path) -> Result<PathBuf> {
        let api = ApiBuilder::new()
            .with_cache_dir(cache_dir.to_path_buf())
            .build()
            .map_err(|e| Error::Network(format!("Failed to initialize hub client: {}", e)))?;

        let repo = api.model(entry.repo.to_string());

        tracing::info!("Downloading {} from {}", entry.file, entry.repo);

        repo.get(entry.file)
            .map_err(|e| classify_hub_error(entry, e))
    }
}

fn classify_hub_error(entry: &CatalogEntry, err: ApiError) -> Error {
    let message = err.to_string();
    match err {
        ApiError::RequestError(_) if message.contains("404") => {
            Error::UnknownModel(format!("{} not found in {}", entry.file, entry.repo))
        }
        ApiError::IoError(e) => Error::Io(e),
        _ => Error::Network(format!("Could not fetch {}: {}", entry, message)),
    }
}

/// A pretrained model loaded into memory, ready for export.
pub struct ModelHandle {
    pub id: String,
    pub entry: &'static CatalogEntry,
    pub weights_path: PathBuf,
    pub from_cache: bool,
    weights: VarBuilder<'static>,
}

impl ModelHandle {
    pub fn new(
        entry: &'static CatalogEntry,
        weights_path: PathBuf,
        from_cache: bool,
        weights: VarBuilder<'static>,
    ) -> Self {
        Self {
            id: entry.id.to_string(),
            entry,
            weights_path,
            from_cache,
            weights,
        }
    }

    pub fn weights(&self) -> VarBuilder<'static> {
        self.weights.clone()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("weights_path", &self.weights_path)
            .field("from_cache", &self.from_cache)
            .finish_non_exhaustive()
    }
}

pub struct ModelDownloader<F: ModelFetcher = HubFetcher> {
    config: Config,
    registry: ModelRegistry,
    fetcher: F,
}

impl ModelDownloader<HubFetcher> {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_fetcher(config, HubFetcher)
    }
}

impl<F: ModelFetcher> ModelDownloader<F> {
    pub fn with_fetcher(config: Config, fetcher: F) -> Result<Self> {
        let registry = ModelRegistry::load(&config)?;
        Ok(Self {
            config,
            registry,
            fetcher,
        })
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Makes sure the weights for `identifier` are on disk, fetching them on a cache miss.
    pub fn pull(&mut self, identifier: &str) -> Result<(&'static CatalogEntry, ModelInfo, bool)> {
        let entry = catalog::lookup(identifier)?;

        if let Some(info) = self.registry.cached(entry.id) {
            tracing::info!("Using cached weights for '{}' at {:?}", entry.id, info.weights_path);
            return Ok((entry, info.clone(), true));
        }

        tracing::info!("Pulling model '{}' from {}", entry.id, entry.repo);
        let weights_path = self.fetcher.fetch(entry, &self.config.models_dir)?;

        let info = ModelInfo {
            name: entry.id.to_string(),
            hf_repo_id: entry.repo.to_string(),
            file: entry.file.to_string(),
            weights_path,
            downloaded_at: chrono::Utc::now().to_rfc3339(),
        };

        self.registry.add_model(info.clone());
        self.registry.save(&self.config)?;

        tracing::info!("Model '{}' fetched and registered", entry.id);

        Ok((entry, info, false))
    }

    /// Resolves `identifier`, fetching if needed, and loads its weights.
    pub fn acquire(&mut self, identifier: &str) -> Result<ModelHandle> {
        let (entry, info, from_cache) = self.pull(identifier)?;
        let weights = load_weights(&info.weights_path)?;
        Ok(ModelHandle::new(entry, info.weights_path, from_cache, weights))
    }
}

fn load_weights(path: &Path) -> Result<VarBuilder<'static>> {
    tracing::debug!("Loading weights from {:?}", path);

    let tensors = candle_core::safetensors::load(path, &Device::Cpu)
        .map_err(|e| Error::ModelLoadFailed(format!("{}: {}", path.display(), e)))?;

    tracing::debug!("Loaded {} tensors", tensors.len());

    Ok(VarBuilder::from_tensors(tensors, DType::F32, &Device::Cpu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;
    use std::cell::Cell;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Default)]
    struct LocalFetcher {
        calls: Cell<usize>,
    }

    impl ModelFetcher for LocalFetcher {
        fn fetch(&self, entry: &CatalogEntry, cache_dir: &Path) -> Result<PathBuf> {
            self.calls.set(self.calls.get() + 1);
            let path = cache_dir.join(entry.file);
            let mut tensors = HashMap::new();
            tensors.insert(
                "head.dfl.conv.weight".to_string(),
                Tensor::arange(0f32, 16f32, &Device::Cpu)?.reshape((1, 16, 1, 1))?,
            );
            candle_core::safetensors::save(&tensors, &path)?;
            Ok(path)
        }
    }

    struct OfflineFetcher;

    impl ModelFetcher for OfflineFetcher {
        fn fetch(&self, _entry: &CatalogEntry, _cache_dir: &Path) -> Result<PathBuf> {
            Err(Error::Network("host unreachable".to_string()))
        }
    }

    #[test]
    fn test_acquire_then_cache_hit() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::at(temp_dir.path()).unwrap();

        let mut downloader = ModelDownloader::with_fetcher(config.clone(), LocalFetcher::default()).unwrap();
        let first = downloader.acquire("yolov8n.pt").unwrap();
        assert_eq!(first.id, "yolov8n");
        assert!(!first.from_cache);
        assert_eq!(downloader.fetcher.calls.get(), 1);

        let dfl = first.weights().get((1, 16, 1, 1), "head.dfl.conv.weight").unwrap();
        assert_eq!(dfl.flatten_all().unwrap().to_vec1::<f32>().unwrap()[15], 15.0);

        let second = downloader.acquire("yolov8n").unwrap();
        assert!(second.from_cache);
        assert_eq!(second.weights_path, first.weights_path);
        assert_eq!(downloader.fetcher.calls.get(), 1);

        // A fresh process reads the persisted registry and still skips the fetch.
        let mut restarted = ModelDownloader::with_fetcher(config, LocalFetcher::default()).unwrap();
        assert!(restarted.acquire("yolov8n").unwrap().from_cache);
        assert_eq!(restarted.fetcher.calls.get(), 0);
    }

    #[test]
    fn test_missing_weights_file_triggers_refetch() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::at(temp_dir.path()).unwrap();

        let mut downloader = ModelDownloader::with_fetcher(config, LocalFetcher::default()).unwrap();
        let handle = downloader.acquire("yolov8n").unwrap();
        std::fs::remove_file(&handle.weights_path).unwrap();

        let handle = downloader.acquire("yolov8n").unwrap();
        assert!(!handle.from_cache);
        assert_eq!(downloader.fetcher.calls.get(), 2);
    }

    #[test]
    fn test_unknown_model_never_fetches() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::at(temp_dir.path()).unwrap();

        let mut downloader = ModelDownloader::with_fetcher(config.clone(), LocalFetcher::default()).unwrap();
        let err = downloader.acquire("yolov99z").unwrap_err();

        assert!(matches!(err, Error::UnknownModel(_)));
        assert_eq!(downloader.fetcher.calls.get(), 0);
        assert!(!config.registry_path.exists());
    }

    #[test]
    fn test_network_failure_with_cold_cache() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::at(temp_dir.path()).unwrap();

        let mut downloader = ModelDownloader::with_fetcher(config, OfflineFetcher).unwrap();
        let err = downloader.acquire("yolov8s").unwrap_err();

        assert!(matches!(err, Error::Network(_)));
        assert!(downloader.registry().list_models().is_empty());
    }

    #[test]
    fn test_corrupt_weights_fail_to_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.safetensors");
        std::fs::write(&path, b"not a safetensors file").unwrap();

        let Err(err) = load_weights(&path) else {
            panic!("corrupt weights loaded");
        };
        assert!(matches!(err, Error::ModelLoadFailed(_)));
    }

    #[test]
    fn test_hub_errors_are_classified() {
        let entry = catalog::lookup("yolov8n").unwrap();

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only cache");
        let err = classify_hub_error(entry, ApiError::IoError(io));
        assert!(matches!(err, Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied));

        let parse = "bytes".parse::<usize>().unwrap_err();
        let err = classify_hub_error(entry, ApiError::ParseIntError(parse));
        assert!(matches!(&err, Error::Network(msg) if msg.contains("yolov8n")));
    }
}
