pub mod metadata;
pub mod options;
pub mod yolo;

pub use options::{ExportConfig, ExportFormat};

use crate::error::{Error, Result};
use crate::model::ModelHandle;
use crate::onnx::proto::{ModelProto, OperatorSetIdProto};
use crate::onnx;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A file written by a successful export.
#[derive(Debug, Clone)]
pub struct ExportedArtifact {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub opset: u32,
    pub imgsz: u32,
    pub size_bytes: u64,
}

pub struct ModelExporter {
    output_dir: PathBuf,
}

impl ModelExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// `<output_dir>/<model id>.<extension>`
    pub fn artifact_path(&self, handle: &ModelHandle, format: ExportFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", handle.id, format.extension()))
    }

    pub fn export(&self, handle: &ModelHandle, config: &ExportConfig) -> Result<ExportedArtifact> {
        let stride = yolo::MAX_STRIDE as u32;
        let imgsz = config.validate(stride)?;

        tracing::info!(
            "Exporting '{}' to {} (imgsz={}, opset={}, simplify={})",
            handle.id,
            config.format.label(),
            imgsz,
            config.opset,
            config.simplify
        );

        let mut graph = yolo::build_graph(
            handle.entry,
            handle.weights(),
            imgsz as usize,
            config.opset as i64,
        )
        .map_err(|e| Error::Conversion(format!("Failed to lower '{}': {}", handle.id, e)))?;

        tracing::debug!(
            "Lowered graph: {} nodes, {} initializers",
            graph.node.len(),
            graph.initializer.len()
        );

        if config.simplify {
            let stats = onnx::simplify(&mut graph);
            tracing::info!(
                "Simplified graph: removed {} nodes, {} initializers",
                stats.identities_removed + stats.dead_nodes_removed,
                stats.initializers_merged + stats.dead_initializers_removed
            );
        }

        let model = ModelProto {
            ir_version: options::ir_version(config.opset),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: config.opset as i64,
            }],
            producer_name: env!("CARGO_PKG_NAME").to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            graph: Some(graph),
            metadata_props: metadata::properties(handle.entry, imgsz, stride),
            ..Default::default()
        };

        onnx::check_model(&model)?;

        let bytes = onnx::encode(&model);
        let path = self.artifact_path(handle, config.format);
        write_atomic(&path, &bytes)?;

        tracing::info!("Wrote {} bytes to {:?}", bytes.len(), path);

        Ok(ExportedArtifact {
            path,
            format: config.format,
            opset: config.opset,
            imgsz,
            size_bytes: bytes.len() as u64,
        })
    }
}

/// Writes through a temporary file in the destination directory so a
/// failed write never leaves a truncated artifact behind. The artifact
/// gets the same umask-derived mode as any other newly created file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix(".yolo-export-").suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }

    let mut tmp = builder.tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::catalog::{self, CatalogEntry};
    use crate::model::downloader::ModelFetcher;
    use crate::model::ModelDownloader;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Writes a complete zero-initialised checkpoint for the requested model.
    struct ZeroWeightsFetcher {
        calls: Rc<Cell<usize>>,
    }

    impl ModelFetcher for ZeroWeightsFetcher {
        fn fetch(&self, entry: &CatalogEntry, cache_dir: &Path) -> Result<PathBuf> {
            self.calls.set(self.calls.get() + 1);
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            yolo::build_graph(entry, vb, 32, 11)?;

            let path = cache_dir.join(entry.file);
            varmap.save(&path)?;
            Ok(path)
        }
    }

    fn nano_handle() -> ModelHandle {
        ModelHandle::new(
            catalog::lookup("yolov8n").unwrap(),
            PathBuf::from("yolov8n.safetensors"),
            true,
            VarBuilder::zeros(DType::F32, &Device::Cpu),
        )
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_export_default_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let exporter = ModelExporter::new(temp_dir.path());

        let artifact = exporter
            .export(&nano_handle(), &ExportConfig::default())
            .unwrap();

        assert_eq!(artifact.path, temp_dir.path().join("yolov8n.onnx"));
        assert_eq!(dir_entries(temp_dir.path()), vec!["yolov8n.onnx".to_string()]);
        assert_eq!(
            std::fs::metadata(&artifact.path).unwrap().len(),
            artifact.size_bytes
        );

        let model = onnx::read_model(&artifact.path).unwrap();
        assert_eq!(model.default_opset(), Some(11));
        assert_eq!(model.ir_version, 6);
        assert_eq!(model.metadata("imgsz"), Some("[640, 640]"));
        assert_eq!(model.metadata("task"), Some("detect"));

        let graph = model.graph.unwrap();
        assert_eq!(graph.input[0].name, "images");
        assert_eq!(graph.input[0].shape(), Some(vec![1, 3, 640, 640]));
        assert_eq!(graph.output[0].name, "output0");
        assert_eq!(graph.output[0].shape(), Some(vec![1, 84, 8400]));
    }

    #[test]
    fn test_export_records_requested_opset() {
        let temp_dir = TempDir::new().unwrap();
        let exporter = ModelExporter::new(temp_dir.path());
        let config = ExportConfig {
            imgsz: 64,
            opset: 13,
            ..Default::default()
        };

        exporter.export(&nano_handle(), &config).unwrap();

        let model = onnx::read_model(temp_dir.path().join("yolov8n.onnx")).unwrap();
        assert_eq!(model.default_opset(), Some(13));
        assert_eq!(model.ir_version, 7);
        let graph = model.graph.unwrap();
        assert!(graph
            .node
            .iter()
            .filter(|n| n.op_type == "Split")
            .all(|n| n.input.len() == 2));
    }

    #[test]
    fn test_simplify_shrinks_graph() {
        let temp_dir = TempDir::new().unwrap();
        let plain_dir = temp_dir.path().join("plain");
        let simple_dir = temp_dir.path().join("simple");
        std::fs::create_dir_all(&plain_dir).unwrap();
        std::fs::create_dir_all(&simple_dir).unwrap();

        let base = ExportConfig {
            imgsz: 64,
            ..Default::default()
        };
        let simplified = ExportConfig {
            simplify: true,
            ..base.clone()
        };

        let plain = ModelExporter::new(&plain_dir)
            .export(&nano_handle(), &base)
            .unwrap();
        let simple = ModelExporter::new(&simple_dir)
            .export(&nano_handle(), &simplified)
            .unwrap();

        let plain = onnx::read_model(plain.path).unwrap().graph.unwrap();
        let simple = onnx::read_model(simple.path).unwrap().graph.unwrap();

        assert!(simple.node.len() < plain.node.len());
        assert!(simple.initializer.len() < plain.initializer.len());
        assert!(plain.node.iter().any(|n| n.op_type == "Identity"));
        assert!(!simple.node.iter().any(|n| n.op_type == "Identity"));
        assert_eq!(simple.output[0].name, "output0");
    }

    #[test]
    fn test_export_overwrites_existing_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let stale = temp_dir.path().join("yolov8n.onnx");
        std::fs::write(&stale, b"stale").unwrap();

        let config = ExportConfig {
            imgsz: 32,
            ..Default::default()
        };
        ModelExporter::new(temp_dir.path())
            .export(&nano_handle(), &config)
            .unwrap();

        assert!(onnx::read_model(&stale).is_ok());
        assert_eq!(dir_entries(temp_dir.path()).len(), 1);
    }

    #[test]
    fn test_unwritable_destination_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let not_a_dir = temp_dir.path().join("file");
        std::fs::write(&not_a_dir, b"").unwrap();
        let exporter = ModelExporter::new(not_a_dir.join("out"));

        let config = ExportConfig {
            imgsz: 32,
            ..Default::default()
        };
        let err = exporter.export(&nano_handle(), &config).unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(dir_entries(temp_dir.path()), vec!["file".to_string()]);
    }

    #[test]
    fn test_invalid_config_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let exporter = ModelExporter::new(temp_dir.path());

        let zero = ExportConfig {
            imgsz: 0,
            ..Default::default()
        };
        assert!(matches!(
            exporter.export(&nano_handle(), &zero),
            Err(Error::InvalidInput(_))
        ));

        let old = ExportConfig {
            opset: 9,
            ..Default::default()
        };
        assert!(matches!(
            exporter.export(&nano_handle(), &old),
            Err(Error::Conversion(_))
        ));

        assert!(dir_entries(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_incomplete_weights_leave_stale_artifact_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let stale = temp_dir.path().join("yolov8n.onnx");
        std::fs::write(&stale, b"stale").unwrap();

        let handle = ModelHandle::new(
            catalog::lookup("yolov8n").unwrap(),
            PathBuf::from("yolov8n.safetensors"),
            false,
            VarBuilder::from_tensors(HashMap::new(), DType::F32, &Device::Cpu),
        );
        let err = ModelExporter::new(temp_dir.path())
            .export(&handle, &ExportConfig::default())
            .unwrap_err();

        assert!(matches!(err, Error::Conversion(_)));
        assert_eq!(std::fs::read(&stale).unwrap(), b"stale");
    }

    #[test]
    fn test_rounds_imgsz_to_stride() {
        let temp_dir = TempDir::new().unwrap();
        let config = ExportConfig {
            imgsz: 50,
            ..Default::default()
        };
        let artifact = ModelExporter::new(temp_dir.path())
            .export(&nano_handle(), &config)
            .unwrap();
        assert_eq!(artifact.imgsz, 64);
    }

    #[test]
    fn test_warm_cache_reexports_same_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::at(temp_dir.path().join("data")).unwrap();
        let out_dir = temp_dir.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();

        let calls = Rc::new(Cell::new(0));
        let fetcher = ZeroWeightsFetcher {
            calls: Rc::clone(&calls),
        };
        let mut downloader = ModelDownloader::with_fetcher(config, fetcher).unwrap();
        let exporter = ModelExporter::new(&out_dir);
        let export_config = ExportConfig {
            imgsz: 64,
            ..Default::default()
        };

        let cold = downloader.acquire("yolov8n.pt").unwrap();
        assert!(!cold.from_cache);
        let first = exporter.export(&cold, &export_config).unwrap();
        let first_model = onnx::read_model(&first.path).unwrap();

        let warm = downloader.acquire("yolov8n").unwrap();
        assert!(warm.from_cache);
        let second = exporter.export(&warm, &export_config).unwrap();
        let second_model = onnx::read_model(&second.path).unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(first.path, out_dir.join("yolov8n.onnx"));
        assert_eq!(second.path, first.path);
        assert_eq!(second_model.graph, first_model.graph);
        assert_eq!(dir_entries(&out_dir), vec!["yolov8n.onnx".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_artifact_mode_matches_plain_write() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let config = ExportConfig {
            imgsz: 32,
            ..Default::default()
        };
        let artifact = ModelExporter::new(temp_dir.path())
            .export(&nano_handle(), &config)
            .unwrap();

        let plain = temp_dir.path().join("plain.bin");
        std::fs::write(&plain, b"plain").unwrap();

        let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&artifact.path), mode(&plain));
    }
}
