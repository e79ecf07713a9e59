mod cli;
mod config;
mod error;
mod exporter;
mod model;
mod onnx;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands, ExportArgs};
use config::Config;
use exporter::{ExportConfig, ExportFormat, ModelExporter};
use model::ModelDownloader;
use std::path::Path;

fn run_export(config: Config, args: ExportArgs) -> anyhow::Result<()> {
    let format: ExportFormat = args.format.parse()?;
    let entry = model::catalog::lookup(&args.model)?;

    println!(
        "Downloading {} and exporting to {}...",
        entry.display_name(),
        format.label()
    );

    let mut downloader = ModelDownloader::new(config)?;
    let handle = downloader
        .acquire(&args.model)
        .with_context(|| format!("Failed to acquire model '{}'", args.model))?;

    let export_config = ExportConfig {
        format,
        imgsz: args.imgsz,
        simplify: args.simplify,
        opset: args.opset,
    };
    let artifact = ModelExporter::new(&args.output_dir)
        .export(&handle, &export_config)
        .with_context(|| format!("Failed to export '{}'", handle.id))?;

    println!("Done! File created: {}", display_path(&artifact.path));
    println!("The model is ready to use!");

    Ok(())
}

/// Paths in the working directory are shown bare, e.g. `yolov8n.onnx`.
fn display_path(path: &Path) -> String {
    path.strip_prefix(".")
        .unwrap_or(path)
        .display()
        .to_string()
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let model = onnx::read_model(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let graph = model.graph.clone().unwrap_or_default();

    let describe = |values: &[onnx::proto::ValueInfoProto]| {
        values
            .iter()
            .map(|v| serde_json::json!({ "name": v.name, "shape": v.shape() }))
            .collect::<Vec<_>>()
    };
    let metadata: serde_json::Map<String, serde_json::Value> = model
        .metadata_props
        .iter()
        .map(|entry| (entry.key.clone(), serde_json::Value::from(entry.value.clone())))
        .collect();

    let output = serde_json::json!({
        "path": path,
        "ir_version": model.ir_version,
        "opset": model.default_opset(),
        "producer": format!("{} {}", model.producer_name, model.producer_version),
        "inputs": describe(&graph.input),
        "outputs": describe(&graph.output),
        "nodes": graph.node.len(),
        "initializers": graph.initializer.len(),
        "metadata": metadata,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or_else(|| Commands::Export(ExportArgs::default())) {
        Commands::Export(args) => run_export(config, args)?,

        Commands::Pull { model } => {
            let mut downloader = ModelDownloader::new(config)?;
            let (entry, info, cached) = downloader.pull(&model)?;

            println!("✓ {} model: {}", if cached { "Cached" } else { "Pulled" }, entry.id);
            println!("  Repository: {}", info.hf_repo_id);
            println!("  Path: {:?}", info.weights_path);
        }

        Commands::List => {
            let downloader = ModelDownloader::new(config)?;
            let models = downloader.registry().list_models();

            if models.is_empty() {
                println!("No models cached.");
                println!("Use 'yolo-export pull <model>' to download one. Known models:");
                for entry in model::catalog::entries() {
                    println!("  {}", entry.id);
                }
            } else {
                println!("Cached models:\n");
                for info in models {
                    println!("  {}", info.name);
                    println!("    Repository: {}", info.hf_repo_id);
                    println!("    Path: {:?}", info.weights_path);
                    println!("    Downloaded: {}", info.downloaded_at);
                    if !info.is_present() {
                        println!("    (weights missing, will be fetched again)");
                    }
                    println!();
                }
            }
        }

        Commands::Inspect { path } => inspect(&path)?,
    }

    Ok(())
}
