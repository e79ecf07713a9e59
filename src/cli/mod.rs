use crate::exporter::options::{DEFAULT_IMGSZ, DEFAULT_OPSET};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "yolov8n";

#[derive(Parser)]
#[command(name = "yolo-export")]
#[command(version, about = "Download pretrained YOLOv8 detectors and export them to ONNX", long_about = None)]
pub struct Cli {
	/// Defaults to `export` with the stock settings when omitted
	#[command(subcommand)]
	pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Download a model (if needed) and export it
	Export(ExportArgs),

	/// Download a model into the local cache without exporting it
	Pull {
		/// Model identifier (e.g., "yolov8n" or "yolov8n.pt")
		model: String,
	},

	/// List models in the local cache
	List,

	/// Print the header of an exported ONNX file
	Inspect {
		/// Path to the .onnx file
		path: PathBuf,
	},
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
	/// Model identifier (e.g., "yolov8n" or "yolov8n.pt")
	#[arg(default_value = DEFAULT_MODEL)]
	pub model: String,

	/// Target format
	#[arg(long, default_value = "onnx")]
	pub format: String,

	/// Square input size in pixels
	#[arg(long, default_value_t = DEFAULT_IMGSZ)]
	pub imgsz: u32,

	/// Simplify the exported graph
	#[arg(long)]
	pub simplify: bool,

	/// ONNX operator-set version
	#[arg(long, default_value_t = DEFAULT_OPSET)]
	pub opset: u32,

	/// Directory the artifact is written to
	#[arg(long, default_value = ".")]
	pub output_dir: PathBuf,
}

impl Default for ExportArgs {
	fn default() -> Self {
		Self {
			model: DEFAULT_MODEL.to_string(),
			format: "onnx".to_string(),
			imgsz: DEFAULT_IMGSZ,
			simplify: false,
			opset: DEFAULT_OPSET,
			output_dir: PathBuf::from("."),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_no_arguments_means_default_export() {
		let cli = Cli::try_parse_from(["yolo-export"]).unwrap();
		assert!(cli.command.is_none());
	}

	#[test]
	fn test_export_defaults_match_default_impl() {
		let cli = Cli::try_parse_from(["yolo-export", "export"]).unwrap();
		let Some(Commands::Export(args)) = cli.command else {
			panic!("expected export command");
		};
		let defaults = ExportArgs::default();
		assert_eq!(args.model, defaults.model);
		assert_eq!(args.format, defaults.format);
		assert_eq!(args.imgsz, defaults.imgsz);
		assert_eq!(args.simplify, defaults.simplify);
		assert_eq!(args.opset, defaults.opset);
		assert_eq!(args.output_dir, defaults.output_dir);
	}

	#[test]
	fn test_export_flags() {
		let cli = Cli::try_parse_from([
			"yolo-export",
			"export",
			"yolov8s.pt",
			"--imgsz",
			"320",
			"--simplify",
			"--opset",
			"13",
		])
		.unwrap();
		let Some(Commands::Export(args)) = cli.command else {
			panic!("expected export command");
		};
		assert_eq!(args.model, "yolov8s.pt");
		assert_eq!(args.imgsz, 320);
		assert!(args.simplify);
		assert_eq!(args.opset, 13);
	}
}
