use crate::error::{Error, Result};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

pub const DEFAULT_IMGSZ: u32 = 640;
pub const DEFAULT_OPSET: u32 = 11;

/// Largest accepted input side; the anchor grid grows with its square.
pub const MAX_IMGSZ: u32 = 8192;

/// Operator-set versions the graph lowering can target.
pub const SUPPORTED_OPSETS: RangeInclusive<u32> = 11..=17;

/// Export targets understood by the wider YOLO tooling ecosystem but not produced here.
const FOREIGN_FORMATS: &[&str] = &[
    "torchscript",
    "openvino",
    "engine",
    "coreml",
    "saved_model",
    "pb",
    "tflite",
    "edgetpu",
    "tfjs",
    "paddle",
    "ncnn",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Onnx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Onnx => "onnx",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExportFormat::Onnx => "ONNX",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let format = s.trim().to_ascii_lowercase();
        match format.as_str() {
            "onnx" => Ok(ExportFormat::Onnx),
            other if FOREIGN_FORMATS.contains(&other) => Err(Error::Conversion(format!(
                "export format '{}' is not supported, available formats: onnx",
                other
            ))),
            other => Err(Error::Conversion(format!("unknown export format '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub format: ExportFormat,
    /// Side length of the square network input, in pixels.
    pub imgsz: u32,
    pub simplify: bool,
    pub opset: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::Onnx,
            imgsz: DEFAULT_IMGSZ,
            simplify: false,
            opset: DEFAULT_OPSET,
        }
    }
}

impl ExportConfig {
    /// Validates the configuration and returns the effective input size,
    /// rounded up to a multiple of `stride`.
    pub fn validate(&self, stride: u32) -> Result<u32> {
        if self.imgsz == 0 {
            return Err(Error::InvalidInput("imgsz must be greater than 0".to_string()));
        }
        if !SUPPORTED_OPSETS.contains(&self.opset) {
            return Err(Error::Conversion(format!(
                "opset {} is not supported, expected {}..={}",
                self.opset,
                SUPPORTED_OPSETS.start(),
                SUPPORTED_OPSETS.end()
            )));
        }

        let imgsz = self
            .imgsz
            .div_ceil(stride)
            .checked_mul(stride)
            .filter(|&imgsz| imgsz <= MAX_IMGSZ)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "imgsz={} exceeds the maximum of {}",
                    self.imgsz, MAX_IMGSZ
                ))
            })?;
        if imgsz != self.imgsz {
            tracing::warn!(
                "imgsz={} must be a multiple of max stride {}, updating to {}",
                self.imgsz,
                stride,
                imgsz
            );
        }
        Ok(imgsz)
    }
}

/// IR version that introduced the given default-domain opset.
pub fn ir_version(opset: u32) -> i64 {
    match opset {
        0..=11 => 6,
        12..=14 => 7,
        15..=18 => 8,
        _ => 9,
    }
}
