//! Pretrained detectors this tool knows how to fetch and lower.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hub repository holding the converted YOLOv8 detection weights.
pub const YOLOV8_REPO: &str = "lmz/candle-yolo-v8";

/// Classes predicted by the COCO-trained detectors.
pub const COCO_CLASSES: usize = 80;

/// Size variant of the YOLOv8 family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    N,
    S,
    M,
    L,
    X,
}

/// Depth and width scaling applied to the base architecture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Multiples {
    pub depth: f64,
    pub width: f64,
    pub ratio: f64,
}

impl Multiples {
    /// Channel counts of the three feature maps fed to the detect head.
    pub fn filters(&self) -> (usize, usize, usize) {
        let f1 = (256. * self.width) as usize;
        let f2 = (512. * self.width) as usize;
        let f3 = (512. * self.width * self.ratio) as usize;
        (f1, f2, f3)
    }
}

impl Variant {
    pub fn multiples(&self) -> Multiples {
        let (depth, width, ratio) = match self {
            Variant::N => (0.33, 0.25, 2.0),
            Variant::S => (0.33, 0.50, 2.0),
            Variant::M => (0.67, 0.75, 1.5),
            Variant::L => (1.00, 1.00, 1.0),
            Variant::X => (1.00, 1.25, 1.0),
        };
        Multiples { depth, width, ratio }
    }

    fn tag(&self) -> char {
        match self {
            Variant::N => 'n',
            Variant::S => 's',
            Variant::M => 'm',
            Variant::L => 'l',
            Variant::X => 'x',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub repo: &'static str,
    pub file: &'static str,
    pub variant: Variant,
    pub num_classes: usize,
}

impl CatalogEntry {
    /// Human readable name, e.g. `YOLOv8n`.
    pub fn display_name(&self) -> String {
        format!("YOLOv8{}", self.variant.tag())
    }
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.id, self.repo, self.file)
    }
}

const fn yolov8(id: &'static str, file: &'static str, variant: Variant) -> CatalogEntry {
    CatalogEntry {
        id,
        repo: YOLOV8_REPO,
        file,
        variant,
        num_classes: COCO_CLASSES,
    }
}

static CATALOG: [CatalogEntry; 5] = [
    yolov8("yolov8n", "yolov8n.safetensors", Variant::N),
    yolov8("yolov8s", "yolov8s.safetensors", Variant::S),
    yolov8("yolov8m", "yolov8m.safetensors", Variant::M),
    yolov8("yolov8l", "yolov8l.safetensors", Variant::L),
    yolov8("yolov8x", "yolov8x.safetensors", Variant::X),
];

/// Canonical form of a user supplied identifier: `" YOLOv8n.pt"` -> `"yolov8n"`.
pub fn normalize(identifier: &str) -> String {
    let id = identifier.trim().to_ascii_lowercase();
    for suffix in [".pt", ".safetensors"] {
        if let Some(stem) = id.strip_suffix(suffix) {
            return stem.to_string();
        }
    }
    id
}

pub fn lookup(identifier: &str) -> Result<&'static CatalogEntry> {
    let id = normalize(identifier);
    CATALOG
        .iter()
        .find(|entry| entry.id == id)
        .ok_or_else(|| Error::UnknownModel(identifier.to_string()))
}

pub fn entries() -> &'static [CatalogEntry] {
    &CATALOG
}
