use crate::model::CatalogEntry;
use crate::onnx::proto::StringStringEntryProto;

pub const COCO_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Class names as a Python-style dict literal, the form detection runtimes parse.
pub fn names(num_classes: usize) -> String {
    let entries: Vec<String> = (0..num_classes)
        .map(|i| match COCO_NAMES.get(i) {
            Some(name) => format!("{}: '{}'", i, name),
            None => format!("{}: 'class{}'", i, i),
        })
        .collect();
    format!("{{{}}}", entries.join(", "))
}

fn entry(key: &str, value: impl Into<String>) -> StringStringEntryProto {
    StringStringEntryProto {
        key: key.to_string(),
        value: value.into(),
    }
}

pub fn properties(model: &CatalogEntry, imgsz: u32, stride: u32) -> Vec<StringStringEntryProto> {
    vec![
        entry(
            "description",
            format!("{} object detection model", model.display_name()),
        ),
        entry("date", chrono::Utc::now().to_rfc3339()),
        entry("version", env!("CARGO_PKG_VERSION")),
        entry("task", "detect"),
        entry("stride", stride.to_string()),
        entry("batch", "1"),
        entry("imgsz", format!("[{}, {}]", imgsz, imgsz)),
        entry("names", names(model.num_classes)),
        entry("source", format!("{}/{}", model.repo, model.file)),
    ]
}
