pub mod catalog;
pub mod downloader;
pub mod registry;

pub use catalog::CatalogEntry;
pub use downloader::{ModelDownloader, ModelHandle};
pub use registry::{ModelInfo, ModelRegistry};
