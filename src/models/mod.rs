pub mod download;
pub mod registry;

pub use download::{DownloadManager, DownloadState, DownloadStatus};
pub use registry::{Acquisition, ModelDescriptor, ModelMode, ModelRegistry};
