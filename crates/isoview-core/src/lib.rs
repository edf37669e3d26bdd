//! Read-only access to ISO 9660 images
//!
//! Volume descriptors, the path table and directory records are decoded on
//! demand through a sector cache. System Use Sharing Protocol entries are
//! picked up when the root directory announces them, and Rock Ridge names,
//! attributes and symbolic links are applied on top.

pub mod config;
pub mod error;
pub mod iso9660;
pub mod rockridge;
pub mod session;
pub mod source;
pub mod susp;

pub use config::SourceConfig;
pub use error::{IsoError, Result};
pub use iso9660::{Children, DescriptorKind, PathTable, Record, VolumeDescriptorSet, VolumeInfo};
pub use rockridge::RockRidgeAttributes;
pub use session::{
    extract_tree, DirEntry, EntryType, ExtractReport, Extractor, IsoImage, VolumeSummary,
};
pub use source::{
    BlockSource, BlockTransport, FileTransport, HttpTransport, MemoryTransport, Timestamp,
};
pub use susp::{EntryKind, ExtensionId, SuspEntry, SuspMode};

/// Split a slash-separated image path into segments, ignoring empty ones
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// Open an image from a path or URL
pub fn open(location: &str, config: SourceConfig) -> Result<IsoImage> {
    IsoImage::open_location(location, config)
}
