//! Image session
//!
//! `IsoImage` ties the block source, descriptor set, path table and SUSP
//! state together and resolves paths to records. Listing views and tree
//! extraction build on it.

pub mod extract;
pub mod image;
pub mod listing;

// Re-export main types
pub use extract::{
    extract_tree, measure_tree, ExtractProgress, ExtractReport, ExtractStatus, ExtractedItem,
    Extractor, TreeSize,
};
pub use image::IsoImage;
pub use listing::{DirEntry, EntryType, VolumeSummary};
