//! ISO 9660 on-disc structures

pub mod path_table;
pub mod record;
pub mod volume;

pub use path_table::{PathTable, PathTableEntry, Unresolved};
pub use record::{Children, Record, SystemUseEntries, FLAG_DIRECTORY, FLAG_HIDDEN};
pub use volume::{
    BootRecord, DescriptorKind, PartitionDescriptor, VolumeDescriptor, VolumeDescriptorSet,
    VolumeInfo, DESCRIPTOR_START, STANDARD_IDENTIFIER,
};
