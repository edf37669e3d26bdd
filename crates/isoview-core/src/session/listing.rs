//! Serializable views of directory entries and volumes

use serde::Serialize;

use crate::iso9660::{Record, VolumeInfo};
use crate::rockridge::{PosixFileType, RockRidgeAttributes};
use crate::source::Timestamp;

use super::image::IsoImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    Device,
    Fifo,
    Socket,
}

impl EntryType {
    /// One-character tag used in long listings
    pub fn tag(&self) -> char {
        match self {
            EntryType::File => '-',
            EntryType::Directory => 'd',
            EntryType::Symlink => 'l',
            EntryType::Device => 'c',
            EntryType::Fifo => 'p',
            EntryType::Socket => 's',
        }
    }
}

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub size: u64,
    pub location: u32,
    pub hidden: bool,
    /// Rock Ridge modification time when present, otherwise the record time
    pub modified: Option<Timestamp>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub symlink_target: Option<String>,
}

impl DirEntry {
    pub fn new(name: String, record: &Record, attributes: Option<&RockRidgeAttributes>) -> Self {
        let posix = attributes.and_then(|attrs| attrs.posix);
        let entry_type = match attributes.and_then(RockRidgeAttributes::file_type) {
            Some(PosixFileType::Symlink) => EntryType::Symlink,
            Some(PosixFileType::BlockDevice | PosixFileType::CharDevice) => EntryType::Device,
            Some(PosixFileType::Fifo) => EntryType::Fifo,
            Some(PosixFileType::Socket) => EntryType::Socket,
            _ if attributes.map_or(false, |attrs| attrs.symlink.is_some()) => EntryType::Symlink,
            _ if record.is_directory => EntryType::Directory,
            _ => EntryType::File,
        };

        Self {
            name,
            entry_type,
            size: u64::from(record.length),
            location: record.location,
            hidden: record.is_hidden,
            modified: attributes
                .and_then(RockRidgeAttributes::modified)
                .or(record.datetime),
            mode: posix.map(|px| px.mode),
            uid: posix.map(|px| px.uid),
            gid: posix.map(|px| px.gid),
            symlink_target: attributes
                .and_then(|attrs| attrs.symlink.as_deref())
                .map(|target| String::from_utf8_lossy(target).into_owned()),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }
}

/// Headline facts about an open image
#[derive(Debug, Clone, Serialize)]
pub struct VolumeSummary {
    pub volume_id: String,
    pub system_id: String,
    pub publisher_id: String,
    pub application_id: String,
    pub volume_space_size: u32,
    pub logical_block_size: u16,
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
    pub descriptors: Vec<String>,
    pub path_table_directories: usize,
    pub susp_active: bool,
    pub extensions: Vec<String>,
    pub rock_ridge: Option<String>,
    pub joliet: bool,
}

impl VolumeSummary {
    pub fn new(image: &IsoImage) -> Self {
        let primary = image.primary();
        let text = |field: Option<&String>| field.cloned().unwrap_or_default();

        Self {
            volume_id: text(primary.map(|p| &p.volume_id)),
            system_id: text(primary.map(|p| &p.system_id)),
            publisher_id: text(primary.map(|p| &p.publisher_id)),
            application_id: text(primary.map(|p| &p.application_id)),
            volume_space_size: primary.map_or(0, |p| p.volume_space_size),
            logical_block_size: primary.map_or(0, |p| p.logical_block_size),
            created: primary.and_then(|p| p.creation),
            modified: primary.and_then(|p| p.modification),
            descriptors: image.descriptors().kinds().map(|k| k.to_string()).collect(),
            path_table_directories: image.path_table().len(),
            susp_active: image.susp_mode().is_active(),
            extensions: image
                .susp_mode()
                .context()
                .map(|ctx| ctx.extensions.iter().map(ToString::to_string).collect())
                .unwrap_or_default(),
            rock_ridge: image.rock_ridge().map(ToString::to_string),
            joliet: image
                .descriptors()
                .supplementary()
                .map_or(false, VolumeInfo::is_joliet),
        }
    }
}
