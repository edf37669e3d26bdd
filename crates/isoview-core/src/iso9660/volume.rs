//! Volume descriptor set

use std::collections::BTreeMap;

use serde::Serialize;

use super::record::Record;
use crate::error::{IsoError, Result};
use crate::source::{BlockSource, Timestamp, Window, SECTOR_SIZE};
use crate::susp::SuspMode;

/// First sector of the volume descriptor set
pub const DESCRIPTOR_START: u32 = 16;

/// Standard identifier carried by every descriptor
pub const STANDARD_IDENTIFIER: &[u8; 5] = b"CD001";

/// Length of the root directory record embedded in a descriptor
const ROOT_RECORD_LEN: usize = 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    Boot,
    Primary,
    Supplementary,
    Partition,
    Terminator,
}

impl DescriptorKind {
    pub fn from_type_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DescriptorKind::Boot),
            1 => Some(DescriptorKind::Primary),
            2 => Some(DescriptorKind::Supplementary),
            3 => Some(DescriptorKind::Partition),
            255 => Some(DescriptorKind::Terminator),
            _ => None,
        }
    }
}

impl std::fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DescriptorKind::Boot => "boot record",
            DescriptorKind::Primary => "primary",
            DescriptorKind::Supplementary => "supplementary",
            DescriptorKind::Partition => "partition",
            DescriptorKind::Terminator => "terminator",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootRecord {
    pub boot_system_id: String,
    pub boot_id: String,
}

/// Primary and supplementary descriptors share this layout; `volume_flags`
/// and `escape_sequences` are only meaningful for supplementary ones.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeInfo {
    pub volume_flags: u8,
    pub system_id: String,
    pub volume_id: String,
    /// Volume size in logical blocks
    pub volume_space_size: u32,
    pub escape_sequences: Vec<u8>,
    pub volume_set_size: u16,
    pub volume_sequence_number: u16,
    pub logical_block_size: u16,
    pub path_table_size: u32,
    /// Sector of the little-endian (type L) path table
    pub path_table_location: u32,
    pub optional_path_table_location: u32,
    /// Sector of the big-endian (type M) path table
    pub path_table_location_be: u32,
    pub optional_path_table_location_be: u32,
    pub root: Record,
    pub volume_set_id: String,
    pub publisher_id: String,
    pub preparer_id: String,
    pub application_id: String,
    pub copyright_file_id: String,
    pub abstract_file_id: String,
    pub bibliographic_file_id: String,
    pub creation: Option<Timestamp>,
    pub modification: Option<Timestamp>,
    pub expiration: Option<Timestamp>,
    pub effective: Option<Timestamp>,
    pub file_structure_version: u8,
}

impl VolumeInfo {
    /// Supplementary descriptor announcing Joliet
    pub fn is_joliet(&self) -> bool {
        is_joliet_escape(&self.escape_sequences)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionDescriptor {
    pub system_id: String,
    pub partition_id: String,
    pub location: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VolumeDescriptor {
    Boot(BootRecord),
    Primary(VolumeInfo),
    Supplementary(VolumeInfo),
    Partition(PartitionDescriptor),
    Terminator,
}

fn text(source: &mut BlockSource, n: usize) -> Result<String> {
    Ok(String::from_utf8_lossy(&source.decode_string(n)?).into_owned())
}

/// Escape sequences of a Joliet supplementary descriptor. Only reported in
/// the volume summary; Joliet directory trees are never read.
pub fn is_joliet_escape(escape: &[u8]) -> bool {
    matches!(escape.get(..3), Some([0x25, 0x2F, 0x40 | 0x43 | 0x45]))
}

impl VolumeDescriptor {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            VolumeDescriptor::Boot(_) => DescriptorKind::Boot,
            VolumeDescriptor::Primary(_) => DescriptorKind::Primary,
            VolumeDescriptor::Supplementary(_) => DescriptorKind::Supplementary,
            VolumeDescriptor::Partition(_) => DescriptorKind::Partition,
            VolumeDescriptor::Terminator => DescriptorKind::Terminator,
        }
    }

    /// Decode the descriptor at the start of the current window
    pub fn decode(source: &mut BlockSource) -> Result<Self> {
        let type_code = source.decode_u8()?;
        let identifier = source.decode_raw(5)?;
        if identifier.as_slice() != STANDARD_IDENTIFIER {
            return Err(IsoError::BadDescriptor(format!(
                "standard identifier is {:?}",
                String::from_utf8_lossy(&identifier)
            )));
        }
        let version = source.decode_u8()?;
        if version != 1 {
            return Err(IsoError::BadDescriptor(format!(
                "descriptor version {}",
                version
            )));
        }

        let kind = DescriptorKind::from_type_code(type_code).ok_or_else(|| {
            IsoError::BadDescriptor(format!("unknown descriptor type {}", type_code))
        })?;

        Ok(match kind {
            DescriptorKind::Boot => VolumeDescriptor::Boot(BootRecord {
                boot_system_id: text(source, 32)?,
                boot_id: text(source, 32)?,
            }),
            DescriptorKind::Primary => VolumeDescriptor::Primary(decode_volume_info(source)?),
            DescriptorKind::Supplementary => {
                VolumeDescriptor::Supplementary(decode_volume_info(source)?)
            }
            DescriptorKind::Partition => {
                source.skip(1)?;
                VolumeDescriptor::Partition(PartitionDescriptor {
                    system_id: text(source, 32)?,
                    partition_id: text(source, 32)?,
                    location: source.decode_both_endian_u32()?,
                    size: source.decode_both_endian_u32()?,
                })
            }
            DescriptorKind::Terminator => VolumeDescriptor::Terminator,
        })
    }
}

fn decode_volume_info(source: &mut BlockSource) -> Result<VolumeInfo> {
    let volume_flags = source.decode_u8()?;
    let system_id = text(source, 32)?;
    let volume_id = text(source, 32)?;
    source.skip(8)?;
    let volume_space_size = source.decode_both_endian_u32()?;
    let escape_sequences = source.decode_raw(32)?;
    let volume_set_size = source.decode_both_endian_u16()?;
    let volume_sequence_number = source.decode_both_endian_u16()?;
    let logical_block_size = source.decode_both_endian_u16()?;
    let path_table_size = source.decode_both_endian_u32()?;
    let path_table_location = source.decode_u32_le()?;
    let optional_path_table_location = source.decode_u32_le()?;
    let path_table_location_be = source.decode_u32_be()?;
    let optional_path_table_location_be = source.decode_u32_be()?;

    let mut root_window = Window::new(source.decode_raw(ROOT_RECORD_LEN)?);
    let root = Record::decode(&mut root_window, &SuspMode::Inactive)?
        .ok_or_else(|| IsoError::BadDescriptor("empty root directory record".to_string()))?;

    let volume_set_id = text(source, 128)?;
    let publisher_id = text(source, 128)?;
    let preparer_id = text(source, 128)?;
    let application_id = text(source, 128)?;
    let copyright_file_id = text(source, 37)?;
    let abstract_file_id = text(source, 37)?;
    let bibliographic_file_id = text(source, 37)?;

    Ok(VolumeInfo {
        volume_flags,
        system_id,
        volume_id,
        volume_space_size,
        escape_sequences,
        volume_set_size,
        volume_sequence_number,
        logical_block_size,
        path_table_size,
        path_table_location,
        optional_path_table_location,
        path_table_location_be,
        optional_path_table_location_be,
        root,
        volume_set_id,
        publisher_id,
        preparer_id,
        application_id,
        copyright_file_id,
        abstract_file_id,
        bibliographic_file_id,
        creation: source.decode_descriptor_datetime()?,
        modification: source.decode_descriptor_datetime()?,
        expiration: source.decode_descriptor_datetime()?,
        effective: source.decode_descriptor_datetime()?,
        file_structure_version: source.decode_u8()?,
    })
}

/// Descriptors keyed by kind. A later descriptor of the same kind replaces
/// an earlier one.
#[derive(Debug, Clone)]
pub struct VolumeDescriptorSet {
    descriptors: BTreeMap<DescriptorKind, VolumeDescriptor>,
}

impl VolumeDescriptorSet {
    /// Read descriptors from sector 16 up to and including the terminator
    pub fn read(source: &mut BlockSource) -> Result<Self> {
        let mut descriptors = BTreeMap::new();
        let mut sector = DESCRIPTOR_START;

        loop {
            source.seek(sector, SECTOR_SIZE, false)?;
            let descriptor = VolumeDescriptor::decode(source)?;
            let kind = descriptor.kind();
            tracing::debug!("Found {} volume descriptor at sector {}", kind, sector);

            descriptors.insert(kind, descriptor);
            if kind == DescriptorKind::Terminator {
                break;
            }
            sector += 1;
        }

        if !descriptors.contains_key(&DescriptorKind::Primary) {
            return Err(IsoError::BadDescriptor(
                "no primary volume descriptor".to_string(),
            ));
        }

        Ok(Self { descriptors })
    }

    pub fn primary(&self) -> Option<&VolumeInfo> {
        match self.descriptors.get(&DescriptorKind::Primary) {
            Some(VolumeDescriptor::Primary(info)) => Some(info),
            _ => None,
        }
    }

    pub fn supplementary(&self) -> Option<&VolumeInfo> {
        match self.descriptors.get(&DescriptorKind::Supplementary) {
            Some(VolumeDescriptor::Supplementary(info)) => Some(info),
            _ => None,
        }
    }

    pub fn get(&self, kind: DescriptorKind) -> Option<&VolumeDescriptor> {
        self.descriptors.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = DescriptorKind> + '_ {
        self.descriptors.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
