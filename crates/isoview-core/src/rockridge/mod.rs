//! Rock Ridge Interchange Protocol entries
//!
//! POSIX attributes, device numbers, symbolic links, alternate names and
//! timestamps carried in SUSP entries. Entry decoders are registered for both
//! the 1991A draft and the IEEE P1282 identity; `RR` only exists in the draft.

use serde::Serialize;

use crate::error::{IsoError, Result};
use crate::source::{Timestamp, Window};
use crate::susp::{ensure, EntryKind, ExtensionId, ExtensionRegistration, SuspEntry};

/// Rock Ridge 1.09 / 1.10 identity
pub const RRIP_1991A: (&str, u8) = ("RRIP_1991A", 1);

/// Rock Ridge 1.12 identity
pub const IEEE_P1282: (&str, u8) = ("IEEE_P1282", 1);

// RR: which Rock Ridge entries appear on this record
pub const RR_PX: u8 = 1;
pub const RR_PN: u8 = 1 << 1;
pub const RR_SL: u8 = 1 << 2;
pub const RR_NM: u8 = 1 << 3;
pub const RR_CL: u8 = 1 << 4;
pub const RR_PL: u8 = 1 << 5;
pub const RR_RE: u8 = 1 << 6;
pub const RR_TF: u8 = 1 << 7;

// SL entry and component flags
pub const SL_CONTINUE: u8 = 1;
pub const SL_CURRENT: u8 = 1 << 1;
pub const SL_PARENT: u8 = 1 << 2;
pub const SL_ROOT: u8 = 1 << 3;

// NM flags
pub const NM_CONTINUE: u8 = 1;
pub const NM_CURRENT: u8 = 1 << 1;
pub const NM_PARENT: u8 = 1 << 2;

// TF flags
pub const TF_CREATION: u8 = 1;
pub const TF_MODIFY: u8 = 1 << 1;
pub const TF_ACCESS: u8 = 1 << 2;
pub const TF_ATTRIBUTES: u8 = 1 << 3;
pub const TF_BACKUP: u8 = 1 << 4;
pub const TF_EXPIRATION: u8 = 1 << 5;
pub const TF_EFFECTIVE: u8 = 1 << 6;
pub const TF_LONG_FORM: u8 = 1 << 7;

// File type bits of the PX mode field
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

pub fn is_rock_ridge(extension: &ExtensionId) -> bool {
    [RRIP_1991A, IEEE_P1282]
        .iter()
        .any(|(id, version)| extension.matches(id, *version))
}

/// PX: POSIX file attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PosixAttributes {
    pub mode: u32,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    /// File serial number, only present in the 1.12 layout
    pub inode: Option<u32>,
}

/// PN: device number of a block or character device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceNumber {
    pub high: u32,
    pub low: u32,
}

/// SL: one piece of a symbolic link target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicLink {
    pub flags: u8,
    /// Components joined into path text
    pub path: Vec<u8>,
}

impl SymbolicLink {
    /// The target continues in the next SL entry
    pub fn continues(&self) -> bool {
        self.flags & SL_CONTINUE != 0
    }
}

/// NM: one piece of an alternate name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternateName {
    pub flags: u8,
    pub name: Vec<u8>,
}

impl AlternateName {
    /// The name continues in the next NM entry
    pub fn continues(&self) -> bool {
        self.flags & NM_CONTINUE != 0
    }
}

/// TF: file timestamps; fields not flagged are absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Timestamps {
    pub flags: u8,
    pub creation: Option<Timestamp>,
    pub modify: Option<Timestamp>,
    pub access: Option<Timestamp>,
    pub attributes: Option<Timestamp>,
    pub backup: Option<Timestamp>,
    pub expiration: Option<Timestamp>,
    pub effective: Option<Timestamp>,
}

pub(crate) static REGISTRY: &[ExtensionRegistration] = &[
    ExtensionRegistration {
        extension: RRIP_1991A,
        signature: *b"RR",
        version: 1,
        decode: decode_rr,
    },
    ExtensionRegistration {
        extension: RRIP_1991A,
        signature: *b"PX",
        version: 1,
        decode: decode_px,
    },
    ExtensionRegistration {
        extension: IEEE_P1282,
        signature: *b"PX",
        version: 1,
        decode: decode_px,
    },
    ExtensionRegistration {
        extension: RRIP_1991A,
        signature: *b"PN",
        version: 1,
        decode: decode_pn,
    },
    ExtensionRegistration {
        extension: IEEE_P1282,
        signature: *b"PN",
        version: 1,
        decode: decode_pn,
    },
    ExtensionRegistration {
        extension: RRIP_1991A,
        signature: *b"SL",
        version: 1,
        decode: decode_sl,
    },
    ExtensionRegistration {
        extension: IEEE_P1282,
        signature: *b"SL",
        version: 1,
        decode: decode_sl,
    },
    ExtensionRegistration {
        extension: RRIP_1991A,
        signature: *b"NM",
        version: 1,
        decode: decode_nm,
    },
    ExtensionRegistration {
        extension: IEEE_P1282,
        signature: *b"NM",
        version: 1,
        decode: decode_nm,
    },
    ExtensionRegistration {
        extension: RRIP_1991A,
        signature: *b"TF",
        version: 1,
        decode: decode_tf,
    },
    ExtensionRegistration {
        extension: IEEE_P1282,
        signature: *b"TF",
        version: 1,
        decode: decode_tf,
    },
];

fn decode_rr(body: &mut Window) -> Result<EntryKind> {
    ensure(body.len() == 1, "RR entry must be 5 bytes")?;
    Ok(EntryKind::RockRidgeFlags(body.decode_u8()?))
}

fn decode_px(body: &mut Window) -> Result<EntryKind> {
    ensure(
        body.len() == 32 || body.len() == 40,
        "PX entry must be 36 or 44 bytes",
    )?;
    let mode = body.decode_both_endian_u32()?;
    let links = body.decode_both_endian_u32()?;
    let uid = body.decode_both_endian_u32()?;
    let gid = body.decode_both_endian_u32()?;
    let inode = if body.is_exhausted() {
        None
    } else {
        Some(body.decode_both_endian_u32()?)
    };

    Ok(EntryKind::PosixAttributes(PosixAttributes {
        mode,
        links,
        uid,
        gid,
        inode,
    }))
}

fn decode_pn(body: &mut Window) -> Result<EntryKind> {
    ensure(body.len() == 16, "PN entry must be 20 bytes")?;
    Ok(EntryKind::DeviceNumber(DeviceNumber {
        high: body.decode_both_endian_u32()?,
        low: body.decode_both_endian_u32()?,
    }))
}

fn decode_sl(body: &mut Window) -> Result<EntryKind> {
    ensure(body.len() >= 2, "SL entry needs flags and a component")?;
    let flags = body.decode_u8()?;
    let mut path = Vec::new();

    while !body.is_exhausted() {
        let component_flags = body.decode_u8()?;
        let length = body.decode_u8()? as usize;
        let content = body.decode_raw(length)?;

        match component_flags {
            SL_CURRENT => {
                ensure(length == 0, "SL current-directory component has content")?;
                path.push(b'.');
            }
            SL_PARENT => {
                ensure(length == 0, "SL parent-directory component has content")?;
                path.extend_from_slice(b"..");
            }
            SL_ROOT => {
                ensure(length == 0, "SL root component has content")?;
            }
            0 | SL_CONTINUE => {
                ensure(length > 0, "SL component is empty")?;
                path.extend_from_slice(content);
            }
            _ => return Err(IsoError::SuspValidation("unknown SL component flags")),
        }

        // No separator inside a split component or after the final plain
        // component of a link that ends here
        let last_component = body.is_exhausted() && flags & SL_CONTINUE == 0;
        let separator = match component_flags {
            SL_CONTINUE => false,
            0 => !last_component,
            _ => true,
        };
        if separator {
            path.push(b'/');
        }
    }

    Ok(EntryKind::SymbolicLink(SymbolicLink { flags, path }))
}

fn decode_nm(body: &mut Window) -> Result<EntryKind> {
    ensure(!body.is_empty(), "NM entry needs flags")?;
    let flags = body.decode_u8()?;
    let rest = body.decode_remaining();

    let name = if flags & NM_CURRENT != 0 {
        ensure(rest.is_empty(), "NM current-directory entry has content")?;
        b".".to_vec()
    } else if flags & NM_PARENT != 0 {
        ensure(rest.is_empty(), "NM parent-directory entry has content")?;
        b"..".to_vec()
    } else {
        ensure(!rest.is_empty(), "NM entry has no name")?;
        rest
    };

    Ok(EntryKind::AlternateName(AlternateName { flags, name }))
}

fn decode_tf(body: &mut Window) -> Result<EntryKind> {
    ensure(!body.is_empty(), "TF entry needs flags")?;
    let flags = body.decode_u8()?;
    let long_form = flags & TF_LONG_FORM != 0;

    let mut next = |flag: u8| -> Result<Option<Timestamp>> {
        if flags & flag == 0 {
            return Ok(None);
        }
        if long_form {
            body.decode_descriptor_datetime()
        } else {
            body.decode_directory_datetime()
        }
    };

    let creation = next(TF_CREATION)?;
    let modify = next(TF_MODIFY)?;
    let access = next(TF_ACCESS)?;
    let attributes = next(TF_ATTRIBUTES)?;
    let backup = next(TF_BACKUP)?;
    let expiration = next(TF_EXPIRATION)?;
    let effective = next(TF_EFFECTIVE)?;

    Ok(EntryKind::Timestamps(Timestamps {
        flags,
        creation,
        modify,
        access,
        attributes,
        backup,
        expiration,
        effective,
    }))
}

/// Type of file described by a PX mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PosixFileType {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    Unknown,
}

impl PosixFileType {
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => PosixFileType::Regular,
            S_IFDIR => PosixFileType::Directory,
            S_IFLNK => PosixFileType::Symlink,
            S_IFBLK => PosixFileType::BlockDevice,
            S_IFCHR => PosixFileType::CharDevice,
            S_IFIFO => PosixFileType::Fifo,
            S_IFSOCK => PosixFileType::Socket,
            _ => PosixFileType::Unknown,
        }
    }
}

/// Rock Ridge view of one record, merged from its entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RockRidgeAttributes {
    pub posix: Option<PosixAttributes>,
    pub device: Option<DeviceNumber>,
    /// Joined SL target
    pub symlink: Option<Vec<u8>>,
    /// Joined NM name
    pub name: Option<Vec<u8>>,
    pub timestamps: Option<Timestamps>,
}

impl RockRidgeAttributes {
    /// Merge a record's entries. SL and NM pieces are joined until the first
    /// piece without the continue flag; later pieces are ignored.
    pub fn from_entries<'e, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'e SuspEntry>,
    {
        let mut attrs = RockRidgeAttributes::default();
        let mut link_done = false;
        let mut name_done = false;

        for entry in entries {
            match &entry.kind {
                EntryKind::PosixAttributes(px) => attrs.posix = Some(*px),
                EntryKind::DeviceNumber(pn) => attrs.device = Some(*pn),
                EntryKind::Timestamps(tf) => attrs.timestamps = Some(tf.clone()),
                EntryKind::SymbolicLink(sl) if !link_done => {
                    attrs
                        .symlink
                        .get_or_insert_with(Vec::new)
                        .extend_from_slice(&sl.path);
                    link_done = !sl.continues();
                }
                EntryKind::AlternateName(nm) if !name_done => {
                    attrs
                        .name
                        .get_or_insert_with(Vec::new)
                        .extend_from_slice(&nm.name);
                    name_done = !nm.continues();
                }
                _ => {}
            }
        }

        attrs
    }

    pub fn file_type(&self) -> Option<PosixFileType> {
        self.posix.map(|px| PosixFileType::from_mode(px.mode))
    }

    /// Permission bits of the PX mode
    pub fn permissions(&self) -> Option<u32> {
        self.posix.map(|px| px.mode & 0o7777)
    }

    pub fn is_symlink(&self) -> bool {
        self.symlink.is_some() || self.file_type() == Some(PosixFileType::Symlink)
    }

    pub fn modified(&self) -> Option<Timestamp> {
        self.timestamps.as_ref().and_then(|tf| tf.modify)
    }
}
