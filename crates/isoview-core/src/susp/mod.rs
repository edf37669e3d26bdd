//! System Use Sharing Protocol
//!
//! A directory record's system-use area holds a sequence of entries, each a
//! 4-byte header (signature, total length, version) followed by a body. Entry
//! bodies are decoded through a static registry keyed by
//! (extension, signature, version); anything unregistered or malformed is kept
//! as an `Opaque` entry so that one bad entry never fails the listing.

use serde::Serialize;

use crate::error::{IsoError, Result};
use crate::rockridge::{
    self, AlternateName, DeviceNumber, PosixAttributes, SymbolicLink, Timestamps,
};
use crate::source::Window;

pub mod entries;

pub use entries::{
    ContinuationArea, ExtensionReference, SharingProtocolIndicator, SP_CHECK_BYTES,
};

/// Length of the common entry header
pub const HEADER_LEN: usize = 4;

/// Identity of a SUSP extension as announced by an ER entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExtensionId {
    pub id: String,
    pub version: u8,
}

impl ExtensionId {
    pub fn new(id: impl Into<String>, version: u8) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    pub fn matches(&self, id: &str, version: u8) -> bool {
        self.id == id && self.version == version
    }
}

impl std::fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.id, self.version)
    }
}

/// Decoded entry payloads
#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    SharingProtocol(SharingProtocolIndicator),
    Continuation(ContinuationArea),
    /// Padding, with its length
    Padding(usize),
    Stop,
    ExtensionReference(ExtensionReference),
    ExtensionSelector(u8),
    RockRidgeFlags(u8),
    PosixAttributes(PosixAttributes),
    DeviceNumber(DeviceNumber),
    SymbolicLink(SymbolicLink),
    AlternateName(AlternateName),
    Timestamps(Timestamps),
    /// Body bytes of an unregistered or malformed entry
    Opaque(Vec<u8>),
}

/// One system-use entry
#[derive(Debug, Clone, PartialEq)]
pub struct SuspEntry {
    pub signature: [u8; 2],
    pub version: u8,
    /// Extension the body was decoded under; `None` for core entries
    pub extension: Option<ExtensionId>,
    pub kind: EntryKind,
}

impl SuspEntry {
    pub fn signature_str(&self) -> String {
        String::from_utf8_lossy(&self.signature).into_owned()
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self.kind, EntryKind::Opaque(_))
    }
}

/// How system-use areas are interpreted for the whole session
#[derive(Debug, Clone, PartialEq)]
pub enum SuspMode {
    /// Only used while decoding the root's self-record: an SP entry at the
    /// start of its system-use area turns SUSP on.
    Detect,
    Inactive,
    Active(SuspContext),
}

/// Session-wide SUSP state found on the root directory
#[derive(Debug, Clone, PartialEq)]
pub struct SuspContext {
    /// Bytes to skip at the start of every system-use area
    pub skip: usize,
    /// Extensions announced by ER entries, in order
    pub extensions: Vec<ExtensionId>,
}

impl SuspContext {
    /// First announced extension that is a Rock Ridge identity
    pub fn rock_ridge(&self) -> Option<&ExtensionId> {
        self.extensions
            .iter()
            .find(|ext| rockridge::is_rock_ridge(ext))
    }

    /// Extension used to decode entry bodies: Rock Ridge if present,
    /// otherwise whatever was announced first
    pub fn decoding_extension(&self) -> Option<&ExtensionId> {
        self.rock_ridge().or_else(|| self.extensions.first())
    }
}

impl SuspMode {
    pub fn is_active(&self) -> bool {
        matches!(self, SuspMode::Active(_))
    }

    pub fn context(&self) -> Option<&SuspContext> {
        match self {
            SuspMode::Active(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn rock_ridge(&self) -> Option<&ExtensionId> {
        self.context().and_then(SuspContext::rock_ridge)
    }

    pub fn decoding_extension(&self) -> Option<&ExtensionId> {
        self.context().and_then(SuspContext::decoding_extension)
    }
}

pub(crate) type DecodeFn = fn(&mut Window) -> Result<EntryKind>;

/// Registry row for an entry defined by an extension
pub(crate) struct ExtensionRegistration {
    pub(crate) extension: (&'static str, u8),
    pub(crate) signature: [u8; 2],
    pub(crate) version: u8,
    pub(crate) decode: DecodeFn,
}

/// Registry row for an entry defined by SUSP itself
struct CoreRegistration {
    signature: [u8; 2],
    version: u8,
    decode: DecodeFn,
}

static CORE_REGISTRY: &[CoreRegistration] = &[
    CoreRegistration {
        signature: *b"SP",
        version: 1,
        decode: entries::decode_sp,
    },
    CoreRegistration {
        signature: *b"CE",
        version: 1,
        decode: entries::decode_ce,
    },
    CoreRegistration {
        signature: *b"PD",
        version: 1,
        decode: entries::decode_pd,
    },
    CoreRegistration {
        signature: *b"ST",
        version: 1,
        decode: entries::decode_st,
    },
    CoreRegistration {
        signature: *b"ER",
        version: 1,
        decode: entries::decode_er,
    },
    CoreRegistration {
        signature: *b"ES",
        version: 1,
        decode: entries::decode_es,
    },
];

/// Find the decoder for an entry. Extension-specific rows win over core rows.
fn lookup(
    extension: Option<&ExtensionId>,
    signature: [u8; 2],
    version: u8,
) -> Option<(DecodeFn, Option<ExtensionId>)> {
    if let Some(ext) = extension {
        let row = rockridge::REGISTRY.iter().find(|row| {
            row.signature == signature
                && row.version == version
                && ext.matches(row.extension.0, row.extension.1)
        });
        if let Some(row) = row {
            return Some((row.decode, Some(ext.clone())));
        }
    }

    CORE_REGISTRY
        .iter()
        .find(|row| row.signature == signature && row.version == version)
        .map(|row| (row.decode, None))
}

pub(crate) fn ensure(condition: bool, reason: &'static str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(IsoError::SuspValidation(reason))
    }
}

/// Decode one entry body. Validation failures produce an `Opaque` entry;
/// any other error is passed through.
pub fn decode_body(
    signature: [u8; 2],
    version: u8,
    body: Vec<u8>,
    extension: Option<&ExtensionId>,
) -> Result<SuspEntry> {
    let Some((decode, attributed)) = lookup(extension, signature, version) else {
        tracing::trace!(
            "Unregistered SUSP entry {} v{}",
            String::from_utf8_lossy(&signature),
            version
        );
        return Ok(SuspEntry {
            signature,
            version,
            extension: None,
            kind: EntryKind::Opaque(body),
        });
    };

    let mut window = Window::from_slice(&body);
    let decoded = decode(&mut window)
        .map_err(|e| match e {
            IsoError::BufferUnderrun { .. } => IsoError::SuspValidation("entry body too short"),
            other => other,
        })
        .and_then(|kind| {
            ensure(window.is_exhausted(), "entry body not fully consumed")?;
            Ok(kind)
        });

    let kind = match decoded {
        Ok(kind) => kind,
        Err(e) if e.is_recoverable() => {
            tracing::warn!(
                "Keeping malformed {} entry as opaque: {}",
                String::from_utf8_lossy(&signature),
                e
            );
            EntryKind::Opaque(body)
        }
        Err(e) => return Err(e),
    };

    Ok(SuspEntry {
        signature,
        version,
        extension: attributed,
        kind,
    })
}

/// Decode the entry at the window cursor.
///
/// `budget` is the number of bytes left in the system-use area. Returns
/// `None` when the area is exhausted or only padding remains.
pub fn decode_entry(
    window: &mut Window,
    budget: usize,
    extension: Option<&ExtensionId>,
) -> Result<Option<SuspEntry>> {
    if budget < HEADER_LEN {
        return Ok(None);
    }

    let header = window.decode_raw(HEADER_LEN)?;
    let signature = [header[0], header[1]];
    let length = header[2] as usize;
    let version = header[3];

    // Zero fill after the last entry
    if length < HEADER_LEN {
        window.rewind(HEADER_LEN)?;
        return Ok(None);
    }

    if length > budget {
        return Err(IsoError::BufferUnderrun {
            wanted: length,
            available: budget,
        });
    }

    let body = window.decode_raw(length - HEADER_LEN)?.to_vec();
    decode_body(signature, version, body, extension).map(Some)
}

/// Decode entries up to window position `end`, stopping after an ST entry
pub fn decode_area(
    window: &mut Window,
    end: usize,
    extension: Option<&ExtensionId>,
) -> Result<Vec<SuspEntry>> {
    let mut entries = Vec::new();

    loop {
        let budget = end.saturating_sub(window.position());
        let Some(entry) = decode_entry(window, budget, extension)? else {
            break;
        };
        let stop = entry.kind == EntryKind::Stop;
        entries.push(entry);
        if stop {
            break;
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(signature: &[u8; 2], version: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![signature[0], signature[1], (body.len() + 4) as u8, version];
        out.extend_from_slice(body);
        out
    }

    fn rrip() -> ExtensionId {
        ExtensionId::new("RRIP_1991A", 1)
    }

    #[test]
    fn test_area_stops_at_st() {
        let mut raw = entry(b"PD", 1, &[0, 0]);
        raw.extend(entry(b"ST", 1, &[]));
        raw.extend(entry(b"PD", 1, &[]));
        let end = raw.len();
        let mut window = Window::new(raw);

        let entries = decode_area(&mut window, end, None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::Padding(2));
        assert_eq!(entries[1].kind, EntryKind::Stop);
    }

    #[test]
    fn test_short_length_ends_area() {
        let mut raw = entry(b"PD", 1, &[]);
        raw.extend_from_slice(&[0, 0, 0, 0, 0]);
        let end = raw.len();
        let mut window = Window::new(raw);

        let entries = decode_area(&mut window, end, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(window.position(), 4);
    }

    #[test]
    fn test_declared_length_beyond_area_is_fatal() {
        let mut raw = entry(b"PD", 1, &[0; 8]);
        raw.truncate(8);
        let mut window = Window::new(raw);
        assert!(matches!(
            decode_entry(&mut window, 8, None),
            Err(IsoError::BufferUnderrun { .. })
        ));
    }

    #[test]
    fn test_unregistered_entry_is_opaque() {
        let raw = entry(b"ZF", 1, &[1, 2, 3, 4]);
        let mut window = Window::new(raw);
        let decoded = decode_entry(&mut window, 8, Some(&rrip())).unwrap().unwrap();
        assert_eq!(decoded.signature_str(), "ZF");
        assert_eq!(decoded.kind, EntryKind::Opaque(vec![1, 2, 3, 4]));
        assert_eq!(decoded.extension, None);
    }

    #[test]
    fn test_extension_entry_needs_extension() {
        let raw = entry(b"RR", 1, &[0x81]);

        let mut window = Window::new(raw.clone());
        let plain = decode_entry(&mut window, raw.len(), None).unwrap().unwrap();
        assert!(plain.is_opaque());

        let mut window = Window::new(raw.clone());
        let decoded = decode_entry(&mut window, raw.len(), Some(&rrip()))
            .unwrap()
            .unwrap();
        assert_eq!(decoded.kind, EntryKind::RockRidgeFlags(0x81));
        assert_eq!(decoded.extension, Some(rrip()));
    }

    #[test]
    fn test_invalid_body_falls_back_to_opaque() {
        // CE needs a 24-byte body
        let raw = entry(b"CE", 1, &[0; 8]);
        let mut window = Window::new(raw);
        let decoded = decode_entry(&mut window, 12, None).unwrap().unwrap();
        assert_eq!(decoded.kind, EntryKind::Opaque(vec![0; 8]));
    }

    #[test]
    fn test_wrong_version_is_opaque() {
        let raw = entry(b"ST", 2, &[]);
        let mut window = Window::new(raw);
        let decoded = decode_entry(&mut window, 4, None).unwrap().unwrap();
        assert!(decoded.is_opaque());
    }

    #[test]
    fn test_decoding_extension_prefers_rock_ridge() {
        let ctx = SuspContext {
            skip: 0,
            extensions: vec![ExtensionId::new("VENDOR_X", 3), rrip()],
        };
        assert_eq!(ctx.decoding_extension(), Some(&rrip()));

        let ctx = SuspContext {
            skip: 0,
            extensions: vec![ExtensionId::new("VENDOR_X", 3)],
        };
        assert_eq!(ctx.rock_ridge(), None);
        assert_eq!(
            ctx.decoding_extension(),
            Some(&ExtensionId::new("VENDOR_X", 3))
        );
    }
}
