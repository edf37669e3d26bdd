//! Core SUSP entries (SP, CE, PD, ST, ER, ES)
//!
//! These signatures belong to the sharing protocol itself and decode the same
//! way whichever extension is active.

use serde::Serialize;

use super::{ensure, EntryKind};
use crate::error::Result;
use crate::source::Window;

/// Check bytes carried by every SP entry
pub const SP_CHECK_BYTES: [u8; 2] = [0xBE, 0xEF];

/// SP: marks SUSP as in use and gives the per-record skip length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SharingProtocolIndicator {
    pub skip_length: u8,
}

/// CE: where the rest of a record's entries live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContinuationArea {
    /// Sector holding the continuation area
    pub location: u32,
    /// Byte offset of the area within that sector
    pub offset: u32,
    /// Length of the area in bytes
    pub length: u32,
}

/// ER: an extension in use on this image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionReference {
    pub id: String,
    pub version: u8,
    pub descriptor: String,
    pub source: String,
}

pub(crate) fn decode_sp(body: &mut Window) -> Result<EntryKind> {
    ensure(body.len() == 3, "SP entry must be 7 bytes")?;
    ensure(body.decode_raw(2)? == SP_CHECK_BYTES, "SP check bytes mismatch")?;
    Ok(EntryKind::SharingProtocol(SharingProtocolIndicator {
        skip_length: body.decode_u8()?,
    }))
}

pub(crate) fn decode_ce(body: &mut Window) -> Result<EntryKind> {
    ensure(body.len() == 24, "CE entry must be 28 bytes")?;
    Ok(EntryKind::Continuation(ContinuationArea {
        location: body.decode_both_endian_u32()?,
        offset: body.decode_both_endian_u32()?,
        length: body.decode_both_endian_u32()?,
    }))
}

pub(crate) fn decode_pd(body: &mut Window) -> Result<EntryKind> {
    let padding = body.decode_remaining();
    Ok(EntryKind::Padding(padding.len()))
}

pub(crate) fn decode_st(body: &mut Window) -> Result<EntryKind> {
    ensure(body.is_empty(), "ST entry must be 4 bytes")?;
    Ok(EntryKind::Stop)
}

pub(crate) fn decode_er(body: &mut Window) -> Result<EntryKind> {
    ensure(body.len() >= 4, "ER entry too short")?;
    let id_len = body.decode_u8()? as usize;
    let descriptor_len = body.decode_u8()? as usize;
    let source_len = body.decode_u8()? as usize;
    ensure(
        body.len() == 4 + id_len + descriptor_len + source_len,
        "ER field lengths do not match entry length",
    )?;
    let version = body.decode_u8()?;
    let id = String::from_utf8_lossy(body.decode_raw(id_len)?).into_owned();
    let descriptor = String::from_utf8_lossy(body.decode_raw(descriptor_len)?).into_owned();
    let source = String::from_utf8_lossy(body.decode_raw(source_len)?).into_owned();

    Ok(EntryKind::ExtensionReference(ExtensionReference {
        id,
        version,
        descriptor,
        source,
    }))
}

pub(crate) fn decode_es(body: &mut Window) -> Result<EntryKind> {
    ensure(body.len() == 1, "ES entry must be 5 bytes")?;
    Ok(EntryKind::ExtensionSelector(body.decode_u8()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IsoError;

    fn both_endian(value: u32) -> Vec<u8> {
        let mut out = value.to_le_bytes().to_vec();
        out.extend_from_slice(&value.to_be_bytes());
        out
    }

    #[test]
    fn test_sp_entry() {
        let mut body = Window::new(vec![0xBE, 0xEF, 3]);
        assert_eq!(
            decode_sp(&mut body).unwrap(),
            EntryKind::SharingProtocol(SharingProtocolIndicator { skip_length: 3 })
        );
    }

    #[test]
    fn test_sp_bad_check_bytes() {
        let mut body = Window::new(vec![0xBE, 0xEE, 0]);
        assert!(matches!(
            decode_sp(&mut body),
            Err(IsoError::SuspValidation(_))
        ));
    }

    #[test]
    fn test_ce_entry() {
        let mut raw = both_endian(40);
        raw.extend(both_endian(12));
        raw.extend(both_endian(300));
        let mut body = Window::new(raw);
        assert_eq!(
            decode_ce(&mut body).unwrap(),
            EntryKind::Continuation(ContinuationArea {
                location: 40,
                offset: 12,
                length: 300
            })
        );
    }

    #[test]
    fn test_er_entry() {
        let mut raw = vec![10, 3, 2, 1];
        raw.extend_from_slice(b"RRIP_1991A");
        raw.extend_from_slice(b"DES");
        raw.extend_from_slice(b"SR");
        let mut body = Window::new(raw);
        match decode_er(&mut body).unwrap() {
            EntryKind::ExtensionReference(er) => {
                assert_eq!(er.id, "RRIP_1991A");
                assert_eq!(er.version, 1);
                assert_eq!(er.descriptor, "DES");
                assert_eq!(er.source, "SR");
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn test_er_length_mismatch() {
        let mut body = Window::new(vec![10, 0, 0, 1, b'X']);
        assert!(matches!(
            decode_er(&mut body),
            Err(IsoError::SuspValidation(_))
        ));
    }

    #[test]
    fn test_st_with_body_is_invalid() {
        let mut body = Window::new(vec![0]);
        assert!(decode_st(&mut body).is_err());
    }
}
