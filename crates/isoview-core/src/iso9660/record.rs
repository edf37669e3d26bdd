//! Directory records and directory traversal

use std::cell::OnceCell;
use std::collections::HashSet;

use crate::error::{IsoError, Result};
use crate::source::{BlockSource, Timestamp, Window};
use crate::susp::{self, ContinuationArea, EntryKind, ExtensionId, SuspEntry, SuspMode};

/// File flag bits
pub const FLAG_HIDDEN: u8 = 1;
pub const FLAG_DIRECTORY: u8 = 1 << 1;

/// Bytes before the file identifier
const FIXED_LEN: usize = 33;

/// One entry of a directory extent
#[derive(Debug, Clone)]
pub struct Record {
    /// First sector of the extent
    pub location: u32,
    /// Extent length in bytes
    pub length: u32,
    pub datetime: Option<Timestamp>,
    pub is_hidden: bool,
    pub is_directory: bool,
    /// ISO 9660 identifier with any ";version" suffix removed. Empty for the
    /// self and parent entries.
    pub raw_name: Vec<u8>,
    /// SUSP entries found in the record itself (continuation areas excluded)
    pub embedded_entries: Vec<SuspEntry>,
    content: OnceCell<Vec<u8>>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
            && self.length == other.length
            && self.datetime == other.datetime
            && self.is_hidden == other.is_hidden
            && self.is_directory == other.is_directory
            && self.raw_name == other.raw_name
            && self.embedded_entries == other.embedded_entries
    }
}

impl Record {
    /// Decode the record at the window cursor.
    ///
    /// A zero length byte means the rest of the sector is padding; `None` is
    /// returned and the cursor is left on that byte.
    pub fn decode(window: &mut Window, mode: &SuspMode) -> Result<Option<Record>> {
        let length = window.peek_u8()? as usize;
        if length == 0 {
            return Ok(None);
        }

        let start = window.position();
        let end = start + length;

        window.skip(2)?; // record length, extended attribute length
        let location = window.decode_both_endian_u32()?;
        let data_length = window.decode_both_endian_u32()?;
        let datetime = window.decode_directory_datetime()?;
        let flags = window.decode_u8()?;
        window.skip(2)?; // file unit size, interleave gap
        let _volume_sequence = window.decode_both_endian_u16()?;
        let name_length = window.decode_u8()? as usize;
        let identifier = window.decode_raw(name_length)?;
        let raw_name = match identifier {
            [0] | [1] => Vec::new(),
            _ => identifier
                .split(|&b| b == b';')
                .next()
                .unwrap_or_default()
                .to_vec(),
        };
        if name_length % 2 == 0 {
            window.skip(1)?;
        }

        if window.position() > end {
            return Err(IsoError::BufferUnderrun {
                wanted: window.position() - start,
                available: length,
            });
        }

        let embedded_entries = decode_system_use(window, end, mode)?;

        // Anything past the last entry is padding
        window.skip(end.saturating_sub(window.position()))?;

        Ok(Some(Record {
            location,
            length: data_length,
            datetime,
            is_hidden: flags & FLAG_HIDDEN != 0,
            is_directory: flags & FLAG_DIRECTORY != 0,
            raw_name,
            embedded_entries,
            content: OnceCell::new(),
        }))
    }

    /// Decode the self ("." entry) record of the directory at `location`
    pub fn self_record(
        source: &mut BlockSource,
        location: u32,
        length: usize,
        mode: &SuspMode,
    ) -> Result<Record> {
        source.seek(location, length, false)?;
        Record::decode(source.window_mut(), mode)?.ok_or_else(|| {
            IsoError::NotFound(format!("directory record at sector {}", location))
        })
    }

    pub fn raw_name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.raw_name).into_owned()
    }

    /// Iterate the record's system-use entries, following continuation areas
    pub fn system_use<'a>(
        &self,
        source: &'a mut BlockSource,
        mode: &SuspMode,
    ) -> SystemUseEntries<'a> {
        SystemUseEntries::new(source, self.embedded_entries.clone(), mode)
    }

    /// Name after Rock Ridge NM entries are applied, or the raw name when
    /// there are none
    pub fn effective_name(&self, source: &mut BlockSource, mode: &SuspMode) -> Result<Vec<u8>> {
        if mode.decoding_extension().is_none() {
            return Ok(self.raw_name.clone());
        }

        let mut name: Option<Vec<u8>> = None;
        for entry in self.system_use(source, mode) {
            if let EntryKind::AlternateName(nm) = entry?.kind {
                name.get_or_insert_with(Vec::new).extend_from_slice(&nm.name);
                if !nm.continues() {
                    break;
                }
            }
        }

        Ok(name.unwrap_or_else(|| self.raw_name.clone()))
    }

    /// File content. Read once, then memoized on the record.
    pub fn content<'r>(&'r self, source: &mut BlockSource) -> Result<&'r [u8]> {
        if self.is_directory {
            return Err(IsoError::NotAFile);
        }
        if let Some(content) = self.content.get() {
            return Ok(content);
        }

        source.seek(self.location, self.length as usize, true)?;
        let data = source.decode_remaining();
        Ok(self.content.get_or_init(|| data))
    }

    pub fn is_content_loaded(&self) -> bool {
        self.content.get().is_some()
    }
}

fn decode_system_use(window: &mut Window, end: usize, mode: &SuspMode) -> Result<Vec<SuspEntry>> {
    match mode {
        SuspMode::Inactive => Ok(Vec::new()),
        SuspMode::Active(ctx) => {
            let skip = std::cmp::min(ctx.skip, end.saturating_sub(window.position()));
            window.skip(skip)?;
            susp::decode_area(window, end, mode.decoding_extension())
        }
        SuspMode::Detect => {
            // Only an SP entry at the very start of the area turns SUSP on
            let saved = window.clone();
            let budget = end.saturating_sub(window.position());
            match susp::decode_entry(window, budget, None) {
                Ok(Some(first)) if matches!(first.kind, EntryKind::SharingProtocol(_)) => {
                    let mut entries = vec![first];
                    entries.extend(susp::decode_area(window, end, None)?);
                    Ok(entries)
                }
                _ => {
                    *window = saved;
                    Ok(Vec::new())
                }
            }
        }
    }
}

/// Lazy walk over a record's SUSP entries.
///
/// Yields the embedded entries first, then the contents of each continuation
/// area in chain order. An ST entry ends the walk; a continuation area that
/// was already visited ends it too.
pub struct SystemUseEntries<'a> {
    source: &'a mut BlockSource,
    extension: Option<ExtensionId>,
    embedded: std::vec::IntoIter<SuspEntry>,
    area_end: Option<usize>,
    pending: Option<ContinuationArea>,
    visited: HashSet<(u32, u32)>,
    done: bool,
}

impl<'a> SystemUseEntries<'a> {
    fn new(source: &'a mut BlockSource, embedded: Vec<SuspEntry>, mode: &SuspMode) -> Self {
        Self {
            source,
            extension: mode.decoding_extension().cloned(),
            embedded: embedded.into_iter(),
            area_end: None,
            pending: None,
            visited: HashSet::new(),
            done: false,
        }
    }

    fn enter(&mut self, area: ContinuationArea) -> Result<()> {
        tracing::trace!(
            "Following continuation area at sector {} offset {} ({} bytes)",
            area.location,
            area.offset,
            area.length
        );
        let offset = area.offset as usize;
        let length = area.length as usize;
        self.source.seek(area.location, offset + length, false)?;
        self.source.skip(offset)?;
        self.area_end = Some(offset + length);
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<SuspEntry>> {
        loop {
            if let Some(entry) = self.embedded.next() {
                return Ok(Some(entry));
            }

            if let Some(end) = self.area_end {
                let window = self.source.window_mut();
                let budget = end.saturating_sub(window.position());
                match susp::decode_entry(window, budget, self.extension.as_ref())? {
                    Some(entry) => return Ok(Some(entry)),
                    None => {
                        self.area_end = None;
                        continue;
                    }
                }
            }

            let Some(area) = self.pending.take() else {
                return Ok(None);
            };
            if !self.visited.insert((area.location, area.offset)) {
                tracing::warn!(
                    "Continuation area loop at sector {} offset {}",
                    area.location,
                    area.offset
                );
                return Ok(None);
            }
            self.enter(area)?;
        }
    }
}

impl Iterator for SystemUseEntries<'_> {
    type Item = Result<SuspEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_entry() {
            Ok(Some(entry)) => {
                match &entry.kind {
                    EntryKind::Stop => self.done = true,
                    EntryKind::Continuation(area) => self.pending = Some(*area),
                    _ => {}
                }
                Some(Ok(entry))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Lazy iterator over the children of a directory.
///
/// Children are decoded straight from the shared block source window, so
/// anything else that needs the source while the iteration is pending must
/// go through `detour`, which puts the cursor back afterwards.
pub struct Children<'s> {
    source: &'s mut BlockSource,
    mode: &'s SuspMode,
    done: bool,
}

impl<'s> Children<'s> {
    pub fn new(
        source: &'s mut BlockSource,
        mode: &'s SuspMode,
        directory: &Record,
    ) -> Result<Self> {
        if !directory.is_directory {
            return Err(IsoError::NotADirectory);
        }

        source.seek(directory.location, directory.length as usize, false)?;

        // Skip the self and parent entries. The root's self entry carries the
        // SP entry and is exempt from the skip length, so their system-use
        // areas are not interpreted here.
        for _ in 0..2 {
            if Record::decode(source.window_mut(), &SuspMode::Inactive)?.is_none() {
                break;
            }
        }

        Ok(Self {
            source,
            mode,
            done: false,
        })
    }

    /// Run `f` against the source, then restore the traversal cursor
    pub fn detour<R>(&mut self, f: impl FnOnce(&mut BlockSource, &SuspMode) -> R) -> R {
        let saved = self.source.save_cursor();
        let out = f(&mut *self.source, self.mode);
        self.source.restore_cursor(saved);
        out
    }

    pub fn effective_name(&mut self, record: &Record) -> Result<Vec<u8>> {
        self.detour(|source, mode| record.effective_name(source, mode))
    }
}

impl Iterator for Children<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.source.remaining() > 0 {
            match Record::decode(self.source.window_mut(), self.mode) {
                Ok(Some(record)) => return Some(Ok(record)),
                // Records never straddle sectors: the rest of this one is padding
                Ok(None) => self.source.skip_to_sector_boundary(),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::source::{MemoryTransport, SECTOR_SIZE};
    use crate::susp::{ExtensionId, SuspContext};

    fn both_endian32(value: u32) -> Vec<u8> {
        let mut out = value.to_le_bytes().to_vec();
        out.extend_from_slice(&value.to_be_bytes());
        out
    }

    fn record_bytes(
        name: &[u8],
        location: u32,
        length: u32,
        flags: u8,
        system_use: &[u8],
    ) -> Vec<u8> {
        let pad = usize::from(name.len() % 2 == 0);
        let total = FIXED_LEN + name.len() + pad + system_use.len();
        let mut out = vec![total as u8, 0];
        out.extend(both_endian32(location));
        out.extend(both_endian32(length));
        out.extend_from_slice(&[120, 1, 1, 0, 0, 0, 0]);
        out.push(flags);
        out.extend_from_slice(&[0, 0, 1, 0, 0, 1]);
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out.extend(std::iter::repeat(0).take(pad));
        out.extend_from_slice(system_use);
        out
    }

    fn nm(name: &[u8], flags: u8) -> Vec<u8> {
        let mut out = vec![b'N', b'M', (name.len() + 5) as u8, 1, flags];
        out.extend_from_slice(name);
        out
    }

    fn ce(location: u32, offset: u32, length: u32) -> Vec<u8> {
        let mut out = vec![b'C', b'E', 28, 1];
        out.extend(both_endian32(location));
        out.extend(both_endian32(offset));
        out.extend(both_endian32(length));
        out
    }

    fn rrip_mode() -> SuspMode {
        SuspMode::Active(SuspContext {
            skip: 0,
            extensions: vec![ExtensionId::new("RRIP_1991A", 1)],
        })
    }

    fn source_over(sectors: Vec<(u32, Vec<u8>)>) -> BlockSource {
        let count = sectors.iter().map(|(s, _)| *s).max().unwrap_or(0) as usize + 1;
        let mut image = vec![0u8; count * SECTOR_SIZE];
        for (sector, data) in sectors {
            let at = sector as usize * SECTOR_SIZE;
            image[at..at + data.len()].copy_from_slice(&data);
        }
        BlockSource::new(
            Box::new(MemoryTransport::new(image)),
            SourceConfig::default().with_min_fetch(1),
        )
    }

    #[test]
    fn test_decode_strips_version() {
        let raw = record_bytes(b"README.TXT;1", 30, 1234, 0, &[]);
        let len = raw.len();
        let mut window = Window::new(raw);
        let record = Record::decode(&mut window, &SuspMode::Inactive).unwrap().unwrap();
        assert_eq!(record.raw_name, b"README.TXT".to_vec());
        assert_eq!(record.location, 30);
        assert_eq!(record.length, 1234);
        assert!(!record.is_directory);
        assert_eq!(window.position(), len);
    }

    #[test]
    fn test_self_and_parent_names_are_empty() {
        let mut raw = record_bytes(&[0], 20, 2048, FLAG_DIRECTORY, &[]);
        raw.extend(record_bytes(&[1], 20, 2048, FLAG_DIRECTORY, &[]));
        let mut window = Window::new(raw);
        for _ in 0..2 {
            let record = Record::decode(&mut window, &SuspMode::Inactive).unwrap().unwrap();
            assert!(record.raw_name.is_empty());
            assert!(record.is_directory);
        }
    }

    #[test]
    fn test_zero_length_is_padding() {
        let mut window = Window::new(vec![0u8; 10]);
        assert!(Record::decode(&mut window, &SuspMode::Inactive).unwrap().is_none());
        assert_eq!(window.position(), 0);
    }

    #[test]
    fn test_inactive_mode_ignores_system_use() {
        let raw = record_bytes(b"A", 30, 0, 0, &nm(b"alpha", 0));
        let mut window = Window::new(raw);
        let record = Record::decode(&mut window, &SuspMode::Inactive).unwrap().unwrap();
        assert!(record.embedded_entries.is_empty());
        assert!(window.is_exhausted());
    }

    #[test]
    fn test_detect_requires_leading_sp() {
        let raw = record_bytes(&[0], 20, 2048, FLAG_DIRECTORY, &nm(b"x", 0));
        let mut window = Window::new(raw);
        let record = Record::decode(&mut window, &SuspMode::Detect).unwrap().unwrap();
        assert!(record.embedded_entries.is_empty());

        let mut system_use = vec![b'S', b'P', 7, 1, 0xBE, 0xEF, 0];
        system_use.push(0);
        let raw = record_bytes(&[0], 20, 2048, FLAG_DIRECTORY, &system_use);
        let mut window = Window::new(raw);
        let record = Record::decode(&mut window, &SuspMode::Detect).unwrap().unwrap();
        assert_eq!(record.embedded_entries.len(), 1);
    }

    #[test]
    fn test_effective_name_follows_continuation_area() {
        let mut area = vec![0u8; 100];
        let piece = nm(b"_name", 0);
        area[40..40 + piece.len()].copy_from_slice(&piece);

        let mut system_use = nm(b"long", 1);
        system_use.extend(ce(5, 40, piece.len() as u32));
        let raw = record_bytes(b"LONG", 30, 0, 0, &system_use);

        let mut source = source_over(vec![(4, raw), (5, area)]);
        let mode = rrip_mode();
        source.seek(4, 200, false).unwrap();
        let record = Record::decode(source.window_mut(), &mode).unwrap().unwrap();

        assert_eq!(record.effective_name(&mut source, &mode).unwrap(), b"long_name".to_vec());
    }

    #[test]
    fn test_continuation_loop_terminates() {
        let raw = record_bytes(b"LOOP", 30, 0, 0, &ce(5, 0, 28));
        let area = ce(5, 0, 28);
        let mut source = source_over(vec![(4, raw), (5, area)]);
        let mode = rrip_mode();
        source.seek(4, 200, false).unwrap();
        let record = Record::decode(source.window_mut(), &mode).unwrap().unwrap();

        let entries: Vec<_> = record
            .system_use(&mut source, &mode)
            .collect::<Result<_>>()
            .unwrap();
        // Embedded CE plus the CE found once in the area
        assert_eq!(entries.len(), 2);
        assert_eq!(record.effective_name(&mut source, &mode).unwrap(), b"LOOP".to_vec());
    }

    #[test]
    fn test_stop_ends_walk_before_continuation() {
        let mut system_use = ce(5, 0, 10);
        system_use.extend_from_slice(&[b'S', b'T', 4, 1]);
        let raw = record_bytes(b"STOP", 30, 0, 0, &system_use);
        let area = nm(b"never", 0);
        let mut source = source_over(vec![(4, raw), (5, area)]);
        let mode = rrip_mode();
        source.seek(4, 200, false).unwrap();
        let record = Record::decode(source.window_mut(), &mode).unwrap().unwrap();

        let entries: Vec<_> = record
            .system_use(&mut source, &mode)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, EntryKind::Stop);
    }

    #[test]
    fn test_content_is_memoized() {
        let mut source = source_over(vec![(7, b"hello world".to_vec())]);
        let mut window = Window::new(record_bytes(b"HELLO.TXT;1", 7, 11, 0, &[]));
        let record = Record::decode(&mut window, &SuspMode::Inactive).unwrap().unwrap();

        assert!(!record.is_content_loaded());
        assert_eq!(record.content(&mut source).unwrap(), b"hello world");
        assert!(record.is_content_loaded());
        assert_eq!(record.content(&mut source).unwrap(), b"hello world");
    }

    #[test]
    fn test_content_of_directory_fails() {
        let mut source = source_over(vec![(0, vec![])]);
        let mut window = Window::new(record_bytes(b"DIR", 20, 2048, FLAG_DIRECTORY, &[]));
        let record = Record::decode(&mut window, &SuspMode::Inactive).unwrap().unwrap();
        assert!(matches!(record.content(&mut source), Err(IsoError::NotAFile)));
    }
}
