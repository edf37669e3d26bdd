//! Little-endian (type L) path table

use serde::Serialize;

use crate::error::{IsoError, Result};
use crate::source::BlockSource;

/// One directory in the path table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathTableEntry {
    /// Directory identifier; empty for the root
    pub name: Vec<u8>,
    /// First sector of the directory extent
    pub location: u32,
    /// 1-based index of the parent entry
    pub parent: u16,
}

/// Result of a path table lookup that stopped early
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    /// Number of leading segments that did resolve
    pub resolved: usize,
    /// Extent of the deepest directory reached
    pub location: u32,
    /// The segment that had no match
    pub segment: String,
}

impl From<Unresolved> for IsoError {
    fn from(unresolved: Unresolved) -> Self {
        IsoError::NotFound(unresolved.segment)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTable {
    entries: Vec<PathTableEntry>,
}

impl PathTable {
    pub fn read(source: &mut BlockSource, location: u32, size: u32) -> Result<Self> {
        source.seek(location, size as usize, false)?;
        let mut entries = Vec::new();

        while source.remaining() > 0 {
            let name_length = source.decode_u8()? as usize;
            let _extended_attribute_length = source.decode_u8()?;
            let location = source.decode_u32_le()?;
            let parent = source.decode_u16_le()?;
            let mut name = source.decode_raw(name_length)?;
            if name_length % 2 == 1 {
                source.skip(1)?;
            }
            if name == [0] {
                name.clear();
            }

            entries.push(PathTableEntry {
                name,
                location,
                parent,
            });
        }

        tracing::debug!("Path table holds {} directories", entries.len());
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PathTableEntry] {
        &self.entries
    }

    /// Entry by its 1-based path table index
    pub fn get(&self, index: usize) -> Option<&PathTableEntry> {
        index.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Directory extent for `path`, matching segments case-insensitively
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> std::result::Result<u32, Unresolved> {
        let mut current = 1usize;
        let mut location = match self.get(current) {
            Some(root) => root.location,
            None => {
                return Err(Unresolved {
                    resolved: 0,
                    location: 0,
                    segment: path
                        .first()
                        .map(|s| s.as_ref().to_string())
                        .unwrap_or_default(),
                })
            }
        };

        for (resolved, segment) in path.iter().enumerate() {
            let wanted = segment.as_ref().as_bytes();
            let found = self.entries.iter().enumerate().find(|(i, entry)| {
                i + 1 != current
                    && usize::from(entry.parent) == current
                    && entry.name.eq_ignore_ascii_case(wanted)
            });

            match found {
                Some((i, entry)) => {
                    current = i + 1;
                    location = entry.location;
                }
                None => {
                    return Err(Unresolved {
                        resolved,
                        location,
                        segment: segment.as_ref().to_string(),
                    })
                }
            }
        }

        Ok(location)
    }
}
