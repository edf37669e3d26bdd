//! Builds small ISO 9660 images in memory for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

pub const SECTOR: usize = 2048;

pub const FLAG_DIRECTORY: u8 = 2;
pub const FLAG_HIDDEN: u8 = 1;

pub fn both16(value: u16) -> Vec<u8> {
    let mut out = value.to_le_bytes().to_vec();
    out.extend_from_slice(&value.to_be_bytes());
    out
}

pub fn both32(value: u32) -> Vec<u8> {
    let mut out = value.to_le_bytes().to_vec();
    out.extend_from_slice(&value.to_be_bytes());
    out
}

/// 2021-06-15 12:30:45 UTC
pub const RECORD_TIME: [u8; 7] = [121, 6, 15, 12, 30, 45, 0];

/// Directory record bytes, padded to an even length
pub fn record(name: &[u8], location: u32, length: u32, flags: u8, system_use: &[u8]) -> Vec<u8> {
    let pad = usize::from(name.len() % 2 == 0);
    let total = 33 + name.len() + pad + system_use.len();
    assert!(total <= 255, "record too long");

    let mut out = vec![total as u8, 0];
    out.extend(both32(location));
    out.extend(both32(length));
    out.extend_from_slice(&RECORD_TIME);
    out.push(flags);
    out.extend_from_slice(&[0, 0]);
    out.extend(both16(1));
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out.extend(std::iter::repeat(0).take(pad));
    out.extend_from_slice(system_use);
    out
}

pub fn file_record(name: &[u8], location: u32, length: u32, system_use: &[u8]) -> Vec<u8> {
    record(name, location, length, 0, system_use)
}

pub fn dir_record(name: &[u8], dir: Dir, system_use: &[u8]) -> Vec<u8> {
    record(name, dir.location, dir.length, FLAG_DIRECTORY, system_use)
}

fn susp_entry(signature: &[u8; 2], body: &[u8]) -> Vec<u8> {
    let mut out = vec![signature[0], signature[1], (body.len() + 4) as u8, 1];
    out.extend_from_slice(body);
    out
}

pub fn sp(skip: u8) -> Vec<u8> {
    susp_entry(b"SP", &[0xBE, 0xEF, skip])
}

pub fn er(id: &str, descriptor: &str, source: &str) -> Vec<u8> {
    let mut body = vec![id.len() as u8, descriptor.len() as u8, source.len() as u8, 1];
    body.extend_from_slice(id.as_bytes());
    body.extend_from_slice(descriptor.as_bytes());
    body.extend_from_slice(source.as_bytes());
    susp_entry(b"ER", &body)
}

pub fn ce(location: u32, offset: u32, length: u32) -> Vec<u8> {
    let mut body = both32(location);
    body.extend(both32(offset));
    body.extend(both32(length));
    susp_entry(b"CE", &body)
}

pub fn st() -> Vec<u8> {
    susp_entry(b"ST", &[])
}

pub fn rr(flags: u8) -> Vec<u8> {
    susp_entry(b"RR", &[flags])
}

pub fn nm(flags: u8, name: &str) -> Vec<u8> {
    let mut body = vec![flags];
    body.extend_from_slice(name.as_bytes());
    susp_entry(b"NM", &body)
}

pub fn px(mode: u32, uid: u32, gid: u32) -> Vec<u8> {
    let mut body = both32(mode);
    body.extend(both32(1));
    body.extend(both32(uid));
    body.extend(both32(gid));
    susp_entry(b"PX", &body)
}

/// SL entry from (component flags, content) pairs
pub fn sl(flags: u8, components: &[(u8, &str)]) -> Vec<u8> {
    let mut body = vec![flags];
    for (component_flags, content) in components {
        body.push(*component_flags);
        body.push(content.len() as u8);
        body.extend_from_slice(content.as_bytes());
    }
    susp_entry(b"SL", &body)
}

/// TF entry with short-form modify and access times
pub fn tf_modify_access(modify: [u8; 7], access: [u8; 7]) -> Vec<u8> {
    let mut body = vec![0x02 | 0x04];
    body.extend_from_slice(&modify);
    body.extend_from_slice(&access);
    susp_entry(b"TF", &body)
}

pub fn raw_entry(signature: &[u8; 2], body: &[u8]) -> Vec<u8> {
    susp_entry(signature, body)
}

/// Location and byte length of a directory extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dir {
    pub location: u32,
    pub length: u32,
}

#[derive(Default)]
pub struct IsoBuilder {
    sectors: BTreeMap<u32, Vec<u8>>,
    joliet: bool,
}

impl IsoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also write a Joliet supplementary descriptor
    pub fn with_joliet(mut self) -> Self {
        self.joliet = true;
        self
    }

    fn sector_mut(&mut self, sector: u32) -> &mut Vec<u8> {
        self.sectors.entry(sector).or_insert_with(|| vec![0u8; SECTOR])
    }

    /// Write bytes at a sector and offset, spilling into following sectors
    pub fn write(&mut self, sector: u32, offset: usize, bytes: &[u8]) {
        let mut sector = sector + (offset / SECTOR) as u32;
        let mut offset = offset % SECTOR;
        let mut rest = bytes;
        while !rest.is_empty() {
            let n = std::cmp::min(SECTOR - offset, rest.len());
            self.sector_mut(sector)[offset..offset + n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
            sector += 1;
            offset = 0;
        }
    }

    pub fn file(&mut self, sector: u32, content: &[u8]) -> Vec<u8> {
        self.write(sector, 0, content);
        content.to_vec()
    }

    /// Write a directory extent. Records never straddle a sector boundary.
    pub fn directory(
        &mut self,
        location: u32,
        parent: Option<u32>,
        self_system_use: &[u8],
        children: &[Vec<u8>],
    ) -> Dir {
        let self_len = record(&[0], 0, 0, FLAG_DIRECTORY, self_system_use).len();
        let mut sizes = vec![self_len, 34];
        sizes.extend(children.iter().map(Vec::len));
        let sector_count = pack(&sizes).1;
        let length = (sector_count * SECTOR) as u32;

        let mut records = vec![
            record(&[0], location, length, FLAG_DIRECTORY, self_system_use),
            record(
                &[1],
                parent.unwrap_or(location),
                SECTOR as u32,
                FLAG_DIRECTORY,
                &[],
            ),
        ];
        records.extend(children.iter().cloned());

        let (offsets, _) = pack(&sizes);
        for (offset, bytes) in offsets.into_iter().zip(records) {
            self.write(location, offset, &bytes);
        }

        Dir { location, length }
    }

    /// Write a type L path table from (name, location, parent) rows
    pub fn path_table(&mut self, sector: u32, rows: &[(&[u8], u32, u16)]) -> u32 {
        let mut out = Vec::new();
        for (name, location, parent) in rows {
            out.push(name.len() as u8);
            out.push(0);
            out.extend_from_slice(&location.to_le_bytes());
            out.extend_from_slice(&parent.to_le_bytes());
            out.extend_from_slice(name);
            if name.len() % 2 == 1 {
                out.push(0);
            }
        }
        self.write(sector, 0, &out);
        out.len() as u32
    }

    /// Write the primary descriptor at 16 (plus Joliet) and the terminator
    pub fn descriptors(&mut self, root: Dir, path_table: (u32, u32)) {
        let primary = volume_descriptor(1, root, path_table, &[]);
        self.write(16, 0, &primary);

        let mut next = 17;
        if self.joliet {
            let svd = volume_descriptor(2, root, path_table, &[0x25, 0x2F, 0x45]);
            self.write(next, 0, &svd);
            next += 1;
        }

        let mut terminator = vec![0u8; SECTOR];
        terminator[0] = 255;
        terminator[1..6].copy_from_slice(b"CD001");
        terminator[6] = 1;
        self.write(next, 0, &terminator);
    }

    pub fn build(self) -> Vec<u8> {
        let count = self.sectors.keys().max().map_or(0, |&s| s + 1) as usize;
        let mut image = vec![0u8; count * SECTOR];
        for (sector, data) in self.sectors {
            let at = sector as usize * SECTOR;
            image[at..at + SECTOR].copy_from_slice(&data);
        }
        image
    }
}

/// Offsets for records of the given sizes, plus the sectors used
fn pack(sizes: &[usize]) -> (Vec<usize>, usize) {
    let mut offsets = Vec::new();
    let mut pos = 0usize;
    for &size in sizes {
        if pos % SECTOR + size > SECTOR {
            pos = (pos / SECTOR + 1) * SECTOR;
        }
        offsets.push(pos);
        pos += size;
    }
    (offsets, std::cmp::max(1, (pos + SECTOR - 1) / SECTOR))
}

fn padded(text: &str, width: usize) -> Vec<u8> {
    let mut out = text.as_bytes().to_vec();
    out.resize(width, b' ');
    out
}

fn volume_descriptor(type_code: u8, root: Dir, path_table: (u32, u32), escape: &[u8]) -> Vec<u8> {
    let mut out = vec![type_code];
    out.extend_from_slice(b"CD001");
    out.push(1);
    out.push(0);
    out.extend(padded("LINUX", 32));
    out.extend(padded("TEST_VOLUME", 32));
    out.extend_from_slice(&[0; 8]);
    out.extend(both32(64));
    let mut escape_field = escape.to_vec();
    escape_field.resize(32, 0);
    out.extend(escape_field);
    out.extend(both16(1));
    out.extend(both16(1));
    out.extend(both16(SECTOR as u16));
    out.extend(both32(path_table.1));
    out.extend_from_slice(&path_table.0.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&path_table.0.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend(record(&[0], root.location, root.length, FLAG_DIRECTORY, &[]));
    out.extend(padded("", 128));
    out.extend(padded("ISOVIEW TESTS", 128));
    out.extend(padded("", 128));
    out.extend(padded("MKISOFS", 128));
    out.extend(padded("", 37 * 3));
    out.extend_from_slice(b"2024010203040500\0");
    out.extend_from_slice(b"2024010203040500\0");
    out.extend_from_slice(b"0000000000000000\0");
    out.extend_from_slice(b"0000000000000000\0");
    out.push(1);
    out.resize(SECTOR, 0);
    out
}
