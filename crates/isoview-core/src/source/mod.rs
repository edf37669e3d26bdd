//! Block source: sector cache plus cursor-based primitive decoding
//!
//! The source owns the transport and a sparse sector cache. `seek` positions
//! a decode window over a run of sectors; the `decode_*` methods consume bytes
//! from that window. Directory traversal, SUSP continuation areas and file
//! content all share this one window, so callers that need to branch while a
//! traversal is pending take a snapshot with `save_cursor` and put it back
//! with `restore_cursor`.

use std::collections::HashMap;
use std::io::Read;

use crate::config::SourceConfig;
use crate::error::Result;

pub mod http;
pub mod transport;
pub mod window;

pub use http::HttpTransport;
pub use transport::{BlockTransport, FileTransport, ImageStream, MemoryTransport};
pub use window::{Timestamp, Window};

/// ISO 9660 logical sector size
pub const SECTOR_SIZE: usize = 2048;

/// Number of sectors needed to hold `length` bytes
pub fn sectors_for(length: usize) -> u32 {
    ((length + SECTOR_SIZE - 1) / SECTOR_SIZE) as u32
}

/// Saved window and cursor position
#[derive(Debug, Clone)]
pub struct CursorSnapshot(Window);

pub struct BlockSource {
    transport: Box<dyn BlockTransport>,
    sectors: HashMap<u32, Vec<u8>>,
    window: Window,
    config: SourceConfig,
}

impl BlockSource {
    pub fn new(transport: Box<dyn BlockTransport>, config: SourceConfig) -> Self {
        Self {
            transport,
            sectors: HashMap::new(),
            window: Window::default(),
            config,
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Number of sectors held in the cache
    pub fn cached_sector_count(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_cached(&self, sector: u32) -> bool {
        self.sectors.contains_key(&sector)
    }

    /// Position the decode window over `length` bytes starting at `start`.
    ///
    /// Metadata reads are rounded up to the configured batch size so that
    /// neighbouring structures land in the cache with the same transport call.
    /// Content reads only touch the cache when content caching is enabled.
    pub fn seek(&mut self, start: u32, length: usize, is_content: bool) -> Result<()> {
        let caching = !is_content || self.config.cache_content;
        let needed = sectors_for(length);
        let span = if caching {
            std::cmp::max(self.config.effective_min_fetch(), needed)
        } else {
            needed
        };

        let needed_end = start.saturating_add(needed);
        let span_end = start.saturating_add(span);
        let mut buffer = Vec::with_capacity(needed as usize * SECTOR_SIZE);
        let mut missing_from: Option<u32> = None;

        for sector in start..span_end {
            if !self.sectors.contains_key(&sector) {
                missing_from.get_or_insert(sector);
                continue;
            }

            // A cache hit ends the current run of misses
            if let Some(first) = missing_from.take() {
                self.fetch_run(first, sector - first, caching, &mut buffer)?;
            }

            // Past the sectors actually needed: stop prefetching
            if sector >= needed_end {
                break;
            }

            if let Some(block) = self.sectors.get(&sector) {
                buffer.extend_from_slice(block);
            }
        }

        if let Some(first) = missing_from {
            self.fetch_run(first, span_end - first, caching, &mut buffer)?;
        }

        buffer.truncate(length);
        self.window = Window::new(buffer);
        Ok(())
    }

    fn fetch_run(
        &mut self,
        first: u32,
        count: u32,
        caching: bool,
        buffer: &mut Vec<u8>,
    ) -> Result<()> {
        tracing::debug!("Fetching sectors {}..{}", first, first + count);

        let data = self.transport.fetch(first, count)?;
        if caching {
            for (i, block) in data.chunks(SECTOR_SIZE).enumerate() {
                self.sectors.insert(first + i as u32, block.to_vec());
            }
        }
        buffer.extend_from_slice(&data);
        Ok(())
    }

    /// Snapshot the current window and cursor
    pub fn save_cursor(&self) -> CursorSnapshot {
        CursorSnapshot(self.window.clone())
    }

    pub fn restore_cursor(&mut self, snapshot: CursorSnapshot) {
        self.window = snapshot.0;
    }

    /// Open an independent sequential reader over a byte range
    pub fn open_stream(&self, sector: u32, length: u64) -> Result<Box<dyn Read + Send>> {
        Ok(self.transport.open_stream(sector, length)?)
    }

    pub fn close(&mut self) -> Result<()> {
        self.sectors.clear();
        self.window = Window::default();
        Ok(self.transport.close()?)
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut Window {
        &mut self.window
    }

    /// Bytes left in the decode window
    pub fn remaining(&self) -> usize {
        self.window.remaining()
    }

    pub fn position(&self) -> usize {
        self.window.position()
    }

    pub fn decode_raw(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.window.decode_raw(n)?.to_vec())
    }

    pub fn decode_remaining(&mut self) -> Vec<u8> {
        self.window.decode_remaining()
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.window.skip(n)
    }

    pub fn rewind(&mut self, n: usize) -> Result<()> {
        self.window.rewind(n)
    }

    /// Skip the padding left at the end of a sector
    pub fn skip_to_sector_boundary(&mut self) {
        self.window.skip_to_boundary(SECTOR_SIZE)
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.window.peek_u8()
    }

    pub fn decode_u8(&mut self) -> Result<u8> {
        self.window.decode_u8()
    }

    pub fn decode_u16_le(&mut self) -> Result<u16> {
        self.window.decode_u16_le()
    }

    pub fn decode_u32_le(&mut self) -> Result<u32> {
        self.window.decode_u32_le()
    }

    pub fn decode_u32_be(&mut self) -> Result<u32> {
        self.window.decode_u32_be()
    }

    pub fn decode_both_endian_u16(&mut self) -> Result<u16> {
        self.window.decode_both_endian_u16()
    }

    pub fn decode_both_endian_u32(&mut self) -> Result<u32> {
        self.window.decode_both_endian_u32()
    }

    pub fn decode_string(&mut self, n: usize) -> Result<Vec<u8>> {
        self.window.decode_string(n)
    }

    pub fn decode_directory_datetime(&mut self) -> Result<Option<Timestamp>> {
        self.window.decode_directory_datetime()
    }

    pub fn decode_descriptor_datetime(&mut self) -> Result<Option<Timestamp>> {
        self.window.decode_descriptor_datetime()
    }
}
