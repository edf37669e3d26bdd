/// Block transports: where sectors come from
use memmap2::MmapOptions;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::SECTOR_SIZE;

/// Sector-addressed access to an image.
///
/// `fetch` must return exactly `count * SECTOR_SIZE` bytes; sectors past the
/// end of the image read as zeros. Streams returned by `open_stream` own their
/// handle on the image and stay usable after the transport is dropped.
pub trait BlockTransport {
    /// Read `count` consecutive sectors starting at `sector`
    fn fetch(&mut self, sector: u32, count: u32) -> io::Result<Vec<u8>>;

    /// Open a sequential reader over `length` bytes starting at `sector`
    fn open_stream(&self, sector: u32, length: u64) -> io::Result<Box<dyn Read + Send>>;

    /// Release the underlying handle
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type SharedImage = Arc<dyn AsRef<[u8]> + Send + Sync>;

fn image_bytes(image: &SharedImage) -> &[u8] {
    (**image).as_ref()
}

fn copy_sectors(image: &[u8], sector: u32, count: u32) -> Vec<u8> {
    let start = sector as usize * SECTOR_SIZE;
    let length = count as usize * SECTOR_SIZE;
    let mut out = vec![0u8; length];

    if start < image.len() {
        let end = std::cmp::min(start + length, image.len());
        out[..end - start].copy_from_slice(&image[start..end]);
    }

    out
}

fn stream_over(image: &SharedImage, sector: u32, length: u64) -> ImageStream {
    let total = image_bytes(image).len();
    let start = std::cmp::min(sector as usize * SECTOR_SIZE, total);
    let end = std::cmp::min(start.saturating_add(length as usize), total);
    ImageStream {
        image: Arc::clone(image),
        pos: start,
        end,
    }
}

/// Sequential reader over a byte range of a shared image
pub struct ImageStream {
    image: SharedImage,
    pos: usize,
    end: usize,
}

impl ImageStream {
    /// Bytes not yet read
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }
}

impl Read for ImageStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = std::cmp::min(buf.len(), self.remaining());
        let data = image_bytes(&self.image);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// A memory-mapped local image file
pub struct FileTransport {
    path: PathBuf,
    image: SharedImage,
    size: u64,
}

impl FileTransport {
    /// Open an image file
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();

        // Mapping a zero-length file fails on some platforms
        let image: SharedImage = if size == 0 {
            Arc::new(Vec::<u8>::new())
        } else {
            Arc::new(unsafe { MmapOptions::new().map(&file)? })
        };

        tracing::debug!("Mapped {} ({} bytes)", path.as_ref().display(), size);

        Ok(FileTransport {
            path: path.as_ref().to_path_buf(),
            image,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the image in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl BlockTransport for FileTransport {
    fn fetch(&mut self, sector: u32, count: u32) -> io::Result<Vec<u8>> {
        Ok(copy_sectors(image_bytes(&self.image), sector, count))
    }

    fn open_stream(&self, sector: u32, length: u64) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(stream_over(&self.image, sector, length)))
    }
}

/// An image held in memory
#[derive(Clone)]
pub struct MemoryTransport {
    image: SharedImage,
    fetches: u64,
}

impl MemoryTransport {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            image: Arc::new(data),
            fetches: 0,
        }
    }

    /// Number of `fetch` calls served so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches
    }
}

impl BlockTransport for MemoryTransport {
    fn fetch(&mut self, sector: u32, count: u32) -> io::Result<Vec<u8>> {
        self.fetches += 1;
        Ok(copy_sectors(image_bytes(&self.image), sector, count))
    }

    fn open_stream(&self, sector: u32, length: u64) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(stream_over(&self.image, sector, length)))
    }
}
