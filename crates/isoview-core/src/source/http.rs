//! Images served over HTTP, read with byte-range requests

use std::io::{self, Read};
use std::time::Duration;

use super::transport::BlockTransport;
use super::SECTOR_SIZE;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote image reached through `Range: bytes=` GET requests.
///
/// Servers that ignore the range header and answer 200 with the whole image
/// still work: the reader skips up to the requested offset.
pub struct HttpTransport {
    url: String,
    agent: ureq::Agent,
    requests: u64,
}

impl HttpTransport {
    pub fn new(url: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            url: url.to_string(),
            agent,
            requests: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of `fetch` requests sent so far
    pub fn request_count(&self) -> u64 {
        self.requests
    }

    /// Reader over `length` bytes at `start`, or `None` when the range lies
    /// past the end of the image
    fn ranged(&self, start: u64, length: u64) -> io::Result<Option<Box<dyn Read + Send>>> {
        if length == 0 {
            return Ok(None);
        }

        let range = format!("bytes={}-{}", start, start + length - 1);
        tracing::debug!("GET {} ({})", self.url, range);

        match self.agent.get(&self.url).set("Range", &range).call() {
            Ok(response) => {
                let partial = response.status() == 206;
                let mut body = response.into_reader();
                if !partial {
                    io::copy(&mut (&mut body).take(start), &mut io::sink())?;
                }
                let reader: Box<dyn Read + Send> = Box::new(body.take(length));
                Ok(Some(reader))
            }
            Err(ureq::Error::Status(416, _)) => Ok(None),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
        }
    }
}

impl BlockTransport for HttpTransport {
    fn fetch(&mut self, sector: u32, count: u32) -> io::Result<Vec<u8>> {
        self.requests += 1;
        let length = count as usize * SECTOR_SIZE;
        let start = u64::from(sector) * SECTOR_SIZE as u64;

        let mut out = Vec::with_capacity(length);
        if let Some(mut body) = self.ranged(start, length as u64)? {
            body.read_to_end(&mut out)?;
        }
        out.resize(length, 0);
        Ok(out)
    }

    fn open_stream(&self, sector: u32, length: u64) -> io::Result<Box<dyn Read + Send>> {
        let start = u64::from(sector) * SECTOR_SIZE as u64;
        match self.ranged(start, length)? {
            Some(reader) => Ok(reader),
            None => Ok(Box::new(io::empty())),
        }
    }
}
