//! Trait abstraction for line-oriented transports to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

use crate::error::Result;

/// Source of newline-delimited text
#[async_trait]
pub trait LineReader: Send {
    /// Read the next line, trimmed
    ///
    /// Returns `Ok(None)` once the stream has ended. Cancel-safe: bytes of a
    /// partially received line are kept for the next call.
    async fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Finds and opens a transport
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportConnector: Send {
    async fn connect(&mut self) -> Result<Box<dyn LineReader>>;
}

/// Longest partial line kept in memory, in bytes
pub const MAX_LINE_BYTES: usize = 1024;

/// [`LineReader`] over any async byte stream (serial port, file, socket)
///
/// A line longer than [`MAX_LINE_BYTES`] is cut to that length and the rest
/// of it is dropped up to the next newline.
pub struct BufferedLineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    overflowed: bool,
}

impl<R: AsyncRead + Unpin + Send> BufferedLineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
            overflowed: false,
        }
    }

    fn take_line(&mut self) -> String {
        if self.overflowed {
            debug!("Dropped the tail of a line longer than {} bytes", MAX_LINE_BYTES);
            self.overflowed = false;
        }

        // Radio noise can produce invalid UTF-8; keep what we can
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        line
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> LineReader for BufferedLineReader<R> {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            // State only changes after `fill_buf` resolves
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.pending.is_empty() && !self.overflowed {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let (bytes, used) = match newline {
                Some(end) => (&available[..end], end + 1),
                None => (available, available.len()),
            };

            let room = MAX_LINE_BYTES - self.pending.len();
            if bytes.len() > room {
                self.overflowed = true;
            }
            self.pending.extend_from_slice(&bytes[..bytes.len().min(room)]);
            self.reader.consume(used);

            if newline.is_some() {
                return Ok(Some(self.take_line()));
            }
        }
    }
}
