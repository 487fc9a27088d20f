//! Framing codec for the cmake server wire format.
//!
//! Frames are UTF-8 text: a literal start-marker line, one JSON payload
//! (which may itself contain newlines), and a literal end-marker line. The
//! pull decoder accumulates raw bytes and yields complete payloads, so
//! frames split across reads and multiple frames per read both work.
//! [`FrameReader`] and [`FrameWriter`] wrap it for async transports.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Start-of-frame sentinel line, fixed by protocol convention.
pub const START_MARKER: &str = "[== \"CMake Server\" ==[";

/// End-of-frame sentinel line.
pub const END_MARKER: &str = "]== \"CMake Server\" ==]";

/// Maximum frame size (16 MiB) to prevent unbounded buffering; code model
/// replies for large projects run to megabytes.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK_BYTES: usize = 4096;

/// Errors from the framing layer. All of these are fatal to the
/// connection: once the markers matched, a bad payload cannot be skipped
/// without losing frame synchronization.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("frame payload is not valid UTF-8")]
    NonUtf8,
    #[error("frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")]
    Oversized,
}

/// Encode one payload as a complete frame.
pub fn encode_frame(payload: &Value) -> String {
    format!("{START_MARKER}\n{payload}\n{END_MARKER}\n")
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

/// Accumulating frame decoder.
///
/// Feed raw bytes with [`extend`](Self::extend); pull complete payloads
/// with [`next_frame`](Self::next_frame). A start marker without its end
/// marker consumes nothing — the decoder waits for more data.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Whether the buffer holds nothing but inter-frame whitespace.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.buf.iter().all(|b| b.is_ascii_whitespace())
    }

    /// Scan for one complete frame.
    ///
    /// Returns `Ok(None)` until a full `start … end` pair is buffered. On a
    /// complete frame the consumed prefix is removed and the payload parsed;
    /// a payload that fails JSON parsing is an error, not a retry.
    pub fn next_frame(&mut self) -> Result<Option<Value>, CodecError> {
        let Some(start) = find(&self.buf, START_MARKER.as_bytes(), 0) else {
            return Ok(None);
        };
        let payload_start = start + START_MARKER.len();

        let Some(end) = find(&self.buf, END_MARKER.as_bytes(), payload_start) else {
            if self.buf.len() - start > MAX_FRAME_BYTES {
                return Err(CodecError::Oversized);
            }
            return Ok(None);
        };

        let payload = std::str::from_utf8(&self.buf[payload_start..end])
            .map_err(|_| CodecError::NonUtf8)?
            .trim();
        let value = serde_json::from_str(payload)?;

        self.buf.drain(..end + END_MARKER.len());
        Ok(Some(value))
    }
}

/// Reads frames from an async byte stream.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary (clean shutdown).
    /// Returns `Err` on EOF mid-frame or any [`CodecError`].
    pub async fn read_frame(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(value) = self.decoder.next_frame()? {
                return Ok(Some(value));
            }
            let mut chunk = [0u8; READ_CHUNK_BYTES];
            let n = self
                .reader
                .read(&mut chunk)
                .await
                .context("reading from server pipe")?;
            if n == 0 {
                if self.decoder.is_drained() {
                    return Ok(None);
                }
                bail!("connection closed mid-frame");
            }
            self.decoder.extend(&chunk[..n]);
        }
    }
}

/// Writes frames to an async byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, payload: &Value) -> Result<()> {
        let frame = encode_frame(payload);
        self.writer
            .write_all(frame.as_bytes())
            .await
            .context("writing frame")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }
}
