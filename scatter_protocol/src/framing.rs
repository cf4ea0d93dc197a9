// Delimiter framing over a byte stream.
//
// Wire format: one compact JSON document per message, terminated by a single
// `\n`. Compact `serde_json` output escapes every newline inside strings, so
// the delimiter can never appear inside a well-formed frame.
//
// `Framer` is the sans-IO core: `feed` appends whatever the socket delivered
// (partial frames, several frames, or both) and returns every complete
// message in arrival order, keeping the trailing fragment for the next call.
// A frame that fails to decode is dropped with a warning and framing resumes
// at the next delimiter. `FramedReader` drives a `Framer` from any `Read`.
//
// `MAX_FRAME_SIZE` bounds the buffered fragment. A peer that streams bytes
// without ever sending a delimiter gets its fragment discarded up to the next
// delimiter instead of growing the buffer without bound.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::error::{ProtocolError, Result};

/// Frame terminator.
pub const DELIMITER: u8 = b'\n';

/// Largest accepted frame, delimiter excluded. Round payloads with a dozen
/// categories and answers are a few KB.
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Serialize a message and append the delimiter.
pub fn encode<M: Serialize>(msg: &M) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(msg)?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { len: bytes.len() });
    }
    bytes.push(DELIMITER);
    Ok(bytes)
}

/// Encode a message and write it as one frame.
pub fn write_frame<W: Write, M: Serialize>(writer: &mut W, msg: &M) -> Result<()> {
    let bytes = encode(msg)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Incremental frame splitter.
#[derive(Debug, Default)]
pub struct Framer {
    buffer: Vec<u8>,
    /// Set after an oversized fragment; bytes are skipped until the next
    /// delimiter.
    discarding: bool,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every complete, decodable message.
    pub fn feed<M: DeserializeOwned>(&mut self, bytes: &[u8]) -> Vec<M> {
        let mut messages = Vec::new();
        for segment in bytes.split_inclusive(|b| *b == DELIMITER) {
            let complete = segment.last() == Some(&DELIMITER);
            let body = if complete {
                &segment[..segment.len() - 1]
            } else {
                segment
            };

            if self.discarding {
                if complete {
                    self.discarding = false;
                }
                continue;
            }

            self.buffer.extend_from_slice(body);
            if self.buffer.len() > MAX_FRAME_SIZE {
                warn!(
                    len = self.buffer.len(),
                    max = MAX_FRAME_SIZE,
                    "discarding oversized frame"
                );
                self.buffer.clear();
                self.discarding = !complete;
                continue;
            }

            if complete {
                let frame = std::mem::take(&mut self.buffer);
                if frame.is_empty() {
                    continue;
                }
                match serde_json::from_slice::<M>(&frame) {
                    Ok(msg) => messages.push(msg),
                    Err(e) => error!(error = %e, len = frame.len(), "dropping malformed frame"),
                }
            }
        }
        messages
    }

    /// Bytes of the incomplete trailing fragment currently held.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Blocking reader that yields whole messages from a byte stream.
pub struct FramedReader<R> {
    inner: R,
    framer: Framer,
    chunk: Vec<u8>,
}

impl<R: Read> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            framer: Framer::new(),
            chunk: vec![0u8; 4096],
        }
    }

    /// Block until at least one complete message is available and return
    /// all messages decoded so far.
    ///
    /// Returns `UnexpectedEof` when the stream closes. Read timeouts set on
    /// the underlying socket surface as `WouldBlock` or `TimedOut`; a partial
    /// fragment read before the timeout is kept for the next call.
    pub fn read_batch<M: DeserializeOwned>(&mut self) -> io::Result<Vec<M>> {
        loop {
            let n = self.inner.read(&mut self.chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed",
                ));
            }
            let messages = self.framer.feed(&self.chunk[..n]);
            if !messages.is_empty() {
                return Ok(messages);
            }
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}
