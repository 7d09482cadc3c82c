/// Line framing for the generation stream.
///
/// The wire is a sequence of `data: <json>` lines. Chunks from the transport
/// may split a line anywhere (inside the JSON payload, inside a multi-byte
/// UTF-8 sequence), so the decoder buffers the trailing partial line until
/// the next chunk or the end of the stream.
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;
use smallvec::SmallVec;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;

/// Prefix that marks a candidate frame line.
pub const DATA_PREFIX: &str = "data: ";

struct PendingFrames {
    frames: SmallVec<[String; 8]>,
    head: usize,
}

impl PendingFrames {
    #[inline]
    fn new() -> Self {
        Self {
            frames: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<String> {
        if self.head >= self.frames.len() {
            return None;
        }
        let frame = std::mem::take(&mut self.frames[self.head]);
        self.head += 1;
        if self.head == self.frames.len() {
            self.frames.clear();
            self.head = 0;
        }
        Some(frame)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<String>) {
        if parsed.is_empty() {
            return;
        }
        self.frames.extend(parsed.drain(..));
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.head >= self.frames.len()
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.head = 0;
    }
}

/// Incremental `data: ` line decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    read_offset: usize,
    utf8_tail: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed text and return the payloads of all lines it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed text and append completed payloads into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<String>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            Self::process_line(&self.buffer[processed_up_to..line_end], out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Feed raw bytes. Incomplete UTF-8 sequences at the end of a chunk are
    /// held back until the next one; invalid bytes become U+FFFD.
    pub fn feed_bytes(&mut self, bytes: &[u8], out: &mut Vec<String>) {
        if self.utf8_tail.is_empty() {
            self.feed_utf8(bytes, out);
        } else {
            let mut joined = std::mem::take(&mut self.utf8_tail);
            joined.extend_from_slice(bytes);
            self.feed_utf8(&joined, out);
        }
    }

    fn feed_utf8(&mut self, bytes: &[u8], out: &mut Vec<String>) {
        let mut rest = bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.feed_into(text, out);
                    return;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    self.feed_into(std::str::from_utf8(valid).unwrap_or_default(), out);
                    match err.error_len() {
                        None => {
                            self.utf8_tail.extend_from_slice(after);
                            return;
                        }
                        Some(len) => {
                            self.feed_into("\u{FFFD}", out);
                            rest = &after[len..];
                        }
                    }
                }
            }
        }
    }

    /// Flush at end of stream: a final unterminated candidate line is decoded
    /// as if it were newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if !self.utf8_tail.is_empty() {
            let tail = std::mem::take(&mut self.utf8_tail);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let mut out = Vec::with_capacity(1);
        Self::process_line(&self.buffer[self.read_offset..], &mut out);
        self.buffer.clear();
        self.read_offset = 0;
        out.pop()
    }

    fn process_line(line: &str, out: &mut Vec<String>) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
            out.push(payload.to_string());
        }
        // Blank separators, comments and any other field lines are discarded.
    }
}

struct FrameReader<S> {
    body: Option<Pin<Box<S>>>,
    decoder: FrameDecoder,
    parsed: Vec<String>,
    pending: PendingFrames,
    cancel: CancellationToken,
    done: bool,
}

impl<S> FrameReader<S> {
    fn release(&mut self) {
        self.body = None;
        self.pending.clear();
        self.done = true;
    }
}

enum ReadStep<T> {
    Cancelled,
    Chunk(Option<T>),
}

/// Turn a transport byte stream into an ordered stream of frame payloads.
///
/// The token is checked before every frame is handed out and raced against
/// every chunk read. After a cancel the body is dropped (releasing the
/// connection) and a single [`ChatError::Cancelled`] ends the stream. A
/// transport error is yielded once and also ends it.
pub fn frame_stream<S>(
    byte_stream: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<String, ChatError>> + Send
where
    S: Stream<Item = Result<Bytes, ChatError>> + Send + 'static,
{
    let reader = FrameReader {
        body: Some(Box::pin(byte_stream)),
        decoder: FrameDecoder::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingFrames::new(),
        cancel,
        done: false,
    };

    futures_util::stream::unfold(reader, |mut reader| async move {
        loop {
            if reader.done {
                return None;
            }
            if reader.cancel.is_cancelled() {
                reader.release();
                return Some((Err(ChatError::Cancelled), reader));
            }
            if let Some(frame) = reader.pending.pop_front() {
                return Some((Ok(frame), reader));
            }

            let step = {
                let cancel = reader.cancel.clone();
                let Some(body) = reader.body.as_mut() else {
                    return None;
                };
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => ReadStep::Cancelled,
                    chunk = body.next() => ReadStep::Chunk(chunk),
                }
            };

            match step {
                ReadStep::Cancelled => {
                    reader.release();
                    return Some((Err(ChatError::Cancelled), reader));
                }
                ReadStep::Chunk(Some(Ok(bytes))) => {
                    reader.decoder.feed_bytes(&bytes, &mut reader.parsed);
                    reader.pending.extend_from_vec(&mut reader.parsed);
                }
                ReadStep::Chunk(Some(Err(err))) => {
                    reader.release();
                    return Some((Err(err), reader));
                }
                ReadStep::Chunk(None) => {
                    reader.body = None;
                    if let Some(frame) = reader.decoder.finish() {
                        reader.parsed.push(frame);
                        reader.pending.extend_from_vec(&mut reader.parsed);
                    }
                    if reader.pending.is_empty() {
                        return None;
                    }
                }
            }
        }
    })
}
