//! Newline-delimited JSON framer
//!
//! Turns arbitrarily split network chunks into complete feed records.

use serde_json::Value;
use tracing::trace;

use super::types::{ChangeRecord, Cursor, FeedRecord};
use crate::error::FeedError;

/// Default upper bound for a single pending line (64 MiB)
pub(crate) const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Longest line excerpt carried by a parse error
const PREVIEW_CHARS: usize = 100;

/// Incremental line framer state
#[derive(Debug)]
pub(crate) struct LineFramer {
    /// Bytes after the last newline seen so far
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a newline
    scanned: usize,
    /// Dropping the tail of an overlong line until its newline shows up
    discarding: bool,
    /// Pending fragment size that is treated as a broken stream
    max_line_bytes: usize,
}

impl LineFramer {
    pub fn with_limit(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            discarding: false,
            max_line_bytes,
        }
    }

    /// Drop any partial line; called once per fresh connection
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
    }

    /// Number of bytes waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and iterate over the records it completes
    ///
    /// Records are produced lazily. Lines the iterator did not reach before
    /// being dropped stay buffered and come out of the next call.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        let mut chunk: &[u8] = chunk;
        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    trace!(skipped = pos, "End of overlong line");
                    self.discarding = false;
                    chunk = &chunk[pos + 1..];
                }
                None => chunk = &[],
            }
        }

        self.buffer.extend_from_slice(chunk);
        Frames {
            framer: self,
            consumed: 0,
        }
    }
}

/// Iterator over the records completed by one chunk
pub(crate) struct Frames<'a> {
    framer: &'a mut LineFramer,
    consumed: usize,
}

impl Iterator for Frames<'_> {
    type Item = Result<FeedRecord, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.consumed;
            let from = start.max(self.framer.scanned);
            let buffer = &self.framer.buffer;

            let Some(pos) = buffer[from..].iter().position(|&b| b == b'\n') else {
                // Only the trailing fragment is left; it waits for more bytes
                let len = buffer.len() - start;
                self.framer.scanned = buffer.len();
                if len > self.framer.max_line_bytes {
                    self.consumed = self.framer.buffer.len();
                    self.framer.discarding = true;
                    return Some(Err(FeedError::LineTooLong {
                        len,
                        limit: self.framer.max_line_bytes,
                    }));
                }
                return None;
            };

            let end = from + pos;
            self.consumed = end + 1;

            let line = match std::str::from_utf8(&buffer[start..end]) {
                Ok(line) => line.trim(),
                Err(e) => {
                    return Some(Err(FeedError::Parse {
                        message: format!("invalid UTF-8: {}", e),
                        line: String::from_utf8_lossy(&buffer[start..end])
                            .chars()
                            .take(PREVIEW_CHARS)
                            .collect(),
                    }));
                }
            };

            if line.is_empty() {
                trace!("keep-alive newline");
                continue;
            }

            return Some(classify(line));
        }
    }
}

impl Drop for Frames<'_> {
    fn drop(&mut self) {
        self.framer.buffer.drain(..self.consumed);
        self.framer.scanned = self.framer.scanned.saturating_sub(self.consumed);
    }
}

/// Decode one trimmed, non-empty line
pub(crate) fn classify(line: &str) -> Result<FeedRecord, FeedError> {
    let parse_error = |message: String| FeedError::Parse {
        message,
        line: line.chars().take(PREVIEW_CHARS).collect(),
    };

    let value: Value = serde_json::from_str(line)
        .map_err(|e| parse_error(format!("Failed to parse record JSON: {}", e)))?;

    let Value::Object(map) = value else {
        return Err(parse_error("record is not a JSON object".to_string()));
    };

    if let Some(error) = map.get("error").filter(|v| !v.is_null()) {
        return Ok(FeedRecord::Failure {
            error: text_of(error),
            reason: map.get("reason").map(text_of).unwrap_or_default(),
        });
    }

    if !map.contains_key("seq") {
        if let Some(Ok(last_seq)) = map.get("last_seq").cloned().map(Cursor::try_from) {
            return Ok(FeedRecord::Checkpoint {
                last_seq,
                pending: map.get("pending").and_then(Value::as_u64),
            });
        }
    }

    Ok(FeedRecord::Change(ChangeRecord::from_object(map)))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
