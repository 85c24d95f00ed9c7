//! Response accumulation
//!
//! Bytes arrive in arbitrarily sized chunks. The buffer decodes each chunk,
//! appends it to the text read so far and reports whether the prompt has
//! shown up yet.

use std::fmt;

use tracing::trace;

use crate::codec;
use crate::prompt::Prompt;

/// Bytes of earlier text searched again when a chunk arrives
///
/// A prompt match must end in the new fragment (otherwise it would have been
/// found before), so only its start can reach back into older text.
pub const PROMPT_LOOKBACK: usize = 256;

/// Text accumulated for one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseBuffer {
    text: String,
    chunks: usize,
    scan_from: usize,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the device
    ///
    /// Returns the decoded fragment.
    pub fn push(&mut self, chunk: &[u8]) -> &str {
        let start = self.text.len();
        self.text.push_str(&codec::decode(chunk));
        self.chunks += 1;

        let mut scan_from = start.saturating_sub(PROMPT_LOOKBACK);
        while !self.text.is_char_boundary(scan_from) {
            scan_from -= 1;
        }
        self.scan_from = scan_from;

        trace!(
            "Chunk #{} ({} bytes): {}",
            self.chunks,
            chunk.len(),
            hex::encode(chunk)
        );

        &self.text[start..]
    }

    /// Check whether the prompt appeared with the latest chunk
    ///
    /// Only the latest fragment and [`PROMPT_LOOKBACK`] bytes before it are
    /// searched, which keeps long outputs linear. A prompt pattern spanning
    /// more than that is not detected.
    pub fn is_complete(&self, prompt: &Prompt) -> bool {
        prompt.is_match_at(&self.text, self.scan_from)
    }

    /// Accumulated text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of chunks appended
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for ResponseBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
