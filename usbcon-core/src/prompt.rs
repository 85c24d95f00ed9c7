//! Prompt matching
//!
//! The console gives no end-of-message marker. A response is complete when
//! the text read so far contains the prompt the console prints when it is
//! ready for the next command.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::constants::DEFAULT_PROMPT;
use crate::error::{Error, Result};

/// Compiled prompt pattern
///
/// # Examples
///
/// ```
/// use usbcon_core::Prompt;
///
/// let prompt = Prompt::new(r"CP3>\s*$").unwrap();
/// assert!(prompt.is_match("VER -V\r\nCP3 v1.6\r\nCP3>"));
/// assert!(!prompt.is_match("VER -V\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Prompt {
    pattern: Regex,
}

impl Prompt {
    /// Compile a prompt from a regular expression
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Prompt matching `text` literally
    pub fn literal(text: &str) -> Result<Self> {
        Self::new(&regex::escape(text))
    }

    /// Source pattern
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    /// Check whether `text` contains the prompt
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// Check whether `text` contains a prompt match starting at or after
    /// byte offset `start`
    ///
    /// Anchors and word boundaries still see the text before `start`.
    pub fn is_match_at(&self, text: &str, start: usize) -> bool {
        self.pattern.is_match_at(text, start)
    }
}

impl Default for Prompt {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT).expect("default prompt is a valid pattern")
    }
}

impl FromStr for Prompt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
