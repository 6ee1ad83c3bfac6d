//! Word-window chunking.

use crate::error::{GraderError, Result};
use serde::{Deserialize, Serialize};

/// A slice of a source document used as a retrieval unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text, words joined by single spaces.
    pub text: String,
    /// Title of the document the chunk came from.
    pub source: String,
    /// Index of the chunk's first word in the source.
    pub start: usize,
}

/// Splits text into overlapping windows of whitespace-delimited words.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    window: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker; the window must advance by at least one word.
    pub fn new(window: usize, overlap: usize) -> Result<Self> {
        if window == 0 || overlap >= window {
            return Err(GraderError::Configuration(format!(
                "chunk window ({window}) must be greater than overlap ({overlap})"
            )));
        }
        Ok(Self { window, overlap })
    }

    /// Words the window advances by.
    pub fn stride(&self) -> usize {
        self.window - self.overlap
    }

    /// Chunk `text`, tagging every chunk with `source`.
    ///
    /// Yields `ceil(words / stride)` chunks; empty text yields none.
    pub fn chunk(&self, text: &str, source: &str) -> Vec<Chunk> {
        let words: Vec<&str> = text.split_whitespace().collect();

        (0..words.len())
            .step_by(self.stride())
            .map(|start| {
                let end = (start + self.window).min(words.len());
                Chunk {
                    text: words[start..end].join(" "),
                    source: source.to_string(),
                    start,
                }
            })
            .collect()
    }
}
