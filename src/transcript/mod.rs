//! Transcript record types.
//!
//! A record is one recognized word with the span of logical stream time it
//! covers. Words arrive from a recognition session with timestamps relative
//! to that session; the streaming engine shifts them onto the single logical
//! timeline before they leave the crate.

pub mod raw;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A recognized word with its timed span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    /// Start of the word, measured from the beginning of the logical stream.
    pub start: Duration,
    /// End of the word, measured from the beginning of the logical stream.
    pub end: Duration,
    /// The recognized word, whitespace-trimmed and non-empty.
    pub text: String,
}

/// A word produced by the streaming recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingTranscriptRecord {
    /// Start of the word, measured from the beginning of the logical stream.
    pub start: Duration,
    /// End of the word, measured from the beginning of the logical stream.
    pub end: Duration,
    /// The recognized word, whitespace-trimmed and non-empty.
    pub text: String,
    /// Whether the recognizer considers this word stable.
    pub is_final: bool,
    /// Recognizer confidence in [0, 1]; 0 when unknown.
    pub confidence: f64,
}

impl StreamingTranscriptRecord {
    /// Moves the record forward on the timeline by `offset`.
    ///
    /// Used when mapping session-relative timestamps onto the logical
    /// stream: the engine adds the cumulative duration of all previous
    /// sessions' audio.
    pub fn shift(&mut self, offset: Duration) {
        self.start += offset;
        self.end += offset;
    }

    /// Drops the streaming-only fields.
    pub fn into_record(self) -> TranscriptRecord {
        TranscriptRecord {
            start: self.start,
            end: self.end,
            text: self.text,
        }
    }
}
