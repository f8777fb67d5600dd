//! The error type shared by every stage of the decode pipeline.
//!
//! All of these are fatal: a blackbox log either decodes cleanly or the
//! file is corrupt, so there is no retry or partial-output path anywhere.

use std::fmt;

/// Everything that can go wrong between opening a container file and
/// writing the last WAV sample.
#[derive(Debug)]
pub enum BblError {
    /// The container data is malformed, truncated, or uses a format
    /// feature we do not support. Carries the absolute byte offset at
    /// which decoding gave up.
    Format {
        /// Offset into the container file where the problem was found.
        offset: usize,
        /// What exactly was wrong at that offset.
        reason: String,
    },

    /// A session index outside `1..=session_count` was requested.
    SessionIndex {
        /// The 1-based index that was asked for.
        index: usize,
        /// How many sessions the container actually holds.
        count: usize,
    },

    /// A derived-header or trim invariant was violated (loop frequencies,
    /// battery estimation, a trim window that removes nothing).
    Consistency(String),

    /// The header's `debug_mode` code is not in the known lookup table.
    /// There is deliberately no silent fallback for these.
    UnknownDebugMode(i64),

    /// A channel required for export is not derivable in this session's
    /// debug mode.
    MissingChannel {
        /// Name of the channel that was requested.
        channel: String,
        /// The session's debug mode name, for the error message.
        debug_mode: &'static str,
    },

    /// Returned when io fails while reading the container or writing output.
    Io(std::io::Error),

    /// Returned when the WAV writer fails.
    Wav(hound::Error),
}

impl fmt::Display for BblError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BblError::Format { offset, reason } => {
                write!(f, "malformed log data at byte {}: {}", offset, reason)
            }
            BblError::SessionIndex { index, count } => {
                write!(f, "session {} out of range (container holds {})", index, count)
            }
            BblError::Consistency(msg) => write!(f, "header consistency error: {}", msg),
            BblError::UnknownDebugMode(code) => {
                write!(f, "unknown debug_mode code {} in header", code)
            }
            BblError::MissingChannel { channel, debug_mode } => {
                write!(
                    f,
                    "channel \"{}\" is not available in debug mode {}",
                    channel, debug_mode
                )
            }
            BblError::Io(error) => write!(f, "io error: {}", error),
            BblError::Wav(error) => write!(f, "wav error: {}", error),
        }
    }
}

impl std::error::Error for BblError {}

impl From<std::io::Error> for BblError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<hound::Error> for BblError {
    fn from(value: hound::Error) -> Self {
        Self::Wav(value)
    }
}
