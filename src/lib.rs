//! bbl2wav decodes Betaflight-family blackbox flight logs and renders
//! selected telemetry channels as audible WAV files, one per flight
//! session and axis, so oscillations and filter problems can be heard (or
//! seen in a spectrogram) instead of squinted at in a plot.
//!
//! The pipeline runs in four strictly ordered stages per session:
//!
//! 1. [`log_reader`] finds the session inside the container file, parses
//!    its ASCII header, and reconstructs the raw integer frame rows from
//!    the format's predictor/delta encoding ([`frame_codec`],
//!    [`byte_stream`]).
//! 2. [`flight_header`] derives calibration scales, loop rates, the debug
//!    mode, and a battery estimate from the raw header.
//! 3. [`channel_scaler`] turns raw rows into physically scaled series
//!    (deg/s, g, percent, RPM, meters).
//! 4. [`synthesizer`] and [`hound_writer`] normalize a chosen series and
//!    write it out as mono 32-bit PCM at the session's logging rate.
//!
//! [`session`] orchestrates the stages over every session in a file.

#![warn(missing_docs)]
pub mod args;
pub mod byte_stream;
pub mod channel_scaler;
pub mod error;
pub mod flight_header;
pub mod frame_codec;
pub mod hound_writer;
pub mod log_reader;
pub mod session;
pub mod synthesizer;
