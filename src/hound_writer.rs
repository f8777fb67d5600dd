//! A wrapper for the hound library that writes decoded telemetry
//! channels out as mono PCM audio files.

use hound::{SampleFormat, WavSpec, WavWriter};

use std::path::Path;

use crate::error::BblError;

/// The WAV parameters every exported channel uses: mono, 32-bit signed
/// PCM, at the session's logging rate.
pub fn channel_wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Int,
    }
}

/// Writes one quantized channel to `path`, finalizing the WAV header
/// before returning so a partially written file cannot pass for a good
/// one.
pub fn write_channel(path: &Path, sample_rate: u32, samples: &[i32]) -> Result<(), BblError> {
    let mut writer = WavWriter::create(path, channel_wav_spec(sample_rate))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
