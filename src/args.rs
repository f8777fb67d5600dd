// Commandline argument parser using clap for bbl2wav

use clap::{Parser, ValueEnum};

use std::path::PathBuf;

/// Convert blackbox flight logs into audible WAV files, one per session
/// and axis.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct BblArgs {
    /// Path to the blackbox container (.bbl) to convert
    pub file: PathBuf,

    /// Start of the export window, in seconds of elapsed log time
    #[arg(long = "start")]
    pub start: Option<f64>,

    /// End of the export window (exclusive), in seconds of elapsed log time
    #[arg(long = "end")]
    pub end: Option<f64>,

    /// Gain applied to the normalized signal before clipping
    #[arg(short = 'g', long = "gain", default_value_t = 1.0)]
    pub gain: f64,

    /// Which derived channels become audio tracks
    #[arg(short = 's', long = "source", value_enum, default_value = "gyro-scaled")]
    pub source: ExportSource,
}

/// The families of channels that can be rendered to audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportSource {
    /// The unfiltered scaled gyro axes from GYRO_SCALED debug frames
    GyroScaled,
    /// The filtered gyro axes, available in every debug mode
    Gyro,
    /// Per-motor RPM from DSHOT_RPM_TELE debug frames
    Rpm,
}

impl ExportSource {
    /// The (channel name, axis label) pairs this source exports. The axis
    /// label lands in the output file name.
    pub fn tracks(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ExportSource::GyroScaled => &[
                ("gyro_scaled_roll", "roll"),
                ("gyro_scaled_pitch", "pitch"),
                ("gyro_scaled_yaw", "yaw"),
            ],
            ExportSource::Gyro => &[
                ("gyro_roll", "roll"),
                ("gyro_pitch", "pitch"),
                ("gyro_yaw", "yaw"),
            ],
            ExportSource::Rpm => &[
                ("m1_rpm", "m1"),
                ("m2_rpm", "m2"),
                ("m3_rpm", "m3"),
                ("m4_rpm", "m4"),
            ],
        }
    }

    /// Whether the series are rotation rates that should be clipped to
    /// the audible limit before normalization.
    pub fn is_gyro_rate(&self) -> bool {
        matches!(self, ExportSource::GyroScaled | ExportSource::Gyro)
    }
}
