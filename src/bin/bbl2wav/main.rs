//! CLI entry point: decode a blackbox container and write one WAV per
//! (session, axis) pair next to the input file.

use bbl2wav::args::BblArgs;
use bbl2wav::error::BblError;
use bbl2wav::hound_writer::write_channel;
use bbl2wav::session::process_container;
use bbl2wav::synthesizer::synthesize;

use clap::Parser;
use log::debug;

use std::path::{Path, PathBuf};
use std::process::exit;

// Example:
// cargo run --bin bbl2wav --
//                         --source  gyro-scaled
//                         --start   1.5
//                         --end     20
//                         flight.bbl

/// Rotation-rate series are clipped to this many deg/s before
/// normalization, so a single collision spike cannot flatten the rest of
/// the track into inaudibility.
const GYRO_RATE_LIMIT: f64 = 5000.0;

fn main() {
    env_logger::init();
    // clap would exit with code 2 on a usage error; this tool's contract
    // is exit 1 for any misuse, so parse manually.
    let args = match BblArgs::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            exit(if error.use_stderr() { 1 } else { 0 });
        }
    };

    if !args.file.is_file() {
        eprintln!("\"{}\" is not a file.", args.file.display());
        exit(1);
    }

    if let Err(error) = run(&args) {
        eprintln!("{}", error);
        exit(1);
    }
}

fn run(args: &BblArgs) -> Result<(), BblError> {
    let report = process_container(&args.file, args.start, args.end)?;

    for session in &report.sessions {
        println!(
            "{}/{}: {} frames @ {} Hz, debug_mode = {}, length = {:.1}s, {} {}",
            session.index,
            report.session_count,
            session.frame_count,
            session.sample_rate,
            session.debug_mode.name(),
            session.length_secs,
            session.craft_name,
            session.battery,
        );

        for &(channel, axis) in args.source.tracks() {
            let Some(series) = session.channels.get(channel) else {
                return Err(BblError::MissingChannel {
                    channel: channel.to_string(),
                    debug_mode: session.debug_mode.name(),
                });
            };

            let samples: Vec<f64> = if args.source.is_gyro_rate() {
                series
                    .iter()
                    .map(|v| v.clamp(-GYRO_RATE_LIMIT, GYRO_RATE_LIMIT))
                    .collect()
            } else {
                series.to_vec()
            };
            debug!("{} samples on {} for session {}", samples.len(), channel, session.index);

            let quantized = synthesize(&samples, args.gain);
            let out = output_path(&args.file, session.index, axis);
            write_channel(&out, session.sample_rate, &quantized)?;
            println!("Generated {}", out.display());
        }
    }
    Ok(())
}

/// `<input without extension>_<session>_<axis>.wav`, next to the input.
fn output_path(input: &Path, session: usize, axis: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    input.with_file_name(format!("{}_{}_{}.wav", stem, session, axis))
}
