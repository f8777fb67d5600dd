//! The per-container orchestration: decode every session, interpret its
//! header, derive its channels, and collect the metadata the export step
//! wants to show. Sessions are processed strictly in order and each one
//! is finished before the next is touched.

use log::{info, warn};

use std::path::Path;

use crate::channel_scaler::{derive_channels, ChannelSet};
use crate::error::BblError;
use crate::flight_header::{DebugMode, FlightHeader};
use crate::log_reader::LogContainer;

/// Sessions shorter than this are arm-and-disarm noise (a bench test, an
/// aborted takeoff) and are skipped rather than exported.
pub const MIN_SESSION_FRAMES: usize = 100;

/// One exportable session's derived channels plus display metadata.
#[derive(Debug)]
pub struct SessionReport {
    /// 1-based session index within the container.
    pub index: usize,
    /// The derived physical channel series.
    pub channels: ChannelSet,
    /// Frames remaining after any trim.
    pub frame_count: usize,
    /// The session's logging rate, which becomes the WAV sample rate.
    pub sample_rate: u32,
    /// The session's debug mode.
    pub debug_mode: DebugMode,
    /// Pilot-assigned craft name, possibly empty.
    pub craft_name: String,
    /// Battery summary, e.g. `4S (15.2V)`.
    pub battery: String,
    /// Session length in seconds at the nominal sample spacing.
    pub length_secs: f64,
}

/// Everything derived from one container file.
#[derive(Debug)]
pub struct ContainerReport {
    /// Total sessions found, including skipped ones.
    pub session_count: usize,
    /// Reports for the sessions that were long enough to keep.
    pub sessions: Vec<SessionReport>,
}

/// Runs the full decode → interpret → scale pipeline over every session
/// of the container at `path`, applying the optional `[start, end)` trim
/// window to each kept session.
pub fn process_container(
    path: impl AsRef<Path>,
    start: Option<f64>,
    end: Option<f64>,
) -> Result<ContainerReport, BblError> {
    let container = LogContainer::open(path)?;
    let session_count = container.session_count();
    info!("container holds {} session(s)", session_count);

    let mut sessions = Vec::new();
    for index in 1..=session_count {
        let session = container.read_session(index)?;
        if session.frames.len() < MIN_SESSION_FRAMES {
            warn!(
                "session {}/{}: only {} frames, skipped",
                index,
                session_count,
                session.frames.len()
            );
            continue;
        }

        let header = FlightHeader::from_raw(&session.header)?;
        let mut channels = derive_channels(&session, &header)?;
        if start.is_some() || end.is_some() {
            channels.trim(start, end)?;
        }

        let frame_count = channels.frame_count();
        let length_secs = frame_count as f64 / header.blackbox_freq as f64;
        info!(
            "session {}/{}: {} frames @ {} Hz, debug_mode = {}, length = {:.1}s",
            index,
            session_count,
            frame_count,
            header.blackbox_freq,
            header.debug_mode.name(),
            length_secs
        );

        sessions.push(SessionReport {
            index,
            channels,
            frame_count,
            sample_rate: header.blackbox_freq,
            debug_mode: header.debug_mode,
            craft_name: header.craft_name.clone(),
            battery: header.battery_description(),
            length_secs,
        });
    }
    Ok(ContainerReport {
        session_count,
        sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn push_unsigned_vb(out: &mut Vec<u8>, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    fn push_signed_vb(out: &mut Vec<u8>, value: i64) {
        push_unsigned_vb(out, ((value << 1) ^ (value >> 63)) as u64);
    }

    /// A self-contained session of intra frames only: `time` plus three
    /// gyro axes and four debug fields, logged at 4 kHz.
    fn session_bytes(frame_count: usize, debug_mode: i64) -> Vec<u8> {
        let mut bytes = Vec::new();
        for line in [
            "H Product:Blackbox flight data recorder by Nicholas Sherlock".to_string(),
            "H Data version:2".to_string(),
            "H Firmware type:Cleanflight".to_string(),
            "H Craft name:bench-quad".to_string(),
            "H looptime:125".to_string(),
            "H pid_process_denom:2".to_string(),
            "H P interval:1".to_string(),
            format!("H debug_mode:{}", debug_mode),
            "H gyro_scale:0x3f800000".to_string(),
            "H acc_1G:2048".to_string(),
            "H motor_pwm_protocol:6".to_string(),
            "H motor_poles:14".to_string(),
            "H minthrottle:1070".to_string(),
            "H maxthrottle:2000".to_string(),
            "H vbatref:1672".to_string(),
            "H vbat_scale:110".to_string(),
            "H vbatcellvoltage:330,350,430".to_string(),
            "H Field I name:time,gyroADC[0],gyroADC[1],gyroADC[2],debug[0],debug[1],debug[2],debug[3]"
                .to_string(),
            "H Field I signed:0,1,1,1,1,1,1,1".to_string(),
            "H Field I predictor:0,0,0,0,0,0,0,0".to_string(),
            "H Field I encoding:1,0,0,0,0,0,0,0".to_string(),
            "H Field P predictor:1,1,1,1,1,1,1,1".to_string(),
            "H Field P encoding:0,0,0,0,0,0,0,0".to_string(),
        ] {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        for i in 0..frame_count {
            bytes.push(b'I');
            push_unsigned_vb(&mut bytes, (i as u64) * 250);
            for field in 0..7 {
                push_signed_vb(&mut bytes, ((i + field) % 41) as i64 - 20);
            }
        }
        bytes.push(b'E');
        bytes.push(0xFF);
        bytes.extend_from_slice(b"End of log\x00");
        bytes
    }

    fn write_container(sessions: &[Vec<u8>]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for session in sessions {
            file.write_all(session).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn short_sessions_are_skipped_not_fatal() {
        let file = write_container(&[session_bytes(50, 6), session_bytes(300, 6)]);
        let report = process_container(file.path(), None, None).unwrap();
        assert_eq!(report.session_count, 2);
        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.sessions[0].index, 2);
        assert_eq!(report.sessions[0].frame_count, 300);
    }

    #[test]
    fn report_carries_session_metadata() {
        let file = write_container(&[session_bytes(300, 6)]);
        let report = process_container(file.path(), None, None).unwrap();
        let session = &report.sessions[0];
        assert_eq!(session.sample_rate, 4000);
        assert_eq!(session.debug_mode, DebugMode::GyroScaled);
        assert_eq!(session.craft_name, "bench-quad");
        assert_eq!(session.battery, "4S (14.8V)");
        assert!((session.length_secs - 300.0 / 4000.0).abs() < 1e-9);
        assert!(session.channels.get("gyro_scaled_roll").is_some());
        assert!(session.channels.get("gyro_roll").is_some());
    }

    #[test]
    fn trim_window_is_applied_per_session() {
        // 600 frames at 4 kHz span 0.15 s; keep [0.025, 0.1).
        let file = write_container(&[session_bytes(600, 6)]);
        let report = process_container(file.path(), Some(0.025), Some(0.1)).unwrap();
        assert_eq!(report.sessions[0].frame_count, 300);
    }

    #[test]
    fn unknown_debug_mode_aborts_the_run() {
        let file = write_container(&[session_bytes(300, 99)]);
        assert!(matches!(
            process_container(file.path(), None, None),
            Err(BblError::UnknownDebugMode(99))
        ));
    }
}
