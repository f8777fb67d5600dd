//! End-to-end checks over synthetic containers: decode through the
//! predictor chain, derive channels, and round-trip a channel through an
//! actual WAV file.

use bbl2wav::channel_scaler::ChannelSet;
use bbl2wav::hound_writer::write_channel;
use bbl2wav::session::process_container;
use bbl2wav::synthesizer::{normalize, synthesize};

use hound::WavReader;

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

/// Encodes main frames the way the firmware does: an intra frame every 32
/// samples, inter frames in between with a straight-line time predictor
/// and previous-value predictors for everything else.
struct FrameEncoder {
    previous: Option<Vec<i64>>,
    previous2: Option<Vec<i64>>,
}

impl FrameEncoder {
    fn new() -> Self {
        Self {
            previous: None,
            previous2: None,
        }
    }

    fn push_frame(&mut self, out: &mut Vec<u8>, values: &[i64], intra: bool) {
        if intra {
            out.push(b'I');
            push_unsigned_vb(out, values[0] as u64);
            for &v in &values[1..] {
                push_signed_vb(out, v);
            }
            self.previous = Some(values.to_vec());
            self.previous2 = Some(values.to_vec());
        } else {
            let previous = self.previous.as_ref().unwrap();
            let previous2 = self.previous2.as_ref().unwrap();
            out.push(b'P');
            push_signed_vb(out, values[0] - (2 * previous[0] - previous2[0]));
            for i in 1..values.len() {
                push_signed_vb(out, values[i] - previous[i]);
            }
            self.previous2 = self.previous.take();
            self.previous = Some(values.to_vec());
        }
    }
}

/// One synthetic GYRO_SCALED session at 4 kHz. Returns the container
/// bytes and the frame rows that went in.
fn session_bytes(frame_count: usize) -> (Vec<u8>, Vec<Vec<i64>>) {
    let mut bytes = Vec::new();
    for line in [
        "H Product:Blackbox flight data recorder by Nicholas Sherlock",
        "H Data version:2",
        "H Firmware type:Cleanflight",
        "H Craft name:it-quad",
        "H looptime:125",
        "H pid_process_denom:2",
        "H P interval:1",
        "H debug_mode:6",
        "H gyro_scale:0x3f800000",
        "H acc_1G:2048",
        "H motor_pwm_protocol:6",
        "H motor_poles:14",
        "H minthrottle:1070",
        "H maxthrottle:2000",
        "H vbatref:1672",
        "H vbat_scale:110",
        "H vbatcellvoltage:330,350,430",
        "H Field I name:time,gyroADC[0],gyroADC[1],gyroADC[2],debug[0],debug[1],debug[2],debug[3]",
        "H Field I signed:0,1,1,1,1,1,1,1",
        "H Field I predictor:0,0,0,0,0,0,0,0",
        "H Field I encoding:1,0,0,0,0,0,0,0",
        "H Field P predictor:2,1,1,1,1,1,1,1",
        "H Field P encoding:0,0,0,0,0,0,0,0",
    ] {
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
    }

    let mut encoder = FrameEncoder::new();
    let mut rows = Vec::with_capacity(frame_count);
    for i in 0..frame_count {
        let phase = i as f64 / 25.0;
        let mut row = vec![1_000_000 + (i as i64) * 250];
        for axis in 0..3 {
            row.push(((phase + axis as f64).sin() * 800.0) as i64);
        }
        for axis in 0..4 {
            row.push(((phase * 2.0 + axis as f64).cos() * 600.0) as i64);
        }
        encoder.push_frame(&mut bytes, &row, i % 32 == 0);
        rows.push(row);
    }
    bytes.push(b'E');
    bytes.push(0xFF);
    bytes.extend_from_slice(b"End of log\x00");
    (bytes, rows)
}

fn gyro_scaled_tracks() -> [(&'static str, &'static str); 3] {
    [
        ("gyro_scaled_roll", "roll"),
        ("gyro_scaled_pitch", "pitch"),
        ("gyro_scaled_yaw", "yaw"),
    ]
}

fn export_session(
    dir: &std::path::Path,
    channels: &ChannelSet,
    index: usize,
    sample_rate: u32,
) -> Vec<std::path::PathBuf> {
    gyro_scaled_tracks()
        .iter()
        .map(|(channel, axis)| {
            let series = channels.get(channel).unwrap();
            let quantized = synthesize(series, 1.0);
            let out = dir.join(format!("log_{}_{}.wav", index, axis));
            write_channel(&out, sample_rate, &quantized).unwrap();
            out
        })
        .collect()
}

#[test]
fn predictor_chain_reproduces_the_encoded_values() {
    let (bytes, rows) = session_bytes(500);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let report = process_container(file.path(), None, None).unwrap();
    let session = &report.sessions[0];
    assert_eq!(session.frame_count, 500);

    // With a 1.0 raw gyro_scale the deg/s conversion is the identity, so
    // the channel must equal the integers that were encoded.
    let roll = session.channels.get("gyro_roll").unwrap();
    for (value, row) in roll.iter().zip(rows.iter()) {
        assert!((value - row[1] as f64).abs() < 1e-9);
    }
    let log_time = session.channels.get("log_time").unwrap();
    assert!((log_time[499] - 499.0 * 0.00025).abs() < 1e-9);
}

#[test]
fn short_sessions_produce_no_files_while_siblings_export() {
    let (short, _) = session_bytes(50);
    let (long, _) = session_bytes(500);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&short).unwrap();
    file.write_all(&long).unwrap();
    file.flush().unwrap();

    let report = process_container(file.path(), None, None).unwrap();
    assert_eq!(report.session_count, 2);
    assert_eq!(report.sessions.len(), 1);

    let dir = tempfile::tempdir().unwrap();
    for session in &report.sessions {
        export_session(dir.path(), &session.channels, session.index, session.sample_rate);
    }
    let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(written.len(), 3);
    assert!(dir.path().join("log_2_roll.wav").is_file());
    assert!(dir.path().join("log_2_pitch.wav").is_file());
    assert!(dir.path().join("log_2_yaw.wav").is_file());
}

#[test]
fn wav_round_trip_stays_within_quantization_error() {
    let (bytes, _) = session_bytes(500);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let report = process_container(file.path(), None, None).unwrap();
    let session = &report.sessions[0];

    let dir = tempfile::tempdir().unwrap();
    let paths = export_session(dir.path(), &session.channels, session.index, session.sample_rate);

    let expected = normalize(session.channels.get("gyro_scaled_roll").unwrap(), 1.0);
    let mut reader = WavReader::open(&paths[0]).unwrap();
    assert_eq!(reader.spec().sample_rate, 4000);
    let decoded: Vec<f64> = reader
        .samples::<i32>()
        .map(|s| s.unwrap() as f64 / i32::MAX as f64)
        .collect();
    assert_eq!(decoded.len(), expected.len());
    for (d, e) in decoded.iter().zip(expected.iter()) {
        assert!((d - e).abs() <= 1.0 / i32::MAX as f64);
    }
}

#[test]
fn trim_window_reduces_every_exported_channel() {
    let (bytes, _) = session_bytes(2000); // 0.5 s at 4 kHz
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let report = process_container(file.path(), Some(0.1), Some(0.3)).unwrap();
    let session = &report.sessions[0];
    assert_eq!(session.frame_count, 800);
    for (channel, _) in gyro_scaled_tracks() {
        assert_eq!(session.channels.get(channel).unwrap().len(), 800);
    }
}
