//! Conversion of raw frame rows into physically scaled channel series:
//! degrees per second, g, percent throttle, RPM, meters. All conversions
//! are pure functions of the raw values and the derived header; nothing
//! here touches IO.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use crate::error::BblError;
use crate::flight_header::{DebugMode, FlightHeader};
use crate::log_reader::LogSession;

/// Pole count historically hardcoded for the motor 2 RPM channel in
/// DSHOT_RPM_TELE logs, alongside the header-pole variant. Known
/// firmware-specific quirk carried over from the reference viewer; intent
/// unconfirmed, so it is preserved rather than fixed.
const DSHOT_RPM_TELE_M2_POLES: f64 = 14.0;

/// Raw gyro reading to degrees per second.
pub fn gyro_to_deg_per_sec(header: &FlightHeader, raw: f64) -> f64 {
    let high_res_scale = if header.high_resolution { 10.0 } else { 1.0 };
    header.gyro_scale * 1e6 / (PI / 180.0) * raw / high_res_scale
}

/// Raw accelerometer reading to g.
pub fn acc_to_g(header: &FlightHeader, raw: f64) -> f64 {
    raw / header.acc_1g
}

/// Raw motor command to percent of the protocol's output range, clamped
/// to [0, 100] even for out-of-range raw values.
pub fn motor_to_pct(header: &FlightHeader, raw: f64) -> f64 {
    const DSHOT_MIN_VALUE: f64 = 48.0;
    const DSHOT_MAX_VALUE: f64 = 2047.0;

    let pct = if header.motor_protocol.is_digital() {
        (raw - DSHOT_MIN_VALUE) / (DSHOT_MAX_VALUE - DSHOT_MIN_VALUE) * 100.0
    } else {
        (raw - header.minthrottle) / (header.maxthrottle - header.minthrottle) * 100.0
    };
    pct.clamp(0.0, 100.0)
}

/// DSHOT telemetry value to RPM. `poles` overrides the header's motor
/// pole count when given.
pub fn dshot_rpm(header: &FlightHeader, raw: f64, poles: Option<f64>) -> f64 {
    raw * 200.0 / poles.unwrap_or(header.motor_poles)
}

/// The named physical series derived from one session. All series have
/// the same length (one value per frame).
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    channels: BTreeMap<String, Vec<f64>>,
}

impl ChannelSet {
    /// A channel's series, if it was derivable for this session.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.channels.get(name).map(|v| v.as_slice())
    }

    /// Channel names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(|k| k.as_str())
    }

    /// Number of frames backing every channel.
    pub fn frame_count(&self) -> usize {
        self.channels.values().next().map_or(0, |v| v.len())
    }

    fn insert(&mut self, name: &str, series: Vec<f64>) {
        self.channels.insert(name.to_string(), series);
    }

    /// Restricts every channel to the frames whose elapsed log time falls
    /// in `[start, end)`. `start` defaults to 0 and `end` to the last
    /// elapsed time. A window that fails to remove at least one frame is
    /// rejected, so an accidental no-op trim cannot pass silently.
    pub fn trim(&mut self, start: Option<f64>, end: Option<f64>) -> Result<(), BblError> {
        let log_time = self.channels.get("log_time").ok_or_else(|| {
            BblError::Consistency("cannot trim a session without a log_time channel".to_string())
        })?;
        let start = start.unwrap_or(0.0);
        let end = end.unwrap_or_else(|| log_time.last().copied().unwrap_or(0.0));

        let keep: Vec<bool> = log_time.iter().map(|&t| t >= start && t < end).collect();
        let kept = keep.iter().filter(|&&k| k).count();
        if kept >= log_time.len() {
            return Err(BblError::Consistency(format!(
                "trim window [{}, {}) does not reduce the frame count",
                start, end
            )));
        }
        for series in self.channels.values_mut() {
            let mut mask = keep.iter();
            series.retain(|_| *mask.next().unwrap());
        }
        Ok(())
    }
}

/// Derives the full channel set for one decoded session.
///
/// Channels whose source fields are absent from the log's field list are
/// simply not derived; asking for one of them at export time is the
/// orchestrator's missing-channel error. Only `time` is indispensable,
/// since every downstream step is anchored to elapsed log time.
pub fn derive_channels(
    session: &LogSession,
    header: &FlightHeader,
) -> Result<ChannelSet, BblError> {
    let column = |name: &str| -> Option<Vec<f64>> {
        session
            .field_names
            .iter()
            .position(|n| n == name)
            .map(|i| session.frames.iter().map(|f| f[i] as f64).collect())
    };

    let time = column("time").ok_or_else(|| {
        BblError::Consistency("log has no \"time\" field; cannot anchor channels".to_string())
    })?;

    let mut set = ChannelSet::default();

    let t0 = time.first().copied().unwrap_or(0.0);
    set.insert(
        "log_time",
        time.iter().map(|t| (t - t0) / 1e6).collect(),
    );

    for (axis, name) in ["roll", "pitch", "yaw"].iter().enumerate() {
        if let Some(raw) = column(&format!("gyroADC[{}]", axis)) {
            set.insert(
                &format!("gyro_{}", name),
                raw.iter().map(|&v| gyro_to_deg_per_sec(header, v)).collect(),
            );
        }
    }

    let acc_axes: Vec<Option<Vec<f64>>> = (0..3)
        .map(|axis| {
            column(&format!("accSmooth[{}]", axis))
                .map(|raw| raw.iter().map(|&v| acc_to_g(header, v)).collect())
        })
        .collect();
    if let (Some(x), Some(y), Some(z)) = (&acc_axes[0], &acc_axes[1], &acc_axes[2]) {
        let magnitude = x
            .iter()
            .zip(y.iter())
            .zip(z.iter())
            .map(|((&x, &y), &z)| (x * x + y * y + z * z).sqrt())
            .collect();
        set.insert("acc", magnitude);
    }
    for (axis, name) in ["x", "y", "z"].iter().enumerate() {
        if let Some(series) = &acc_axes[axis] {
            set.insert(&format!("acc_{}", name), series.clone());
        }
    }

    for motor in 0..4 {
        if let Some(raw) = column(&format!("motor[{}]", motor)) {
            set.insert(
                &format!("m{}_pct", motor + 1),
                raw.iter().map(|&v| motor_to_pct(header, v)).collect(),
            );
        }
    }

    // PID terms pass through unscaled. The yaw D and P terms are not
    // logged by this firmware family, hence the shorter lists.
    for (axis, name) in ["roll", "pitch", "yaw"].iter().enumerate() {
        if let Some(raw) = column(&format!("axisI[{}]", axis)) {
            set.insert(&format!("pid_i_{}", name), raw);
        }
    }
    for (axis, name) in ["roll", "pitch"].iter().enumerate() {
        if let Some(raw) = column(&format!("axisD[{}]", axis)) {
            set.insert(&format!("pid_d_{}", name), raw);
        }
        if let Some(raw) = column(&format!("axisP[{}]", axis)) {
            set.insert(&format!("pid_p_{}", name), raw);
        }
    }

    if let Some(raw) = column("baroAlt") {
        let altitude: Vec<f64> = raw.iter().map(|&v| v / 100.0).collect();
        let mut vertical_speed = Vec::with_capacity(altitude.len());
        for (i, &alt) in altitude.iter().enumerate() {
            if i == 0 {
                vertical_speed.push(0.0);
            } else {
                vertical_speed.push((alt - altitude[i - 1]) / header.sample_period);
            }
        }
        set.insert("altitude_m", altitude);
        set.insert("vertical_speed", vertical_speed);
    }

    derive_debug_channels(header, &column, &mut set);

    Ok(set)
}

/// The debug-mode-specific channels, dispatched once per session on the
/// mode tag so each mode's channel list is spelled out exhaustively.
fn derive_debug_channels(
    header: &FlightHeader,
    column: &dyn Fn(&str) -> Option<Vec<f64>>,
    set: &mut ChannelSet,
) {
    match header.debug_mode {
        DebugMode::GyroScaled => {
            for (axis, name) in ["roll", "pitch", "yaw"].iter().enumerate() {
                if let Some(raw) = column(&format!("debug[{}]", axis)) {
                    set.insert(
                        &format!("gyro_scaled_{}", name),
                        raw.iter().map(|&v| gyro_to_deg_per_sec(header, v)).collect(),
                    );
                }
            }
        }
        DebugMode::DshotRpmTele => {
            let rpm = |raw: Vec<f64>, poles: Option<f64>| -> Vec<f64> {
                raw.iter().map(|&v| dshot_rpm(header, v, poles)).collect()
            };
            if let Some(raw) = column("debug[0]") {
                set.insert("m1_rpm", rpm(raw, None));
            }
            if let Some(raw) = column("debug[1]") {
                // Motor 2 gets both renditions: the header-pole one the
                // firmware would suggest, and the hardcoded-pole override
                // the reference viewer actually uses.
                set.insert("m2_rpm_wrong", rpm(raw.clone(), None));
                set.insert("m2_rpm", rpm(raw, Some(DSHOT_RPM_TELE_M2_POLES)));
            }
            if let Some(raw) = column("debug[2]") {
                set.insert("m3_rpm", rpm(raw, None));
            }
            if let Some(raw) = column("debug[3]") {
                set.insert("m4_rpm", rpm(raw, None));
            }
        }
        // These modes log diagnostics we have no physical mapping for.
        DebugMode::RpmFilter | DebugMode::EscSensorRpm | DebugMode::ThrustImbalance => {}
    }
}
