//! Interpretation of a session's raw header into the derived quantities
//! the channel layer needs: calibration scales, loop frequencies, debug
//! mode, motor protocol, and a battery estimate.
//!
//! The derivation is a pure `RawHeader → FlightHeader` transformation; the
//! raw header is never modified, so there is no partially-initialized
//! in-between state to observe.

use std::f64::consts::PI;

use crate::error::BblError;
use crate::log_reader::{HeaderValue, RawHeader};

/// Firmware debug modes this pipeline understands, keyed by the header's
/// `debug_mode` integer. Each mode populates the `debug[i]` raw fields
/// with a different quantity, so the mode decides which derived channels
/// exist. Codes outside this table are a hard error, never a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    /// Code 6: `debug[0..3]` carry the unfiltered scaled gyro axes.
    GyroScaled,
    /// Code 45: `debug[0..4]` carry per-motor DSHOT telemetry RPM.
    DshotRpmTele,
    /// Code 46: RPM-filter internals; no extra channels derived.
    RpmFilter,
    /// Code 12: ESC sensor RPM; no extra channels derived.
    EscSensorRpm,
    /// Code 80: thrust imbalance diagnostics; no extra channels derived.
    ThrustImbalance,
}

impl DebugMode {
    /// Classifies the header's `debug_mode` code.
    pub fn from_code(code: i64) -> Result<Self, BblError> {
        match code {
            6 => Ok(DebugMode::GyroScaled),
            45 => Ok(DebugMode::DshotRpmTele),
            46 => Ok(DebugMode::RpmFilter),
            12 => Ok(DebugMode::EscSensorRpm),
            80 => Ok(DebugMode::ThrustImbalance),
            other => Err(BblError::UnknownDebugMode(other)),
        }
    }

    /// The firmware's name for the mode.
    pub fn name(&self) -> &'static str {
        match self {
            DebugMode::GyroScaled => "GYRO_SCALED",
            DebugMode::DshotRpmTele => "DSHOT_RPM_TELE",
            DebugMode::RpmFilter => "RPM_FILTER",
            DebugMode::EscSensorRpm => "ESC_SENSOR_RPM",
            DebugMode::ThrustImbalance => "THRUST_IMBALANCE",
        }
    }
}

/// Motor output protocols, in the firmware's `motor_pwm_protocol` index
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum MotorProtocol {
    Pwm,
    Oneshot125,
    Oneshot42,
    Multishot,
    Brushed,
    Dshot150,
    Dshot300,
    Dshot600,
    Dshot1200,
    Proshot1000,
}

impl MotorProtocol {
    const TABLE: [MotorProtocol; 10] = [
        MotorProtocol::Pwm,
        MotorProtocol::Oneshot125,
        MotorProtocol::Oneshot42,
        MotorProtocol::Multishot,
        MotorProtocol::Brushed,
        MotorProtocol::Dshot150,
        MotorProtocol::Dshot300,
        MotorProtocol::Dshot600,
        MotorProtocol::Dshot1200,
        MotorProtocol::Proshot1000,
    ];

    /// Looks up a protocol by its header index.
    pub fn from_index(index: i64) -> Result<Self, BblError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::TABLE.get(i).copied())
            .ok_or_else(|| {
                BblError::Consistency(format!(
                    "motor_pwm_protocol index {} is outside the protocol table",
                    index
                ))
            })
    }

    /// Whether motor values use the DSHOT-style digital range. Everything
    /// but brushed output counts as digital here, matching the viewer this
    /// scaling was lifted from.
    pub fn is_digital(&self) -> bool {
        !matches!(self, MotorProtocol::Brushed)
    }
}

/// Sample rates the on-board logger can be configured to; anything else
/// indicates a header we must not trust.
const VALID_BLACKBOX_FREQS: [u32; 6] = [250, 500, 1000, 2000, 4000, 8000];

/// Derived, immutable interpretation of one session's header.
#[derive(Debug, Clone)]
pub struct FlightHeader {
    /// Firmware family string, as logged.
    pub firmware_type: String,
    /// Pilot-assigned craft name, empty when not set.
    pub craft_name: String,
    /// Gyro calibration in radians per microsecond (after the firmware
    /// family adjustment).
    pub gyro_scale: f64,
    /// Raw accelerometer counts per g.
    pub acc_1g: f64,
    /// Whether the log uses the tenfold high-resolution gyro scale.
    pub high_resolution: bool,
    /// Motor pole count for RPM telemetry conversion.
    pub motor_poles: f64,
    /// Configured motor output protocol.
    pub motor_protocol: MotorProtocol,
    /// Analog throttle range, used for non-digital motor scaling.
    pub minthrottle: f64,
    /// See `minthrottle`.
    pub maxthrottle: f64,
    /// The session's debug mode.
    pub debug_mode: DebugMode,
    /// PID loop rate in Hz, 4000 or 8000.
    pub pid_freq: u32,
    /// Logging rate in Hz.
    pub blackbox_freq: u32,
    /// Nominal seconds between samples, `1 / blackbox_freq`.
    pub sample_period: f64,
    /// Estimated battery cell count.
    pub battery_cells: u32,
    /// Battery voltage at the reference reading, in volts.
    pub battery_volts: f64,
}

impl FlightHeader {
    /// Derives everything from a raw header, or fails on the first
    /// violated invariant.
    pub fn from_raw(raw: &RawHeader) -> Result<Self, BblError> {
        let firmware_type = raw.str("Firmware type")?.to_string();

        // The stored gyro_scale integer is the bit pattern of an IEEE-754
        // float, not a numeric value, so it must be reinterpreted rather
        // than cast.
        let mut gyro_scale = f32::from_bits(raw.int("gyro_scale")? as u32) as f64;
        // Cleanflight-family firmware calibrates in degrees per second;
        // convert to the radians-per-microsecond convention the derived
        // formulas assume.
        let family = firmware_type.to_lowercase();
        if family.contains("inav") || family.contains("flight") {
            gyro_scale *= (PI / 180.0) * 1e-6;
        }

        let (pid_freq, blackbox_freq) = derive_frequencies(raw)?;
        let debug_mode = DebugMode::from_code(raw.int("debug_mode")?)?;
        let motor_protocol = MotorProtocol::from_index(raw.int("motor_pwm_protocol")?)?;
        let (battery_cells, battery_volts) = estimate_battery_cells(raw)?;

        Ok(FlightHeader {
            craft_name: raw.str_or("Craft name", "").to_string(),
            firmware_type,
            gyro_scale,
            acc_1g: raw.float("acc_1G")?,
            high_resolution: raw.int_or("blackbox_high_resolution", 0) > 0,
            // The firmware's default pole count; present in every modern
            // header.
            motor_poles: raw.int_or("motor_poles", 14) as f64,
            motor_protocol,
            minthrottle: raw.int_or("minthrottle", 1000) as f64,
            maxthrottle: raw.int_or("maxthrottle", 2000) as f64,
            debug_mode,
            pid_freq,
            blackbox_freq,
            sample_period: 1.0 / blackbox_freq as f64,
            battery_cells,
            battery_volts,
        })
    }

    /// Human-readable battery summary, e.g. `4S (15.2V)`.
    pub fn battery_description(&self) -> String {
        format!("{}S ({:.1}V)", self.battery_cells, self.battery_volts)
    }
}

/// Derives and validates the PID loop and logging rates.
fn derive_frequencies(raw: &RawHeader) -> Result<(u32, u32), BblError> {
    let looptime = raw.int("looptime")?;
    let denom = raw.int("pid_process_denom")?;
    if looptime <= 0 || denom <= 0 {
        return Err(BblError::Consistency(format!(
            "non-positive looptime {} or pid_process_denom {}",
            looptime, denom
        )));
    }
    let pid_freq = (1_000_000.0 / looptime as f64 / denom as f64).round() as u32;
    if pid_freq != 4000 && pid_freq != 8000 {
        return Err(BblError::Consistency(format!(
            "PID loop frequency {} Hz is not 4000 or 8000",
            pid_freq
        )));
    }

    // "P interval" is a plain logging denominator in some firmware and a
    // num/denom fraction of the PID rate in others; accept both.
    let blackbox_freq = match raw.get("P interval") {
        Some(HeaderValue::Int(denom)) if *denom > 0 => pid_freq as f64 / *denom as f64,
        Some(HeaderValue::Str(fraction)) => {
            let parsed = fraction
                .split_once('/')
                .and_then(|(num, den)| Some((num.parse::<u32>().ok()?, den.parse::<u32>().ok()?)))
                .filter(|(_, den)| *den > 0);
            match parsed {
                Some((num, den)) => pid_freq as f64 * num as f64 / den as f64,
                None => {
                    return Err(BblError::Consistency(format!(
                        "unparseable \"P interval\" value \"{}\"",
                        fraction
                    )))
                }
            }
        }
        _ => {
            return Err(BblError::Consistency(
                "missing or non-positive \"P interval\"".to_string(),
            ))
        }
    };

    let rounded = blackbox_freq.round() as u32;
    if blackbox_freq.fract() != 0.0 || !VALID_BLACKBOX_FREQS.contains(&rounded) {
        return Err(BblError::Consistency(format!(
            "blackbox rate {} Hz is not a supported logging rate",
            blackbox_freq
        )));
    }
    if rounded > pid_freq {
        return Err(BblError::Consistency(format!(
            "blackbox rate {} Hz exceeds the PID loop rate {} Hz",
            rounded, pid_freq
        )));
    }
    Ok((pid_freq, rounded))
}

/// Estimates the battery cell count from the reference voltage reading.
///
/// The ADC is 12-bit against a 3.3 V reference and `vbat_scale` arrives
/// premultiplied by 100, so the reading converts to millivolts first; the
/// smallest even cell count whose full-charge voltage clears the reading
/// wins.
fn estimate_battery_cells(raw: &RawHeader) -> Result<(u32, f64), BblError> {
    const ADC_VREF: i64 = 33;

    let vbatref = raw.int("vbatref")?;
    let vbat_scale = raw.int("vbat_scale")?;
    let cell_voltages = raw.int_list("vbatcellvoltage")?;
    let max_cell_voltage = *cell_voltages.get(2).ok_or_else(|| {
        BblError::Consistency("\"vbatcellvoltage\" does not list a maximum cell voltage".to_string())
    })?;

    let millivolts = (vbatref * ADC_VREF * 10 * vbat_scale) as f64 / 4095.0;
    for cells in [2u32, 4, 6, 8] {
        if millivolts < (cells as i64 * max_cell_voltage * 10) as f64 {
            return Ok((cells, millivolts / 1e3));
        }
    }
    Err(BblError::Consistency(format!(
        "battery estimation failed: {:.0} mV exceeds every supported cell count",
        millivolts
    )))
}
