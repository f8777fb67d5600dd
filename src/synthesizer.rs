//! Turns a physical channel series into audio samples: linear
//! normalization of the observed range to [-1, 1], an optional gain with
//! hard clipping, and quantization to the full signed 32-bit PCM range.

/// Normalizes a series to [-1, 1] by its observed min/max, then applies
/// `gain` and clips back into [-1, 1]. A constant (zero-range) series
/// normalizes to silence.
pub fn normalize(samples: &[f64], gain: f64) -> Vec<f64> {
    let (min, max) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    });
    let range = max - min;
    if samples.is_empty() || range <= 0.0 {
        return vec![0.0; samples.len()];
    }
    samples
        .iter()
        .map(|&v| {
            let unit = (v - min) / range;
            ((2.0 * unit - 1.0) * gain).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Quantizes normalized samples to the full signed 32-bit range.
pub fn quantize(normalized: &[f64]) -> Vec<i32> {
    normalized
        .iter()
        .map(|&v| (v * i32::MAX as f64) as i32)
        .collect()
}

/// Normalize-and-quantize in one step; what the export loop calls.
pub fn synthesize(samples: &[f64], gain: f64) -> Vec<i32> {
    quantize(&normalize(samples, gain))
}
