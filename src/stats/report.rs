//! Summary statistics and diagnostic report rendering
//!
//! Computes average, jitter (max − min), and sample standard deviation over a
//! latency series, and renders a human-readable report with anomaly warnings.
//!
//! The standard deviation deliberately uses the integer-truncated average as
//! the mean, matching the reference measurement behavior.

use serde::{Deserialize, Serialize};

use crate::audio::estimator::{LatencyResultSet, LatencyTestError, TestOutcome};

/// Average raw latency below this is flagged as out of expected range (ms)
const EXPECTED_MIN_AVERAGE_MS: i64 = 10;

/// Average raw latency above this is flagged as out of expected range (ms)
const EXPECTED_MAX_AVERAGE_MS: i64 = 400;

/// Summary statistics over one latency series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Truncated integer mean in milliseconds
    pub average: i64,
    /// Spread (max − min) in milliseconds
    pub jitter: i64,
    /// Smallest value in the series
    pub min: i64,
    /// Largest value in the series
    pub max: i64,
    /// Sample standard deviation (divisor n−1); `None` when n < 2
    pub std_deviation: Option<f32>,
}

/// Compute summary statistics over a latency series.
///
/// Returns `None` for an empty series. The variance uses the truncated
/// integer average as the mean and the n−1 divisor.
pub fn summarize(values: &[i64]) -> Option<Statistics> {
    if values.is_empty() {
        return None;
    }

    let sum: i64 = values.iter().sum();
    let average = sum / values.len() as i64;

    let mut min = i64::MAX;
    let mut max = i64::MIN;
    for &v in values {
        min = min.min(v);
        max = max.max(v);
    }

    let std_deviation = if values.len() >= 2 {
        let variance: f64 = values
            .iter()
            .map(|&v| {
                let d = (v - average) as f64;
                d * d
            })
            .sum::<f64>()
            / (values.len() - 1) as f64;
        Some(variance.sqrt() as f32)
    } else {
        None
    };

    Some(Statistics {
        average,
        jitter: max - min,
        min,
        max,
        std_deviation,
    })
}

/// Render a latency test outcome as a diagnostic report.
///
/// Successful runs get the used configuration, raw and normalized statistics,
/// and any anomaly warnings; failures are rendered as readable text rather
/// than omitted.
pub fn format_report(result: &Result<LatencyResultSet, LatencyTestError>) -> String {
    match result {
        Ok(set) => format_result_set(set),
        Err(e) => format!("Test failed: {e}\n"),
    }
}

fn format_result_set(set: &LatencyResultSet) -> String {
    let mut out = String::new();

    out.push_str("Result for impulse measurement\n");
    out.push_str(&format!("Bit depth: {}\n", set.bit_depth));
    out.push_str(&format!("Sample rate: {} Hz\n", set.sample_rate_hz));
    out.push_str(&format!(
        "Buffer size: {} smp / {} ms\n",
        set.buffer_size_frames,
        buffer_size_ms(set.buffer_size_frames, set.sample_rate_hz)
    ));

    let raw = summarize(&set.raw);
    let normalized = summarize(&set.normalized);

    match (&raw, &normalized) {
        (Some(raw), Some(normalized)) => {
            out.push_str(&format!("Average latency: {} ms\n", raw.average));
            out.push_str(&format!(
                "Max jitter: {} ms (min={}, max={})\n",
                raw.jitter, raw.min, raw.max
            ));
            out.push_str(&format!(
                "Standard deviation: {}\n",
                format_std(raw.std_deviation)
            ));
            out.push_str(&format!(
                "Average normalized latency: {} ms\n",
                normalized.average
            ));
            out.push_str(&format!(
                "Max jitter for normalized values: {} ms (min={}, max={})\n",
                normalized.jitter, normalized.min, normalized.max
            ));
            out.push_str(&format!(
                "Standard deviation for normalized values: {}\n",
                format_std(normalized.std_deviation)
            ));
        }
        _ => {
            out.push_str("No measurements recorded.\n");
        }
    }

    out.push_str(&format!("Number of tests: {}\n", set.raw.len()));

    if set.outcome == TestOutcome::Cancelled {
        out.push_str("Test cancelled before completion.\n");
    }

    for warning in check_results(&raw) {
        out.push_str(warning);
        out.push('\n');
    }

    out
}

/// Advisory anomaly warnings derived from the raw series statistics.
fn check_results(raw: &Option<Statistics>) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    let Some(stats) = raw else {
        return warnings;
    };

    if stats.average == 0 {
        warnings.push("ERROR: No valid signal received, check connections");
    }
    if stats.average < EXPECTED_MIN_AVERAGE_MS || stats.average > EXPECTED_MAX_AVERAGE_MS {
        warnings.push("WARNING: Value out of expected range, check connections");
    }
    if stats.jitter > stats.average / 2 {
        warnings.push("WARNING: Jitter out of expected range, (at least one) result may be invalid");
    }

    warnings
}

/// Buffer duration in truncated milliseconds.
fn buffer_size_ms(buffer_size_frames: usize, sample_rate_hz: u32) -> usize {
    let frames_per_ms = (sample_rate_hz / 1000) as usize;
    if frames_per_ms == 0 || buffer_size_frames == 0 {
        return 0;
    }
    buffer_size_frames / frames_per_ms
}

fn format_std(std_deviation: Option<f32>) -> String {
    match std_deviation {
        Some(v) => format!("{v}"),
        None => "n/a".to_string(),
    }
}
