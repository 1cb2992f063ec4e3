//! Impulse round-trip latency measurement
//!
//! Plays a single maximal-amplitude impulse through the playback stream while
//! reading from the capture stream, and measures the elapsed time until the
//! impulse reappears in the captured signal. Repeats up to the configured
//! test count and assembles a raw and a position-normalized latency series.
//!
//! Timing uses a monotonic clock around each impulse emission. Detection is a
//! threshold crossing scan over each captured buffer; only the first crossing
//! per buffer counts, since the impulse shape may be distorted by the
//! transducer path. The normalized series removes the intra-buffer scan
//! position artifact by simulating detection at buffer position 0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::impulse::ImpulseBuffers;
use super::port::PcmStreamPort;

/// Errors that terminate a latency test without a usable result set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LatencyTestError {
    #[error("Audio initialization failed: {0}")]
    Init(String),

    #[error("Timed out after {seconds} seconds. Please check connections and levels.")]
    TimedOut { seconds: u64 },

    #[error("Measurement worker terminated unexpectedly")]
    WorkerLost,
}

/// Detection threshold tier.
///
/// Sets how large a captured sample must be, relative to full scale, to count
/// as the returned impulse. `High` demands the strongest signal (full scale /
/// 5) and is the default; `Low` accepts heavily attenuated loopback paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdLevel {
    #[default]
    High,
    Medium,
    Low,
}

impl ThresholdLevel {
    /// Divider applied to the maximum 16-bit sample value.
    pub fn divider(self) -> u16 {
        match self {
            ThresholdLevel::High => 5,
            ThresholdLevel::Medium => 20,
            ThresholdLevel::Low => 200,
        }
    }
}

/// Configuration for one latency test run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfiguration {
    /// Sample rate in Hz
    pub sample_rate_hz: u32,
    /// Buffer size in frames (mono samples per read/write call)
    pub buffer_size_frames: usize,
    /// Divider applied to `i16::MAX` to derive the detection threshold
    pub threshold_divider: u16,
    /// Number of impulses to emit and detect
    pub test_count: usize,
    /// Seconds after an emission before the run is considered timed out
    pub timeout_seconds: u64,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            sample_rate_hz: crate::DEFAULT_SAMPLE_RATE,
            buffer_size_frames: 480,
            threshold_divider: ThresholdLevel::High.divider(),
            test_count: 10,
            timeout_seconds: 10,
        }
    }
}

impl TestConfiguration {
    /// Validate that every field is in its allowed range.
    pub fn validate(&self) -> Result<(), LatencyTestError> {
        if self.sample_rate_hz == 0 {
            return Err(LatencyTestError::Init("sample rate must be > 0".into()));
        }
        if self.buffer_size_frames == 0 {
            return Err(LatencyTestError::Init("buffer size must be > 0".into()));
        }
        if self.threshold_divider == 0 {
            return Err(LatencyTestError::Init("threshold divider must be > 0".into()));
        }
        if self.test_count == 0 {
            return Err(LatencyTestError::Init("test count must be > 0".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(LatencyTestError::Init("timeout must be > 0".into()));
        }
        Ok(())
    }

    /// Read/write cycles approximating one second of audio.
    ///
    /// Used to drain startup transients before measuring and to bound the
    /// per-impulse detection window.
    pub fn padding(&self) -> usize {
        ((self.sample_rate_hz as usize) / self.buffer_size_frames).max(1)
    }

    /// Detection threshold derived from the divider.
    pub fn threshold(&self) -> i32 {
        i16::MAX as i32 / self.threshold_divider as i32
    }
}

/// One detected impulse, in detection order.
#[derive(Debug, Clone, Copy)]
pub struct DetectionEvent {
    /// Elapsed time from impulse emission to detection, truncated milliseconds
    pub raw_latency_ms: i64,
    /// Position within the capture buffer where the impulse crossed threshold
    pub detection_offset_frames: usize,
}

/// How a run that produced a result set ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestOutcome {
    /// All configured impulses were detected
    Completed,
    /// Caller requested a stop; the series hold whatever had accumulated
    Cancelled,
}

/// Result of a latency test run.
///
/// `raw` and `normalized` have equal length: the number of impulses actually
/// detected, at most the configured test count. Both are empty only when the
/// run was cancelled before the first detection or no signal ever crossed the
/// threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyResultSet {
    /// Measured round-trip latencies in milliseconds, detection order
    pub raw: Vec<i64>,
    /// Latencies normalized to detection at buffer position 0
    pub normalized: Vec<i64>,
    /// Whether the run completed or was cancelled
    pub outcome: TestOutcome,
    /// Buffer size used, in frames
    pub buffer_size_frames: usize,
    /// Sample bit depth (always 16)
    pub bit_depth: u16,
    /// Sample rate used, in Hz
    pub sample_rate_hz: u32,
}

/// Run a latency test to completion, cancellation, or timeout.
///
/// Blocks the calling thread on port I/O for the whole run; use
/// [`TestHandle::spawn`] to run in the background. The cancellation flag is
/// polled once per impulse iteration, so worst-case cancellation latency is
/// one in-flight I/O call plus the remainder of the current padding sub-loop.
///
/// The port is released on every exit path.
///
/// # Arguments
/// * `config` - Immutable run configuration
/// * `port` - Duplex PCM port, exclusively owned for the duration of the run
/// * `cancel` - Cooperative cancellation flag
pub fn run_latency_test(
    config: &TestConfiguration,
    port: &mut dyn PcmStreamPort,
    cancel: &AtomicBool,
) -> Result<LatencyResultSet, LatencyTestError> {
    config.validate()?;

    let threshold = config.threshold();
    let padding = config.padding();
    let frames = config.buffer_size_frames;
    let timeout = Duration::from_secs(config.timeout_seconds);

    if let Err(e) = open_streams(port, config) {
        port.release();
        return Err(LatencyTestError::Init(e.to_string()));
    }

    let buffers = ImpulseBuffers::new(frames);
    let mut capture = vec![0i16; frames];

    tracing::info!(
        threshold,
        padding,
        test_count = config.test_count,
        "Starting latency test"
    );

    // Drain the startup transient before measuring.
    for _ in 0..padding {
        checked_write(port, &buffers.silence);
        checked_read(port, &mut capture);
    }

    let mut events: Vec<DetectionEvent> = Vec::with_capacity(config.test_count);
    let mut done = false;
    let mut cancelled = false;

    while !done {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!(detected = events.len(), "Latency test cancelled");
            cancelled = true;
            break;
        }

        // The emission call marks the start of this iteration's measurement.
        let start = Instant::now();
        checked_write(port, &buffers.mask);

        for _ in 0..padding {
            checked_read(port, &mut capture);

            if let Some(offset) = first_crossing(&capture, threshold) {
                if events.len() < config.test_count {
                    let raw_latency_ms = (start.elapsed().as_nanos() / 1_000_000) as i64;
                    tracing::debug!(
                        raw_ms = raw_latency_ms,
                        offset_frames = offset,
                        "Impulse detected"
                    );
                    events.push(DetectionEvent {
                        raw_latency_ms,
                        detection_offset_frames: offset,
                    });
                } else {
                    done = true;
                }
            }

            // Keep the output primed with no new impulse.
            checked_write(port, &buffers.silence);
        }

        // One more read so write and read call counts stay balanced.
        checked_read(port, &mut capture);

        if start.elapsed() > timeout {
            tracing::info!(seconds = config.timeout_seconds, "Latency test timed out");
            port.release();
            return Err(LatencyTestError::TimedOut {
                seconds: config.timeout_seconds,
            });
        }
    }

    port.release();
    Ok(assemble_result(config, &events, cancelled))
}

/// Open and start both port directions for the configured run.
fn open_streams(
    port: &mut dyn PcmStreamPort,
    config: &TestConfiguration,
) -> Result<(), super::port::PortError> {
    port.open(config.sample_rate_hz, config.buffer_size_frames)?;
    port.start_playback()?;
    port.start_capture()?;
    Ok(())
}

/// Index of the first sample whose absolute value exceeds the threshold.
fn first_crossing(buf: &[i16], threshold: i32) -> Option<usize> {
    buf.iter().position(|&s| (s as i32).abs() > threshold)
}

fn checked_read(port: &mut dyn PcmStreamPort, buf: &mut [i16]) {
    let n = port.read(buf);
    if n < 0 {
        tracing::warn!(ret = n, "port read returned error");
    }
}

fn checked_write(port: &mut dyn PcmStreamPort, buf: &[i16]) {
    let n = port.write(buf);
    if n < 0 {
        tracing::warn!(ret = n, "port write returned error");
    }
}

fn assemble_result(
    config: &TestConfiguration,
    events: &[DetectionEvent],
    cancelled: bool,
) -> LatencyResultSet {
    // Frames per millisecond; offsets are dropped entirely below 1 kHz.
    let frames_per_ms = (config.sample_rate_hz / 1000).max(1) as i64;

    let raw: Vec<i64> = events.iter().map(|e| e.raw_latency_ms).collect();
    let normalized: Vec<i64> = events
        .iter()
        .map(|e| e.raw_latency_ms + e.detection_offset_frames as i64 / frames_per_ms)
        .collect();

    LatencyResultSet {
        raw,
        normalized,
        outcome: if cancelled {
            TestOutcome::Cancelled
        } else {
            TestOutcome::Completed
        },
        buffer_size_frames: config.buffer_size_frames,
        bit_depth: crate::BIT_DEPTH,
        sample_rate_hz: config.sample_rate_hz,
    }
}

/// Handle to a latency test running on a background thread.
///
/// Returned by [`TestHandle::spawn`]. The result is delivered over a bounded
/// channel so callers can poll with [`try_result`](Self::try_result) or block
/// with [`wait`](Self::wait). Dropping the handle cancels the run and joins
/// the worker.
pub struct TestHandle {
    cancel: Arc<AtomicBool>,
    result_rx: crossbeam_channel::Receiver<Result<LatencyResultSet, LatencyTestError>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TestHandle {
    /// Start a latency test on a dedicated worker thread.
    ///
    /// The port is moved into the worker; it must not be shared with a
    /// concurrent loopback run.
    pub fn spawn(
        config: TestConfiguration,
        mut port: Box<dyn PcmStreamPort>,
    ) -> Result<TestHandle> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);

        let flag = Arc::clone(&cancel);
        let thread = std::thread::Builder::new()
            .name("latency-test".into())
            .spawn(move || {
                let result = run_latency_test(&config, port.as_mut(), &flag);
                let _ = result_tx.send(result);
            })
            .map_err(|e| anyhow!("Failed to spawn latency test worker: {e}"))?;

        Ok(TestHandle {
            cancel,
            result_rx,
            thread: Some(thread),
        })
    }

    /// Request cancellation; observed at the next impulse iteration boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Non-blocking poll for the finished result.
    pub fn try_result(&self) -> Option<Result<LatencyResultSet, LatencyTestError>> {
        self.result_rx.try_recv().ok()
    }

    /// Check if the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Block until the run finishes and return its result.
    pub fn wait(mut self) -> Result<LatencyResultSet, LatencyTestError> {
        let result = self
            .result_rx
            .recv()
            .unwrap_or(Err(LatencyTestError::WorkerLost));
        if let Some(h) = self.thread.take() {
            let _ = h.join();
        }
        result
    }
}

impl Drop for TestHandle {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(h) = self.thread.take() {
            let _ = h.join();
        }
    }
}
