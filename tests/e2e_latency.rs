//! E2E tests for the impulse latency measurement pipeline
//!
//! Drives the public API against simulated duplex ports:
//! - a real-time paced echo port with a fixed synthetic delay, for timing
//!   accuracy and timeout behavior
//! - an unpaced echo port, for cancellation and init-failure behavior where
//!   wall-clock pacing is irrelevant

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use latencybench::{
    format_report, run_latency_test, LatencyTestError, PcmStreamPort, PortError,
    TestConfiguration, TestHandle, TestOutcome,
};

/// Simulated duplex port: output reappears as input after a fixed delay.
///
/// With `paced` set, every read sleeps for one buffer duration, so monotonic
/// timestamps taken around emissions measure realistic values. Instrumented
/// with shared counters so tests can assert I/O and release behavior after
/// the port has been moved into a run.
struct SimPort {
    delay_frames: usize,
    paced: bool,
    fail_open: bool,
    /// Stop echoing after this many impulses (None = echo forever)
    echo_limit: Option<usize>,
    /// Flag to set once the echo limit is reached
    cancel_flag: Option<Arc<AtomicBool>>,
    buffer_duration: Duration,
    line: VecDeque<i16>,
    impulses_seen: usize,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl SimPort {
    fn new(delay_frames: usize, paced: bool) -> Self {
        Self {
            delay_frames,
            paced,
            fail_open: false,
            echo_limit: None,
            cancel_flag: None,
            buffer_duration: Duration::ZERO,
            line: VecDeque::new(),
            impulses_seen: 0,
            reads: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Paced port whose capture side never carries the impulse back.
    fn silent() -> Self {
        let mut port = Self::new(0, true);
        port.echo_limit = Some(0);
        port
    }
}

impl PcmStreamPort for SimPort {
    fn open(&mut self, sample_rate_hz: u32, buffer_size_frames: usize) -> Result<(), PortError> {
        if self.fail_open {
            return Err(PortError::BufferTooSmall {
                requested: buffer_size_frames,
                minimum: buffer_size_frames * 2,
            });
        }
        self.buffer_duration =
            Duration::from_secs_f64(buffer_size_frames as f64 / sample_rate_hz as f64);
        self.line = std::iter::repeat(0i16).take(self.delay_frames).collect();
        Ok(())
    }

    fn start_capture(&mut self) -> Result<(), PortError> {
        Ok(())
    }

    fn start_playback(&mut self) -> Result<(), PortError> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [i16]) -> isize {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.paced {
            std::thread::sleep(self.buffer_duration);
        }
        for s in buf.iter_mut() {
            *s = self.line.pop_front().unwrap_or(0);
        }
        buf.len() as isize
    }

    fn write(&mut self, buf: &[i16]) -> isize {
        self.writes.fetch_add(1, Ordering::Relaxed);

        let mut frame = buf.to_vec();
        if frame.first() == Some(&i16::MAX) {
            self.impulses_seen += 1;
            if let Some(limit) = self.echo_limit {
                if self.impulses_seen > limit {
                    // Swallow the impulse; only silence comes back.
                    frame[0] = 0;
                }
                if self.impulses_seen >= limit {
                    if let Some(ref flag) = self.cancel_flag {
                        flag.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
        self.line.extend(frame);
        buf.len() as isize
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::Relaxed);
    }
}

fn paced_config() -> TestConfiguration {
    TestConfiguration {
        sample_rate_hz: 48000,
        buffer_size_frames: 9600, // 200 ms buffers, padding = 5
        threshold_divider: 5,
        test_count: 2,
        timeout_seconds: 10,
    }
}

fn fast_config() -> TestConfiguration {
    TestConfiguration {
        sample_rate_hz: 8000,
        buffer_size_frames: 800,
        threshold_divider: 5,
        test_count: 3,
        timeout_seconds: 5,
    }
}

/// A paced echo port with a 30 ms synthetic delay yields raw latencies within
/// one buffer duration of the delay, for exactly the configured test count.
#[test]
fn test_measures_synthetic_delay() {
    let config = paced_config();
    let delay_ms = 30i64;
    let delay_frames = (delay_ms * 48) as usize;
    let buffer_ms = 200i64;

    let mut port = SimPort::new(delay_frames, true);
    let released = Arc::clone(&port.released);
    let cancel = AtomicBool::new(false);

    let result = run_latency_test(&config, &mut port, &cancel).unwrap();

    assert_eq!(result.outcome, TestOutcome::Completed);
    assert_eq!(result.raw.len(), config.test_count);
    assert_eq!(result.normalized.len(), config.test_count);

    for &raw in &result.raw {
        assert!(
            (raw - delay_ms).abs() <= buffer_ms,
            "raw latency {raw} ms should be within one buffer duration of {delay_ms} ms"
        );
    }
    // Normalization adds the intra-buffer offset: the impulse lands 1440
    // frames into the captured buffer, 30 ms at 48 kHz.
    for (&raw, &norm) in result.raw.iter().zip(result.normalized.iter()) {
        assert_eq!(norm - raw, delay_ms);
    }

    assert!(released.load(Ordering::Relaxed));
}

/// Two identical runs over an identical simulated path agree exactly.
#[test]
fn test_repeated_runs_agree() {
    let config = fast_config();
    let cancel = AtomicBool::new(false);

    let mut first_port = SimPort::new(1200, false);
    let first = run_latency_test(&config, &mut first_port, &cancel).unwrap();

    let mut second_port = SimPort::new(1200, false);
    let second = run_latency_test(&config, &mut second_port, &cancel).unwrap();

    assert_eq!(first.raw, second.raw);
    assert_eq!(first.normalized, second.normalized);

    let first_stats = latencybench::summarize(&first.raw).unwrap();
    let second_stats = latencybench::summarize(&second.raw).unwrap();
    assert_eq!(first_stats.average, second_stats.average);
}

/// A port that never returns the impulse times the run out within roughly the
/// configured second, with no partial values surviving.
#[test]
fn test_times_out_without_signal() {
    let config = TestConfiguration {
        timeout_seconds: 1,
        ..paced_config()
    };
    let mut port = SimPort::silent();
    let released = Arc::clone(&port.released);
    let cancel = AtomicBool::new(false);

    let start = Instant::now();
    let err = run_latency_test(&config, &mut port, &cancel).unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err, LatencyTestError::TimedOut { seconds: 1 });
    // One second of priming plus one measurement window.
    assert!(
        elapsed < Duration::from_secs(4),
        "timeout should fire within one measurement window, took {elapsed:?}"
    );
    assert!(released.load(Ordering::Relaxed));
}

/// Cancelling after 2 of 10 impulses yields a partial result set with exactly
/// 2 entries in both series, tagged cancelled, with the port released.
#[test]
fn test_cancellation_mid_run() {
    let config = TestConfiguration {
        test_count: 10,
        ..fast_config()
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let mut port = SimPort::new(1200, false);
    port.echo_limit = Some(2);
    port.cancel_flag = Some(Arc::clone(&cancel));
    let released = Arc::clone(&port.released);

    let result = run_latency_test(&config, &mut port, &cancel).unwrap();

    assert_eq!(result.outcome, TestOutcome::Cancelled);
    assert_eq!(result.raw.len(), 2);
    assert_eq!(result.normalized.len(), 2);
    assert!(released.load(Ordering::Relaxed));
}

/// A port that refuses to open fails the run before any I/O happens.
#[test]
fn test_init_failure_before_any_io() {
    let config = paced_config();
    let mut port = SimPort::new(0, false);
    port.fail_open = true;
    let reads = Arc::clone(&port.reads);
    let writes = Arc::clone(&port.writes);
    let released = Arc::clone(&port.released);
    let cancel = AtomicBool::new(false);

    let err = run_latency_test(&config, &mut port, &cancel).unwrap_err();

    assert!(matches!(err, LatencyTestError::Init(_)));
    assert_eq!(reads.load(Ordering::Relaxed), 0);
    assert_eq!(writes.load(Ordering::Relaxed), 0);
    assert!(released.load(Ordering::Relaxed));
}

/// Background handle: spawn, cancel, and get a tagged partial result back.
#[test]
fn test_background_run_via_handle() {
    let config = TestConfiguration {
        test_count: 1000,
        timeout_seconds: 60,
        ..fast_config()
    };
    let port = SimPort::new(1200, true);
    let released = Arc::clone(&port.released);

    let handle = TestHandle::spawn(config, Box::new(port)).unwrap();
    assert!(handle.is_running());
    assert!(handle.try_result().is_none());

    std::thread::sleep(Duration::from_millis(50));
    handle.cancel();
    let result = handle.wait().unwrap();

    assert_eq!(result.outcome, TestOutcome::Cancelled);
    assert!(result.raw.len() < 1000);
    assert!(released.load(Ordering::Relaxed));
}

/// Reports render every outcome of a real run as readable text.
#[test]
fn test_report_from_run_outcomes() {
    let config = fast_config();
    let cancel = AtomicBool::new(false);

    let mut port = SimPort::new(1200, false);
    let completed = run_latency_test(&config, &mut port, &cancel);
    let report = format_report(&completed);
    assert!(report.contains("Result for impulse measurement"));
    assert!(report.contains("Sample rate: 8000 Hz"));
    assert!(report.contains("Number of tests: 3"));
    // An unpaced port measures ~0 ms, which the report must call out.
    assert!(report.contains("ERROR: No valid signal received"));

    let mut port = SimPort::new(0, false);
    port.fail_open = true;
    let failed = run_latency_test(&config, &mut port, &cancel);
    let report = format_report(&failed);
    assert!(report.contains("Test failed:"));
    assert!(report.contains("below device minimum"));
}
