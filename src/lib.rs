//! Latencybench - round-trip audio latency estimation
//!
//! Plays a short impulse through an audio output stream while concurrently
//! reading from an input stream, detects when the impulse reappears in the
//! captured signal, and derives a latency distribution (raw and
//! position-normalized) with summary statistics.
//!
//! Audio I/O itself is a consumed capability: callers supply a
//! [`PcmStreamPort`] implementation for their platform backend.

pub mod audio;
pub mod stats;

pub use audio::estimator::{
    run_latency_test, LatencyResultSet, LatencyTestError, TestConfiguration, TestHandle,
    TestOutcome, ThresholdLevel,
};
pub use audio::impulse::ImpulseBuffers;
pub use audio::loopback::{run_loopback, LoopbackHandle};
pub use audio::port::{PcmStreamPort, PortError};
pub use stats::report::{format_report, summarize, Statistics};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default sample rate for latency tests
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Sample bit depth; the measurement path is fixed to 16-bit signed PCM
pub const BIT_DEPTH: u16 = 16;
