//! Duplex PCM stream port abstraction
//!
//! The estimator and loopback runner do not talk to a platform audio API
//! directly. They drive a [`PcmStreamPort`]: a blocking, mono, 16-bit duplex
//! stream opened at a fixed sample rate. Backends (ALSA, CoreAudio, a
//! simulated echo port in tests) implement this trait.

use thiserror::Error;

/// Errors raised while acquiring or starting a stream port
#[derive(Error, Debug)]
pub enum PortError {
    #[error("Failed to open stream: {0}")]
    OpenFailed(String),

    #[error("Buffer size {requested} below device minimum {minimum}")]
    BufferTooSmall { requested: usize, minimum: usize },

    #[error("Sample rate {0} Hz not supported")]
    UnsupportedSampleRate(u32),

    #[error("Stream not open")]
    NotOpen,
}

/// Blocking duplex PCM audio port: mono, 16-bit signed, fixed sample rate.
///
/// `read` and `write` block the calling thread until the full buffer has been
/// transferred or an error occurs. Following the platform return-code
/// convention, both return the number of frames transferred and a negative
/// value on a transient error; callers are expected to log and continue.
///
/// `release` must be idempotent — the measurement loops call it on every exit
/// path (completion, timeout, cancellation).
pub trait PcmStreamPort: Send {
    /// Open both capture and playback sub-streams at the given configuration.
    fn open(&mut self, sample_rate_hz: u32, buffer_size_frames: usize) -> Result<(), PortError>;

    /// Begin capturing input frames.
    fn start_capture(&mut self) -> Result<(), PortError>;

    /// Begin playback of output frames.
    fn start_playback(&mut self) -> Result<(), PortError>;

    /// Read `buf.len()` frames of captured audio, blocking until complete.
    ///
    /// # Returns
    /// Frames read, or a negative value on a transient error.
    fn read(&mut self, buf: &mut [i16]) -> isize;

    /// Write `buf.len()` frames to the playback stream, blocking until complete.
    ///
    /// # Returns
    /// Frames written, or a negative value on a transient error.
    fn write(&mut self, buf: &[i16]) -> isize;

    /// Stop and close both sub-streams. Idempotent.
    fn release(&mut self);
}
