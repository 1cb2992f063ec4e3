//! Canonical output buffers for the impulse latency test
//!
//! Two buffers are written during a run: an all-zero silence buffer used for
//! priming and padding, and a mask buffer carrying a single maximal-amplitude
//! sample at index 0 — the impulse the scan loop looks for in captured audio.

/// The two output buffers used by one measurement run.
///
/// Both buffers have the same length (the configured buffer size in frames)
/// and are built once at run start, read-only thereafter.
///
/// # Example
/// ```
/// use latencybench::audio::impulse::ImpulseBuffers;
///
/// let buffers = ImpulseBuffers::new(256);
/// assert_eq!(buffers.mask[0], i16::MAX);
/// assert!(buffers.silence.iter().all(|&s| s == 0));
/// ```
#[derive(Debug, Clone)]
pub struct ImpulseBuffers {
    /// All-zero flush/padding buffer
    pub silence: Vec<i16>,
    /// Impulse at sample 0, zero elsewhere
    pub mask: Vec<i16>,
}

impl ImpulseBuffers {
    /// Build the silence and mask buffers for the given buffer size.
    ///
    /// # Arguments
    /// * `buffer_size_frames` - Frames per buffer, must be >= 1
    pub fn new(buffer_size_frames: usize) -> Self {
        assert!(buffer_size_frames >= 1, "buffer size must be at least 1 frame");

        let silence = vec![0i16; buffer_size_frames];
        let mut mask = vec![0i16; buffer_size_frames];
        mask[0] = i16::MAX;

        Self { silence, mask }
    }
}
