//! Audio measurement module
//!
//! This module contains the measurement core:
//! - Duplex PCM stream port abstraction ([`port`])
//! - Silence and impulse output buffers ([`impulse`])
//! - Impulse round-trip latency estimation ([`estimator`])
//! - Input-to-output relay for path verification ([`loopback`])

pub mod estimator;
pub mod impulse;
pub mod loopback;
pub mod port;
