//! Continuous input-to-output audio relay
//!
//! Relays captured audio straight back to the playback stream with no
//! measurement, until cancelled. Lets a user audibly confirm the I/O path
//! works and keeps the port under sustained load. Shares the port contract
//! with the estimator, so the two must never run against the same device
//! concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::port::{PcmStreamPort, PortError};

/// Run the relay loop until the cancel flag is observed.
///
/// Individual read/write failures (negative port return codes) are logged and
/// the loop continues; audio port errors on a healthy device are expected to
/// be self-correcting glitches. The port is released on every exit path.
pub fn run_loopback(
    port: &mut dyn PcmStreamPort,
    sample_rate_hz: u32,
    buffer_size_frames: usize,
    cancel: &AtomicBool,
) -> Result<(), PortError> {
    if let Err(e) = open_streams(port, sample_rate_hz, buffer_size_frames) {
        port.release();
        return Err(e);
    }

    tracing::info!(sample_rate_hz, buffer_size_frames, "Loopback started");

    let mut buffer = vec![0i16; buffer_size_frames];
    while !cancel.load(Ordering::Relaxed) {
        let n = port.read(&mut buffer);
        if n < 0 {
            tracing::warn!(ret = n, "loopback read returned error");
        }
        let n = port.write(&buffer);
        if n < 0 {
            tracing::warn!(ret = n, "loopback write returned error");
        }
    }

    tracing::info!("Loopback cancelled");
    port.release();
    Ok(())
}

fn open_streams(
    port: &mut dyn PcmStreamPort,
    sample_rate_hz: u32,
    buffer_size_frames: usize,
) -> Result<(), PortError> {
    port.open(sample_rate_hz, buffer_size_frames)?;
    port.start_capture()?;
    port.start_playback()?;
    Ok(())
}

/// Handle to a loopback relay running on a background thread.
pub struct LoopbackHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl LoopbackHandle {
    /// Start the relay on a dedicated worker thread.
    pub fn spawn(
        mut port: Box<dyn PcmStreamPort>,
        sample_rate_hz: u32,
        buffer_size_frames: usize,
    ) -> Result<LoopbackHandle> {
        let cancel = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cancel);
        let thread = std::thread::Builder::new()
            .name("loopback".into())
            .spawn(move || {
                if let Err(e) = run_loopback(port.as_mut(), sample_rate_hz, buffer_size_frames, &flag)
                {
                    tracing::error!("Loopback failed to start: {e}");
                }
            })
            .map_err(|e| anyhow!("Failed to spawn loopback worker: {e}"))?;

        Ok(LoopbackHandle {
            cancel,
            thread: Some(thread),
        })
    }

    /// Request a stop and wait for the worker to finish its in-flight cycle.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(h) = self.thread.take() {
            let _ = h.join();
        }
    }

    /// Check if the relay thread is still alive.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for LoopbackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
