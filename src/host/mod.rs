//! The OS audio endpoint driver (spec.md §6: out of scope to implement
//! in full, WASAPI exclusive-mode specifics included, but the contract
//! it plugs into belongs here). [`Endpoint`] is the seam; [`AudioHost`]
//! is the realtime thread loop every concrete backend plugs into,
//! grounded on the teacher's `src/audio/wasapi.rs` run loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::command_queue::CommandQueue;
use crate::error::{MixError, MixResult};
use crate::mixer::MixerEngine;

#[cfg(target_os = "windows")]
pub mod wasapi;

pub mod mock;

/// How long the endpoint's wait may block for before `AudioHost` checks
/// the stop flag again. Mirrors the teacher's `WAIT_TIMEOUT_MS`-style
/// poll in `wasapi.rs`, since Rust has no portable "wait on either of
/// two handles" primitive the way `WaitForMultipleObjects` gives the
/// original C.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Negotiated, opened connection to an OS audio device, driven
/// exclusively from the realtime thread `AudioHost::start` spawns.
pub trait Endpoint: Send {
    /// Opens the device in exclusive mode and returns the negotiated
    /// per-tick frame count. May retry internally (e.g. WASAPI's
    /// `AUDCLNT_E_BUFFER_SIZE_NOT_ALIGNED` renegotiation).
    fn negotiate(&mut self) -> MixResult<usize>;

    /// Fills and submits one buffer of silence before the render loop
    /// starts, so the endpoint never underruns waiting on the first
    /// real tick.
    fn preroll_silence(&mut self) -> MixResult<()>;

    /// Blocks up to `timeout` for the endpoint to want its next buffer.
    /// Returns `true` if a buffer is ready, `false` on timeout (not an
    /// error — just a chance for the caller to check for shutdown).
    fn wait_ready(&mut self, timeout: Duration) -> MixResult<bool>;

    /// Borrows the buffer to render this tick's samples into.
    fn acquire_buffer(&mut self) -> MixResult<&mut [i16]>;

    /// Hands the filled buffer back to the endpoint.
    fn release_buffer(&mut self) -> MixResult<()>;
}

/// Owns the realtime audio thread. Spawns it in `start`, signals it to
/// stop and joins it on drop.
pub struct AudioHost {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<MixResult<()>>>,
}

impl AudioHost {
    /// Spawns the realtime thread, blocking the caller until either
    /// negotiation succeeds (the thread signals `started`) or the
    /// thread exits early with an error.
    pub fn start(mut endpoint: Box<dyn Endpoint>, service: Arc<CommandQueue>) -> MixResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let started = Arc::new((Mutex::new(false), Condvar::new()));

        let thread_stop = Arc::clone(&stop);
        let thread_started = Arc::clone(&started);

        let thread = thread::spawn(move || -> MixResult<()> {
            tracing::info!("audio host thread starting");
            let nframes = endpoint.negotiate()?;
            endpoint.preroll_silence()?;
            let mut mixer = MixerEngine::new(service, nframes);

            {
                let (lock, cvar) = &*thread_started;
                let mut guard = lock.lock().unwrap();
                *guard = true;
                cvar.notify_all();
            }

            while !thread_stop.load(Ordering::SeqCst) {
                let step = (|| -> MixResult<()> {
                    if !endpoint.wait_ready(POLL_TIMEOUT)? {
                        return Ok(());
                    }
                    let buf = endpoint.acquire_buffer()?;
                    mixer.tick(buf);
                    endpoint.release_buffer()
                })();

                // A device dropping out (unplugged, stolen by another
                // exclusive-mode client) is not fatal: renegotiate and
                // keep running, matching the teacher's own
                // `AUDCLNT_E_DEVICE_INVALIDATED` handling in
                // `src/audio/wasapi.rs`. Any other endpoint failure is
                // fatal and propagates, ending the thread.
                if let Err(MixError::DeviceInvalidated(reason)) = step {
                    tracing::warn!(%reason, "audio device invalidated, renegotiating");
                    endpoint.negotiate()?;
                } else {
                    step?;
                }
            }

            tracing::info!("audio host thread exiting");
            Ok(())
        });

        {
            let (lock, cvar) = &*started;
            let mut guard = lock.lock().unwrap();
            while !*guard && !thread.is_finished() {
                let (g, _timed_out) = cvar.wait_timeout(guard, Duration::from_millis(20)).unwrap();
                guard = g;
            }
        }

        let mut host = Self {
            stop,
            thread: Some(thread),
        };
        if host.thread.as_ref().unwrap().is_finished() {
            let result = host.thread.take().unwrap().join().unwrap();
            result?;
        }
        Ok(host)
    }
}

impl Drop for AudioHost {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Err(err) => tracing::error!(?err, "audio host thread panicked"),
                Ok(Err(err)) => {
                    tracing::error!(%err, "audio host thread exited with an error")
                }
                Ok(Ok(())) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockEndpoint;
    use std::thread::sleep;

    #[test]
    fn start_blocks_until_negotiation_then_stops_cleanly() {
        crate::test_support::init_tracing();
        let service = CommandQueue::new();
        let host = AudioHost::start(Box::new(MockEndpoint::new(4)), service).unwrap();
        drop(host);
    }

    #[test]
    fn start_surfaces_an_early_negotiate_failure() {
        crate::test_support::init_tracing();
        let service = CommandQueue::new();
        let endpoint = MockEndpoint::new(4).failing_negotiation();
        let result = AudioHost::start(Box::new(endpoint), service);
        assert!(result.is_err());
    }

    #[test]
    fn device_invalidation_renegotiates_instead_of_killing_the_thread() {
        crate::test_support::init_tracing();
        let service = CommandQueue::new();
        let endpoint = MockEndpoint::new(4).invalidated_once();
        let negotiate_count = endpoint.negotiate_count_handle();
        let host = AudioHost::start(Box::new(endpoint), service).unwrap();

        for _ in 0..50 {
            if negotiate_count.load(Ordering::SeqCst) >= 2 {
                break;
            }
            sleep(Duration::from_millis(5));
        }
        assert!(negotiate_count.load(Ordering::SeqCst) >= 2);
        drop(host);
    }

    #[test]
    fn mid_stream_fatal_failure_ends_the_thread_and_drop_does_not_hang() {
        crate::test_support::init_tracing();
        let service = CommandQueue::new();
        let endpoint = MockEndpoint::new(4).failing_after(2);
        let tick_count = endpoint.tick_count_handle();
        let host = AudioHost::start(Box::new(endpoint), service).unwrap();

        for _ in 0..50 {
            if tick_count.load(Ordering::SeqCst) >= 2 {
                break;
            }
            sleep(Duration::from_millis(5));
        }
        // The thread has (or is about to have) exited with an error;
        // drop must still join cleanly rather than hang.
        drop(host);
    }
}
