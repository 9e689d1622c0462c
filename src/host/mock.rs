//! An in-memory [`Endpoint`] used by the crate's own tests and by
//! embedders exercising `AudioHost` without real hardware. Always
//! ready, never actually blocks on anything external.
//!
//! Also drives [`super::AudioHost`]'s own test suite (see
//! `host/mod.rs`'s `tests` module): the `fail_negotiate`/`fail_after`/
//! `invalidate_once` knobs below exist to exercise `AudioHost::start`'s
//! early-exit path and its run loop's fatal-vs-recoverable error
//! handling without real hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::Endpoint;
use crate::error::{MixError, MixResult};

pub struct MockEndpoint {
    buffer: Vec<i16>,
    nframes: usize,
    negotiate_count: Arc<AtomicUsize>,
    tick_count: Arc<AtomicUsize>,
    fail_negotiate: bool,
    fail_after: Option<usize>,
    invalidate_once: bool,
    invalidated: bool,
}

impl MockEndpoint {
    pub fn new(nframes: usize) -> Self {
        Self {
            buffer: vec![0i16; nframes * 2],
            nframes,
            negotiate_count: Arc::new(AtomicUsize::new(0)),
            tick_count: Arc::new(AtomicUsize::new(0)),
            fail_negotiate: false,
            fail_after: None,
            invalidate_once: false,
            invalidated: false,
        }
    }

    /// Counter shared with the constructed endpoint, so a test can
    /// observe how many times `negotiate` ran (including
    /// reinitializations after a simulated device invalidation) after
    /// the endpoint has moved into an `AudioHost`.
    pub fn negotiate_count_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.negotiate_count)
    }

    /// Counter shared with the constructed endpoint, incremented once
    /// per successful `acquire_buffer`.
    pub fn tick_count_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.tick_count)
    }

    /// `negotiate` returns a fatal error every time it's called.
    pub fn failing_negotiation(mut self) -> Self {
        self.fail_negotiate = true;
        self
    }

    /// `acquire_buffer` returns a fatal error starting on the `n`th
    /// call (1-indexed).
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// The first `acquire_buffer` call returns
    /// `MixError::DeviceInvalidated`; every call after the next
    /// `negotiate` succeeds normally.
    pub fn invalidated_once(mut self) -> Self {
        self.invalidate_once = true;
        self
    }
}

impl Endpoint for MockEndpoint {
    fn negotiate(&mut self) -> MixResult<usize> {
        self.negotiate_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_negotiate {
            return Err(MixError::Endpoint("simulated negotiation failure".into()));
        }
        Ok(self.nframes)
    }

    fn preroll_silence(&mut self) -> MixResult<()> {
        self.buffer.iter_mut().for_each(|s| *s = 0);
        Ok(())
    }

    fn wait_ready(&mut self, _timeout: Duration) -> MixResult<bool> {
        Ok(true)
    }

    fn acquire_buffer(&mut self) -> MixResult<&mut [i16]> {
        if self.invalidate_once && !self.invalidated {
            self.invalidated = true;
            return Err(MixError::DeviceInvalidated("simulated dropout".into()));
        }
        let count = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(fail_after) = self.fail_after {
            if count >= fail_after {
                return Err(MixError::Endpoint("simulated mid-stream failure".into()));
            }
        }
        Ok(&mut self.buffer)
    }

    fn release_buffer(&mut self) -> MixResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_reports_the_configured_frame_count() {
        let mut ep = MockEndpoint::new(128);
        assert_eq!(ep.negotiate().unwrap(), 128);
    }

    #[test]
    fn acquire_buffer_is_sized_for_stereo_frames() {
        let mut ep = MockEndpoint::new(64);
        assert_eq!(ep.acquire_buffer().unwrap().len(), 128);
    }
}
