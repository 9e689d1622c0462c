use std::cell::UnsafeCell;

use crate::error::{MixError, MixResult};

/// Owns a fixed-size buffer of interleaved stereo 16-bit PCM samples
/// (spec.md §4.1's `SampleStore`). `nsamples` is the per-channel sample
/// count and must be even, mirroring `snd_buffer_alloc`'s requirement
/// that the buffer divide evenly into stereo frames.
///
/// The backing storage is an `UnsafeCell` rather than a `Mutex`: readers
/// (the mixer thread, via [`SampleStore::samples`]) and the writer (a
/// producer thread, via `Lock`/`Unlock`) never overlap in time by
/// contract — a stream is only added to the mixer's active list after
/// the client has finished writing it, and `Lock`/`Unlock` themselves
/// are always called from a single producer thread owning the
/// `PlaybackObject`. Enforcing that externally rather than with a lock
/// keeps the mixer thread wait-free.
pub struct SampleStore {
    data: UnsafeCell<Box<[i16]>>,
    nsamples: usize,
}

// SAFETY: see the struct docs above — access to `data` is serialized by
// calling convention, not by the type system. No two threads ever call
// `write_span`/`samples` concurrently against the same instance. (Send
// is already auto-derived; only `Sync` needs the manual override, since
// `UnsafeCell` is never `Sync` on its own.)
unsafe impl Sync for SampleStore {}

impl SampleStore {
    /// `nsamples` is the total interleaved sample count (both channels),
    /// i.e. `2 * frame_count`. Must be even and nonzero.
    pub fn alloc(nsamples: usize) -> MixResult<Self> {
        if nsamples == 0 || nsamples % 2 != 0 {
            return Err(MixError::InvalidArg(format!(
                "sample store size {nsamples} must be a nonzero even number of samples"
            )));
        }
        Ok(Self {
            data: UnsafeCell::new(vec![0i16; nsamples].into_boxed_slice()),
            nsamples,
        })
    }

    pub fn nsamples(&self) -> usize {
        self.nsamples
    }

    pub fn nbytes(&self) -> usize {
        self.nsamples * std::mem::size_of::<i16>()
    }

    /// Read-only view of the whole buffer. Caller must ensure no writer
    /// is active (see struct docs).
    ///
    /// # Safety
    /// Must not be called concurrently with `write_span` on the same
    /// instance.
    pub unsafe fn samples(&self) -> &[i16] {
        unsafe { &*self.data.get() }
    }

    /// Overwrites `[offset, offset + samples.len())` with `samples`.
    /// `EntireBuffer` locks pass `offset == 0` and a full-length slice;
    /// spec.md's Lock resolution (see DESIGN.md) means this is currently
    /// the only span producers ever write.
    ///
    /// # Safety
    /// Must not be called concurrently with `samples` or another
    /// `write_span` on the same instance.
    pub unsafe fn write_span(&self, offset: usize, samples: &[i16]) -> MixResult<()> {
        if offset + samples.len() > self.nsamples {
            return Err(MixError::InvalidArg(format!(
                "write span [{offset}, {}) exceeds buffer of {} samples",
                offset + samples.len(),
                self.nsamples
            )));
        }
        let dest = unsafe { &mut *self.data.get() };
        dest[offset..offset + samples.len()].copy_from_slice(samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_odd_sample_count() {
        assert!(SampleStore::alloc(3).is_err());
    }

    #[test]
    fn rejects_zero() {
        assert!(SampleStore::alloc(0).is_err());
    }

    #[test]
    fn write_then_read_round_trips() {
        let store = SampleStore::alloc(8).unwrap();
        let payload = [1i16, -2, 3, -4, 5, -6, 7, -8];
        unsafe {
            store.write_span(0, &payload).unwrap();
            assert_eq!(store.samples(), &payload);
        }
    }

    #[test]
    fn rejects_out_of_bounds_span() {
        let store = SampleStore::alloc(4).unwrap();
        unsafe {
            assert!(store.write_span(2, &[1, 2, 3]).is_err());
        }
    }

    #[test]
    fn nbytes_matches_nsamples_times_two() {
        let store = SampleStore::alloc(100).unwrap();
        assert_eq!(store.nbytes(), 200);
    }
}
