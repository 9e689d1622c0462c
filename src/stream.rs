use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::sample_store::SampleStore;
use crate::volume::GAIN_UNITY;

/// A playable position into a [`SampleStore`] (spec.md §4.1/§4.2's
/// `Stream`). Fields are atomics rather than behind a lock: `rewind`,
/// `set_looping` and `set_volume` are invoked (indirectly, via commands
/// drained during intake) from the mixer thread, while `peek_position`
/// and `is_finished` are read from arbitrary producer threads through
/// `PlaybackObject` — sequential consistency keeps both directions
/// coherent without the mixer thread ever blocking.
pub struct Stream {
    store: Arc<SampleStore>,
    pos: AtomicUsize,
    looping: AtomicBool,
    volumes: [AtomicU16; 2],
    finished: AtomicBool,
}

impl Stream {
    pub fn new(store: Arc<SampleStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            pos: AtomicUsize::new(0),
            looping: AtomicBool::new(false),
            volumes: [AtomicU16::new(GAIN_UNITY), AtomicU16::new(GAIN_UNITY)],
            finished: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    /// Resets playback to the start of the buffer and clears `finished`.
    /// Called when a `Play` command is drained for this stream.
    pub fn rewind(&self) {
        self.pos.store(0, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::SeqCst);
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }

    pub fn set_volume(&self, channel: usize, gain: u16) {
        self.volumes[channel].store(gain, Ordering::SeqCst);
    }

    pub fn peek_position(&self) -> usize {
        self.pos.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Mixes up to `dest.len()` samples into `dest` (accumulating, not
    /// overwriting — `dest` already holds other streams' contributions).
    /// Returns the number of samples actually written. Fewer than
    /// `dest.len()` means a non-looping stream ran off the end of its
    /// buffer mid-call; `is_finished()` becomes true in that case.
    ///
    /// Only ever called from the mixer thread during the render phase
    /// of a tick; never allocates, locks, or blocks.
    pub fn render(&self, dest: &mut [i32]) -> usize {
        let total = self.store.nsamples();
        let looping = self.looping.load(Ordering::SeqCst);
        let gains = [
            self.volumes[0].load(Ordering::SeqCst) as i32,
            self.volumes[1].load(Ordering::SeqCst) as i32,
        ];
        let mut pos = self.pos.load(Ordering::SeqCst);

        // SAFETY: the stream is only in the mixer's active list once its
        // buffer has been fully written and unlocked by the producer;
        // no writer runs concurrently with this read.
        let samples = unsafe { self.store.samples() };

        let mut written = 0;
        while written < dest.len() {
            if pos >= total {
                if looping {
                    pos = 0;
                } else {
                    break;
                }
            }
            let channel = written % 2;
            dest[written] += samples[pos] as i32 * gains[channel];
            pos += 1;
            written += 1;
        }

        if pos >= total && !looping {
            self.finished.store(true, Ordering::SeqCst);
        }
        self.pos.store(pos, Ordering::SeqCst);
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_of(samples: &[i16]) -> Arc<SampleStore> {
        let store = SampleStore::alloc(samples.len()).unwrap();
        unsafe { store.write_span(0, samples).unwrap() };
        Arc::new(store)
    }

    #[test]
    fn non_looping_stream_stops_at_buffer_end() {
        let stream = Stream::new(store_of(&[1, 2, 3, 4]));
        let mut acc = vec![0i32; 10];
        let written = stream.render(&mut acc);
        assert_eq!(written, 4);
        assert!(stream.is_finished());
    }

    #[test]
    fn looping_stream_wraps_scenario_four_from_spec() {
        // Stereo buffer of two frames (4 samples): [1, 2, 3, 4].
        let stream = Stream::new(store_of(&[1, 2, 3, 4]));
        stream.set_looping(true);
        let mut acc = vec![0i32; 10];
        let written = stream.render(&mut acc);
        assert_eq!(written, 10);
        assert!(!stream.is_finished());
        let expected = [256, 512, 768, 1024, 256, 512, 768, 1024, 256, 512];
        assert_eq!(acc, expected.map(i32::from));
    }

    #[test]
    fn render_accumulates_rather_than_overwrites() {
        let stream = Stream::new(store_of(&[10, 10]));
        let mut acc = vec![5i32, -5];
        stream.render(&mut acc);
        assert_eq!(acc, [5 + 10 * 256, -5 + 10 * 256]);
    }

    #[test]
    fn volume_scales_each_channel_independently() {
        let stream = Stream::new(store_of(&[100, 100]));
        stream.set_volume(0, 0);
        stream.set_volume(1, GAIN_UNITY);
        let mut acc = vec![0i32; 2];
        stream.render(&mut acc);
        assert_eq!(acc, [0, 100 * 256]);
    }

    #[test]
    fn rewind_resets_position_and_finished_flag() {
        let stream = Stream::new(store_of(&[1, 2]));
        let mut acc = vec![0i32; 2];
        stream.render(&mut acc);
        assert!(stream.is_finished());
        stream.rewind();
        assert!(!stream.is_finished());
        assert_eq!(stream.peek_position(), 0);
    }
}
