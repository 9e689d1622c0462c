use std::sync::Arc;

use crate::command::Verb;
use crate::command_queue::CommandQueue;
use crate::stream::Stream;

/// Runs on the realtime audio thread (spec.md §4.4). A `MixerEngine`
/// never allocates once constructed, never locks a mutex, and its
/// `tick` never blocks — the only waits in the system happen on the
/// endpoint side, outside this type.
pub struct MixerEngine {
    service: Arc<CommandQueue>,
    active: Vec<Arc<Stream>>,
    accumulator: Vec<i32>,
}

impl MixerEngine {
    /// `frame_capacity` is the largest number of stereo frames a single
    /// `tick` will ever be asked to render; the accumulator is sized
    /// once up front so render never reallocates.
    pub fn new(service: Arc<CommandQueue>, frame_capacity: usize) -> Self {
        Self {
            service,
            active: Vec::new(),
            accumulator: vec![0i32; frame_capacity * 2],
        }
    }

    /// One pass over the pipeline: drain and apply pending commands,
    /// mix every active stream into `out`, then fire acknowledgement
    /// callbacks for the commands just applied. `out.len()` must be an
    /// even number of samples no larger than the capacity this engine
    /// was constructed with.
    pub fn tick(&mut self, out: &mut [i16]) {
        debug_assert_eq!(out.len() % 2, 0);
        debug_assert!(out.len() <= self.accumulator.len());

        // SAFETY: `MixerEngine` is only ever driven from the single
        // audio thread that owns it; these three calls make up the
        // entire mixer-thread-only contract on `CommandQueue`.
        unsafe {
            self.service.drain_intake();
        }

        self.intake();
        self.render(out);

        unsafe {
            for cmd in self.service.chamber_iter() {
                cmd.fire_callback();
            }
            self.service.exhaust_chamber();
        }
    }

    fn intake(&mut self) {
        let commands: Vec<_> = unsafe { self.service.chamber_iter() }.collect();
        for cmd in commands {
            let Some(verb) = cmd.verb() else {
                tracing::warn!("command drained with no verb set, ignoring");
                continue;
            };
            let Some(target) = cmd.target() else {
                tracing::warn!("command drained with no target stream, ignoring");
                continue;
            };

            match verb {
                Verb::Play { looping } => {
                    target.set_looping(looping);
                    target.rewind();
                    if !self.active.iter().any(|s| Arc::ptr_eq(s, target)) {
                        self.active.push(Arc::clone(target));
                    }
                    tracing::trace!("stream added to active list");
                }
                Verb::Stop => {
                    let before = self.active.len();
                    self.active.retain(|s| !Arc::ptr_eq(s, target));
                    if self.active.len() != before {
                        tracing::trace!("stream removed from active list");
                    }
                }
                Verb::SetVolume { gains } => {
                    target.set_volume(0, gains[0]);
                    target.set_volume(1, gains[1]);
                }
            }
        }
    }

    fn render(&mut self, out: &mut [i16]) {
        let accumulator = &mut self.accumulator[..out.len()];
        accumulator.iter_mut().for_each(|s| *s = 0);

        let active = &mut self.active;
        active.retain(|stream| {
            stream.render(accumulator);
            !stream.is_finished()
        });

        for (acc, sample) in accumulator.iter().zip(out.iter_mut()) {
            *sample = saturate(*acc);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// `work >> 8` then clamp to i16 range, matching the original mixer's
/// fixed-point-256-per-unity-gain accumulator format.
fn saturate(work: i32) -> i16 {
    (work >> 8).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::sample_store::SampleStore;

    fn store_of(samples: &[i16]) -> Arc<SampleStore> {
        let store = SampleStore::alloc(samples.len()).unwrap();
        unsafe { store.write_span(0, samples).unwrap() };
        Arc::new(store)
    }

    #[test]
    fn saturate_clamps_both_directions() {
        assert_eq!(saturate(i32::MAX), i16::MAX);
        assert_eq!(saturate(i32::MIN), i16::MIN);
        assert_eq!(saturate(256 * 100), 100);
    }

    #[test]
    fn play_command_adds_stream_to_active_list_and_mixes_it() {
        let service = CommandQueue::new();
        let mut mixer = MixerEngine::new(Arc::clone(&service), 4);
        let stream = Stream::new(store_of(&[100, 100]));

        let mut cmd = Command::new_idle();
        cmd.set_play(Arc::clone(&stream), false);
        service.submit(cmd);

        let mut out = [0i16; 2];
        mixer.tick(&mut out);

        assert_eq!(mixer.active_count(), 1);
        assert_eq!(out, [100, 100]);
    }

    #[test]
    fn stop_command_removes_stream_before_next_render() {
        let service = CommandQueue::new();
        let mut mixer = MixerEngine::new(Arc::clone(&service), 4);
        let stream = Stream::new(store_of(&[100, 100, 100, 100]));
        stream.set_looping(true);

        let mut play = Command::new_idle();
        play.set_play(Arc::clone(&stream), true);
        service.submit(play);

        let mut out = [0i16; 2];
        mixer.tick(&mut out);
        assert_eq!(mixer.active_count(), 1);

        let mut stop = Command::new_idle();
        stop.set_stop(Arc::clone(&stream));
        service.submit(stop);

        mixer.tick(&mut out);
        assert_eq!(mixer.active_count(), 0);
    }

    #[test]
    fn finished_non_looping_stream_is_pruned_from_active_list() {
        let service = CommandQueue::new();
        let mut mixer = MixerEngine::new(Arc::clone(&service), 4);
        let stream = Stream::new(store_of(&[1, 1]));

        let mut cmd = Command::new_idle();
        cmd.set_play(Arc::clone(&stream), false);
        service.submit(cmd);

        let mut out = [0i16; 2];
        mixer.tick(&mut out);
        assert_eq!(mixer.active_count(), 1);

        mixer.tick(&mut out);
        assert_eq!(mixer.active_count(), 0);
    }

    #[test]
    fn two_streams_mix_by_summation() {
        let service = CommandQueue::new();
        let mut mixer = MixerEngine::new(Arc::clone(&service), 4);
        let a = Stream::new(store_of(&[100, 0, 100, 0]));
        a.set_looping(true);
        let b = Stream::new(store_of(&[0, 100, 0, 100]));
        b.set_looping(true);

        let mut play_a = Command::new_idle();
        play_a.set_play(Arc::clone(&a), true);
        service.submit(play_a);
        let mut play_b = Command::new_idle();
        play_b.set_play(Arc::clone(&b), true);
        service.submit(play_b);

        let mut out = [0i16; 2];
        mixer.tick(&mut out);
        assert_eq!(out, [100, 100]);
    }

    #[test]
    fn command_callback_fires_after_the_tick_applies_it() {
        let service = CommandQueue::new();
        let mut mixer = MixerEngine::new(Arc::clone(&service), 4);
        let stream = Stream::new(store_of(&[1, 1]));

        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let mut cmd = Command::new_idle();
        cmd.set_play(Arc::clone(&stream), false);
        cmd.set_callback(Box::new(move || flag.store(true, std::sync::atomic::Ordering::SeqCst)));
        service.submit(cmd);

        let mut out = [0i16; 2];
        mixer.tick(&mut out);
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(mixer.active_count(), 1);
    }
}
