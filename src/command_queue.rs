use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::command::Command;
use crate::queue::{reverse_chain, ChainIter, PrivateFifo, SharedStack};

/// The shared object every [`crate::client::Client`], the
/// [`crate::mixer::MixerEngine`], and the [`crate::reaper::Reaper`] hold
/// a handle to (spec.md §4.5's `CommandQueue`). Three chains make up the
/// whole pipeline:
///
/// - `intake`: producers push filled-in commands here.
/// - `chamber`: the mixer's own private FIFO, populated once per tick by
///   draining `intake`, then iterated twice (apply side effects, then
///   fire callbacks) before being spliced onto `exhaust` in one move.
/// - `exhaust`: processed commands producers reclaim into their own
///   pool the next time they need to allocate one.
pub struct CommandQueue {
    intake: SharedStack,
    chamber: UnsafeCell<PrivateFifo>,
    exhaust: SharedStack,
}

// SAFETY: `chamber` is only ever touched through the `unsafe fn`s below,
// which are documented as mixer-thread-only. `Send` is already
// auto-derived (every field is `Send`); only `Sync` needs the manual
// override, since `UnsafeCell` is never `Sync` on its own.
unsafe impl Sync for CommandQueue {}

impl CommandQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            intake: SharedStack::new(),
            chamber: UnsafeCell::new(PrivateFifo::new()),
            exhaust: SharedStack::new(),
        })
    }

    /// Pushes a filled-in command onto the intake stack. Safe to call
    /// from any producer thread.
    pub(crate) fn submit(&self, cmd: Box<Command>) {
        self.intake.push(cmd);
    }

    /// Drains the shared exhaust stack into `pool`, restoring submission
    /// order. Safe to call from any thread; typically a `Client`
    /// refilling its own private pool.
    pub(crate) fn reclaim_exhausted(&self, pool: &mut PrivateFifo) {
        let lifo = self.exhaust.take_all();
        let (head, tail) = reverse_chain(lifo);
        pool.push_chain(head, tail);
    }

    /// Moves everything waiting on `intake` into the mixer's private
    /// chamber, in submission order.
    ///
    /// # Safety
    /// Must only be called from the single mixer thread.
    pub(crate) unsafe fn drain_intake(&self) {
        let lifo = self.intake.take_all();
        let (head, tail) = reverse_chain(lifo);
        if !head.is_null() {
            unsafe { (*self.chamber.get()).push_chain(head, tail) };
        }
    }

    /// Iterates the chamber without draining it. Called twice per tick:
    /// once to apply each command's side effect, once to fire callbacks.
    ///
    /// # Safety
    /// Must only be called from the single mixer thread.
    pub(crate) unsafe fn chamber_iter(&self) -> ChainIter<'_> {
        unsafe { (*self.chamber.get()).iter() }
    }

    /// Moves the whole (now fully processed) chamber onto the shared
    /// exhaust stack in one splice, leaving the chamber empty.
    ///
    /// # Safety
    /// Must only be called from the single mixer thread.
    pub(crate) unsafe fn exhaust_chamber(&self) {
        let taken = unsafe { (*self.chamber.get()).take_chain() };
        if let Some((head, tail)) = taken {
            self.exhaust.push_chain(head, tail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_store::SampleStore;
    use crate::stream::Stream;

    fn stream() -> Arc<Stream> {
        Stream::new(Arc::new(SampleStore::alloc(2).unwrap()))
    }

    #[test]
    fn full_tick_cycle_moves_commands_intake_to_exhaust() {
        let queue = CommandQueue::new();
        let mut cmd = Command::new_idle();
        cmd.set_play(stream(), false);
        queue.submit(cmd);

        unsafe {
            queue.drain_intake();
            let seen: Vec<_> = queue.chamber_iter().collect();
            assert_eq!(seen.len(), 1);
            queue.exhaust_chamber();
            assert_eq!(queue.chamber_iter().count(), 0);
        }

        let mut pool = PrivateFifo::new();
        queue.reclaim_exhausted(&mut pool);
        assert!(pool.pop().is_some());
        assert!(pool.pop().is_none());
    }

    #[test]
    fn draining_empty_intake_is_a_no_op() {
        let queue = CommandQueue::new();
        unsafe {
            queue.drain_intake();
            assert_eq!(queue.chamber_iter().count(), 0);
        }
    }
}
