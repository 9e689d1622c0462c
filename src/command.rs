use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::stream::Stream;

/// The payload half of a [`Command`]. Kept separate from the target
/// stream so the mixer's intake loop can `match` on it without needing
/// to know which stream it targets until it does.
#[derive(Clone, Copy)]
pub(crate) enum Verb {
    Play { looping: bool },
    Stop,
    SetVolume { gains: [u16; 2] },
}

/// One pooled message node (spec.md §4.2's `Command`). Always lives
/// behind a `Box` once allocated and is never individually freed while
/// its owning [`crate::command_queue::CommandQueue`] is alive — instead
/// it cycles between a producer's private pool, the shared intake
/// stack, the mixer's private chamber, and the shared exhaust stack.
///
/// `next` doubles as the pool's "is this node queued" flag: a node
/// that has never been queued, or has been fully drained back to a
/// pool, points at itself.
pub struct Command {
    pub(crate) next: AtomicPtr<Command>,
    target: Option<Arc<Stream>>,
    verb: Option<Verb>,
    callback: UnsafeCell<Option<Box<dyn FnOnce() + Send>>>,
}

// SAFETY: `callback` is only ever read (via `fire_callback`) by the
// single mixer thread that owns the command during the exhaust phase
// of a tick, after the producer thread that filled it in has already
// released exclusive access by submitting it. Never accessed from two
// threads at once.
unsafe impl Sync for Command {}

impl Command {
    /// Allocates a fresh, idle node (link points at itself).
    pub(crate) fn new_idle() -> Box<Command> {
        let mut boxed = Box::new(Command {
            next: AtomicPtr::new(ptr::null_mut()),
            target: None,
            verb: None,
            callback: UnsafeCell::new(None),
        });
        let self_ptr: *mut Command = boxed.as_mut();
        boxed.next.store(self_ptr, Ordering::Relaxed);
        boxed
    }

    /// True once this node has been pushed onto a shared/private chain
    /// and not yet drained back out to idle.
    pub(crate) fn is_queued(&self) -> bool {
        let linked = self.next.load(Ordering::Relaxed);
        !ptr::eq(linked, self as *const Command)
    }

    /// Clears a node back to the idle state before it re-enters a pool.
    pub(crate) fn reset(&mut self) {
        self.target = None;
        self.verb = None;
        *self.callback.get_mut() = None;
        let self_ptr: *mut Command = self;
        self.next.store(self_ptr, Ordering::Relaxed);
    }

    pub fn set_play(&mut self, target: Arc<Stream>, looping: bool) {
        self.target = Some(target);
        self.verb = Some(Verb::Play { looping });
    }

    pub fn set_stop(&mut self, target: Arc<Stream>) {
        self.target = Some(target);
        self.verb = Some(Verb::Stop);
    }

    pub fn set_volume(&mut self, target: Arc<Stream>, gains: [u16; 2]) {
        self.target = Some(target);
        self.verb = Some(Verb::SetVolume { gains });
    }

    /// Attaches a one-shot callback to run on the mixer thread once this
    /// command has been processed, i.e. after the tick's render phase.
    pub fn set_callback(&mut self, callback: Box<dyn FnOnce() + Send>) {
        *self.callback.get_mut() = Some(callback);
    }

    pub(crate) fn target(&self) -> Option<&Arc<Stream>> {
        self.target.as_ref()
    }

    pub(crate) fn verb(&self) -> Option<Verb> {
        self.verb
    }

    /// Runs and clears this command's callback, if any. Only called from
    /// the mixer thread's exhaust phase.
    pub(crate) fn fire_callback(&self) {
        let callback = unsafe { &mut *self.callback.get() }.take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_store::SampleStore;

    fn stream() -> Arc<Stream> {
        Stream::new(Arc::new(SampleStore::alloc(2).unwrap()))
    }

    #[test]
    fn fresh_node_is_idle() {
        let cmd = Command::new_idle();
        assert!(!cmd.is_queued());
    }

    #[test]
    fn reset_clears_payload_and_returns_to_idle() {
        let mut cmd = Command::new_idle();
        cmd.set_play(stream(), true);
        cmd.next.store(ptr::null_mut(), Ordering::Relaxed);
        assert!(cmd.is_queued());
        cmd.reset();
        assert!(!cmd.is_queued());
        assert!(cmd.target().is_none());
        assert!(cmd.verb().is_none());
    }

    #[test]
    fn callback_fires_exactly_once() {
        let mut cmd = Command::new_idle();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        cmd.set_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        cmd.fire_callback();
        cmd.fire_callback();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
