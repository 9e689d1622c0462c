use std::sync::{Condvar, Mutex};

/// A manual-reset event. Used to let a producer thread block until the
/// mixer thread has acknowledged the last command in a batch (spec.md
/// §4.8, §5's "one-tick suspension point").
#[derive(Debug, Default)]
pub struct Fence {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Fence {
    pub fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Called from the mixer thread once, from a command's callback.
    pub fn signal(&self) {
        let mut guard = self.signalled.lock().unwrap();
        *guard = true;
        self.cond.notify_all();
    }

    /// Blocks until `signal` has been called at least once since this
    /// fence was created or last reset.
    pub fn wait(&self) {
        let mut guard = self.signalled.lock().unwrap();
        while !*guard {
            guard = self.cond.wait(guard).unwrap();
        }
    }

    /// Returns this fence to the unsignalled state for reuse.
    pub fn reset(&self) {
        *self.signalled.lock().unwrap() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_immediately_once_signalled() {
        let fence = Fence::new();
        fence.signal();
        fence.wait();
    }

    #[test]
    fn wait_blocks_until_signal() {
        let fence = Arc::new(Fence::new());
        let signaller = Arc::clone(&fence);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal();
        });
        fence.wait();
        handle.join().unwrap();
    }

    #[test]
    fn reset_allows_reuse() {
        let fence = Fence::new();
        fence.signal();
        fence.wait();
        fence.reset();
        let woke = Arc::new(Mutex::new(false));
        assert!(!*fence.signalled.lock().unwrap());
        let _ = woke;
    }
}
