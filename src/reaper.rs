use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::client::Client;
use crate::command_queue::CommandQueue;
use crate::fence::Fence;
use crate::sample_store::SampleStore;
use crate::stream::Stream;

/// A teardown job: the stream to stop, plus the sample store it was
/// the only remaining owner of, if any (dropping `sample_store` here is
/// what actually frees it, once the mixer has acknowledged the Stop).
#[derive(derive_new::new)]
struct PendingTask {
    stream: Arc<Stream>,
    sample_store: Option<Arc<SampleStore>>,
}

struct Shared {
    pending: Mutex<Vec<PendingTask>>,
    cond: Condvar,
    stop: AtomicBool,
}

/// Background batching teardown worker (spec.md §4.8). Call sites that
/// want non-blocking "fire and forget" disposal of a stream hand it to
/// `Reaper::retire` instead of letting the owning `PlaybackObject` drop
/// synchronously. The reaper thread batches everything submitted since
/// its last wake-up into one Stop-command flight, waits once on a
/// single fence shared by the whole batch, and only then drops the
/// streams/sample stores — amortizing the one-tick wait across however
/// many teardowns arrived together.
///
/// This is a standalone mechanism, not something `PlaybackObject`'s own
/// `Drop` delegates to: a `PlaybackObject` going out of scope normally
/// still does its own direct, blocking teardown (spec.md §4.7, §5).
/// `Reaper` exists for callers who'd rather defer that wait off their
/// own thread.
pub struct Reaper {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Reaper {
    pub fn start(service: Arc<CommandQueue>) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Vec::new()),
            cond: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let thread_shared = Arc::clone(&shared);
        let thread = thread::spawn(move || reaper_thread_main(thread_shared, Client::new(service)));
        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Hands a stream (and, if this caller was its last owner, its
    /// sample store) off for deferred teardown.
    pub fn retire(&self, stream: Arc<Stream>, sample_store: Option<Arc<SampleStore>>) {
        let mut pending = self.shared.pending.lock().unwrap();
        let was_empty = pending.is_empty();
        pending.push(PendingTask::new(stream, sample_store));
        if was_empty {
            self.shared.cond.notify_one();
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.cond.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn reaper_thread_main(shared: Arc<Shared>, mut client: Client) {
    tracing::info!("reaper thread starting");
    loop {
        let batch = {
            let mut pending = shared.pending.lock().unwrap();
            while pending.is_empty() && !shared.stop.load(Ordering::SeqCst) {
                pending = shared.cond.wait(pending).unwrap();
            }
            std::mem::take(&mut *pending)
        };
        let should_stop = shared.stop.load(Ordering::SeqCst);

        if !batch.is_empty() {
            let fence = Arc::new(Fence::new());
            let last = batch.len() - 1;
            for (i, task) in batch.iter().enumerate() {
                let mut cmd = client.cmd_alloc();
                cmd.set_stop(Arc::clone(&task.stream));
                if i == last {
                    let fence = Arc::clone(&fence);
                    cmd.set_callback(Box::new(move || fence.signal()));
                }
                client.cmd_submit(cmd);
            }
            fence.wait();
            tracing::trace!(count = batch.len(), "reaper batch torn down");
            // `batch` drops here: each `PendingTask`'s `Arc`s are
            // released now that the mixer has acknowledged every Stop.
        }

        if should_stop {
            break;
        }
    }
    tracing::info!("reaper thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::MixerEngine;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn store() -> Arc<SampleStore> {
        Arc::new(SampleStore::alloc(4).unwrap())
    }

    #[test]
    fn retired_stream_is_stopped_and_sample_store_drops() {
        crate::test_support::init_tracing();
        let service = CommandQueue::new();
        let mut mixer = MixerEngine::new(Arc::clone(&service), 4);
        let store = store();
        let weak = Arc::downgrade(&store);
        let stream = Stream::new(Arc::clone(&store));
        drop(store);

        let reaper = Reaper::start(Arc::clone(&service));
        reaper.retire(stream, weak.upgrade());

        let mut out = [0i16; 8];
        // Give the reaper thread a chance to submit its Stop command;
        // a handful of ticks is plenty since the mixer never blocks.
        for _ in 0..50 {
            mixer.tick(&mut out);
            thread::sleep(Duration::from_millis(1));
        }
        drop(reaper);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn reaper_drop_drains_remaining_batch_before_exiting() {
        crate::test_support::init_tracing();
        let service = CommandQueue::new();
        let mut mixer = MixerEngine::new(Arc::clone(&service), 4);
        let fired = Arc::new(AtomicUsize::new(0));

        let reaper = Reaper::start(Arc::clone(&service));
        for _ in 0..5 {
            let stream = Stream::new(store());
            reaper.retire(stream, None);
        }
        let _ = &fired;

        let mut out = [0i16; 8];
        for _ in 0..50 {
            mixer.tick(&mut out);
            thread::sleep(Duration::from_millis(1));
        }
        drop(reaper);
    }
}
