use std::sync::Arc;

use crate::command::Command;
use crate::command_queue::CommandQueue;
use crate::queue::PrivateFifo;

/// Per-producer handle onto a [`CommandQueue`] (spec.md §4.3). Each
/// `Client` keeps its own private pool of idle `Command` nodes so that
/// allocating one never needs to touch anything shared in the common
/// case.
///
/// `cmd_alloc` doesn't pop directly off the shared exhaust stack. A
/// command only becomes safe to reuse once the mixer thread has fully
/// finished with it (applied its side effect *and* fired its callback);
/// popping one at a time straight off a shared stack would let a second
/// producer thread observe and reuse a node the instant it's pushed,
/// racing the mixer's own in-flight processing of that same push if the
/// exhaust push and a private-pool pop interleave mid-splice. Draining
/// the whole exhaust stack into a private pool in one atomic swap avoids
/// that: by the time any node is visible to `reclaim`, the mixer has
/// already spliced the *entire* processed chamber onto `exhaust` in a
/// single move, so every node handed back is fully done.
pub struct Client {
    service: Arc<CommandQueue>,
    pool: PrivateFifo,
}

impl Client {
    pub fn new(service: Arc<CommandQueue>) -> Self {
        Self {
            service,
            pool: PrivateFifo::new(),
        }
    }

    /// Returns an idle command node, reusing one from this client's pool
    /// if available, refilling from the shared exhaust stack if not, and
    /// only allocating a fresh node if both are empty.
    pub fn cmd_alloc(&mut self) -> Box<Command> {
        if let Some(mut cmd) = self.pool.pop() {
            cmd.reset();
            return cmd;
        }
        self.service.reclaim_exhausted(&mut self.pool);
        if let Some(mut cmd) = self.pool.pop() {
            cmd.reset();
            return cmd;
        }
        Command::new_idle()
    }

    /// Hands a filled-in command to the mixer.
    pub fn cmd_submit(&self, cmd: Box<Command>) {
        self.service.submit(cmd);
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
    fn alloc_without_any_history_yields_a_fresh_idle_node() {
        let service = CommandQueue::new();
        let mut client = Client::new(service);
        let cmd = client.cmd_alloc();
        assert!(cmd.target().is_none());
    }

    #[test]
    fn commands_recycle_through_a_full_tick() {
        let service = CommandQueue::new();
        let mut client = Client::new(Arc::clone(&service));

        let mut cmd = client.cmd_alloc();
        cmd.set_play(stream(), false);
        client.cmd_submit(cmd);

        unsafe {
            service.drain_intake();
            for c in service.chamber_iter() {
                c.fire_callback();
            }
            service.exhaust_chamber();
        }

        let recycled = client.cmd_alloc();
        assert!(recycled.target().is_none());
        assert!(recycled.verb().is_none());
    }
}
