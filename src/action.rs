//! Action Queue: an unbounded FIFO of fully-preprocessed shell command strings.
//!
//! Functionally the mutex+condvar queue the original engine uses (`push` wakes exactly one
//! waiter, `pop` blocks until something is available); built on `crossbeam_channel` rather than
//! hand-rolled condvar plumbing, since that's the queue primitive already in the dependency
//! stack.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

#[derive(Clone)]
pub struct ActionQueue {
    sender: Sender<String>,
    receiver: Receiver<String>,
}

impl ActionQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn push(&self, command: String) {
        // An unbounded channel's send only fails if every receiver has been dropped, which only
        // happens after worker shutdown; there is nothing useful to do with that error here.
        let _ = self.sender.send(command);
    }

    /// Blocks until a command is available or `timeout` elapses without one.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<String> {
        match self.receiver.recv_timeout(timeout) {
            Ok(cmd) => Some(cmd),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_is_fifo() {
        let q = ActionQueue::new();
        q.push("first".to_string());
        q.push("second".to_string());
        assert_eq!(q.pop_timeout(Duration::from_millis(10)).unwrap(), "first");
        assert_eq!(q.pop_timeout(Duration::from_millis(10)).unwrap(), "second");
    }

    #[test]
    fn pop_times_out_when_empty() {
        let q = ActionQueue::new();
        assert!(q.pop_timeout(Duration::from_millis(10)).is_none());
    }
}
