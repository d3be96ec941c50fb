use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::protocol::Message;

/// The monitor between per-child channel receive threads and the
/// controller thread. Receive threads only park messages here; every
/// decision happens on the controller thread, preserving strict
/// turn-taking.
pub struct PendingMessages {
    queue: Mutex<VecDeque<(u64, Message)>>,
    cond: Condvar,
}

impl PendingMessages {
    pub fn new() -> Self {
        PendingMessages {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    /// Called from channel receive threads.
    pub fn push(&self, channel: u64, msg: Message) {
        self.queue.lock().push_back((channel, msg));
        self.cond.notify_all();
    }

    /// Non-blocking take of the oldest pending message.
    pub fn pop(&self) -> Option<(u64, Message)> {
        self.queue.lock().pop_front()
    }

    /// Take the oldest pending message, waiting until `deadline` for one
    /// to arrive. `None` means the deadline passed with nothing pending.
    pub fn pop_or_wait_until(&self, deadline: Instant) -> Option<(u64, Message)> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(entry) = queue.pop_front() {
                return Some(entry);
            }
            if self.cond.wait_until(&mut queue, deadline).timed_out() {
                return queue.pop_front();
            }
        }
    }
}

impl Default for PendingMessages {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn push_wakes_a_waiting_popper() {
        let pending = Arc::new(PendingMessages::new());
        let clone = Arc::clone(&pending);
        let pusher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            clone.push(7, Message::Terminate);
        });
        let got = pending.pop_or_wait_until(Instant::now() + Duration::from_secs(5));
        pusher.join().unwrap();
        assert_eq!(got, Some((7, Message::Terminate)));
    }

    #[test]
    fn deadline_passes_with_nothing_pending() {
        let pending = PendingMessages::new();
        let got = pending.pop_or_wait_until(Instant::now() + Duration::from_millis(10));
        assert_eq!(got, None);
    }

    #[test]
    fn fifo_across_channels() {
        let pending = PendingMessages::new();
        pending.push(1, Message::CreateCheckpoint);
        pending.push(2, Message::Terminate);
        assert_eq!(pending.pop(), Some((1, Message::CreateCheckpoint)));
        assert_eq!(pending.pop(), Some((2, Message::Terminate)));
        assert_eq!(pending.pop(), None);
    }
}
