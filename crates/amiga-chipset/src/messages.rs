//! Outbound messages for the hosting UI.
//!
//! The core never consumes these; it enqueues notifications and the host
//! drains them at its own pace. The queue is a fixed-size ring that drops
//! the oldest entry on overflow, so a stalled host cannot grow the core's
//! memory.

use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Message {
    PowerOn,
    PowerOff,
    Reset,
    Config,
    DriveConnect { drive: u8 },
    DriveDisconnect { drive: u8 },
    /// `None` when every drive got deselected.
    DriveSelect { drive: Option<u8> },
    DriveRead { drive: u8 },
    DriveWrite { drive: u8 },
    MuteOn,
    MuteOff,
}

const CAPACITY: usize = 64;

pub struct MessageQueue {
    queue: VecDeque<Message>,
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(CAPACITY),
        }
    }

    pub fn put(&mut self, msg: Message) {
        if self.queue.len() == CAPACITY {
            self.queue.pop_front();
        }
        self.queue.push_back(msg);
    }

    pub fn get(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut queue = MessageQueue::new();
        queue.put(Message::PowerOn);
        queue.put(Message::DriveSelect { drive: Some(0) });
        assert_eq!(queue.get(), Some(Message::PowerOn));
        assert_eq!(queue.get(), Some(Message::DriveSelect { drive: Some(0) }));
        assert_eq!(queue.get(), None);
    }

    #[test]
    fn overflow_drops_the_oldest() {
        let mut queue = MessageQueue::new();
        queue.put(Message::PowerOn);
        for _ in 0..CAPACITY {
            queue.put(Message::Reset);
        }
        assert_eq!(queue.len(), CAPACITY);
        assert_eq!(queue.get(), Some(Message::Reset));
    }
}
