//! Per-chat message batching.
//!
//! Accumulates messages for one chat and releases them as a batch once the
//! configured count is reached. The buffer itself is not synchronized; it lives
//! inside the chat record guarded by [`crate::state::StateStore`].

use crate::models::ChatMessage;

/// Default number of messages per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Arrival-ordered buffer with a release threshold.
#[derive(Debug, Clone)]
pub struct BatchBuffer {
    messages: Vec<ChatMessage>,
    counter: usize,
    batch_size: usize,
}

impl BatchBuffer {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            messages: Vec::with_capacity(batch_size),
            counter: 0,
            batch_size,
        }
    }

    /// Adds a message. Returns the full batch when the threshold is reached,
    /// leaving the buffer empty.
    pub fn push(&mut self, message: ChatMessage) -> Option<Vec<ChatMessage>> {
        self.messages.push(message);
        self.counter += 1;

        if self.counter >= self.batch_size {
            self.counter = 0;
            Some(std::mem::replace(
                &mut self.messages,
                Vec::with_capacity(self.batch_size),
            ))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::buffer::BatchBuffer;
    use crate::models::ChatMessage;

    fn test_message(id: i64) -> ChatMessage {
        ChatMessage::text(id, 200, 100, "user", format!("test message {}", id), Utc::now())
    }

    #[test]
    fn push_returns_none_below_threshold() {
        let mut buffer = BatchBuffer::new(10);

        for i in 1..10 {
            assert!(buffer.push(test_message(i)).is_none(), "Should not release at {} messages", i);
        }
        assert_eq!(buffer.len(), 9);
        assert_eq!(buffer.counter(), 9);
    }

    #[test]
    fn push_releases_at_threshold_and_resets() {
        let mut buffer = BatchBuffer::new(5);

        for i in 1..5 {
            buffer.push(test_message(i));
        }

        let batch = buffer.push(test_message(5)).expect("should release");
        assert_eq!(batch.len(), 5);
        assert!(buffer.is_empty());
        assert_eq!(buffer.counter(), 0);
    }

    #[test]
    fn batch_preserves_arrival_order() {
        let mut buffer = BatchBuffer::new(3);

        buffer.push(test_message(1));
        buffer.push(test_message(2));
        let batch = buffer.push(test_message(3)).expect("should release");

        let ids: Vec<_> = batch.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn zero_batch_size_releases_every_message() {
        let mut buffer = BatchBuffer::new(0);
        assert_eq!(buffer.batch_size(), 1);
        assert_eq!(buffer.push(test_message(1)).map(|b| b.len()), Some(1));
    }
}
