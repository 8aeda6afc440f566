//! FIFO of submitted commands that have not been written to the worker yet.

use std::collections::VecDeque;

use super::command::Command;

/// Unbounded FIFO of pending commands.
///
/// No backpressure is applied: a stalled worker stalls everything queued
/// behind it, and the queue simply grows.
#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    pending: VecDeque<Command>,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, command: Command) {
        self.pending.push_back(command);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Command> {
        self.pending.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Remove every pending command in submission order.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Command> + '_ {
        self.pending.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_leave_in_submission_order() {
        let mut queue = CommandQueue::new();
        let mut receivers = Vec::new();
        for line in ["STOCKS", "SUMMARY", "TOP"] {
            let (command, rx) = Command::new(line);
            receivers.push(rx);
            queue.push(command);
        }
        assert_eq!(queue.len(), 3);

        let order: Vec<String> = std::iter::from_fn(|| queue.pop_front())
            .map(|c| c.line().to_string())
            .collect();
        assert_eq!(order, vec!["STOCKS", "SUMMARY", "TOP"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn drain_empties_queue_in_order() {
        let mut queue = CommandQueue::new();
        let (a, _rx_a) = Command::new("A");
        let (b, _rx_b) = Command::new("B");
        queue.push(a);
        queue.push(b);

        let drained: Vec<String> = queue.drain().map(|c| c.line().to_string()).collect();
        assert_eq!(drained, vec!["A", "B"]);
        assert_eq!(queue.len(), 0);
    }
}
