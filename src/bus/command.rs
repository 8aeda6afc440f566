//! Commands submitted to the worker and their one-shot completions.
//!
//! A `Command` pairs the opaque request line with a `Completion`. The
//! completion is consumed by value when it settles, so a command can be
//! answered at most once; dropping an unsettled completion answers it with
//! `BusError::ShuttingDown`, so it is also answered at least once.

use std::fmt;

use serde_json::Value;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::error::BusError;

/// What a caller of `CommandBus::submit` eventually receives.
pub(crate) type CommandResult = Result<Value, BusError>;

/// Identifier for log correlation only.
///
/// The worker protocol has no request identifiers, so this value is never
/// written to the worker. Responses are paired strictly by arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(Ulid);

impl CommandId {
    pub(crate) fn new() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exactly-once completion handle for a command.
pub(crate) struct Completion {
    tx: Option<oneshot::Sender<CommandResult>>,
}

impl Completion {
    pub(crate) fn new() -> (Self, oneshot::Receiver<CommandResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Deliver the result. Returns `false` if the caller stopped waiting.
    pub(crate) fn settle(mut self, result: CommandResult) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            log::debug!(
                target: "stockbridge::bus",
                "Completion dropped without a result, answering with shutdown error"
            );
            let _ = tx.send(Err(BusError::ShuttingDown));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("settled", &self.tx.is_none())
            .finish()
    }
}

/// A submitted, not-yet-dispatched command.
#[derive(Debug)]
pub(crate) struct Command {
    id: CommandId,
    line: String,
    completion: Completion,
}

impl Command {
    /// Create a command and the receiver its caller awaits.
    pub(crate) fn new(line: impl Into<String>) -> (Self, oneshot::Receiver<CommandResult>) {
        let (completion, rx) = Completion::new();
        let command = Self {
            id: CommandId::new(),
            line: line.into(),
            completion,
        };
        (command, rx)
    }

    pub(crate) fn id(&self) -> CommandId {
        self.id
    }

    pub(crate) fn line(&self) -> &str {
        &self.line
    }

    /// Split into the line to write and the waiter that awaits its answer.
    pub(crate) fn into_dispatch(self) -> (String, Waiter) {
        let waiter = Waiter {
            id: self.id,
            completion: self.completion,
        };
        (self.line, waiter)
    }

    /// Settle without ever dispatching (shutdown path).
    pub(crate) fn settle(self, result: CommandResult) -> bool {
        self.completion.settle(result)
    }
}

/// A dispatched command awaiting the worker's response line.
#[derive(Debug)]
pub(crate) struct Waiter {
    id: CommandId,
    completion: Completion,
}

impl Waiter {
    pub(crate) fn id(&self) -> CommandId {
        self.id
    }

    pub(crate) fn settle(self, result: CommandResult) -> bool {
        let id = self.id;
        let delivered = self.completion.settle(result);
        if !delivered {
            log::debug!(
                target: "stockbridge::bus",
                "Caller for command {} stopped waiting, result discarded",
                id
            );
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settle_delivers_result_to_receiver() {
        let (command, mut rx) = Command::new("STOCKS");
        let (line, waiter) = command.into_dispatch();
        assert_eq!(line, "STOCKS");

        assert!(waiter.settle(Ok(json!([]))));
        let result = rx.try_recv().expect("result should be ready");
        assert_eq!(result.unwrap(), json!([]));
    }

    #[test]
    fn dropped_completion_answers_with_shutdown() {
        let (command, mut rx) = Command::new("SUMMARY");
        drop(command);

        let result = rx.try_recv().expect("drop should settle the command");
        assert!(matches!(result, Err(BusError::ShuttingDown)));
    }

    #[test]
    fn settle_reports_abandoned_caller() {
        let (command, rx) = Command::new("TOP");
        drop(rx);
        assert!(!command.settle(Ok(json!({}))));
    }

    #[test]
    fn command_ids_are_unique() {
        let (a, _rx_a) = Command::new("STOCKS");
        let (b, _rx_b) = Command::new("STOCKS");
        assert_ne!(a.id(), b.id());
    }
}
