//! Response correlation for the in-flight command.
//!
//! This module provides the ResponseCorrelator which holds the single
//! outstanding waiter and resolves it with the next line the worker prints.
//!
//! # Pairing
//!
//! The worker protocol carries no request identifier. A line is assumed to
//! answer the oldest outstanding command, and since at most one command is
//! in flight that is simply "the" waiter. A line that arrives when nothing
//! is in flight means the worker and the bus disagree about the pairing;
//! that line is logged and dropped.

use serde_json::{Value, json};

use super::command::{CommandId, Waiter};
use crate::error::BusError;

/// What happened to a line handed to the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineOutcome {
    /// The in-flight command received a parsed payload.
    Resolved(CommandId),
    /// The in-flight command received the invalid-payload marker.
    Malformed(CommandId),
    /// No command was in flight; the line was dropped.
    Unsolicited,
}

/// Payload delivered in place of a line that is not valid JSON.
///
/// The caller's request still succeeds: it already has a pending HTTP
/// response that must complete with something.
pub fn invalid_payload(raw: &str) -> Value {
    json!({ "error": "invalid payload", "raw": raw })
}

/// Holds the (at most one) waiter and pairs it with worker output.
#[derive(Debug, Default)]
pub(crate) struct ResponseCorrelator {
    waiter: Option<Waiter>,
}

impl ResponseCorrelator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether a command is written-but-unanswered (the in-flight flag).
    pub(crate) fn is_awaiting(&self) -> bool {
        self.waiter.is_some()
    }

    /// Id of the in-flight command, if any.
    pub(crate) fn in_flight(&self) -> Option<CommandId> {
        self.waiter.as_ref().map(Waiter::id)
    }

    /// Register the waiter for a command about to be written.
    ///
    /// Hands the waiter back if one is already registered; the single-flight
    /// discipline makes that a caller bug, never a runtime condition.
    pub(crate) fn register(&mut self, waiter: Waiter) -> Result<(), Waiter> {
        if self.waiter.is_some() {
            return Err(waiter);
        }
        self.waiter = Some(waiter);
        Ok(())
    }

    /// Resolve the in-flight command with one framed output line.
    pub(crate) fn on_line(&mut self, line: &str) -> LineOutcome {
        let Some(waiter) = self.waiter.take() else {
            log::warn!(
                target: "stockbridge::bus::correlator",
                "Worker output with no command in flight, dropping: {}",
                line
            );
            return LineOutcome::Unsolicited;
        };

        let id = waiter.id();
        match serde_json::from_str::<Value>(line) {
            Ok(payload) => {
                waiter.settle(Ok(payload));
                LineOutcome::Resolved(id)
            }
            Err(e) => {
                log::warn!(
                    target: "stockbridge::bus::correlator",
                    "Worker output for command {} is not JSON ({}): {}",
                    id,
                    e,
                    line
                );
                waiter.settle(Ok(invalid_payload(line)));
                LineOutcome::Malformed(id)
            }
        }
    }

    /// Reject the in-flight command, if any, returning its id.
    pub(crate) fn fail(&mut self, error: BusError) -> Option<CommandId> {
        let waiter = self.waiter.take()?;
        let id = waiter.id();
        waiter.settle(Err(error));
        Some(id)
    }
}
