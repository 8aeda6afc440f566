//! HTTP surface for the stock dashboard.
//!
//! Each endpoint validates its input and forwards exactly one command to the
//! `CommandBus`; the worker's JSON answer is returned verbatim.

pub mod request;
pub mod response;
pub mod routes;
mod server;

pub use request::{MAX_BODY_BYTES, MAX_HEAD_BYTES, Request, read_request};
pub use response::Response;
pub use routes::{Action, MAX_COMMAND_BYTES, MAX_NAME_BYTES, MAX_PRICE, Rejection, resolve};
pub use server::{handle_request, serve};

use thiserror::Error;

/// Failure to read a request off the wire.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
