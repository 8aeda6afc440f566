//! Mapping of dashboard endpoints onto worker commands.
//!
//! Validation happens here, before anything reaches the bus. The worker
//! splits commands on whitespace, so a name containing a space or newline
//! would shift its arguments or inject a second command and break the
//! one-line-per-command pairing.
//!
//! The worker also reads each command into a fixed 256 byte buffer and
//! stores names in 20 byte fields, parsing prices as `float` and quantities
//! as `int`. A longer line is read as two commands, so every accepted
//! command must fit in `MAX_COMMAND_BYTES` and every argument in the
//! worker's field types.

use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};

use super::response::Response;

const MISSING_FIELDS: &str = "Missing fields";

/// Longest stock name the worker can store (its field holds a terminator).
pub const MAX_NAME_BYTES: usize = 19;

/// Longest command line, excluding the newline, the worker reads whole.
pub const MAX_COMMAND_BYTES: usize = 254;

/// Largest price accepted; keeps the value within the worker's `float`.
pub const MAX_PRICE: f64 = 1e9;

/// What an accepted request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this line to the worker and return its answer.
    Submit(String),
    /// Report bus status without touching the worker.
    Health,
    /// CORS preflight.
    Preflight,
}

/// Why a request was refused before reaching the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
    MethodNotAllowed { allow: &'static str },
    BadRequest(String),
}

impl Rejection {
    pub fn into_response(self) -> Response {
        match self {
            Rejection::NotFound => Response::error(404, "Not found"),
            Rejection::MethodNotAllowed { allow } => {
                Response::error(405, "Method not allowed").with_header("Allow", allow)
            }
            Rejection::BadRequest(message) => Response::error(400, message),
        }
    }
}

fn bad_request(message: impl Into<String>) -> Rejection {
    Rejection::BadRequest(message.into())
}

/// Resolve a request to an action.
pub fn resolve(method: &str, path: &str, body: &[u8]) -> Result<Action, Rejection> {
    let segments: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();
    let known = matches!(
        segments.as_slice(),
        ["api", "stocks" | "price" | "summary" | "top" | "transactions" | "clusters" | "health"]
            | ["api", "trends", _]
    );
    if !known {
        return Err(Rejection::NotFound);
    }
    if method == "OPTIONS" {
        return Ok(Action::Preflight);
    }

    match (segments.as_slice(), method) {
        (["api", "stocks"], "GET") => Ok(submit("STOCKS")),
        (["api", "stocks"], "POST") => add_stock(body),
        (["api", "stocks"], _) => Err(Rejection::MethodNotAllowed {
            allow: "GET, POST, OPTIONS",
        }),

        (["api", "price"], "POST") => update_price(body),
        (["api", "price"], _) => Err(Rejection::MethodNotAllowed {
            allow: "POST, OPTIONS",
        }),

        (["api", "trends", name], "GET") => {
            let name = percent_decode_str(name)
                .decode_utf8()
                .map_err(|_| bad_request("Invalid stock name"))?;
            command(format!("TRENDS {}", stock_name(&name)?))
        }

        (["api", "summary"], "GET") => Ok(submit("SUMMARY")),
        (["api", "top"], "GET") => Ok(submit("TOP")),
        (["api", "transactions"], "GET") => Ok(submit("TRANSACTIONS")),
        (["api", "clusters"], "GET") => Ok(submit("CLUSTERS")),
        (["api", "health"], "GET") => Ok(Action::Health),

        _ => Err(Rejection::MethodNotAllowed {
            allow: "GET, OPTIONS",
        }),
    }
}

fn submit(command: &str) -> Action {
    Action::Submit(command.to_string())
}

/// `POST /api/stocks {name, buyPrice, quantity}` -> `ADD <name> <price> <qty>`
fn add_stock(body: &[u8]) -> Result<Action, Rejection> {
    let fields = json_object(body)?;
    let (Some(name), Some(price), Some(quantity)) = (
        field(&fields, "name"),
        field(&fields, "buyPrice"),
        field(&fields, "quantity"),
    ) else {
        return Err(bad_request(MISSING_FIELDS));
    };

    let name = name_field(name)?;
    let price = price_field(price)
        .ok_or_else(|| bad_request("buyPrice must be a positive number up to 1e9"))?;
    let quantity = integer(quantity)
        .filter(|q| *q > 0)
        .ok_or_else(|| bad_request("quantity must be a positive integer"))?;

    command(format!("ADD {name} {price} {quantity}"))
}

/// `POST /api/price {name, newPrice, newQty}` -> `UPDATE <name> <price> <qty>`
fn update_price(body: &[u8]) -> Result<Action, Rejection> {
    let fields = json_object(body)?;
    let (Some(name), Some(price), Some(quantity)) = (
        field(&fields, "name"),
        field(&fields, "newPrice"),
        field(&fields, "newQty"),
    ) else {
        return Err(bad_request(MISSING_FIELDS));
    };

    let name = name_field(name)?;
    let price = price_field(price)
        .ok_or_else(|| bad_request("newPrice must be a positive number up to 1e9"))?;
    let quantity = integer(quantity)
        .filter(|q| *q >= 0)
        .ok_or_else(|| bad_request("newQty must be a non-negative integer"))?;

    command(format!("UPDATE {name} {price} {quantity}"))
}

/// Accept a built command only if the worker will read it as one line.
fn command(line: String) -> Result<Action, Rejection> {
    if line.len() > MAX_COMMAND_BYTES {
        return Err(bad_request("Command too long"));
    }
    Ok(Action::Submit(line))
}

fn json_object(body: &[u8]) -> Result<Map<String, Value>, Rejection> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(bad_request("Request body must be a JSON object")),
        Err(_) => Err(bad_request("Invalid JSON body")),
    }
}

/// A present, non-null field. Empty strings count as missing.
fn field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    match fields.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(value) => Some(value),
    }
}

fn name_field(value: &Value) -> Result<&str, Rejection> {
    match value {
        Value::String(s) => stock_name(s),
        _ => Err(bad_request("name must be a string")),
    }
}

fn stock_name(name: &str) -> Result<&str, Rejection> {
    if name.is_empty() {
        return Err(bad_request(MISSING_FIELDS));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(bad_request("Invalid stock name"));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(bad_request(format!(
            "Stock name exceeds {MAX_NAME_BYTES} bytes"
        )));
    }
    Ok(name)
}

fn price_field(value: &Value) -> Option<f64> {
    number(value).filter(|p| *p > 0.0 && *p <= MAX_PRICE)
}

/// A finite JSON number or numeric string.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// An integral JSON number or integer string that fits the worker's `int`.
fn integer(value: &Value) -> Option<i32> {
    let n = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            let f = n.as_f64()?;
            (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
        })?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    i32::try_from(n).ok()
}
