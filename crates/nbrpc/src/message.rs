//! # Wire Messages
//!
//! The tagged union exchanged between peers, plus the conversion of thrown
//! errors into wire-safe records.
//!
//! Every message is a JSON-shaped object discriminated on `type`:
//! - `syn` / `ack`: handshake, no payload.
//! - `call`: `{id, handler, args}`.
//! - `return`: `{id}` with exactly one of `result` / `exception`.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Field marking a wire record as a marshaled error.
pub const ERROR_TAG: &str = "__error__";

/// A thrown error carrying a message and a stack trace.
///
/// This is the local representation on both sides of the boundary. Identity
/// and class of the original error are not preserved across serialization;
/// only `message` and `stack` survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub message: String,
    pub stack: String,
}

impl Exception {
    /// Creates an exception with a synthesized one-line stack, so the stack
    /// is never empty.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let stack = format!("Error: {}", message);
        Self { message, stack }
    }

    /// Creates an exception preserving an existing stack trace.
    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: stack.into(),
        }
    }

    /// Converts to the plain tagged record that survives structural
    /// serialization: `{message, stack, __error__: true}`.
    pub fn marshal(&self) -> Value {
        serde_json::json!({
            "message": self.message,
            "stack": self.stack,
            ERROR_TAG: true,
        })
    }

    /// Reconstructs an exception from a tagged wire record.
    ///
    /// Returns `None` for values without the tag; those pass through the
    /// boundary unchanged.
    pub fn unmarshal(value: &Value) -> Option<Self> {
        let record = value.as_object()?;
        if !record.get(ERROR_TAG).and_then(Value::as_bool).unwrap_or(false) {
            return None;
        }
        let field = |name: &str| {
            record
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Some(Self {
            message: field("message"),
            stack: field("stack"),
        })
    }
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Exception {}

/// The settled outcome of a call, as it appears on the wire.
///
/// Exactly one of `result` / `exception` is present on a `return` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Success { result: Value },
    Failure { exception: Value },
}

/// A wire message, tagged on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Syn,
    Ack,
    Call {
        id: String,
        handler: String,
        args: Vec<Value>,
    },
    Return {
        id: String,
        #[serde(flatten)]
        outcome: Outcome,
    },
}

impl Message {
    /// Decodes a received object. Malformed objects, unknown `type` tags, and
    /// messages with missing fields decode to `None`; the channel ignores
    /// them rather than failing.
    pub fn from_wire(object: Value) -> Option<Self> {
        serde_json::from_value(object).ok()
    }
}
