//! # Console Proxy
//!
//! Cell output crosses the boundary as RPC calls. The console is bound to the
//! id of the cell it was created for, so every line it relays is already
//! attributed. Relays are fire-and-forget: the bridge never acts on their
//! resolution, and a lost line never fails the cell that printed it.

use std::sync::Arc;

use serde_json::Value;

use nbrpc::RpcChannel;

/// A value produced by cell code, as handed to the console.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// A library value (tensor-like) that renders via its own textual form.
    Rendered(String),
    /// Structured data.
    Data(Value),
}

/// Wraps a value for transmission as display text.
///
/// Objects and arrays serialize to indented JSON, degrading to plain string
/// coercion if serialization fails. Strings print unquoted; everything else
/// coerces the way a dynamic runtime would (`null`, `true`, `2`).
pub fn inspect(value: &CellValue) -> String {
    match value {
        CellValue::Rendered(text) => text.clone(),
        CellValue::Data(data) => match data {
            Value::Object(_) | Value::Array(_) => {
                serde_json::to_string_pretty(data).unwrap_or_else(|_| coerce(data))
            }
            other => coerce(other),
        },
    }
}

fn coerce(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Console bound to one cell's id.
pub struct Console {
    rpc: Arc<RpcChannel>,
    cell_id: u64,
}

impl Console {
    pub(crate) fn new(rpc: Arc<RpcChannel>, cell_id: u64) -> Self {
        Self { rpc, cell_id }
    }

    pub fn cell_id(&self) -> u64 {
        self.cell_id
    }

    pub fn log(&self, values: &[CellValue]) {
        self.send(values);
    }

    pub fn warn(&self, values: &[CellValue]) {
        self.send(values);
    }

    pub fn error(&self, values: &[CellValue]) {
        self.send(values);
    }

    fn send(&self, values: &[CellValue]) {
        let mut args = vec![Value::from(self.cell_id)];
        args.extend(values.iter().map(|value| Value::String(inspect(value))));

        let rpc = self.rpc.clone();
        tokio::spawn(async move {
            if let Err(e) = rpc.call("console", args).await {
                tracing::debug!("console relay failed: {}", e);
            }
        });
    }
}
