//! # Transport Abstraction
//!
//! A minimal, async interface for moving structured objects between two
//! execution contexts.
//!
//! ## Philosophy
//!
//! - **Object-Oriented**: The transport knows nothing about messages, ids, or
//!   handshakes. It moves opaque structured values.
//! - **Unordered, at-most-once**: Delivery is asynchronous and carries no
//!   ordering guarantee against traffic in the other direction. Nothing is
//!   retransmitted.
//! - **Unauthenticated**: The transport performs no peer authentication or
//!   origin filtering. A deployment facing untrusted peers must add its own.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A mechanism to send objects to a peer and receive objects from it.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends an object to the peer.
    async fn send(&self, message: Value) -> Result<()>;

    /// Receives the next object from the peer.
    ///
    /// Returns `Ok(None)` once the peer side is gone and no buffered objects
    /// remain.
    async fn recv(&self) -> Result<Option<Value>>;
}

/// A duplex in-process transport over tokio mpsc channels.
///
/// Objects sent on one end appear on the other end's `recv` and vice versa.
/// This is both the link between a host and an in-process sandbox and the
/// transport used by the test suites.
pub struct Duplex {
    tx: mpsc::UnboundedSender<Value>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Value>>>,
}

impl Duplex {
    /// Creates a transport from separate tx and rx channels.
    pub fn new(tx: mpsc::UnboundedSender<Value>, rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self::new(tx_a, rx_b);
        let b = Self::new(tx_b, rx_a);

        (a, b)
    }
}

#[async_trait::async_trait]
impl Transport for Duplex {
    async fn send(&self, message: Value) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> Result<Option<Value>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}
