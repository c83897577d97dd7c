//! # RPC Channel
//!
//! Composes the transport, the handshake, the handler registry, and the
//! pending-call table into one bidirectional peer object.
//!
//! ## Architecture
//!
//! Each channel spawns a single pump task that reads from the transport and
//! dispatches inbound traffic. Handler invocations run on their own tasks, so
//! a slow handler never blocks message delivery; a call suspends only the
//! caller that issued it. Replies always go back over the channel's own
//! configured transport (fixed-peer policy).
//!
//! There is no call timeout, no cancellation, and no backpressure. An
//! abandoned call whose return never arrives leaks its pending entry until
//! the channel is torn down.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::handlers::Handlers;
use crate::message::Exception;
use crate::message::Message;
use crate::message::Outcome;
use crate::transport;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub enum Error {
    Transport(transport::Error),
    /// The remote handler threw an error; `message` and `stack` are preserved.
    Remote(Exception),
    /// The remote handler threw a value that was not an error.
    RemoteValue(Value),
    /// The channel was torn down before a return arrived.
    ChannelClosed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Remote(e) => write!(f, "Remote exception: {}", e),
            Self::RemoteValue(v) => write!(f, "Remote threw value: {}", v),
            Self::ChannelClosed => write!(f, "Channel closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One-shot resolver for an in-flight call.
type Pending = oneshot::Sender<Result<Value>>;

/// One-way readiness gate: `NotReady -> Ready`, terminal.
///
/// Any number of callers may be suspended on `wait`; `open` is idempotent and
/// redundant opens have no observable side effects.
struct ReadyGate {
    tx: watch::Sender<bool>,
}

impl ReadyGate {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    fn open(&self) {
        self.tx.send_replace(true);
    }

    fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as the channel, so this only fails if the
        // channel itself is gone.
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// A bidirectional RPC peer: issues calls, serves the handler registry.
///
/// On construction the channel sends `syn` and spawns its pump. The pump is
/// owned by the channel: `close` (or dropping the channel) aborts it and
/// settles every pending call with [`Error::ChannelClosed`].
pub struct RpcChannel {
    transport: Arc<dyn Transport>,
    pending: Arc<DashMap<String, Pending>>,
    ready: Arc<ReadyGate>,
    tag: u64,
    counter: AtomicU64,
    pump: JoinHandle<()>,
}

impl RpcChannel {
    /// Creates a channel over `transport`, exposing `handlers` to the peer,
    /// and spawns the pump task.
    pub fn new(transport: Box<dyn Transport>, handlers: Handlers) -> Self {
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let pending: Arc<DashMap<String, Pending>> = Arc::new(DashMap::new());
        let ready = Arc::new(ReadyGate::new());
        let handlers = Arc::new(handlers);

        let pump_transport = transport.clone();
        let pump_pending = pending.clone();
        let pump_ready = ready.clone();

        let pump = tokio::spawn(async move {
            // Announce construction; the peer answers with an ack.
            if let Err(e) = send(&pump_transport, &Message::Syn).await {
                tracing::warn!("handshake syn failed: {}", e);
            }

            loop {
                match pump_transport.recv().await {
                    Ok(Some(object)) => {
                        Self::dispatch(object, &pump_transport, &handlers, &pump_pending, &pump_ready);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("transport error in pump: {}", e);
                        break;
                    }
                }
            }

            // The peer is gone; nothing pending can ever settle normally.
            Self::drain_pending(&pump_pending);
        });

        Self {
            transport,
            pending,
            ready,
            tag: rand::random(),
            counter: AtomicU64::new(0),
            pump,
        }
    }

    /// Calls a named remote handler and awaits its return.
    ///
    /// Suspends until the handshake completes; nothing is transmitted before
    /// readiness. Concurrent calls are independent: returns may arrive in any
    /// order. There is no timeout; a call whose return never arrives suspends
    /// indefinitely.
    pub async fn call(&self, handler: &str, args: Vec<Value>) -> Result<Value> {
        self.ready.wait().await;

        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let message = Message::Call {
            id: id.clone(),
            handler: handler.to_string(),
            args,
        };
        if let Err(e) = send(&self.transport, &message).await {
            self.pending.remove(&id);
            return Err(e.into());
        }

        match rx.await {
            Ok(settled) => settled,
            Err(_) => {
                // Pump died before a return arrived.
                self.pending.remove(&id);
                Err(Error::ChannelClosed)
            }
        }
    }

    /// Tears the channel down: aborts the pump and settles every pending call
    /// with [`Error::ChannelClosed`].
    pub fn close(&self) {
        self.pump.abort();
        Self::drain_pending(&self.pending);
    }

    /// Allocates a correlation id unique across the peer pair: per-instance
    /// random tag, per-instance monotonic counter. Ids are never reused.
    fn next_id(&self) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{:016x}-{}", self.tag, count)
    }

    /// Routes one inbound object. Never blocks the pump: handler invocations
    /// and outbound replies run on their own tasks.
    fn dispatch(
        object: Value,
        transport: &Arc<dyn Transport>,
        handlers: &Arc<Handlers>,
        pending: &Arc<DashMap<String, Pending>>,
        ready: &Arc<ReadyGate>,
    ) {
        let Some(message) = Message::from_wire(object) else {
            tracing::warn!("ignoring malformed message");
            return;
        };

        match message {
            Message::Syn => {
                // Past readiness, a redundant syn gets no second ack.
                if ready.is_open() {
                    return;
                }
                ready.open();
                let transport = transport.clone();
                tokio::spawn(async move {
                    if let Err(e) = send(&transport, &Message::Ack).await {
                        tracing::warn!("handshake ack failed: {}", e);
                    }
                });
            }
            Message::Ack => ready.open(),
            Message::Call { id, handler, args } => {
                let transport = transport.clone();
                let handlers = handlers.clone();
                tokio::spawn(async move {
                    let outcome = Self::invoke(&handlers, &handler, args).await;
                    let reply = Message::Return { id, outcome };
                    if let Err(e) = send(&transport, &reply).await {
                        tracing::warn!("failed to send return: {}", e);
                    }
                });
            }
            Message::Return { id, outcome } => {
                // Unmatched ids are stale or misaddressed; never an error.
                let Some((_, resolver)) = pending.remove(&id) else {
                    tracing::debug!("ignoring return for unknown id {}", id);
                    return;
                };
                let settled = match outcome {
                    Outcome::Success { result } => Ok(result),
                    Outcome::Failure { exception } => match Exception::unmarshal(&exception) {
                        Some(e) => Err(Error::Remote(e)),
                        None => Err(Error::RemoteValue(exception)),
                    },
                };
                // The caller may have gone away; a dead receiver is fine.
                let _ = resolver.send(settled);
            }
        }
    }

    /// Resolves a handler by name and runs it, capturing result or thrown
    /// error. Lookup misses surface to the caller, never crash the callee.
    async fn invoke(handlers: &Handlers, name: &str, args: Vec<Value>) -> Outcome {
        let Some(handler) = handlers.get(name) else {
            let exception = Exception::new(format!("Unknown handler: {}", name));
            return Outcome::Failure {
                exception: exception.marshal(),
            };
        };
        match handler(args).await {
            Ok(result) => Outcome::Success { result },
            Err(exception) => Outcome::Failure {
                exception: exception.marshal(),
            },
        }
    }

    /// Settles every pending call with `ChannelClosed`.
    fn drain_pending(pending: &DashMap<String, Pending>) {
        let ids: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, resolver)) = pending.remove(&id) {
                let _ = resolver.send(Err(Error::ChannelClosed));
            }
        }
    }
}

impl Drop for RpcChannel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn send(transport: &Arc<dyn Transport>, message: &Message) -> transport::Result<()> {
    let object =
        serde_json::to_value(message).map_err(|e| transport::Error::Io(e.to_string()))?;
    transport.send(object).await
}
