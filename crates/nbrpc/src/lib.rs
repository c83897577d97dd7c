//! # nbrpc
//!
//! A point-to-point, correlated RPC channel between two isolated execution
//! contexts, carried over an asynchronous, unordered, at-most-once message
//! transport.
//!
//! ## Architecture
//!
//! - **Transport**: a raw duplex object pipe. It moves opaque structured
//!   values and never interprets them.
//! - **Handshake**: each side announces itself with `syn` on construction and
//!   becomes ready off whichever of `syn`/`ack` arrives first. Calls issued
//!   before readiness are delayed until it.
//! - **Correlation**: every call carries an id built from a per-instance
//!   random tag and a monotonic counter; returns are matched strictly by id
//!   against a pending-call table.
//! - **Marshaling**: thrown errors cross the boundary as plain tagged records
//!   preserving `message` and `stack`.
//!
//! The channel models exactly one peer pair. There is no multiplexing, no
//! authentication of the transport, and no call timeout or cancellation.

pub mod channel;
pub mod handlers;
pub mod message;
pub mod transport;

pub use channel::RpcChannel;
pub use handlers::HandlerResult;
pub use handlers::Handlers;
pub use message::Exception;
pub use message::Message;
pub use message::Outcome;
pub use transport::Duplex;
pub use transport::Transport;
