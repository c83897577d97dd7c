//! # nbrun
//!
//! The sandboxed cell-execution bridge. Runs untrusted source snippets
//! ("cells") inside an isolated context, relays their console and plot output
//! back across the boundary over an [`nbrpc`] channel, and attributes
//! asynchronous errors to the cell that likely caused them.
//!
//! ## Architecture
//!
//! - **Sandbox**: owns the RPC channel and exposes a single `runCell`
//!   operation to the host.
//! - **Transpiler / Evaluator**: external collaborators. The transpiler turns
//!   cell source into executable text tagged with a synthetic entry-point
//!   name; the evaluator turns that text into a callable.
//! - **Scope / ModuleRegistry**: the global execution scope shared by all
//!   cells, and the fixed whitelist of importable modules.
//! - **Console**: proxies cell output to the host as fire-and-forget RPC
//!   calls bound to the originating cell's id.
//!
//! No user-cell failure terminates the channel; the RPC loop keeps carrying
//! subsequent cells.

pub mod console;
pub mod sandbox;
pub mod scope;
pub mod transpile;

pub use console::CellValue;
pub use console::Console;
pub use sandbox::Sandbox;
pub use sandbox::SandboxBuilder;
pub use scope::ModuleRegistry;
pub use scope::Scope;
pub use transpile::CellCtx;
pub use transpile::CellFn;
pub use transpile::Evaluator;
pub use transpile::Transpiler;
