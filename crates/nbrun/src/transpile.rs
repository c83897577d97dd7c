//! # Transpiler and Evaluator Seams
//!
//! Cell source reaches the sandbox as plain text. Turning it into something
//! runnable is the job of two external collaborators: the transpiler (source
//! to executable text, stack formatting, entry-point extraction) and the
//! evaluator (the host's dynamic-evaluation primitive, executable text to
//! callable). Both are supplied at sandbox construction.

use std::sync::Arc;

use nbrpc::Exception;

use crate::console::CellValue;
use crate::console::Console;
use crate::scope::ModuleRegistry;
use crate::scope::Scope;

/// Source-to-executable translation and stack-trace services.
pub trait Transpiler: Send + Sync {
    /// Transpiles cell source into executable text. The resulting callable
    /// carries `name` as its synthetic entry-point name, so later stack
    /// traces can be mapped back to the originating cell.
    fn transpile(&self, source: &str, name: &str) -> std::result::Result<String, Exception>;

    /// Formats a thrown error into a display string.
    fn format_error(&self, exception: &Exception) -> String;

    /// Extracts the innermost synthetic entry-point name from a stack trace,
    /// if one is present.
    fn entry_point(&self, stack: &str) -> Option<String>;
}

/// The host's dynamic-evaluation primitive: executable text to callable.
pub trait Evaluator: Send + Sync {
    fn eval(&self, transpiled: &str) -> std::result::Result<Arc<dyn CellFn>, Exception>;
}

/// Everything a running cell can reach: the global scope, the module
/// whitelist, and a console bound to the cell's id.
pub struct CellCtx<'a> {
    pub scope: &'a Scope,
    pub modules: &'a ModuleRegistry,
    pub console: &'a Console,
}

/// A compiled cell body.
///
/// `Ok(None)` models a cell whose body produced no value; the bridge logs
/// nothing for it. `Ok(Some(value))` is forwarded through the console proxy.
#[async_trait::async_trait]
pub trait CellFn: Send + Sync {
    async fn call(&self, ctx: CellCtx<'_>) -> std::result::Result<Option<CellValue>, Exception>;
}
