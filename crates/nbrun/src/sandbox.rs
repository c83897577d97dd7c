//! # Sandboxed Execution Bridge
//!
//! Owns the RPC channel to the host and exposes a single `runCell` operation.
//! Cell failures are relayed to the host as console output; they are never
//! fatal to the channel that carries subsequent cells.
//!
//! ## Error attribution
//!
//! Errors surfacing outside an active `runCell` invocation (uncaught global
//! errors, errors inside plotting callbacks) are attributed by scanning the
//! stack for the synthetic `cell{id}` entry-point name stamped at transpile
//! time, falling back to the last executed cell. The heuristic can
//! misattribute under genuinely concurrent cell execution; deployments run
//! one cell at a time.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde_json::Value;

use nbrpc::Exception;
use nbrpc::Handlers;
use nbrpc::RpcChannel;
use nbrpc::Transport;

use crate::console::Console;
use crate::scope::ModuleRegistry;
use crate::scope::Scope;
use crate::transpile::CellCtx;
use crate::transpile::Evaluator;
use crate::transpile::Transpiler;

#[derive(Debug)]
pub enum Error {
    /// The builder was not given a transpiler.
    MissingTranspiler,
    /// The builder was not given an evaluator.
    MissingEvaluator,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTranspiler => write!(f, "Sandbox requires a transpiler"),
            Self::MissingEvaluator => write!(f, "Sandbox requires an evaluator"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Builds the synthetic entry-point name embedding a cell's id.
fn entry_name(cell_id: u64) -> String {
    format!("cell{}", cell_id)
}

/// Recovers the cell id embedded in a synthetic entry-point name.
fn parse_entry_name(name: &str) -> Option<u64> {
    let rest = &name[name.find("cell")? + 4..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let digits = &rest[..end];
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

struct Inner {
    rpc: OnceLock<Arc<RpcChannel>>,
    transpiler: Arc<dyn Transpiler>,
    evaluator: Arc<dyn Evaluator>,
    scope: Scope,
    modules: ModuleRegistry,
    /// Id of the last cell to enter `run_cell`, stored as `id + 1`; zero
    /// means no cell has run yet.
    last_executed: AtomicU64,
    test_mode: bool,
}

impl Inner {
    fn rpc(&self) -> std::result::Result<Arc<RpcChannel>, Exception> {
        self.rpc
            .get()
            .cloned()
            .ok_or_else(|| Exception::new("Sandbox is not connected"))
    }

    fn last_executed(&self) -> Option<u64> {
        match self.last_executed.load(Ordering::Relaxed) {
            0 => None,
            stored => Some(stored - 1),
        }
    }

    async fn run_cell(&self, source: &str, cell_id: u64) -> std::result::Result<(), Exception> {
        self.last_executed.store(cell_id + 1, Ordering::Relaxed);

        match self.execute(source, cell_id).await {
            Ok(()) => Ok(()),
            Err(exception) => {
                let formatted = self.transpiler.format_error(&exception);
                self.console_relay(cell_id, formatted);
                // Under an automated test runner the error is additionally
                // surfaced to the caller of runCell, so a driving harness
                // observes the failure.
                if self.test_mode { Err(exception) } else { Ok(()) }
            }
        }
    }

    async fn execute(&self, source: &str, cell_id: u64) -> std::result::Result<(), Exception> {
        let rpc = self.rpc()?;

        let transpiled = self.transpiler.transpile(source, &entry_name(cell_id))?;
        let cell = self.evaluator.eval(&transpiled)?;

        let console = Console::new(rpc, cell_id);
        let ctx = CellCtx {
            scope: &self.scope,
            modules: &self.modules,
            console: &console,
        };
        if let Some(result) = cell.call(ctx).await? {
            console.log(&[result]);
        }
        Ok(())
    }

    /// One-way console relay; the bridge does not act on its resolution.
    fn console_relay(&self, cell_id: u64, text: String) {
        let Ok(rpc) = self.rpc() else { return };
        tokio::spawn(async move {
            let args = vec![Value::from(cell_id), Value::String(text)];
            if let Err(e) = rpc.call("console", args).await {
                tracing::debug!("console relay failed: {}", e);
            }
        });
    }

    fn guess_cell_id(&self, stack: Option<&str>) -> Option<u64> {
        if let Some(stack) = stack {
            if let Some(name) = self.transpiler.entry_point(stack) {
                if let Some(id) = parse_entry_name(&name) {
                    return Some(id);
                }
            }
        }
        self.last_executed()
    }

    /// One-way plot/image relay attributed to the current cell.
    fn output(&self, kind: &'static str, data: Value) {
        let Ok(rpc) = self.rpc() else { return };
        let cell_id = match self.guess_cell_id(None) {
            Some(id) => Value::from(id),
            None => Value::Null,
        };
        tokio::spawn(async move {
            if let Err(e) = rpc.call(kind, vec![cell_id, data]).await {
                tracing::debug!("{} relay failed: {}", kind, e);
            }
        });
    }
}

/// The sandbox side of the bridge.
///
/// Construct with [`Sandbox::builder`]; `connect` wires the `runCell` handler
/// into a fresh [`RpcChannel`] over the given transport.
pub struct Sandbox {
    inner: Arc<Inner>,
}

impl Sandbox {
    pub fn builder() -> SandboxBuilder {
        SandboxBuilder::new()
    }

    /// Records the cell as executing, transpiles, evaluates, and runs it. A
    /// produced value is logged through the cell's console. Failures are
    /// relayed as console output; outside test mode they do not fail the
    /// operation itself.
    pub async fn run_cell(&self, source: &str, cell_id: u64) -> std::result::Result<(), Exception> {
        self.inner.run_cell(source, cell_id).await
    }

    /// Attributes an error to a cell: innermost synthetic entry-point frame
    /// in the stack if present, otherwise the last executed cell.
    pub fn guess_cell_id(&self, stack: Option<&str>) -> Option<u64> {
        self.inner.guess_cell_id(stack)
    }

    /// Id of the last cell to enter `run_cell`, if any.
    pub fn last_executed(&self) -> Option<u64> {
        self.inner.last_executed()
    }

    /// Reports an error that surfaced outside any `runCell` invocation. With
    /// no attributable cell (no recognizable frame and nothing executed yet)
    /// the report is skipped.
    pub fn report_uncaught(&self, exception: &Exception) {
        let Some(cell_id) = self.inner.guess_cell_id(Some(&exception.stack)) else {
            tracing::debug!("dropping unattributable error: {}", exception.message);
            return;
        };
        let formatted = self.inner.transpiler.format_error(exception);
        self.inner.console_relay(cell_id, formatted);
    }

    /// Relays plot data to the host, attributed to the current cell.
    pub fn plot(&self, data: Value) {
        self.inner.output("plot", data);
    }

    /// Relays image data to the host, attributed to the current cell.
    pub fn imshow(&self, data: Value) {
        self.inner.output("imshow", data);
    }

    /// Tears down the underlying channel.
    pub fn close(&self) {
        if let Some(rpc) = self.inner.rpc.get() {
            rpc.close();
        }
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox").finish_non_exhaustive()
    }
}

/// Fluent construction for [`Sandbox`].
#[derive(Default)]
pub struct SandboxBuilder {
    transpiler: Option<Arc<dyn Transpiler>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    modules: ModuleRegistry,
    test_mode: bool,
}

impl SandboxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transpiler(mut self, transpiler: impl Transpiler + 'static) -> Self {
        self.transpiler = Some(Arc::new(transpiler));
        self
    }

    pub fn evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    pub fn modules(mut self, modules: ModuleRegistry) -> Self {
        self.modules = modules;
        self
    }

    /// Marks the host environment as an automated test runner: cell failures
    /// then also fail the `runCell` call itself.
    pub fn test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Wires the `runCell` handler into a channel over `transport` and
    /// returns the connected sandbox.
    pub fn connect(self, transport: Box<dyn Transport>) -> Result<Sandbox> {
        let inner = Arc::new(Inner {
            rpc: OnceLock::new(),
            transpiler: self.transpiler.ok_or(Error::MissingTranspiler)?,
            evaluator: self.evaluator.ok_or(Error::MissingEvaluator)?,
            scope: Scope::new(),
            modules: self.modules,
            last_executed: AtomicU64::new(0),
            test_mode: self.test_mode,
        });

        let handler_inner = inner.clone();
        let handlers = Handlers::new().register("runCell", move |args| {
            let inner = handler_inner.clone();
            async move {
                let source = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| Exception::new("runCell: missing source"))?
                    .to_string();
                let cell_id = args
                    .get(1)
                    .and_then(Value::as_u64)
                    .ok_or_else(|| Exception::new("runCell: missing cell id"))?;
                inner.run_cell(&source, cell_id).await?;
                Ok(Value::Null)
            }
        });

        let rpc = Arc::new(RpcChannel::new(transport, handlers));
        // Published before connect returns, ahead of any inbound call.
        let _ = inner.rpc.set(rpc);

        Ok(Sandbox { inner })
    }
}
