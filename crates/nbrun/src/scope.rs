//! # Global Scope and Module Whitelist
//!
//! The global execution scope is shared by every cell in a sandbox; bindings
//! written by one cell are visible to the next. Importable modules come from
//! a fixed whitelist built at construction.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use nbrpc::Exception;

/// The sandbox's global bindings, surviving across cells.
#[derive(Default)]
pub struct Scope {
    bindings: DashMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).map(|entry| entry.value().clone())
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }
}

/// An importable module. Opaque to the bridge; cells downcast as needed.
pub type Module = Arc<dyn Any + Send + Sync>;

/// Fixed whitelist of importable modules. Immutable after construction.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Module>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module to the whitelist. Fluent, for construction-time use.
    pub fn register(mut self, name: impl Into<String>, module: Module) -> Self {
        self.modules.insert(name.into(), module);
        self
    }

    /// Resolves a module by name; anything off the whitelist is a thrown
    /// error, exactly like an unknown import in cell code.
    pub fn resolve(&self, name: &str) -> std::result::Result<Module, Exception> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| Exception::new(format!("Unknown module: {}", name)))
    }
}
