// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor registry.
//!
//! Maps executor kinds to constructor functions. The command line names an
//! executor by its module (`.local`, `.local.run` or plain `local`); the
//! registry reduces that to a kind and looks the constructor up.

use std::collections::BTreeMap;

use crate::error::{ExecutorError, Result};
use crate::executor::{FlowExecutor, LocalFlowExecutor, NullFlowExecutor};

/// Creates an executor with no arguments.
pub type ExecutorConstructor = fn() -> Box<dyn FlowExecutor>;

/// Registry of executor constructors, keyed by kind.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    constructors: BTreeMap<String, ExecutorConstructor>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the executors shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("local", || Box::new(LocalFlowExecutor::new()));
        registry.register("null", || Box::new(NullFlowExecutor));
        registry
    }

    /// Register a constructor, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        constructor: ExecutorConstructor,
    ) -> Option<ExecutorConstructor> {
        self.constructors.insert(kind.into(), constructor)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Look up the constructor for a module name.
    pub fn resolve(&self, module: &str) -> Result<ExecutorConstructor> {
        let kind = kind_from_module(module)?;
        self.constructors
            .get(kind)
            .copied()
            .ok_or_else(|| ExecutorError::UnknownExecutor {
                kind: kind.to_string(),
                known: self.kinds().into_iter().map(str::to_string).collect(),
            })
    }
}

/// Reduce a module name to an executor kind.
///
/// `.local`, `.local.run` and `local` all name the `local` kind.
pub fn kind_from_module(module: &str) -> Result<&str> {
    let trimmed = module.trim();
    let relative = trimmed.strip_prefix('.').unwrap_or(trimmed);
    let kind = relative.strip_suffix(".run").unwrap_or(relative);

    let valid = !kind.is_empty()
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !kind.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(ExecutorError::InvalidModuleName(module.to_string()));
    }
    Ok(kind)
}
