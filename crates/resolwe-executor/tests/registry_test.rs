// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor registry tests.

use async_trait::async_trait;
use resolwe_executor::{
    ExecutorError, ExecutorRegistry, FlowExecutor, NullFlowExecutor, Result, RunContext,
};

struct CustomExecutor;

#[async_trait]
impl FlowExecutor for CustomExecutor {
    fn name(&self) -> &'static str {
        "custom"
    }

    async fn run(&mut self, _ctx: &RunContext, _data_id: u64, _script: &str) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_unknown_kind_lists_known_kinds() {
    let registry = ExecutorRegistry::builtin();
    match registry.resolve(".docker") {
        Err(ExecutorError::UnknownExecutor { kind, known }) => {
            assert_eq!(kind, "docker");
            assert_eq!(known, vec!["local".to_string(), "null".to_string()]);
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("docker executor should not be registered"),
    }
}

#[test]
fn test_invalid_module_name() {
    let registry = ExecutorRegistry::builtin();
    assert!(matches!(
        registry.resolve("../local"),
        Err(ExecutorError::InvalidModuleName(ref module)) if module == "../local"
    ));
}

#[test]
fn test_register_custom_executor() {
    let mut registry = ExecutorRegistry::new();
    assert!(registry.kinds().is_empty());

    assert!(registry.register("custom", || Box::new(CustomExecutor)).is_none());
    let executor = registry.resolve(".custom.run").unwrap()();
    assert_eq!(executor.name(), "custom");
}

#[test]
fn test_register_replaces_existing() {
    let mut registry = ExecutorRegistry::builtin();
    let previous = registry.register("local", || Box::new(NullFlowExecutor));

    assert!(previous.is_some());
    assert_eq!(registry.resolve(".local").unwrap()().name(), "null");
    assert_eq!(registry.kinds(), vec!["local", "null"]);
}
