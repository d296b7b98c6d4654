// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local executor tests running real shell scripts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use resolwe_executor::{
    ExecutorConfig, ExecutorError, FlowExecutor, LocalFlowExecutor, ManagerChannel, MockManager,
    RunContext,
};
use resolwe_protocol::{Command, ExecutorCommand};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

const DATA_ID: u64 = 64;

struct Harness {
    data_dir: TempDir,
    upload_dir: TempDir,
    manager: Arc<MockManager>,
    ctx: RunContext,
}

impl Harness {
    fn new() -> Self {
        let data_dir = TempDir::new().unwrap();
        let upload_dir = TempDir::new().unwrap();
        let config = ExecutorConfig::new(DATA_ID, data_dir.path())
            .with_upload_dir(upload_dir.path())
            .with_kill_delay_ms(200);
        Self::with_config(data_dir, upload_dir, config)
    }

    fn with_config(data_dir: TempDir, upload_dir: TempDir, config: ExecutorConfig) -> Self {
        let manager = Arc::new(MockManager::new());
        let ctx = RunContext::new(
            ManagerChannel::new(manager.clone(), DATA_ID),
            Arc::new(config),
        );
        Self {
            data_dir,
            upload_dir,
            manager,
            ctx,
        }
    }

    async fn run(&self, script: &str) -> resolwe_executor::Result<()> {
        let result = LocalFlowExecutor::new().run(&self.ctx, DATA_ID, script).await;
        self.ctx.drain().await;
        result
    }

    fn commands(&self) -> Vec<Command> {
        self.manager
            .commands()
            .into_iter()
            .map(|ExecutorCommand { command, .. }| command)
            .collect()
    }

    fn updates(&self) -> Vec<Map<String, Value>> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::Update { changeset } => Some(changeset),
                _ => None,
            })
            .collect()
    }

    fn finish(&self) -> Command {
        self.commands()
            .into_iter()
            .find(|c| matches!(c, Command::Finish { .. }))
            .expect("finish was sent")
    }

    fn stdout(&self) -> String {
        std::fs::read_to_string(self.data_dir.path().join("stdout.txt")).unwrap()
    }
}

#[tokio::test]
async fn test_script_output_is_reported() {
    let harness = Harness::new();

    harness
        .run(
            r#"echo hello
echo '{"proc.progress": 0.5}'
echo '{"result": 42}'"#,
        )
        .await
        .unwrap();

    let updates = harness.updates();
    assert_eq!(updates[0]["status"], "PR");
    assert!(updates[0]["process_pid"].as_u64().is_some());
    assert!(updates.iter().any(|u| u.get("process_progress") == Some(&json!(50))));
    assert!(updates.iter().any(|u| u.get("output") == Some(&json!({"result": 42}))));
    assert_eq!(
        harness.finish(),
        Command::Finish {
            process_rc: 0,
            spawn_processes: None,
            exported_files_mapper: None
        }
    );

    let stdout = harness.stdout();
    // Traces from `set -x` land in stdout.txt with the plain output.
    assert!(stdout.contains("+ echo hello"));
    assert!(stdout.lines().any(|line| line == "hello"));
    let jsonout = std::fs::read_to_string(harness.data_dir.path().join("jsonout.txt")).unwrap();
    assert_eq!(jsonout.lines().count(), 2);
}

#[tokio::test]
async fn test_exit_code_is_reported() {
    let harness = Harness::new();

    harness.run("echo failing >&2\nexit 3").await.unwrap();

    assert!(matches!(harness.finish(), Command::Finish { process_rc: 3, .. }));
    assert!(harness.stdout().lines().any(|line| line == "failing"));
}

#[tokio::test]
async fn test_reported_error_stops_process() {
    let harness = Harness::new();
    let started = Instant::now();

    harness
        .run("echo '{\"proc.error\": \"bad input\"}'\nsleep 5\necho unreachable")
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(matches!(harness.finish(), Command::Finish { process_rc: 1, .. }));
    let error_update = harness
        .updates()
        .into_iter()
        .find(|u| u.contains_key("process_error"))
        .unwrap();
    assert_eq!(error_update["process_error"], json!(["bad input"]));
    assert_eq!(error_update["status"], "ER");
    assert!(!harness.stdout().lines().any(|line| line == "unreachable"));
}

#[tokio::test]
async fn test_spawn_and_export() {
    let harness = Harness::new();

    harness
        .run(
            r#"echo ACGT > reads.fq
echo 'export reads.fq'
echo 'run {"process": "upload-fastq", "input": {"src": "reads.fq"}}'"#,
        )
        .await
        .unwrap();

    let Command::Finish {
        process_rc,
        spawn_processes,
        exported_files_mapper,
    } = harness.finish()
    else {
        unreachable!()
    };
    assert_eq!(process_rc, 0);
    assert_eq!(
        spawn_processes,
        Some(vec![json!({"process": "upload-fastq", "input": {"src": "reads.fq"}})])
    );

    let mapper = exported_files_mapper.unwrap();
    let unique_name = &mapper[&DATA_ID]["reads.fq"];
    assert!(!harness.data_dir.path().join("reads.fq").exists());
    assert_eq!(
        std::fs::read_to_string(harness.upload_dir.path().join(unique_name)).unwrap(),
        "ACGT\n"
    );
}

#[tokio::test]
async fn test_spawns_dropped_on_failure() {
    let harness = Harness::new();

    harness
        .run("echo 'run {\"process\": \"next\"}'\nexit 1")
        .await
        .unwrap();

    assert_eq!(
        harness.finish(),
        Command::Finish {
            process_rc: 1,
            spawn_processes: None,
            exported_files_mapper: None
        }
    );
}

#[tokio::test]
async fn test_missing_interpreter_reports_failure() {
    let data_dir = TempDir::new().unwrap();
    let upload_dir = TempDir::new().unwrap();
    let config =
        ExecutorConfig::new(DATA_ID, data_dir.path()).with_local_command("/nonexistent/shell");
    let harness = Harness::with_config(data_dir, upload_dir, config);

    let err = harness.run("echo hi").await.unwrap_err();

    assert!(matches!(err, ExecutorError::Process(ref msg) if msg.contains("/nonexistent/shell")));
    let names: Vec<&str> = harness.commands().iter().map(Command::name).collect();
    assert_eq!(names, vec!["update", "abort", "finish"]);
    assert!(matches!(harness.finish(), Command::Finish { process_rc: 1, .. }));
}
