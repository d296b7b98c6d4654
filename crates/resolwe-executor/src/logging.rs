// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Log forwarding to the manager.
//!
//! Every tracing event at INFO or above is printed locally and, while a
//! manager channel is attached, also sent to the manager as a `log` command.
//! Sends run as spawned tasks; their handles are kept in the [`LogForwarder`]
//! so the bootstrap can wait for them before closing the channel.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::{Map, Value, json};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber, warn};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{DEFAULT_LOG_FILTER, LOG_ENV};
use crate::error::Result;
use crate::manager::ManagerChannel;

/// Targets whose events are never forwarded, to keep log sends from
/// producing more log sends.
const LOCAL_ONLY_TARGETS: &[&str] = &[
    "resolwe_protocol",
    "resolwe_executor::manager",
    "resolwe_executor::logging",
];

/// Outcome of waiting for a set of tracked tasks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that finished successfully
    pub completed: usize,
    /// Tasks that returned an error or panicked
    pub failed: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }

    pub(crate) fn merge(&mut self, other: DrainReport) {
        self.completed += other.completed;
        self.failed += other.failed;
    }
}

#[derive(Default)]
struct ForwarderState {
    channel: Option<ManagerChannel>,
    pending: Vec<JoinHandle<Result<bool>>>,
}

/// Collects pending log sends for the manager.
#[derive(Clone, Default)]
pub struct LogForwarder {
    state: Arc<Mutex<ForwarderState>>,
}

impl LogForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding records over `channel`.
    pub fn attach(&self, channel: ManagerChannel) {
        self.lock().channel = Some(channel);
    }

    /// Stop forwarding. Already spawned sends stay pending.
    pub fn detach(&self) {
        self.lock().channel = None;
    }

    pub fn is_attached(&self) -> bool {
        self.lock().channel.is_some()
    }

    /// Number of sends not yet drained.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Spawn a send of `record` on the current runtime.
    ///
    /// Returns `false` when no channel is attached or no runtime is running.
    pub fn forward(&self, record: Value) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            return false;
        };
        let mut state = self.lock();
        let Some(channel) = state.channel.clone() else {
            return false;
        };

        let handle = runtime.spawn(async move { channel.send_log(record).await });
        state.pending.push(handle);
        true
    }

    /// Wait for every pending send, including sends spawned while draining.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            let handles = std::mem::take(&mut self.lock().pending);
            if handles.is_empty() {
                return report;
            }
            for handle in handles {
                match handle.await {
                    Ok(Ok(_)) => report.completed += 1,
                    Ok(Err(e)) => {
                        warn!(error = %e, "log record was not delivered");
                        report.failed += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "log send task failed");
                        report.failed += 1;
                    }
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ForwarderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Layer turning tracing events into manager log records.
pub struct ManagerLogLayer {
    forwarder: LogForwarder,
}

impl ManagerLogLayer {
    pub fn new(forwarder: LogForwarder) -> Self {
        Self { forwarder }
    }
}

impl<S: Subscriber> Layer<S> for ManagerLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::INFO || is_local_only(metadata.target()) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        self.forwarder.forward(log_record(
            metadata.level(),
            metadata.target(),
            metadata.file(),
            metadata.line(),
            visitor,
        ));
    }
}

fn is_local_only(target: &str) -> bool {
    LOCAL_ONLY_TARGETS
        .iter()
        .any(|prefix| target.starts_with(prefix))
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

fn log_record(
    level: &Level,
    target: &str,
    file: Option<&str>,
    line: Option<u32>,
    visitor: RecordVisitor,
) -> Value {
    let created = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
    json!({
        "msg": visitor.message.unwrap_or_default(),
        "levelname": level_name(level),
        "name": target,
        "pathname": file,
        "lineno": line,
        "created": created,
        "fields": visitor.fields,
    })
}

#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl RecordVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }
}

/// Filter from `RESOLWE_LOG`, falling back to `resolwe_executor=info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILTER.into())
}

/// Install local output plus manager forwarding as the default subscriber.
///
/// The subscriber stays in effect until the returned guard is dropped.
pub fn install(forwarder: &LogForwarder, filter: EnvFilter) -> DefaultGuard {
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(ManagerLogLayer::new(forwarder.clone()));
    tracing::subscriber::set_default(subscriber)
}
