// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process output protocol.
//!
//! Processes talk back through their output. A line is one of:
//!
//! - `run {"process": ..., "input": ...}` - request to spawn another process
//! - `export <file>` - file to hand over to the upload directory
//! - one or more JSON objects - status and output updates
//! - anything else - plain text for `stdout.txt`
//!
//! Keys of JSON objects starting with `proc.` are process meta fields; all
//! other keys are output fields.

use std::collections::BTreeMap;

use resolwe_protocol::{DataStatus, ExportedFiles};
use serde_json::{Deserializer, Map, Value};
use tracing::warn;
use uuid::Uuid;

/// Classified line of process output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Spawn(Value),
    Export(String),
    Json(Vec<Map<String, Value>>),
    Text,
}

/// Classify one line of process output.
pub fn classify(line: &str) -> OutputLine {
    let trimmed = line.trim();

    if let Some(rest) = trimmed.strip_prefix("run")
        && let Ok(spawn @ Value::Object(_)) = serde_json::from_str::<Value>(rest.trim())
    {
        return OutputLine::Spawn(spawn);
    }

    if let Some(rest) = trimmed.strip_prefix("export")
        && rest.starts_with(char::is_whitespace)
    {
        return OutputLine::Export(rest.trim().to_string());
    }

    parse_objects(trimmed).map_or(OutputLine::Text, OutputLine::Json)
}

/// Parse a line made of concatenated JSON objects.
fn parse_objects(line: &str) -> Option<Vec<Map<String, Value>>> {
    if !line.starts_with('{') {
        return None;
    }
    let mut objects = Vec::new();
    for value in Deserializer::from_str(line).into_iter::<Value>() {
        match value.ok()? {
            Value::Object(object) => objects.push(object),
            _ => return None,
        }
    }
    Some(objects)
}

/// Accumulated state of a running process, built from its output.
#[derive(Debug)]
pub struct ProcessState {
    data_id: u64,
    /// Return code reported by the process (`proc.rc` or implied by `proc.error`)
    pub process_rc: i32,
    process_error: Vec<Value>,
    process_warning: Vec<Value>,
    process_info: Vec<Value>,
    output: Map<String, Value>,
    /// Spawn requests, in order
    pub spawn_processes: Vec<Value>,
    /// Exported files of this Data object
    pub exported_files: ExportedFiles,
}

impl ProcessState {
    pub fn new(data_id: u64) -> Self {
        Self {
            data_id,
            process_rc: 0,
            process_error: Vec::new(),
            process_warning: Vec::new(),
            process_info: Vec::new(),
            output: Map::new(),
            spawn_processes: Vec::new(),
            exported_files: BTreeMap::new(),
        }
    }

    /// Apply JSON objects from one line and return the changeset to send.
    ///
    /// Message lists are reset once they were put into a changeset, the
    /// manager appends them on its side.
    pub fn apply(&mut self, objects: &[Map<String, Value>]) -> Map<String, Value> {
        let mut changeset = Map::new();

        for object in objects {
            for (key, value) in object {
                match key.as_str() {
                    "proc.error" => {
                        self.process_error.push(value.clone());
                        if self.process_rc == 0 {
                            self.process_rc = 1;
                            changeset.insert("process_rc".into(), self.process_rc.into());
                        }
                        changeset.insert("process_error".into(), self.process_error.clone().into());
                        changeset.insert("status".into(), DataStatus::Error.into());
                    }
                    "proc.warning" => {
                        self.process_warning.push(value.clone());
                        changeset.insert(
                            "process_warning".into(),
                            self.process_warning.clone().into(),
                        );
                    }
                    "proc.info" => {
                        self.process_info.push(value.clone());
                        changeset.insert("process_info".into(), self.process_info.clone().into());
                    }
                    "proc.rc" => match as_int(value) {
                        Some(rc) => {
                            self.process_rc = rc;
                            changeset.insert("process_rc".into(), rc.into());
                            if rc != 0 {
                                changeset.insert("status".into(), DataStatus::Error.into());
                            }
                        }
                        None => warn!(value = %value, "ignoring non-integer proc.rc"),
                    },
                    "proc.progress" => match as_float(value) {
                        Some(progress) => {
                            let percent = (progress * 100.0) as i64;
                            changeset.insert("process_progress".into(), percent.into());
                        }
                        None => warn!(value = %value, "ignoring non-numeric proc.progress"),
                    },
                    key if key.starts_with("proc.") => {}
                    _ => {
                        self.output.insert(key.clone(), value.clone());
                        changeset.insert("output".into(), Value::Object(self.output.clone()));
                    }
                }
            }
        }

        if !changeset.is_empty() {
            self.process_error.clear();
            self.process_warning.clear();
            self.process_info.clear();
        }
        changeset
    }

    /// Record an exported file and return the unique name it is stored under.
    pub fn record_export(&mut self, file: &str) -> String {
        let unique_name = format!("export_{}", Uuid::new_v4().simple());
        self.exported_files
            .entry(self.data_id)
            .or_default()
            .insert(file.to_string(), unique_name.clone());
        unique_name
    }
}

fn as_int(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn objects(line: &str) -> Vec<Map<String, Value>> {
        match classify(line) {
            OutputLine::Json(objects) => objects,
            other => panic!("expected JSON line, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_spawn() {
        assert_eq!(
            classify(r#"run {"process": "upload-bam", "input": {"src": "a.bam"}}"#),
            OutputLine::Spawn(json!({"process": "upload-bam", "input": {"src": "a.bam"}}))
        );
    }

    #[test]
    fn test_classify_text_lookalikes() {
        assert_eq!(classify("running alignment"), OutputLine::Text);
        assert_eq!(classify("run [1, 2]"), OutputLine::Text);
        assert_eq!(classify("exported"), OutputLine::Text);
        assert_eq!(classify("{not json"), OutputLine::Text);
        assert_eq!(classify(r#"{"a": 1} trailing"#), OutputLine::Text);
        assert_eq!(classify(""), OutputLine::Text);
        assert_eq!(classify("+ echo hello"), OutputLine::Text);
    }

    #[test]
    fn test_classify_export() {
        assert_eq!(
            classify("export reads/sample.fastq.gz "),
            OutputLine::Export("reads/sample.fastq.gz".to_string())
        );
    }

    #[test]
    fn test_classify_concatenated_objects() {
        let objs = objects(r#"{"proc.progress": 0.5}{"bam": {"file": "x.bam"}}"#);
        assert_eq!(objs.len(), 2);
    }

    #[test]
    fn test_output_fields_accumulate() {
        let mut state = ProcessState::new(1);
        state.apply(&objects(r#"{"bam": {"file": "a.bam"}}"#));
        let changeset = state.apply(&objects(r#"{"bai": {"file": "a.bai"}}"#));

        assert_eq!(
            changeset["output"],
            json!({"bam": {"file": "a.bam"}, "bai": {"file": "a.bai"}})
        );
        assert_eq!(state.process_rc, 0);
    }

    #[test]
    fn test_error_sets_rc_and_status() {
        let mut state = ProcessState::new(1);
        let changeset = state.apply(&objects(r#"{"proc.error": "boom"}"#));

        assert_eq!(state.process_rc, 1);
        assert_eq!(changeset["process_rc"], 1);
        assert_eq!(changeset["process_error"], json!(["boom"]));
        assert_eq!(changeset["status"], "ER");
    }

    #[test]
    fn test_messages_cleared_after_update() {
        let mut state = ProcessState::new(1);
        state.apply(&objects(r#"{"proc.warning": "first"}"#));
        let changeset = state.apply(&objects(r#"{"proc.warning": "second"}"#));
        assert_eq!(changeset["process_warning"], json!(["second"]));
    }

    #[test]
    fn test_rc_and_progress() {
        let mut state = ProcessState::new(1);

        let changeset = state.apply(&objects(r#"{"proc.progress": 0.42}"#));
        assert_eq!(changeset["process_progress"], 42);
        assert!(!changeset.contains_key("status"));

        let changeset = state.apply(&objects(r#"{"proc.rc": "3"}"#));
        assert_eq!(state.process_rc, 3);
        assert_eq!(changeset["status"], "ER");

        let changeset = state.apply(&objects(r#"{"proc.rc": 0}"#));
        assert_eq!(state.process_rc, 0);
        assert!(!changeset.contains_key("status"));
    }

    #[test]
    fn test_unknown_proc_key_is_ignored() {
        let mut state = ProcessState::new(1);
        let changeset = state.apply(&objects(r#"{"proc.unknown": 1}"#));
        assert!(changeset.is_empty());
    }

    #[test]
    fn test_record_export() {
        let mut state = ProcessState::new(9);
        let unique = state.record_export("result.txt");

        assert!(unique.starts_with("export_"));
        assert_eq!(unique.len(), "export_".len() + 32);
        assert_eq!(state.exported_files[&9]["result.txt"], unique);
    }
}
