// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messages exchanged between an executor and the manager.
//!
//! Commands are sent flat, with the command name under the `command` key:
//!
//! ```json
//! {"data_id": 42, "command": "update", "changeset": {"status": "PR"}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Mapping of exported files: Data id -> original file name -> unique upload name.
pub type ExportedFiles = BTreeMap<u64, BTreeMap<String, String>>;

/// A command sent by the executor on behalf of one Data object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorCommand {
    /// Data object the command refers to
    pub data_id: u64,
    /// The command itself
    #[serde(flatten)]
    pub command: Command,
}

impl ExecutorCommand {
    pub fn new(data_id: u64, command: Command) -> Self {
        Self { data_id, command }
    }
}

/// Executor-to-manager commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Apply a changeset to the Data object
    Update { changeset: Map<String, Value> },

    /// Processing has finished
    Finish {
        process_rc: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spawn_processes: Option<Vec<Value>>,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "deserialize_exported_files"
        )]
        exported_files_mapper: Option<ExportedFiles>,
    },

    /// Processing was aborted; the manager should not expect a finish
    Abort,

    /// A log record emitted by the executor
    Log { message: Value },
}

/// Data ids are JSON object keys, so they arrive as strings. Commands are
/// flattened into [`ExecutorCommand`], which buffers the payload and keeps
/// those keys from being read as integers directly.
fn deserialize_exported_files<'de, D>(
    deserializer: D,
) -> Result<Option<ExportedFiles>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw: Option<BTreeMap<String, BTreeMap<String, String>>> =
        Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    raw.into_iter()
        .map(|(key, files)| {
            key.parse::<u64>()
                .map(|data_id| (data_id, files))
                .map_err(|_| D::Error::custom(format!("invalid data id key {:?}", key)))
        })
        .collect::<Result<ExportedFiles, _>>()
        .map(Some)
}

impl Command {
    /// Command name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Update { .. } => "update",
            Command::Finish { .. } => "finish",
            Command::Abort => "abort",
            Command::Log { .. } => "log",
        }
    }
}

/// Result code of a manager reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyResult {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ER")]
    Error,
}

/// Reply to a command sent with a `Request` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerReply {
    pub result: ReplyResult,
}

impl ManagerReply {
    pub fn ok() -> Self {
        Self {
            result: ReplyResult::Ok,
        }
    }

    pub fn error() -> Self {
        Self {
            result: ReplyResult::Error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == ReplyResult::Ok
    }
}

/// Data object status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataStatus {
    #[serde(rename = "RE")]
    Resolving,
    #[serde(rename = "WT")]
    Waiting,
    #[serde(rename = "PR")]
    Processing,
    #[serde(rename = "OK")]
    Done,
    #[serde(rename = "ER")]
    Error,
    #[serde(rename = "DR")]
    Dirty,
    #[serde(rename = "UP")]
    Uploading,
}

impl DataStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataStatus::Resolving => "RE",
            DataStatus::Waiting => "WT",
            DataStatus::Processing => "PR",
            DataStatus::Done => "OK",
            DataStatus::Error => "ER",
            DataStatus::Dirty => "DR",
            DataStatus::Uploading => "UP",
        }
    }
}

impl From<DataStatus> for Value {
    fn from(status: DataStatus) -> Self {
        Value::String(status.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_wire_format() {
        let mut changeset = Map::new();
        changeset.insert("status".to_string(), DataStatus::Processing.into());
        let cmd = ExecutorCommand::new(42, Command::Update { changeset });

        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            value,
            json!({"data_id": 42, "command": "update", "changeset": {"status": "PR"}})
        );
    }

    #[test]
    fn test_abort_wire_format() {
        let cmd = ExecutorCommand::new(7, Command::Abort);
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value, json!({"data_id": 7, "command": "abort"}));
    }

    #[test]
    fn test_finish_omits_empty_optionals() {
        let cmd = ExecutorCommand::new(
            1,
            Command::Finish {
                process_rc: 0,
                spawn_processes: None,
                exported_files_mapper: None,
            },
        );
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value, json!({"data_id": 1, "command": "finish", "process_rc": 0}));
    }

    #[test]
    fn test_finish_with_exports_parses() {
        let raw = json!({
            "data_id": 3,
            "command": "finish",
            "process_rc": 0,
            "spawn_processes": [{"process": "upload-fastq"}],
            "exported_files_mapper": {"3": {"reads.fq": "export_abc"}}
        });
        let cmd: ExecutorCommand = serde_json::from_value(raw).unwrap();

        match cmd.command {
            Command::Finish {
                process_rc,
                spawn_processes,
                exported_files_mapper,
            } => {
                assert_eq!(process_rc, 0);
                assert_eq!(spawn_processes.unwrap().len(), 1);
                assert_eq!(exported_files_mapper.unwrap()[&3]["reads.fq"], "export_abc");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_finish_with_exports_survives_the_wire() {
        let mut files = BTreeMap::new();
        files.insert("reads.fq".to_string(), "export_abc".to_string());
        let cmd = ExecutorCommand::new(
            3,
            Command::Finish {
                process_rc: 0,
                spawn_processes: Some(vec![json!({"process": "upload-fastq"})]),
                exported_files_mapper: Some(BTreeMap::from([(3, files)])),
            },
        );

        let bytes = serde_json::to_vec(&cmd).unwrap();
        let decoded: ExecutorCommand = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_finish_rejects_non_numeric_export_key() {
        let raw = json!({
            "data_id": 3,
            "command": "finish",
            "process_rc": 0,
            "exported_files_mapper": {"three": {"reads.fq": "export_abc"}}
        });
        let err = serde_json::from_value::<ExecutorCommand>(raw).unwrap_err();
        assert!(err.to_string().contains("invalid data id key"));
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::Abort.name(), "abort");
        assert_eq!(Command::Log { message: json!({}) }.name(), "log");
    }

    #[test]
    fn test_reply_codes() {
        let ok: ManagerReply = serde_json::from_value(json!({"result": "OK"})).unwrap();
        let err: ManagerReply = serde_json::from_value(json!({"result": "ER"})).unwrap();
        assert!(ok.is_ok());
        assert!(!err.is_ok());
        assert!(serde_json::from_value::<ManagerReply>(json!({"result": "??"})).is_err());
    }

    #[test]
    fn test_status_codes_match_serde() {
        for status in [
            DataStatus::Resolving,
            DataStatus::Waiting,
            DataStatus::Processing,
            DataStatus::Done,
            DataStatus::Error,
            DataStatus::Dirty,
            DataStatus::Uploading,
        ] {
            assert_eq!(serde_json::to_value(status).unwrap(), Value::from(status));
        }
    }
}
