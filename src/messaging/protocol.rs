//! Master/worker message types.
//!
//! Every message is a JSON object `{"type": ..., "data": ...}`; `data` is
//! omitted for messages without a payload.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DocshiftError, Result};
use crate::provider::ProviderConfig;
use crate::types::{ChunkIndex, DocumentId};

/// Everything a worker needs to connect to the job's database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationArgs {
    pub database_name: String,
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Directory the worker writes diff ledgers into
    pub ledger_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAssignment {
    pub index: ChunkIndex,
    pub ids: Vec<DocumentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Master → Worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasterMessage {
    ReceiveMigrationArgs(MigrationArgs),
    /// Transform program source text
    ReceiveTransform(String),
    ReceiveChunk(ChunkAssignment),
    Stop,
}

/// Worker → Master
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    AckMigrationArgs(Ack),
    AckTransform(Ack),
    ChunkCompleted(ChunkIndex),
    ProcessFinished,
}

/// Line-oriented JSON encoding shared by both directions
pub trait ProtocolMessage: Serialize + DeserializeOwned {
    const MESSAGE_TYPES: &'static [&'static str];

    fn message_type(&self) -> &'static str;

    fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one frame; unknown types and malformed frames are protocol errors
    fn decode(frame: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| DocshiftError::protocol(format!("malformed frame: {e}")))?;
        let message_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DocshiftError::protocol("frame has no string `type`"))?;
        if !Self::MESSAGE_TYPES.contains(&message_type) {
            return Err(DocshiftError::protocol(format!(
                "unknown message type {message_type}"
            )));
        }
        let message_type = message_type.to_string();
        serde_json::from_value(value).map_err(|e| {
            DocshiftError::protocol(format!("invalid {message_type} payload: {e}"))
        })
    }
}

impl ProtocolMessage for MasterMessage {
    const MESSAGE_TYPES: &'static [&'static str] = &[
        "RECEIVE_MIGRATION_ARGS",
        "RECEIVE_TRANSFORM",
        "RECEIVE_CHUNK",
        "STOP",
    ];

    fn message_type(&self) -> &'static str {
        match self {
            Self::ReceiveMigrationArgs(_) => "RECEIVE_MIGRATION_ARGS",
            Self::ReceiveTransform(_) => "RECEIVE_TRANSFORM",
            Self::ReceiveChunk(_) => "RECEIVE_CHUNK",
            Self::Stop => "STOP",
        }
    }
}

impl ProtocolMessage for WorkerMessage {
    const MESSAGE_TYPES: &'static [&'static str] = &[
        "ACK_MIGRATION_ARGS",
        "ACK_TRANSFORM",
        "CHUNK_COMPLETED",
        "PROCESS_FINISHED",
    ];

    fn message_type(&self) -> &'static str {
        match self {
            Self::AckMigrationArgs(_) => "ACK_MIGRATION_ARGS",
            Self::AckTransform(_) => "ACK_TRANSFORM",
            Self::ChunkCompleted(_) => "CHUNK_COMPLETED",
            Self::ProcessFinished => "PROCESS_FINISHED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let chunk = MasterMessage::ReceiveChunk(ChunkAssignment {
            index: 2,
            ids: vec!["a".into(), "b".into()],
        });
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            json!({"type": "RECEIVE_CHUNK", "data": {"index": 2, "ids": ["a", "b"]}})
        );
        assert_eq!(
            serde_json::to_value(MasterMessage::Stop).unwrap(),
            json!({"type": "STOP"})
        );
        assert_eq!(
            serde_json::to_value(WorkerMessage::ChunkCompleted(4)).unwrap(),
            json!({"type": "CHUNK_COMPLETED", "data": 4})
        );
        assert_eq!(
            serde_json::to_value(WorkerMessage::AckTransform(Ack::ok())).unwrap(),
            json!({"type": "ACK_TRANSFORM", "data": {"success": true}})
        );
    }

    #[test]
    fn test_decode_known_messages() {
        let args = MasterMessage::decode(
            r#"{"type":"RECEIVE_MIGRATION_ARGS","data":{"database_name":"db","ledger_dir":"/tmp"}}"#,
        )
        .unwrap();
        match args {
            MasterMessage::ReceiveMigrationArgs(args) => {
                assert_eq!(args.database_name, "db");
                assert_eq!(args.provider, ProviderConfig::Memory);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            WorkerMessage::decode(r#"{"type":"PROCESS_FINISHED"}"#).unwrap(),
            WorkerMessage::ProcessFinished
        );
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = MasterMessage::decode(r#"{"type":"REBOOT","data":null}"#).unwrap_err();
        assert!(matches!(err, DocshiftError::ProtocolError(_)));
        assert!(err.to_string().contains("unknown message type REBOOT"));

        // A worker-side type is unknown to the worker's decoder
        let err = MasterMessage::decode(r#"{"type":"CHUNK_COMPLETED","data":1}"#).unwrap_err();
        assert!(err.to_string().contains("unknown message type"));
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        for frame in [
            "not json",
            r#"{"data": 1}"#,
            r#"{"type": 7}"#,
            r#"{"type":"CHUNK_COMPLETED","data":"three"}"#,
        ] {
            let err = WorkerMessage::decode(frame).unwrap_err();
            assert!(matches!(err, DocshiftError::ProtocolError(_)), "{frame}");
        }
    }

    #[test]
    fn test_encode_is_single_line() {
        let message = MasterMessage::ReceiveTransform("[\n]".to_string());
        let encoded = message.encode().unwrap();
        assert!(!encoded.contains('\n'));
        assert_eq!(MasterMessage::decode(&encoded).unwrap(), message);
        assert_eq!(message.message_type(), "RECEIVE_TRANSFORM");
    }
}
