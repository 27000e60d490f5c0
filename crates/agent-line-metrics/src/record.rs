use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};

use crate::delta::FileDelta;

/// Session-wide fields copied into every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordContext {
    pub session_id: String,
    pub response_id: String,
    pub agent_id: Option<String>,
    pub command: Option<String>,
    pub user: Option<String>,
    /// Repository URL, or the workspace path when there is no remote.
    pub repository: String,
    pub editor_version: String,
    pub model: String,
}

/// One completed file edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineEditRecord {
    pub session_id: String,
    pub minute_token: String,
    pub response_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub repository: String,
    pub editor_version: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub delta: FileDelta,
}

impl LineEditRecord {
    pub fn new(context: &RecordContext, delta: FileDelta, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id: context.session_id.clone(),
            minute_token: minute_token(&context.session_id, timestamp),
            response_id: context.response_id.clone(),
            agent_id: context.agent_id.clone(),
            command: context.command.clone(),
            user: context.user.clone(),
            repository: context.repository.clone(),
            editor_version: context.editor_version.clone(),
            model: context.model.clone(),
            timestamp,
            delta,
        }
    }
}

/// Deterministic token shared by every record of a session emitted within the same minute.
pub fn minute_token(session_id: &str, at: DateTime<Utc>) -> String {
    let minute = at.timestamp().div_euclid(60);
    let digest = Sha256::digest(format!("{session_id}:{minute}").as_bytes());
    hex::encode(&digest[..8])
}
