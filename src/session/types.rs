//! Session types: transcript entries and the per-conversation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionKey;

/// Role of a transcript participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One append-only transcript line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub has_image: bool,
    pub timestamp: DateTime<Utc>,
}

/// Mutable state of one conversation. Created lazily on the first message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub key: SessionKey,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub transcript: Vec<TranscriptEntry>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            message_count: 0,
            created_at: now,
            last_activity: now,
            transcript: Vec::new(),
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>, has_image: bool) {
        let now = Utc::now();
        if role == Role::User {
            self.message_count += 1;
        }
        self.last_activity = now;
        self.transcript.push(TranscriptEntry {
            role,
            content: content.into(),
            has_image,
            timestamp: now,
        });
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            key: self.key.clone(),
            message_count: self.message_count,
            transcript_len: self.transcript.len(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

/// Transcript-free view used by listings.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub key: SessionKey,
    pub message_count: u64,
    pub transcript_len: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}
