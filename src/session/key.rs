use serde::{Deserialize, Serialize};
use std::fmt;

/// Direct message or group conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Dm,
    Group,
}

impl ChatKind {
    pub fn from_is_group(is_group: bool) -> Self {
        if is_group { Self::Group } else { Self::Dm }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Group => "group",
        }
    }
}

/// Stable identifier of one conversation:
/// `agent:<agent_id>:<platform>:<dm|group>:<chat_id>`.
///
/// The key is the only sharding input for the run queue and the session
/// registry, so building it twice from the same inputs must give the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn build(agent_id: &str, platform: &str, is_group: bool, chat_id: &str) -> Self {
        Self(format!(
            "agent:{agent_id}:{platform}:{}:{chat_id}",
            ChatKind::from_is_group(is_group).as_str()
        ))
    }

    /// Accept a key received from outside (control-plane path parameter).
    /// Returns `None` unless it has the `agent:` structure.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts = SessionKeyParts::split(raw)?;
        if parts.agent_id.is_empty() || parts.platform.is_empty() || parts.chat_id.is_empty() {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parts(&self) -> Option<SessionKeyParts<'_>> {
        SessionKeyParts::split(&self.0)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Borrowed view of a key's components. Chat ids may themselves contain `:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeyParts<'a> {
    pub agent_id: &'a str,
    pub platform: &'a str,
    pub kind: ChatKind,
    pub chat_id: &'a str,
}

impl<'a> SessionKeyParts<'a> {
    fn split(raw: &'a str) -> Option<Self> {
        let mut it = raw.splitn(5, ':');
        if it.next()? != "agent" {
            return None;
        }
        let agent_id = it.next()?;
        let platform = it.next()?;
        let kind = match it.next()? {
            "dm" => ChatKind::Dm,
            "group" => ChatKind::Group,
            _ => return None,
        };
        let chat_id = it.next()?;
        Some(Self {
            agent_id,
            platform,
            kind,
            chat_id,
        })
    }
}
