use serde::{Deserialize, Serialize};

use super::traits::InboundMessage;

/// Per-platform allow-list.
///
/// `"*"` in a list admits everyone; an empty list admits no one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Sender ids or chat ids allowed to DM the agent.
    #[serde(default)]
    pub allowed_dms: Vec<String>,
    /// Group chat ids the agent participates in.
    #[serde(default)]
    pub allowed_groups: Vec<String>,
    /// In groups, only respond when mentioned.
    #[serde(default)]
    pub respond_to_mentions_only: bool,
    /// Handles that count as a mention of the agent. Empty means any mention.
    #[serde(default)]
    pub mention_names: Vec<String>,
}

fn list_allows(list: &[String], ids: &[&str]) -> bool {
    list.iter()
        .any(|entry| entry == "*" || ids.iter().any(|id| !id.is_empty() && entry == id))
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

impl AccessPolicy {
    pub fn open() -> Self {
        Self {
            allowed_dms: vec!["*".into()],
            allowed_groups: vec!["*".into()],
            respond_to_mentions_only: false,
            mention_names: Vec::new(),
        }
    }

    pub fn allows(&self, message: &InboundMessage) -> bool {
        if message.is_group {
            list_allows(&self.allowed_groups, &[&message.chat_id])
                && (!self.respond_to_mentions_only || self.is_mentioned(message))
        } else {
            list_allows(&self.allowed_dms, &[&message.sender, &message.chat_id])
        }
    }

    fn is_mentioned(&self, message: &InboundMessage) -> bool {
        if self.mention_names.is_empty() {
            return !message.mentions.is_empty();
        }
        message.mentions.iter().any(|mention| {
            let mention = normalize_handle(mention);
            self.mention_names
                .iter()
                .any(|name| normalize_handle(name) == mention)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dm(sender: &str) -> InboundMessage {
        InboundMessage::direct("telegram", sender, sender, "hi")
    }

    fn group(chat: &str, mentions: &[&str]) -> InboundMessage {
        InboundMessage {
            is_group: true,
            mentions: mentions.iter().map(|m| (*m).to_string()).collect(),
            ..InboundMessage::direct("telegram", chat, "alice", "hi")
        }
    }

    #[test]
    fn empty_lists_deny() {
        let policy = AccessPolicy::default();
        assert!(!policy.allows(&dm("alice")));
        assert!(!policy.allows(&group("g1", &[])));
    }

    #[test]
    fn wildcard_allows_everyone() {
        let policy = AccessPolicy::open();
        assert!(policy.allows(&dm("anyone")));
        assert!(policy.allows(&group("any-group", &[])));
    }

    #[test]
    fn specific_dm_exact_match_not_substring() {
        let policy = AccessPolicy {
            allowed_dms: vec!["alice".into()],
            ..AccessPolicy::default()
        };
        assert!(policy.allows(&dm("alice")));
        assert!(!policy.allows(&dm("alice_bot")));
        assert!(!policy.allows(&dm("Alice")));
        assert!(!policy.allows(&dm("")));
    }

    #[test]
    fn dm_list_matches_chat_id_too() {
        let policy = AccessPolicy {
            allowed_dms: vec!["12345".into()],
            ..AccessPolicy::default()
        };
        let msg = InboundMessage::direct("telegram", "12345", "someuser", "hi");
        assert!(policy.allows(&msg));
    }

    #[test]
    fn dm_allow_list_does_not_open_groups() {
        let policy = AccessPolicy {
            allowed_dms: vec!["*".into()],
            ..AccessPolicy::default()
        };
        assert!(!policy.allows(&group("g1", &[])));
    }

    #[test]
    fn mentions_only_gates_group_replies() {
        let policy = AccessPolicy {
            allowed_groups: vec!["g1".into()],
            respond_to_mentions_only: true,
            mention_names: vec!["@ClawBot".into()],
            ..AccessPolicy::default()
        };
        assert!(!policy.allows(&group("g1", &[])));
        assert!(!policy.allows(&group("g1", &["someone_else"])));
        assert!(policy.allows(&group("g1", &["clawbot"])));
        assert!(!policy.allows(&group("g2", &["clawbot"])));
    }

    #[test]
    fn mentions_only_without_names_accepts_any_mention() {
        let policy = AccessPolicy {
            allowed_groups: vec!["*".into()],
            respond_to_mentions_only: true,
            ..AccessPolicy::default()
        };
        assert!(!policy.allows(&group("g1", &[])));
        assert!(policy.allows(&group("g1", &["whoever"])));
    }

    #[test]
    fn mentions_only_does_not_affect_dms() {
        let policy = AccessPolicy {
            allowed_dms: vec!["*".into()],
            respond_to_mentions_only: true,
            ..AccessPolicy::default()
        };
        assert!(policy.allows(&dm("alice")));
    }

    #[test]
    fn deserializes_with_defaults() {
        let policy: AccessPolicy = toml::from_str(r#"allowed_dms = ["*"]"#).unwrap();
        assert_eq!(policy.allowed_dms, vec!["*"]);
        assert!(policy.allowed_groups.is_empty());
        assert!(!policy.respond_to_mentions_only);
    }
}
