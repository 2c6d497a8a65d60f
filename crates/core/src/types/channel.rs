//! Channel records: named output-format profiles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Capability flags a channel can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCapability {
    RichText,
    Interactive,
    Media,
    Blocks,
    Threads,
    Reactions,
    Embeds,
    AdaptiveCards,
    QuickReplies,
    RichLinks,
}

/// Per-channel message constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<usize>,
}

/// A named output-format profile. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: BTreeSet<ChannelCapability>,
    /// Identifiers of structured artifacts the channel can emit.
    #[serde(default)]
    pub artifact_types: BTreeSet<String>,
    #[serde(default)]
    pub constraints: ChannelConstraints,
}

/// Outcome of checking a message against a channel's constraints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum MessageCheck {
    Ok,
    TooLong { limit: usize },
}

impl Channel {
    pub fn has_capability(&self, capability: ChannelCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Validate a message against this channel's declared constraints.
    pub fn check_message(&self, text: &str) -> MessageCheck {
        match self.constraints.max_message_length {
            Some(limit) if text.chars().count() > limit => MessageCheck::TooLong { limit },
            _ => MessageCheck::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_with_limit(limit: usize) -> Channel {
        Channel {
            id: "slack".into(),
            name: "Slack".into(),
            description: "Slack workspace".into(),
            capabilities: [ChannelCapability::Blocks, ChannelCapability::Threads]
                .into_iter()
                .collect(),
            artifact_types: BTreeSet::new(),
            constraints: ChannelConstraints {
                max_message_length: Some(limit),
            },
        }
    }

    #[test]
    fn test_message_within_limit() {
        let channel = channel_with_limit(10);
        assert_eq!(channel.check_message("short"), MessageCheck::Ok);
    }

    #[test]
    fn test_message_too_long() {
        let channel = channel_with_limit(4);
        assert_eq!(
            channel.check_message("too long for this channel"),
            MessageCheck::TooLong { limit: 4 }
        );
    }

    #[test]
    fn test_no_limit_accepts_anything() {
        let mut channel = channel_with_limit(1);
        channel.constraints.max_message_length = None;
        assert_eq!(channel.check_message(&"x".repeat(100_000)), MessageCheck::Ok);
    }
}
