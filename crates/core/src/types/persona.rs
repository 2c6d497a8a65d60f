//! Persona records: named prompt profiles that bias model responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named prompt profile. Immutable once registered.
///
/// Personas are loaded from one-object-per-file JSON documents; unknown
/// fields in those documents are ignored. Wire format is camelCase
/// (`systemPrompt` etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub description: String,
    pub greeting: String,
    /// The persona's behavioral instructions, used verbatim as the base of
    /// every assembled prompt.
    pub system_prompt: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Channel ids this persona is compatible with; empty means all.
    #[serde(default)]
    pub channels: BTreeSet<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<Personality>,
    /// True for personas created at runtime rather than loaded from disk.
    #[serde(default)]
    pub custom: bool,
}

/// Optional personality block carried by persona files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personality {
    pub tone: String,
    pub approach: String,
    pub philosophy: String,
    pub motto: String,
}

impl Persona {
    /// Whether this persona may be used on the given channel.
    pub fn supports_channel(&self, channel_id: &str) -> bool {
        self.channels.is_empty() || self.channels.contains(channel_id)
    }

    /// Synthetic minimal persona installed when the registry would
    /// otherwise be empty, so the current selection is never null.
    pub fn fallback() -> Self {
        Self {
            id: "fallback".into(),
            name: "Opsmith Assistant".into(),
            description: "Default assistant persona".into(),
            greeting: "Hello! I'm your automation assistant.".into(),
            system_prompt: "You are a helpful assistant that generates \
                            system automation scripts and answers questions \
                            about automation."
                .into(),
            capabilities: ["conversation", "script-generation"]
                .into_iter()
                .map(String::from)
                .collect(),
            channels: BTreeSet::new(),
            examples: vec![
                "Create a PowerShell script".into(),
                "Help with automation".into(),
            ],
            personality: None,
            custom: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_channel_set_means_all() {
        let persona = Persona::fallback();
        assert!(persona.supports_channel("web"));
        assert!(persona.supports_channel("slack"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "id": "ops",
            "name": "Ops",
            "description": "d",
            "greeting": "g",
            "systemPrompt": "s",
            "futureField": {"nested": true}
        }"#;
        let persona: Persona = serde_json::from_str(json).unwrap();
        assert_eq!(persona.id, "ops");
        assert_eq!(persona.system_prompt, "s");
        assert!(!persona.custom);
    }
}
