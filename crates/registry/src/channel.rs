//! Channel registry: built-in catalog, optional disk overlays, selection.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::RwLock;

use opsmith_core::{
    Channel, ChannelCapability, ChannelConstraints, Error, MessageCheck, Result,
};

use crate::persona::{LoadReport, RejectedFile};

/// Registry of output-format profiles with a current selection.
///
/// A built-in catalog is always present; JSON files in the channels
/// directory can add to it or replace entries with the same id.
pub struct ChannelRegistry {
    channels: DashMap<String, Channel>,
    current: RwLock<String>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        let registry = Self {
            channels: DashMap::new(),
            current: RwLock::new("web".into()),
        };
        for channel in builtin_channels() {
            registry.channels.insert(channel.id.clone(), channel);
        }
        registry
    }

    /// Overlay channel definitions from `*.json` files under `path`.
    /// Fails soft per file, like the persona loader.
    pub async fn load_overlays(&self, path: &Path) -> LoadReport {
        let mut report = LoadReport {
            loaded: 0,
            rejected: Vec::new(),
        };

        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(_) => return report, // overlays are optional
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let file_path = entry.path();
            if file_path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let file_name = file_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let loaded: std::result::Result<Channel, String> =
                match tokio::fs::read_to_string(&file_path).await {
                    Ok(content) => serde_json::from_str::<Channel>(&content)
                        .map_err(|e| format!("parse error: {}", e))
                        .and_then(|channel| {
                            if channel.id.trim().is_empty() || channel.name.trim().is_empty() {
                                Err("id and name must not be empty".into())
                            } else {
                                Ok(channel)
                            }
                        }),
                    Err(e) => Err(format!("read error: {}", e)),
                };

            match loaded {
                Ok(channel) => {
                    tracing::info!(id = %channel.id, "Loaded channel overlay");
                    self.channels.insert(channel.id.clone(), channel);
                    report.loaded += 1;
                }
                Err(reason) => {
                    tracing::warn!(file = %file_name, %reason, "Rejected channel file");
                    report.rejected.push(RejectedFile {
                        file: file_name,
                        reason,
                    });
                }
            }
        }
        report
    }

    /// All channels, ordered by id.
    pub fn list(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> =
            self.channels.iter().map(|entry| entry.value().clone()).collect();
        channels.sort_by(|a, b| a.id.cmp(&b.id));
        channels
    }

    pub fn get(&self, id: &str) -> Option<Channel> {
        self.channels.get(id).map(|entry| entry.value().clone())
    }

    pub fn current(&self) -> Channel {
        let id = self
            .current
            .read()
            .expect("channel selection lock poisoned")
            .clone();
        self.get(&id)
            .or_else(|| self.get("web"))
            .unwrap_or_else(|| builtin_channels().remove(0))
    }

    pub fn switch(&self, id: &str) -> Result<Channel> {
        let channel = self
            .get(id)
            .ok_or_else(|| Error::not_found(format!("channel '{}'", id)))?;
        *self.current.write().expect("channel selection lock poisoned") = id.to_string();
        tracing::info!(id = %id, name = %channel.name, "Switched channel");
        Ok(channel)
    }

    pub fn capabilities(&self, id: &str) -> Option<BTreeSet<ChannelCapability>> {
        self.get(id).map(|channel| channel.capabilities)
    }

    /// Check a message against a channel's declared constraints.
    pub fn validate_message(&self, id: &str, text: &str) -> Result<MessageCheck> {
        let channel = self
            .get(id)
            .ok_or_else(|| Error::not_found(format!("channel '{}'", id)))?;
        Ok(channel.check_message(text))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn capability_set(capabilities: &[ChannelCapability]) -> BTreeSet<ChannelCapability> {
    capabilities.iter().copied().collect()
}

fn artifact_set(types: &[&str]) -> BTreeSet<String> {
    types.iter().map(|t| t.to_string()).collect()
}

/// The built-in channel catalog.
fn builtin_channels() -> Vec<Channel> {
    use ChannelCapability::*;
    vec![
        Channel {
            id: "web".into(),
            name: "Web Interface".into(),
            description: "Standard browser chat interface".into(),
            capabilities: capability_set(&[RichText, Interactive, Media]),
            artifact_types: artifact_set(&["html", "json"]),
            constraints: ChannelConstraints::default(),
        },
        Channel {
            id: "slack".into(),
            name: "Slack".into(),
            description: "Slack workspace integration with Block Kit output".into(),
            capabilities: capability_set(&[Blocks, Threads, Reactions]),
            artifact_types: artifact_set(&["blocks", "attachments", "modals"]),
            constraints: ChannelConstraints {
                max_message_length: Some(4000),
            },
        },
        Channel {
            id: "teams".into(),
            name: "Microsoft Teams".into(),
            description: "Teams integration with Adaptive Cards".into(),
            capabilities: capability_set(&[AdaptiveCards, RichText, Threads]),
            artifact_types: artifact_set(&["adaptive_cards", "task_modules"]),
            constraints: ChannelConstraints {
                max_message_length: Some(28_000),
            },
        },
        Channel {
            id: "discord".into(),
            name: "Discord".into(),
            description: "Discord bot integration with rich embeds".into(),
            capabilities: capability_set(&[Embeds, Reactions, Interactive]),
            artifact_types: artifact_set(&["embeds", "components"]),
            constraints: ChannelConstraints {
                max_message_length: Some(2000),
            },
        },
        Channel {
            id: "whatsapp".into(),
            name: "WhatsApp".into(),
            description: "WhatsApp Business API integration".into(),
            capabilities: capability_set(&[Media, QuickReplies]),
            artifact_types: artifact_set(&["templates", "media"]),
            constraints: ChannelConstraints {
                max_message_length: Some(4096),
            },
        },
    ]
}
