//! Persona registry: load, validate, select, and create personas.

use dashmap::DashMap;
use serde::Serialize;
use std::path::Path;
use std::sync::RwLock;

use opsmith_core::{Error, Persona, Result};

/// Outcome of a directory load. A bad file never aborts the load; it is
/// demoted to a rejection entry instead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub loaded: usize,
    pub rejected: Vec<RejectedFile>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedFile {
    pub file: String,
    pub reason: String,
}

/// Fields accepted when creating a persona at runtime.
#[derive(Debug, Clone)]
pub struct NewPersona {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub channels: Vec<String>,
    pub examples: Vec<String>,
}

/// Registry of personas with a current selection.
///
/// `current()` is never empty: when a load yields no personas, a synthetic
/// fallback persona is installed.
pub struct PersonaRegistry {
    personas: DashMap<String, Persona>,
    current: RwLock<String>,
}

impl PersonaRegistry {
    pub fn new() -> Self {
        let fallback = Persona::fallback();
        let registry = Self {
            personas: DashMap::new(),
            current: RwLock::new(fallback.id.clone()),
        };
        registry.personas.insert(fallback.id.clone(), fallback);
        registry
    }

    /// Load every `*.json` persona file under `path`, validating each.
    /// Replaces the synthetic fallback when at least one real persona loads.
    pub async fn load_all(&self, path: &Path) -> LoadReport {
        let mut report = LoadReport {
            loaded: 0,
            rejected: Vec::new(),
        };

        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Personas directory not readable");
                self.select_default();
                return report;
            }
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

            match self.load_file(&file_path).await {
                Ok(persona) => {
                    tracing::info!(id = %persona.id, name = %persona.name, "Loaded persona");
                    self.personas.insert(persona.id.clone(), persona);
                    report.loaded += 1;
                }
                Err(reason) => {
                    tracing::warn!(file = %file_name, %reason, "Rejected persona file");
                    report.rejected.push(RejectedFile {
                        file: file_name,
                        reason,
                    });
                }
            }
        }

        if report.loaded > 0 {
            // the synthetic fallback is only needed for an empty registry
            self.personas.remove("fallback");
        }
        self.select_default();
        report
    }

    async fn load_file(&self, path: &Path) -> std::result::Result<Persona, String> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("read error: {}", e))?;
        let mut persona: Persona =
            serde_json::from_str(&content).map_err(|e| format!("parse error: {}", e))?;
        persona.custom = false;
        validate_persona(&persona)?;
        if self.personas.contains_key(&persona.id) && persona.id != "fallback" {
            return Err(format!("duplicate persona id: {}", persona.id));
        }
        Ok(persona)
    }

    /// Pick the default selection: `vanilla`, then `default`, then the
    /// first id in lexical order. Installs the fallback persona when the
    /// registry is empty.
    fn select_default(&self) {
        let chosen = if self.personas.contains_key("vanilla") {
            "vanilla".to_string()
        } else if self.personas.contains_key("default") {
            "default".to_string()
        } else if let Some(first) = self
            .personas
            .iter()
            .map(|entry| entry.key().clone())
            .min()
        {
            first
        } else {
            let fallback = Persona::fallback();
            let id = fallback.id.clone();
            self.personas.insert(id.clone(), fallback);
            id
        };

        *self.current.write().expect("persona selection lock poisoned") = chosen;
    }

    /// All personas, ordered by id.
    pub fn list(&self) -> Vec<Persona> {
        let mut personas: Vec<Persona> =
            self.personas.iter().map(|entry| entry.value().clone()).collect();
        personas.sort_by(|a, b| a.id.cmp(&b.id));
        personas
    }

    pub fn get(&self, id: &str) -> Option<Persona> {
        self.personas.get(id).map(|entry| entry.value().clone())
    }

    /// The currently selected persona.
    pub fn current(&self) -> Persona {
        let id = self
            .current
            .read()
            .expect("persona selection lock poisoned")
            .clone();
        match self.get(&id) {
            Some(persona) => persona,
            None => {
                // selection should always resolve; repair if it does not
                self.select_default();
                let id = self
                    .current
                    .read()
                    .expect("persona selection lock poisoned")
                    .clone();
                self.get(&id).unwrap_or_else(Persona::fallback)
            }
        }
    }

    pub fn switch(&self, id: &str) -> Result<Persona> {
        let persona = self
            .get(id)
            .ok_or_else(|| Error::not_found(format!("persona '{}'", id)))?;
        *self.current.write().expect("persona selection lock poisoned") = id.to_string();
        tracing::info!(id = %id, name = %persona.name, "Switched persona");
        Ok(persona)
    }

    /// Validate and install a runtime-created persona.
    pub fn add_custom(&self, new: NewPersona) -> Result<Persona> {
        let id = match new.id {
            Some(id) => id,
            None => derive_persona_id(&new.name),
        };

        let persona = Persona {
            id: id.clone(),
            description: new
                .description
                .unwrap_or_else(|| format!("Custom persona: {}", new.name)),
            greeting: format!("Hello! I'm {}. How can I help you today?", new.name),
            name: new.name,
            system_prompt: new.system_prompt,
            capabilities: ["custom-instructions"].into_iter().map(String::from).collect(),
            channels: new.channels.into_iter().collect(),
            examples: new.examples,
            personality: None,
            custom: true,
        };

        validate_persona(&persona).map_err(Error::validation)?;
        if self.personas.contains_key(&id) {
            return Err(Error::conflict(format!("persona '{}' already exists", id)));
        }

        tracing::info!(id = %persona.id, "Installed custom persona");
        self.personas.insert(id, persona.clone());
        Ok(persona)
    }

    /// Personas usable on the given channel.
    pub fn personas_for_channel(&self, channel_id: &str) -> Vec<Persona> {
        self.list()
            .into_iter()
            .filter(|persona| persona.supports_channel(channel_id))
            .collect()
    }

    /// Drop everything and re-load from disk, keeping the current selection
    /// when it still exists.
    pub async fn reload(&self, path: &Path) -> LoadReport {
        let previous = self
            .current
            .read()
            .expect("persona selection lock poisoned")
            .clone();
        self.personas.clear();
        let report = self.load_all(path).await;
        if self.personas.contains_key(&previous) {
            *self.current.write().expect("persona selection lock poisoned") = previous;
        }
        report
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Required fields must be non-empty and the id must match `[a-z0-9-]+`.
fn validate_persona(persona: &Persona) -> std::result::Result<(), String> {
    if persona.id.is_empty() {
        return Err("id must not be empty".into());
    }
    if !persona
        .id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "id '{}' must match [a-z0-9-]+",
            persona.id
        ));
    }
    for (field, value) in [
        ("name", &persona.name),
        ("description", &persona.description),
        ("greeting", &persona.greeting),
        ("systemPrompt", &persona.system_prompt),
    ] {
        if value.trim().is_empty() {
            return Err(format!("{} must not be empty", field));
        }
    }
    Ok(())
}

/// Derive a registry id from a display name: lowercase, non-alphanumerics
/// become `-`, runs collapsed, edges trimmed.
pub fn derive_persona_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            id.push('-');
            last_dash = true;
        }
    }
    while id.ends_with('-') {
        id.pop();
    }
    if id.is_empty() {
        "custom".into()
    } else {
        id
    }
}
