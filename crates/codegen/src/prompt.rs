//! Prompt assembly.
//!
//! Composes system + context + user turns for a task kind, given the active
//! persona, channel, and bounded conversation history. Wording of the
//! blocks lives here; the envelope shape is `opsmith_core::PromptEnvelope`.

use opsmith_core::{
    Channel, ChatMessage, GenerationParams, Message, Persona, Platform, PromptEnvelope, Role,
};

/// Builds prompt envelopes for every task kind (chat, generate, improve,
/// validate).
pub struct PromptAssembler {
    /// Upper bound on history messages included per envelope.
    context_window: usize,
}

impl PromptAssembler {
    pub fn new(context_window: usize) -> Self {
        Self { context_window }
    }

    /// Conversational turn with persona voice and channel awareness.
    pub fn chat(
        &self,
        persona: &Persona,
        channel: &Channel,
        history: &[Message],
        user_message: &str,
        params: GenerationParams,
    ) -> PromptEnvelope {
        let mut system = persona.system_prompt.clone();
        if let Some(personality) = &persona.personality {
            system.push_str(&format!(
                "\n\nVoice: {} tone, {} approach. Motto: {}.",
                personality.tone, personality.approach, personality.motto
            ));
        }
        push_channel_block(&mut system, channel);

        PromptEnvelope {
            system_prompt: system,
            messages: self.context_messages(history, user_message),
            params,
            preferred_provider: None,
        }
    }

    /// Script generation for a platform.
    pub fn generate(
        &self,
        persona: &Persona,
        channel: &Channel,
        platform: Platform,
        history: &[Message],
        description: &str,
        params: GenerationParams,
    ) -> PromptEnvelope {
        let mut system = persona.system_prompt.clone();
        push_channel_block(&mut system, channel);
        system.push_str("\n\n");
        system.push_str(platform_block(platform));
        system.push_str(output_format_block(platform));

        let user_turn = format!("Create a {} script for: {}", platform, description);

        PromptEnvelope {
            system_prompt: system,
            messages: self.context_messages(history, &user_turn),
            params,
            preferred_provider: None,
        }
    }

    /// Full-replacement improvement of an existing script.
    pub fn improve(
        &self,
        platform: Platform,
        script: &str,
        feedback: &str,
        params: GenerationParams,
    ) -> PromptEnvelope {
        let system = format!(
            "You are an expert {} engineer improving an existing script from \
             user feedback. Address the feedback while keeping the script's \
             working behavior, and return one complete replacement script.\n\n{}{}",
            platform,
            platform_block(platform),
            output_format_block(platform),
        );

        let user_turn = format!(
            "Improve the following {} script.\n\nFEEDBACK:\n{}\n\nORIGINAL SCRIPT:\n{}",
            platform, feedback, script
        );

        PromptEnvelope {
            system_prompt: system,
            messages: vec![ChatMessage::new(Role::User, user_turn)],
            params,
            preferred_provider: None,
        }
    }

    /// Structured review verdict for a script.
    pub fn validate(
        &self,
        platform: Platform,
        script: &str,
        params: GenerationParams,
    ) -> PromptEnvelope {
        let system = format!(
            "You are an expert {} reviewer. Analyze the script and answer \
             with a single JSON object, no prose: \
             {{\"score\": <0-100>, \
             \"issues\": [{{\"severity\": \"info\"|\"warn\"|\"error\", \
             \"message\": \"...\", \"line\": <number, optional>}}], \
             \"recommendations\": [\"...\"]}}",
            platform
        );

        let user_turn = format!("Review and validate this {} script:\n\n{}", platform, script);

        PromptEnvelope {
            system_prompt: system,
            messages: vec![ChatMessage::new(Role::User, user_turn)],
            params,
            preferred_provider: None,
        }
    }

    /// History bounded to the context window, pairs preserved in order,
    /// final user turn appended last.
    fn context_messages(&self, history: &[Message], user_turn: &str) -> Vec<ChatMessage> {
        let start = history.len().saturating_sub(self.context_window);
        let mut messages: Vec<ChatMessage> = history[start..]
            .iter()
            .map(|m| ChatMessage::new(m.role, m.content.clone()))
            .collect();
        messages.push(ChatMessage::new(Role::User, user_turn));
        messages
    }
}

fn push_channel_block(system: &mut String, channel: &Channel) {
    // the web channel gets no special directives
    if channel.id == "web" {
        return;
    }
    let capabilities: Vec<String> = channel
        .capabilities
        .iter()
        .map(|c| format!("{:?}", c))
        .collect();
    system.push_str(&format!(
        "\n\nOutput channel: {} ({}). Shape responses to fit its capabilities: {}.",
        channel.name,
        channel.id,
        if capabilities.is_empty() {
            "plain text".to_string()
        } else {
            capabilities.join(", ")
        }
    ));
    if let Some(limit) = channel.constraints.max_message_length {
        system.push_str(&format!(" Keep messages under {} characters.", limit));
    }
}

/// Platform best-practices block for generation and improvement prompts.
fn platform_block(platform: Platform) -> &'static str {
    match platform {
        Platform::PowerShell => {
            "You write production-grade PowerShell. Every script must:\n\
             - declare its inputs in a param() block with validation\n\
             - wrap the body in try/catch and report failures with Write-Error\n\
             - emit progress with Write-Host\n\
             - exit non-zero on failure and zero on success\n\
             - use approved cmdlets only, no deprecated aliases"
        }
        Platform::AppleScript => {
            "You write production-grade AppleScript. Every script must:\n\
             - handle arguments in an `on run argv` handler where inputs exist\n\
             - wrap risky work in try/on error and surface the message\n\
             - give user feedback with display notification or display dialog\n\
             - check an application is available before telling it to act\n\
             - return a value that reflects success or failure"
        }
        Platform::Bash => {
            "You write production-grade Bash. Every script must:\n\
             - start with a shebang and `set -euo pipefail`\n\
             - install an error trap that names the failing step\n\
             - parse arguments and provide a usage function\n\
             - echo progress at each stage\n\
             - exit non-zero on failure and zero on success\n\
             - stay portable across common Linux distributions"
        }
    }
}

fn output_format_block(platform: Platform) -> &'static str {
    match platform {
        Platform::PowerShell => {
            "\n\nReturn only the complete PowerShell script, ready to save as \
             a .ps1 file. No explanations outside the script."
        }
        Platform::AppleScript => {
            "\n\nReturn only the complete AppleScript, ready to save as a \
             .scpt file. No explanations outside the script."
        }
        Platform::Bash => {
            "\n\nReturn only the complete Bash script, ready to save as a .sh \
             file. No explanations outside the script."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsmith_core::{ChannelConstraints, Personality};
    use std::collections::BTreeSet;

    fn persona() -> Persona {
        let mut persona = Persona::fallback();
        persona.system_prompt = "You are Vanilla.".into();
        persona.personality = Some(Personality {
            tone: "dry".into(),
            approach: "direct".into(),
            philosophy: "less is more".into(),
            motto: "ship it".into(),
        });
        persona
    }

    fn web_channel() -> Channel {
        Channel {
            id: "web".into(),
            name: "Web".into(),
            description: "web".into(),
            capabilities: BTreeSet::new(),
            artifact_types: BTreeSet::new(),
            constraints: ChannelConstraints::default(),
        }
    }

    fn slack_channel() -> Channel {
        Channel {
            id: "slack".into(),
            name: "Slack".into(),
            description: "slack".into(),
            capabilities: BTreeSet::new(),
            artifact_types: BTreeSet::new(),
            constraints: ChannelConstraints {
                max_message_length: Some(4000),
            },
        }
    }

    #[test]
    fn test_chat_starts_with_persona_prompt() {
        let assembler = PromptAssembler::new(10);
        let envelope = assembler.chat(
            &persona(),
            &web_channel(),
            &[],
            "hello",
            GenerationParams::default(),
        );
        assert!(envelope.system_prompt.starts_with("You are Vanilla."));
        // web channel adds no directive block
        assert!(!envelope.system_prompt.contains("Output channel"));
        assert_eq!(envelope.messages.len(), 1);
        assert_eq!(envelope.messages[0].content, "hello");
    }

    #[test]
    fn test_non_web_channel_directive_and_limit() {
        let assembler = PromptAssembler::new(10);
        let envelope = assembler.chat(
            &persona(),
            &slack_channel(),
            &[],
            "hello",
            GenerationParams::default(),
        );
        assert!(envelope.system_prompt.contains("Output channel: Slack"));
        assert!(envelope.system_prompt.contains("under 4000 characters"));
    }

    #[test]
    fn test_generate_includes_platform_block() {
        let assembler = PromptAssembler::new(10);
        let envelope = assembler.generate(
            &persona(),
            &web_channel(),
            Platform::PowerShell,
            &[],
            "backup files",
            GenerationParams::default(),
        );
        assert!(envelope.system_prompt.contains("param() block"));
        assert!(envelope.system_prompt.contains("try/catch"));
        assert!(envelope
            .messages
            .last()
            .unwrap()
            .content
            .contains("backup files"));
    }

    #[test]
    fn test_history_window_and_final_turn_order() {
        let assembler = PromptAssembler::new(2);
        let history = vec![
            Message::new(Role::User, "one"),
            Message::new(Role::Assistant, "two"),
            Message::new(Role::User, "three"),
        ];
        let envelope = assembler.chat(
            &persona(),
            &web_channel(),
            &history,
            "four",
            GenerationParams::default(),
        );
        // last two history turns plus the new user turn
        assert_eq!(envelope.messages.len(), 3);
        assert_eq!(envelope.messages[0].content, "two");
        assert_eq!(envelope.messages[1].content, "three");
        assert_eq!(envelope.messages[2].content, "four");
        assert_eq!(envelope.messages[2].role, Role::User);
    }

    #[test]
    fn test_improve_carries_script_and_feedback() {
        let assembler = PromptAssembler::new(10);
        let envelope = assembler.improve(
            Platform::Bash,
            "#!/bin/bash\necho hi",
            "add logging",
            GenerationParams::default(),
        );
        let user = &envelope.messages[0].content;
        assert!(user.contains("add logging"));
        assert!(user.contains("echo hi"));
        assert!(envelope.system_prompt.contains("replacement script"));
    }

    #[test]
    fn test_validate_requests_json_verdict() {
        let assembler = PromptAssembler::new(10);
        let envelope =
            assembler.validate(Platform::Bash, "echo hi", GenerationParams::default());
        assert!(envelope.system_prompt.contains("\"score\""));
        assert!(envelope.system_prompt.contains("\"recommendations\""));
    }
}
