//! Shared domain types.

pub mod channel;
pub mod conversation;
pub mod persona;
pub mod provider;
pub mod script;
pub mod task;

pub use channel::{Channel, ChannelCapability, ChannelConstraints, MessageCheck};
pub use conversation::{Conversation, ConversationSummary, MemoryStats, Message, Role};
pub use persona::{Persona, Personality};
pub use provider::{
    ChatMessage, Completion, GenerationParams, LlmUsage, PromptEnvelope, ProviderHealth,
    ProviderKind, ProviderSnapshot,
};
pub use script::{
    ExecutionPolicy, Issue, Platform, ReportSource, RuleCitation, SafetyDecision, SafetyReport,
    Script, ScriptSource, Severity, ValidationReport,
};
pub use task::{
    ExecutionRequest, ExecutionTask, TaskErrorKind, TaskMetrics, TaskPriority, TaskResult,
    TaskState,
};
