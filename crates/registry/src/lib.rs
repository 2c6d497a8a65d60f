//! Persona and channel registries for opsmith.
//!
//! Both registries are loaded at startup, validated record by record
//! (fail-soft), and switchable at runtime.

pub mod channel;
pub mod persona;

pub use channel::ChannelRegistry;
pub use persona::{derive_persona_id, LoadReport, NewPersona, PersonaRegistry, RejectedFile};
