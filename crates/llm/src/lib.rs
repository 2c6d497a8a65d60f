//! Provider-agnostic LLM gateway.
//!
//! Maps one prompt envelope onto N configured HTTP backends with ordered
//! fallback and background health probing.

pub mod gateway;
pub mod health;
pub mod providers;

pub use gateway::ProviderGateway;
pub use health::spawn_health_prober;
pub use providers::{HttpProvider, MockProvider};
