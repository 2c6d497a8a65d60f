//! HTTP/JSON API surface for opsmith.
//!
//! Routes, request/response bodies, and the uniform error envelope. The
//! transport wiring is thin; operation semantics live in the component
//! crates held by [`server::AppState`].

pub mod envelope;
pub mod handlers;
pub mod server;

pub use envelope::{ApiError, ApiResult};
pub use server::{AppState, OpsmithServer};
