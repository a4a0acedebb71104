//! Argus - streaming observation proxy for a local LLM HTTP API.
//!
//! Argus sits inline between a client and an Ollama-style inference server.
//! Requests to the generation endpoints are captured, their streamed
//! responses reassembled into whole JSON values, and a bounded live history
//! of calls is exposed through `argus-tracker` for observers.
//!
//! Design goals:
//! - Never alter the bytes a client receives on the success path.
//! - Record only whole, well-formed values in the tracked transcript.
//! - Keep every failure isolated to the one affected call.

pub mod config;
pub mod error;
pub mod forward;
pub mod intercept;
pub mod relay;
pub mod server;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use server::serve;
