//! Configuration from environment variables.
//!
//! - `PORT`: listen port (default: 11444)
//! - `TARGET_URL`: upstream API base URL (default: http://localhost:11434)
//! - `MAX_CALLS`: retained call history bound (default: 50)
//! - `REQUEST_TIMEOUT_SECS`: upstream request timeout (default: 300)
//!
//! The capture suffix set and call capacity are plain constructor inputs;
//! nothing is persisted.

use crate::intercept::DEFAULT_CAPTURE_SUFFIXES;
use std::env;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub target_url: String,
    pub max_calls: usize,
    pub request_timeout_secs: u64,
    pub capture_suffixes: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(11444),
            target_url: env::var("TARGET_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            max_calls: env::var("MAX_CALLS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(50),
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(300),
            capture_suffixes: DEFAULT_CAPTURE_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
