// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the proxy core.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait
/// implementations.
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("rule compile error: {0}")]
    RuleCompile(String),

    #[error("invalid JSON rules document: {0}")]
    RuleJson(String),

    #[error("external command not found or not executable: {0}")]
    CommandNotFound(String),

    #[error("external command argument parsing failed: {0}")]
    CommandParse(String),

    #[error("external command execution failed: {0}")]
    CommandExec(String),

    #[error("monitor journal error: {0}")]
    Journal(String),

    #[error("monitor backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        ProxyError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        ProxyError::RuleJson(e.to_string())
    }
}

impl From<regex::Error> for ProxyError {
    fn from(e: regex::Error) -> Self {
        ProxyError::RuleCompile(e.to_string())
    }
}
