//! Engine-level error taxonomy.
//!
//! Boundary errors (`KvError`, `StorageError`, `LlmError`) live with
//! their port traits in `infrastructure::ports`; this is the turn-level
//! rollup. Not-found is never an error at an API boundary - stores
//! return `Ok(None)` / `false` instead.

use thiserror::Error;

use crate::infrastructure::ports::{KvError, LlmError, StorageError};

#[derive(Debug, Error)]
pub enum EngineError {
    /// External round-trip failed (KV, blob, or LLM transport).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A response body or stored payload could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Internal contract breach; fatal for the affected turn.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Construction-time misconfiguration; fatal at startup.
    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Domain(#[from] talespin_domain::DomainError),
}

impl EngineError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<KvError> for EngineError {
    fn from(err: KvError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<LlmError> for EngineError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::InvalidResponse(msg) => Self::Parse(msg),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
