//! Error taxonomy. Grounded on `api/error.rs`'s `thiserror` usage, generalized
//! from the Tauri command layer's `Result<T, String>` boundary down to a proper
//! typed error the graph and player propagate internally.

use thiserror::Error;

/// A command-invariant violation (an out-of-range queue index, say) is
/// handled at the call site by silently ignoring the command, and a
/// subscriber failure is caught and logged by the event bus's dispatch
/// loop -- neither is represented here, since neither ever crosses a
/// `Result` boundary by design.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("resolution failed: {0}")]
    Resolution(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(String),
}

impl EngineError {
    /// Message carried verbatim as `StreamState.message` / `PlayerState.message`
    /// when this error collapses a graph node into the ERROR state.
    pub fn node_state_message(&self) -> String {
        self.to_string()
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
