//! Error taxonomy for the retrieval and generation core.
//!
//! Only failures are represented here. An empty ranked list is a valid
//! result, and a validator rejection is an expected outcome that drives the
//! correction loop, so neither has a variant.

/// Failures surfaced by [`HybridRetriever`](crate::retriever::HybridRetriever),
/// [`GenerationLoop`](crate::generation::GenerationLoop) and
/// [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, thiserror::Error)]
pub enum DbNinjaError {
    /// A collaborator (embedder, index, generator, validator) failed at the
    /// transport or provider level. Never retried inside the core.
    #[error("{collaborator} failed: {message}")]
    Transport {
        collaborator: &'static str,
        message: String,
    },

    /// The correction ceiling was reached and the loop is configured to
    /// treat that as a hard failure.
    #[error("SQL still rejected after {attempts} attempt(s): {diagnostic}")]
    ExhaustedRetries {
        attempts: usize,
        sql: String,
        diagnostic: String,
    },

    #[error("invalid parameters: {reason}")]
    InvalidParams { reason: String },
}

impl DbNinjaError {
    /// Wrap a collaborator error, keeping its full context chain in the message.
    pub fn transport(collaborator: &'static str, err: anyhow::Error) -> Self {
        DbNinjaError::Transport {
            collaborator,
            message: format!("{:#}", err),
        }
    }

    /// Machine-readable code, used by the HTTP layer's error body.
    pub fn code(&self) -> &'static str {
        match self {
            DbNinjaError::Transport { .. } => "upstream_error",
            DbNinjaError::ExhaustedRetries { .. } => "exhausted",
            DbNinjaError::InvalidParams { .. } => "bad_request",
        }
    }
}
