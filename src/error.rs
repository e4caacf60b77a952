//! Error type shared by every stage of the reconfiguration pipeline

use std::path::PathBuf;

use crate::renderer::Side;

/// Errors returned by template generation, rendering, proxy control and
/// the Consul state store.
///
/// Each variant identifies the stage that failed so callers can tell a
/// broken template apart from an unreachable store.
#[derive(Debug, thiserror::Error)]
pub enum ReconfigureError {
    /// The routing intent cannot be applied (e.g. empty service name)
    #[error("invalid routing intent: {0}")]
    InvalidIntent(String),

    /// A custom template file could not be read
    #[error("failed to read template '{}': {source}", .path.display())]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stable template file could not be written
    #[error("failed to write template '{}': {source}", .path.display())]
    TemplateWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external renderer failed for one side
    #[error("{side} template rendering failed: {reason}")]
    Render { side: Side, reason: String },

    /// The proxy could not assemble its configuration
    #[error("proxy config assembly failed: {0}")]
    Assemble(#[source] anyhow::Error),

    /// The proxy could not reload its configuration
    #[error("proxy reload failed: {0}")]
    Reload(#[source] anyhow::Error),

    /// Request to the state store failed before a response arrived
    #[error("state store request to {url} failed: {source}")]
    StoreTransport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// State store answered with a non-success status
    #[error("state store request to {url} returned status {status}")]
    StoreStatus { url: String, status: u16 },

    /// The service catalog could not be enumerated
    #[error("cannot list services from '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

impl ReconfigureError {
    /// Short stage name used as a structured logging field
    pub fn stage(&self) -> &'static str {
        match self {
            ReconfigureError::InvalidIntent(_) => "validate",
            ReconfigureError::TemplateRead { .. } => "generate",
            ReconfigureError::TemplateWrite { .. } => "write",
            ReconfigureError::Render { .. } => "render",
            ReconfigureError::Assemble(_) => "assemble",
            ReconfigureError::Reload(_) => "reload",
            ReconfigureError::StoreTransport { .. } | ReconfigureError::StoreStatus { .. } => {
                "store"
            }
            ReconfigureError::InvalidAddress { .. } => "catalog",
        }
    }
}
