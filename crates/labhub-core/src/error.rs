//! Error types for labhub-core.

use thiserror::Error;

/// Boxed error returned by the virtualization and network collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for labhub-core operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Errors that can occur while building, dispensing or tearing down labs.
#[derive(Debug, Error)]
pub enum HubError {
    /// The warm buffer was configured larger than the hard cap.
    #[error("available ({warm_size}) cannot be larger than capacity ({capacity})")]
    AvailableSize {
        /// Requested warm buffer size
        warm_size: usize,
        /// Hard cap on outstanding labs
        capacity: usize,
    },

    /// The hard cap is reached, or the warm buffer is empty.
    #[error("maximum amount of labs reached")]
    MaximumLabs,

    /// No dispensed lab carries the requested tag.
    #[error("could not find lab by tag: {0}")]
    LabNotFound(String),

    /// The hub (or one of its semaphores) has been closed.
    #[error("hub is closed")]
    Closed,

    /// Provisioning was aborted through the cancellation token.
    #[error("provisioning cancelled")]
    Cancelled,

    /// Hub settings that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed blueprint document
    #[error("blueprint error: {0}")]
    Blueprint(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error returned verbatim by a hypervisor, container runtime or network.
    #[error(transparent)]
    Backend(BoxError),
}

impl HubError {
    /// Wrap a collaborator error without adding context.
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }

    /// True when the error only signals that no lab can be handed out right now.
    ///
    /// Callers are expected to back off and retry on these.
    pub fn is_capacity_exhausted(&self) -> bool {
        matches!(self, Self::MaximumLabs)
    }

    /// True when the error came from a virtualization or network collaborator.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
