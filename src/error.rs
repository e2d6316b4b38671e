use std::time::Duration;

/// Errors surfaced by the reconciler and its adapters.
///
/// `action()` tells the caller how to recover without every call site
/// having to re-derive it from the variant.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("failed to list PVC inventory: {0}")]
    InventoryList(String),

    #[error("failed to query metric source: {0}")]
    MetricQuery(String),

    #[error("failed to patch PVC {namespace}/{name}: {reason}")]
    Patch {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("failed to emit event for {namespace}/{name}: {reason}")]
    EventEmit {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("invalid storage quantity: {0}")]
    Quantity(#[from] crate::quantity::QuantityError),
}

/// What the caller should do in response to an [`Error`].
pub enum ErrorAction {
    /// Fatal during startup; the process should exit non-zero.
    Exit,
    /// Skip the remainder of the current tick and retry after a short sleep.
    RetryTick(Duration),
    /// Log and continue with the next PVC; not fatal to the tick.
    ContinueWithNext,
}

impl Error {
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::Startup(_) => ErrorAction::Exit,
            Error::InventoryList(_) | Error::MetricQuery(_) => {
                ErrorAction::RetryTick(Duration::from_secs(1))
            }
            Error::Patch { .. } | Error::EventEmit { .. } | Error::Quantity(_) => {
                ErrorAction::ContinueWithNext
            }
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
