//! Error types for the scheduler, the updater façade and observable events.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required collaborator was missing before use.
    Configuration,
    /// The operation makes no sense in the current state.
    InvalidState,
    /// An argument was rejected at the boundary.
    Argument,
    /// The loop worker could not be created.
    Runtime,
}

/// Errors surfaced synchronously by the public API.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Callback {0} is already scheduled")]
    AlreadyScheduled(String),

    #[error("Callback {0} is not scheduled")]
    SubscriptionNotFound(String),

    #[error("No update action has been set")]
    NoUpdateAction,

    #[error("The update action cannot be changed after scheduling has begun")]
    ExistingUpdateAction,

    #[error("The updater has been disposed")]
    Disposed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to start scheduler loop: {0}")]
    Runtime(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Map the error onto its taxonomy category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoUpdateAction => ErrorKind::Configuration,
            Error::AlreadyScheduled(_)
            | Error::SubscriptionNotFound(_)
            | Error::ExistingUpdateAction
            | Error::Disposed => ErrorKind::InvalidState,
            Error::InvalidArgument(_) => ErrorKind::Argument,
            Error::Runtime(_) => ErrorKind::Runtime,
        }
    }

    pub fn is_invalid_state(&self) -> bool {
        self.kind() == ErrorKind::InvalidState
    }
}
