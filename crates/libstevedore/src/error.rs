use crate::network::ports::PortError;
use crate::runtime::RuntimeError;
use crate::volume::MountError;

/// Top level error type of the orchestrator.
///
/// User-input problems are reported as `InvalidInput`/`Conflict` and carry a
/// single diagnostic line; collaborator failures are surfaced as-is through
/// `Runtime`. Teardown paths downgrade `NotFound` to success per step.
#[derive(Debug, thiserror::Error)]
pub enum StevedoreError {
    #[error("invalid argument: {0}")]
    InvalidInput(String),
    /// The message carries the full "no such ..." line.
    #[error("{0}")]
    NotFound(String),
    #[error("ambiguous ID prefix \"{0}\": multiple containers match")]
    AmbiguousId(String),
    #[error("name \"{name}\" is already in use by container {holder}")]
    NameTaken { name: String, holder: String },
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Port(#[from] PortError),
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Unix(#[from] nix::Error),
}

pub type Result<T> = std::result::Result<T, StevedoreError>;

impl StevedoreError {
    /// Whether the error only says that the thing to clean up is already
    /// gone. Teardown steps treat this as success.
    pub fn is_not_found(&self) -> bool {
        match self {
            StevedoreError::NotFound(_) => true,
            StevedoreError::Runtime(RuntimeError::NotFound(_)) => true,
            StevedoreError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
