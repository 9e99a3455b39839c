//! IPC-level error type.

use apx_core::ApxError;
use apx_pipeline::PipelineError;

pub type Result<T> = std::result::Result<T, IpcError>;

/// Errors returned in IPC replies.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("runtime error: {0}")]
    Status(ApxError),

    #[error("malformed topology: {0}")]
    Topology(String),

    #[error("route references undefined id `{0}`")]
    UndefinedRef(String),

    #[error("duplicate id `{0}` in topology")]
    DuplicateTopologyId(String),

    #[error("configuration fragment sequence violated")]
    FragmentSequence,

    #[error("configuration blob exceeds declared size")]
    FragmentOverflow,

    #[error("topology parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("topology file error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ApxError> for IpcError {
    fn from(e: ApxError) -> Self {
        IpcError::Status(e)
    }
}

impl IpcError {
    /// The numeric code placed in the IPC reply header.
    pub fn code(&self) -> ApxError {
        match self {
            IpcError::Pipeline(e) => e.code(),
            IpcError::Status(e) => *e,
            IpcError::FragmentSequence | IpcError::FragmentOverflow => ApxError::InvalidParameter,
            IpcError::UndefinedRef(_) | IpcError::DuplicateTopologyId(_) | IpcError::Topology(_) => {
                ApxError::InvalidParameter
            }
            IpcError::Json(_) | IpcError::Io(_) => ApxError::InvalidParameter,
        }
    }
}
