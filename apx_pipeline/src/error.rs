//! Pipeline-level error type.

use apx_core::ApxError;
use apx_stream::BufferId;

use crate::component::ComponentId;
use crate::pipeline::PipelineId;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by graph construction and lifecycle operations.
///
/// Flow-control conditions never appear here; they are folded into
/// [`CopyOutcome::PathStop`](crate::module::CopyOutcome) before reaching
/// callers.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("component {0:?} not found")]
    ComponentNotFound(ComponentId),

    #[error("buffer {0:?} not found")]
    BufferNotFound(BufferId),

    #[error("pipeline {0:?} not found")]
    PipelineNotFound(PipelineId),

    #[error("object id already in use")]
    DuplicateId,

    #[error("buffer {0:?} already has a {1} side")]
    EndpointOccupied(BufferId, &'static str),

    #[error("component {0:?} cannot accept another attachment")]
    TooManyAttachments(ComponentId),

    #[error("graph contains a cycle through component {0:?}")]
    Cycle(ComponentId),

    #[error("pipeline {0:?} graph is not connected")]
    Disconnected(PipelineId),

    #[error("pipeline {0:?} has no endpoint component")]
    NoEndpoint(PipelineId),

    #[error("runtime error: {0}")]
    Status(#[from] ApxError),
}

impl PipelineError {
    /// Collapses the error into the numeric code reported to the host.
    pub fn code(&self) -> ApxError {
        match self {
            PipelineError::ComponentNotFound(_)
            | PipelineError::BufferNotFound(_)
            | PipelineError::PipelineNotFound(_) => ApxError::NotFound,
            PipelineError::DuplicateId => ApxError::Exists,
            PipelineError::EndpointOccupied(..) | PipelineError::TooManyAttachments(_) => ApxError::InvalidParameter,
            PipelineError::Cycle(_) => ApxError::GraphCycle,
            PipelineError::Disconnected(_) | PipelineError::NoEndpoint(_) => ApxError::GraphDisconnected,
            PipelineError::Status(e) => *e,
        }
    }
}
