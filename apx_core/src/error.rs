//! Error codes for the apx_audio workspace.
//!
//! This module provides a C-compatible error enum and a Result type alias
//! shared by all crates in the workspace. The codes mirror the firmware
//! status values reported to the host, so higher-level error types wrap
//! them rather than replace them.

use core::fmt;

/// Error codes for pipeline runtime operations.
///
/// Uses `#[repr(C)]` for a stable memory layout, enabling the values to be
/// written verbatim into host-visible status words.
///
/// The first two variants are *flow control*: they are expected during
/// normal streaming (a source ran dry, a sink filled up), are never logged,
/// and are swallowed by the component that observes them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApxError {
    /// No error occurred.
    Ok = 0,
    /// A source endpoint had no data available (flow control).
    NoData = 1,
    /// A sink endpoint had no free space (flow control).
    NoSpace = 2,
    /// An invalid parameter value was provided.
    InvalidParameter = 3,
    /// A stream format is not supported by the receiving component.
    UnsupportedFormat = 4,
    /// A lifecycle operation was requested in a state that forbids it.
    BadState = 5,
    /// The requested state is already set (idempotent trigger).
    AlreadySet = 6,
    /// The component graph contains a cycle.
    GraphCycle = 7,
    /// The component graph is not fully connected.
    GraphDisconnected = 8,
    /// Memory allocation failed or a buffer pool was exhausted.
    OutOfMemory = 9,
    /// A drain or handshake exceeded its deadline.
    Timeout = 10,
    /// A real-time deadline was missed (underflow or overflow).
    Xrun = 11,
    /// An identifier did not resolve to a known object.
    NotFound = 12,
    /// An identifier collides with an existing object.
    Exists = 13,
}

impl ApxError {
    /// Returns `true` for the flow-control codes (`NoData`, `NoSpace`).
    ///
    /// Flow-control errors are local and non-fatal: the scheduler skips
    /// the remainder of the pass and the pipeline stays active.
    #[inline]
    pub const fn is_flow_control(self) -> bool {
        matches!(self, ApxError::NoData | ApxError::NoSpace)
    }

    /// The raw status code written into host-visible registers.
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ApxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApxError::Ok => write!(f, "no error"),
            ApxError::NoData => write!(f, "source empty"),
            ApxError::NoSpace => write!(f, "sink full"),
            ApxError::InvalidParameter => write!(f, "invalid parameter"),
            ApxError::UnsupportedFormat => write!(f, "unsupported stream format"),
            ApxError::BadState => write!(f, "operation illegal in current state"),
            ApxError::AlreadySet => write!(f, "state already set"),
            ApxError::GraphCycle => write!(f, "graph contains a cycle"),
            ApxError::GraphDisconnected => write!(f, "graph is not connected"),
            ApxError::OutOfMemory => write!(f, "allocation failed"),
            ApxError::Timeout => write!(f, "deadline exceeded"),
            ApxError::Xrun => write!(f, "missed real-time deadline"),
            ApxError::NotFound => write!(f, "no such object"),
            ApxError::Exists => write!(f, "object already exists"),
        }
    }
}

impl std::error::Error for ApxError {}

/// Result type alias for pipeline runtime operations.
pub type Result<T> = core::result::Result<T, ApxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_control_classification() {
        assert!(ApxError::NoData.is_flow_control());
        assert!(ApxError::NoSpace.is_flow_control());
        assert!(!ApxError::Xrun.is_flow_control());
        assert!(!ApxError::BadState.is_flow_control());
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ApxError::Ok.code(), 0);
        assert_eq!(ApxError::NoData.code(), 1);
        assert_eq!(ApxError::NoSpace.code(), 2);
        assert_eq!(ApxError::Xrun.code(), 11);
    }
}
