//! Error taxonomy for the acquisition pipeline.
//!
//! Per-session failures (`OpenError`, `RetrieveError`, `SessionError`) stay inside the
//! session that produced them. Only `AcquireError` is surfaced to the caller of the
//! orchestrator, and only when no session can run at all.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a device for a parameter access or command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("parameter '{name}' rejected value '{value}'")]
    Rejected { name: String, value: String },
    #[error("command '{0}' failed")]
    Command(String),
    #[error("device connection failed: {0}")]
    Connect(String),
}

/// Failure reported by a transport stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("stream bind to '{connection_id}' failed: {reason}")]
    Bind {
        connection_id: String,
        reason: String,
    },
    #[error("stream is not open")]
    NotOpen,
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Failure while opening a source session. The session is discarded.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("stream bind failed: {0}")]
    StreamBind(#[source] StreamError),
    #[error("stream has no local endpoint to register with the device")]
    NoLocalEndpoint,
    #[error("device rejected configuration: {0}")]
    Device(#[from] DeviceError),
    #[error("malformed pixel format '{0}'")]
    PixelFormat(String),
    #[error("device reported an unusable payload size {0}")]
    PayloadSize(u64),
    #[error("buffer pipeline failed to start: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("session cannot be opened from state {0:?}")]
    InvalidState(crate::session::SessionState),
}

/// Outcome of a failed `BufferPipeline::retrieve_next`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrieveError {
    #[error("no buffer within {0:?}")]
    Timeout(Duration),
    #[error("pipeline stopped")]
    Cancelled,
    #[error("stream error: {0}")]
    Stream(#[source] StreamError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline already started")]
    AlreadyStarted,
    #[error("pipeline was stopped and cannot be restarted")]
    Stopped,
    #[error("buffer belongs to a different pipeline")]
    ForeignBuffer,
    #[error("buffer pool is full; buffer released twice?")]
    PoolFull,
    #[error("failed to spawn fill thread: {0}")]
    Spawn(String),
}

/// Precondition failures on an opened session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("operation requires state {expected:?}, session is {actual:?}")]
    InvalidState {
        expected: crate::session::SessionState,
        actual: crate::session::SessionState,
    },
    #[error("packet delay already applied")]
    PacingAlreadyApplied,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Whole-run failure escalated to the orchestrator's caller.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("device discovery failed: {0}")]
    Discovery(String),
    #[error("no usable devices found")]
    NoDevices,
    #[error("no source session could be opened")]
    NoSessionsOpened,
    #[error("no source session could start acquisition")]
    NoSessionsStarted,
    #[error("failed to spawn acquisition worker: {0}")]
    Spawn(#[source] std::io::Error),
}
