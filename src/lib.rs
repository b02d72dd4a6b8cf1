//! Multi-source synchronized camera acquisition.
//!
//! This crate acquires frames from several network cameras at once, normalizes their
//! pixel encodings and hands display-ready frames to a sink.
//!
//! # Architecture
//!
//! The pipeline keeps these properties by construction:
//!
//! 1. **Synchronized start**: every session issues its acquisition-start command only
//!    after all opened sessions have reached one shared barrier.
//! 2. **Shared-link pacing**: the packet delay is computed once from the number of
//!    sessions that actually opened, and written before any session starts.
//! 3. **Bounded buffers**: each session owns a pool of 16 receive buffers; at most 16
//!    can be outstanding at any instant.
//! 4. **Contained failures**: a session that fails to open is discarded; a session whose
//!    loop fails exits alone. Only a run with no usable session is an error.
//! 5. **Cooperative shutdown**: stop, join, close for every session, in bounded time.
//!
//! # Module Structure
//!
//! - `ingest`: device, stream and discovery capabilities, pixel formats, normalization,
//!   and the synthetic backend
//! - `pipeline`: per-session receive buffer pool
//! - `session`: one device's lifecycle and worker loop
//! - `orchestrator`: discovery, pacing, barrier launch, coordinated shutdown
//! - `pacing`, `display`, `frame`, `config`, `ui`, `error`

pub mod config;
pub mod display;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod orchestrator;
pub mod pacing;
pub mod pipeline;
pub mod session;
pub mod ui;

pub use config::AcquireConfig;
pub use display::{present, DisplaySink, FrameStatsSink, LogSink, PresentationSize};
pub use error::{
    AcquireError, DeviceError, OpenError, PipelineError, RetrieveError, SessionError,
    StreamError,
};
pub use frame::{BufferStatus, FrameBuffer, FrameInfo, Image, ImageLayout, PixelType};
pub use ingest::{
    normalize, BaseFormat, ConnectionId, Device, DeviceDiscovery, DeviceInfo, DeviceKind,
    Normalized, PixelDescriptor, Stream,
};
pub use orchestrator::{
    AcquisitionReport, OpenedSessions, Orchestrator, OrchestratorConfig, RunningAcquisition,
    StopReason,
};
pub use pacing::{compute_packet_delay, PacingParams};
pub use pipeline::{BufferPipeline, BufferPoolConfig, BUFFER_COUNT};
pub use session::{SessionConfig, SessionReport, SessionState, SourceSession, WorkerExit};
