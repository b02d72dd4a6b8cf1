//! Source session: one sensor's transport binding, buffer pipeline and worker loop.
//!
//! Lifecycle:
//!
//! ```text
//! Created ──open()──► Opened ──run() past barrier──► Acquiring
//!    │                  │                               │
//!    │                  └──────stop_acquisition()───────┴──► Stopping ──close()──► Closed
//!    └── open() failed: stays Created, holds nothing, close() is a no-op
//! ```
//!
//! The controlling thread owns `open`, `apply_packet_delay`, `start_acquisition`,
//! `stop_acquisition` and `close`. `run` executes on the session's own worker thread.
//! `running` is written only by the controlling thread; the worker reports its own
//! exit through `worker_done`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Barrier, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::display::{present, DisplaySink, PresentationSize};
use crate::error::{DeviceError, OpenError, RetrieveError, SessionError};
use crate::frame::{BufferStatus, FrameBuffer, Image};
use crate::ingest::{
    features, normalize, ConnectionId, Device, DeviceInfo, DeviceKind, Normalized,
    PixelDescriptor, Stream,
};
use crate::pipeline::{BufferPipeline, BufferPoolConfig};

/// Default wait for one frame before the worker gives up.
pub const DEFAULT_RETRIEVE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default poll interval of the pipeline fill thread.
pub const DEFAULT_FILL_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Opened,
    Acquiring,
    Stopping,
    Closed,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub retrieve_timeout: Duration,
    pub fill_poll: Duration,
    pub presentation: PresentationSize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retrieve_timeout: DEFAULT_RETRIEVE_TIMEOUT,
            fill_poll: DEFAULT_FILL_POLL,
            presentation: PresentationSize::default(),
        }
    }
}

/// Why a worker loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// `running` was cleared by the controller.
    Stopped,
    RetrieveFailed(RetrieveError),
    /// A zero-size frame was handed off.
    InvalidFrame,
    StartCommandFailed(DeviceError),
    /// The worker never reached its loop (session not opened, or launch abandoned).
    Aborted,
}

impl WorkerExit {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::RetrieveFailed(err) => write!(f, "retrieve failed: {err}"),
            Self::InvalidFrame => f.write_str("invalid (empty) frame"),
            Self::StartCommandFailed(err) => write!(f, "start command failed: {err}"),
            Self::Aborted => f.write_str("aborted before start"),
        }
    }
}

/// Final counters of one session.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub source_id: String,
    pub state: SessionState,
    pub packet_delay: Option<u64>,
    pub frames_displayed: u64,
    pub frames_dropped: u64,
    pub exit: Option<WorkerExit>,
}

pub struct SourceSession {
    source_id: String,
    connection_id: ConnectionId,
    source_selector: Option<String>,
    kind: DeviceKind,
    config: SessionConfig,
    device: Mutex<Box<dyn Device>>,
    pipeline: Option<BufferPipeline>,
    pixel: Option<PixelDescriptor>,
    packet_delay: Option<u64>,
    state: Mutex<SessionState>,
    running: AtomicBool,
    worker_done: AtomicBool,
    frames_displayed: AtomicU64,
    frames_dropped: AtomicU64,
    exit: Mutex<Option<WorkerExit>>,
}

impl SourceSession {
    pub fn new(info: &DeviceInfo, device: Box<dyn Device>, config: SessionConfig) -> Self {
        Self {
            source_id: info.display_id.clone(),
            connection_id: info.connection_id.clone(),
            source_selector: info.source.clone(),
            kind: device.kind(),
            config,
            device: Mutex::new(device),
            pipeline: None,
            pixel: None,
            packet_delay: None,
            state: Mutex::new(SessionState::Created),
            running: AtomicBool::new(false),
            worker_done: AtomicBool::new(false),
            frames_displayed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            exit: Mutex::new(None),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pixel_descriptor(&self) -> Option<&PixelDescriptor> {
        self.pixel.as_ref()
    }

    pub fn packet_delay(&self) -> Option<u64> {
        self.packet_delay
    }

    pub fn buffer_pool_config(&self) -> Option<BufferPoolConfig> {
        self.pipeline.as_ref().map(BufferPipeline::config)
    }

    pub fn outstanding_buffers(&self) -> usize {
        self.pipeline.as_ref().map_or(0, BufferPipeline::outstanding)
    }

    /// True between `start_acquisition` and either `stop_acquisition` or worker exit.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.worker_done.load(Ordering::Acquire)
    }

    pub fn frames_displayed(&self) -> u64 {
        self.frames_displayed.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn exit(&self) -> Option<WorkerExit> {
        self.exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            source_id: self.source_id.clone(),
            state: self.state(),
            packet_delay: self.packet_delay,
            frames_displayed: self.frames_displayed(),
            frames_dropped: self.frames_dropped(),
            exit: self.exit(),
        }
    }

    fn device(&self) -> MutexGuard<'_, Box<dyn Device>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Bind the stream, configure the device and start the buffer pipeline.
    ///
    /// On failure the session stays `Created` and holds no stream or buffers.
    pub fn open(&mut self) -> Result<(), OpenError> {
        let state = self.state();
        if state != SessionState::Created {
            return Err(OpenError::InvalidState(state));
        }

        let device = self
            .device
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        select_source(device.as_mut(), self.source_selector.as_deref())?;

        let mut stream = device.create_stream();
        stream
            .open(&self.connection_id)
            .map_err(OpenError::StreamBind)?;

        let (pixel, payload_size) =
            match configure_device(device.as_mut(), stream.as_ref(), &self.source_id) {
                Ok(configured) => configured,
                Err(err) => {
                    stream.close();
                    return Err(err);
                }
            };

        let pipeline = BufferPipeline::new(
            stream,
            BufferPoolConfig::for_payload(payload_size),
            self.config.fill_poll,
        );
        log::info!("{}: starting pipeline thread", self.source_id);
        if let Err(err) = pipeline.start() {
            pipeline.stop();
            if let Some(mut stream) = pipeline.take_stream() {
                stream.close();
            }
            return Err(err.into());
        }

        self.pipeline = Some(pipeline);
        self.pixel = Some(pixel);
        self.set_state(SessionState::Opened);
        Ok(())
    }

    /// Write the run's packet delay. Called once, after all sessions are opened.
    ///
    /// Only network devices have a pacing register. A rejected write is logged and
    /// the session keeps running unpaced.
    pub fn apply_packet_delay(&mut self, delay: u64) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Opened {
            return Err(SessionError::InvalidState {
                expected: SessionState::Opened,
                actual: state,
            });
        }
        if self.packet_delay.is_some() {
            return Err(SessionError::PacingAlreadyApplied);
        }
        self.packet_delay = Some(delay);

        if !self.kind.is_network() {
            log::debug!(
                "{}: {} transport has no packet delay register",
                self.source_id,
                self.kind
            );
            return Ok(());
        }

        let device = self
            .device
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let value = i64::try_from(delay).unwrap_or(i64::MAX);
        let written = select_source(device.as_mut(), self.source_selector.as_deref())
            .and_then(|()| device.set_integer(features::PACKET_DELAY, value));
        match written {
            Ok(()) => log::info!("{}: packet delay {}", self.source_id, delay),
            Err(err) => log::warn!(
                "{}: device rejected packet delay {}: {}",
                self.source_id,
                delay,
                err
            ),
        }
        Ok(())
    }

    /// Mark the session running and enable the device's streaming path.
    ///
    /// The acquisition-start command is issued later by `run`, past the barrier.
    pub fn start_acquisition(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Opened {
            return Err(SessionError::InvalidState {
                expected: SessionState::Opened,
                actual: state,
            });
        }
        log::info!("{}: start acquisition", self.source_id);

        let mut device = self.device();
        select_source(device.as_mut(), self.source_selector.as_deref())?;
        self.running.store(true, Ordering::Release);
        if let Err(err) = device.stream_enable() {
            self.running.store(false, Ordering::Release);
            return Err(err.into());
        }
        Ok(())
    }

    /// Clear `running`, stop capture and disable streaming.
    ///
    /// Idempotent, and safe after the worker has already exited on its own.
    pub fn stop_acquisition(&self) {
        // Device lock first: the worker checks `running` and issues its start command
        // under the same lock, so a start can never follow this stop.
        let mut device = self.device();
        self.running.store(false, Ordering::Release);
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                SessionState::Opened | SessionState::Acquiring => {
                    *state = SessionState::Stopping
                }
                SessionState::Created | SessionState::Stopping | SessionState::Closed => return,
            }
        }
        log::info!("{}: stop acquisition", self.source_id);

        if let Err(err) = select_source(device.as_mut(), self.source_selector.as_deref()) {
            log::warn!("{}: source select before stop failed: {}", self.source_id, err);
        }
        if let Err(err) = device.execute(features::ACQUISITION_STOP) {
            log::warn!("{}: {} failed: {}", self.source_id, features::ACQUISITION_STOP, err);
        }
        if let Err(err) = device.stream_disable() {
            log::warn!("{}: stream disable failed: {}", self.source_id, err);
        }
    }

    /// Worker loop body. Waits on `start_barrier`, issues the acquisition-start
    /// command, then retrieves, normalizes, presents and releases frames until
    /// stopped or a fatal per-session error.
    pub fn run(&self, start_barrier: &Barrier, sink: &dyn DisplaySink) -> WorkerExit {
        start_barrier.wait();

        let exit = self.acquire(sink);
        match &exit {
            WorkerExit::Stopped => log::info!("{}: acquisition loop stopped", self.source_id),
            other => log::error!("{}: acquisition loop ended: {}", self.source_id, other),
        }
        *self.exit.lock().unwrap_or_else(PoisonError::into_inner) = Some(exit.clone());
        self.worker_done.store(true, Ordering::Release);
        exit
    }

    fn acquire(&self, sink: &dyn DisplaySink) -> WorkerExit {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return WorkerExit::Aborted;
        };

        {
            let mut device = self.device();
            if !self.running.load(Ordering::Acquire) {
                return WorkerExit::Stopped;
            }
            let started = select_source(device.as_mut(), self.source_selector.as_deref())
                .and_then(|()| device.execute(features::ACQUISITION_START));
            if let Err(err) = started {
                return WorkerExit::StartCommandFailed(err);
            }
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Opened {
                *state = SessionState::Acquiring;
            }
        }

        while self.running.load(Ordering::Acquire) {
            let buffer = match pipeline.retrieve_next(self.config.retrieve_timeout) {
                Ok(buffer) => buffer,
                Err(_) if !self.running.load(Ordering::Acquire) => return WorkerExit::Stopped,
                Err(err) => return WorkerExit::RetrieveFailed(err),
            };

            if buffer.status() == BufferStatus::Invalid {
                log::error!(
                    "{}: zero-size frame (block {:?})",
                    self.source_id,
                    buffer.info().map(|info| info.block_id)
                );
                self.release(pipeline, buffer);
                return WorkerExit::InvalidFrame;
            }

            self.display(&buffer, sink);
            self.release(pipeline, buffer);
        }
        WorkerExit::Stopped
    }

    fn display(&self, buffer: &FrameBuffer, sink: &dyn DisplaySink) {
        let Some(info) = buffer.info() else {
            return;
        };
        let payload = buffer.payload();
        let image = match normalize(&info.pixel_type, payload, info.width, info.height) {
            Normalized::Converted(image) => image,
            Normalized::PassThrough => Image::mono(info.width, info.height, payload.to_vec()),
            Normalized::Invalid(reason) => {
                log::warn!(
                    "{}: dropping frame {} ({}): {:?}",
                    self.source_id,
                    info.block_id,
                    info.pixel_type,
                    reason
                );
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        sink.show(&self.source_id, &present(image, self.config.presentation));
        self.frames_displayed.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self, pipeline: &BufferPipeline, buffer: FrameBuffer) {
        if let Err(err) = pipeline.release(buffer) {
            log::error!("{}: buffer release failed: {}", self.source_id, err);
        }
    }

    /// Stop the pipeline and close the stream. Best-effort; a no-op for sessions that
    /// never opened or are already closed.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                SessionState::Created | SessionState::Closed => return,
                SessionState::Acquiring => {
                    log::warn!("{}: closing without stop_acquisition", self.source_id)
                }
                SessionState::Opened | SessionState::Stopping => {}
            }
            *state = SessionState::Closed;
        }
        self.running.store(false, Ordering::Release);
        log::info!("{}: closing source", self.source_id);

        if let Some(pipeline) = &self.pipeline {
            pipeline.stop();
            match pipeline.take_stream() {
                Some(mut stream) => stream.close(),
                None => log::warn!("{}: stream was not returned by pipeline", self.source_id),
            }
        }
    }
}

impl Drop for SourceSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Select this session's source on a multi-source device before touching it.
fn select_source(device: &mut dyn Device, selector: Option<&str>) -> Result<(), DeviceError> {
    match selector {
        Some(source) => device.set_enum(features::SOURCE_SELECTOR, source),
        None => Ok(()),
    }
}

/// Register the destination, settle on an 8-bit pixel format and size the pool.
fn configure_device(
    device: &mut dyn Device,
    stream: &dyn Stream,
    source_id: &str,
) -> Result<(PixelDescriptor, usize), OpenError> {
    if device.kind().is_network() {
        let endpoint = stream.local_endpoint().ok_or(OpenError::NoLocalEndpoint)?;
        log::info!(
            "{}: setting stream destination (channel 0) to {}",
            source_id,
            endpoint
        );
        device.set_stream_destination(endpoint, 0)?;
    }

    let native = device.get_enum(features::PIXEL_FORMAT)?;
    log::info!("{}: pixel format {}", source_id, native);
    let mut pixel = PixelDescriptor::parse(&native)?;
    if pixel.needs_reduction() {
        let reduced = pixel.eight_bit_name();
        device.set_enum(features::PIXEL_FORMAT, &reduced)?;
        log::info!("{}: requested {} from device", source_id, reduced);
        pixel = pixel.reduced_to_eight_bits();
    }

    let payload = device.payload_size()?;
    let payload_size = match usize::try_from(payload) {
        Ok(size) if size > 0 => size,
        _ => return Err(OpenError::PayloadSize(payload)),
    };
    Ok((pixel, payload_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::FrameStatsSink;
    use crate::frame::ImageLayout;
    use crate::ingest::{
        BaseFormat, CommandLog, DeviceDiscovery, SyntheticBehavior, SyntheticCameraConfig,
        SyntheticDiscovery,
    };
    use crate::pipeline::BUFFER_COUNT;
    use std::sync::Arc;
    use std::time::Instant;

    fn test_config() -> SessionConfig {
        SessionConfig {
            retrieve_timeout: Duration::from_millis(200),
            fill_poll: Duration::from_millis(20),
            presentation: PresentationSize {
                width: 16,
                height: 12,
            },
        }
    }

    fn session(camera: SyntheticCameraConfig) -> anyhow::Result<(SourceSession, CommandLog)> {
        let mut discovery = SyntheticDiscovery::new(vec![camera]);
        let info = discovery.find()?.remove(0);
        let device = discovery.connect(&info)?;
        Ok((
            SourceSession::new(&info, device, test_config()),
            discovery.log(),
        ))
    }

    fn run_worker(
        session: &Arc<SourceSession>,
        sink: &Arc<FrameStatsSink>,
    ) -> std::thread::JoinHandle<WorkerExit> {
        let session = Arc::clone(session);
        let sink = Arc::clone(sink);
        std::thread::spawn(move || session.run(&Barrier::new(1), sink.as_ref()))
    }

    fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
        let started = Instant::now();
        while started.elapsed() < limit {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn open_registers_destination_and_reduces_depth() -> anyhow::Result<()> {
        let (mut session, log) = session(SyntheticCameraConfig::new("cam0").with_size(8, 6))?;
        session.open()?;

        assert_eq!(session.state(), SessionState::Opened);
        let pixel = session.pixel_descriptor().expect("pixel descriptor");
        assert_eq!(pixel.base_format, BaseFormat::BayerRG);
        assert_eq!(pixel.bit_depth, 8);
        assert_eq!(
            session.buffer_pool_config(),
            Some(BufferPoolConfig {
                buffer_size: 48,
                buffer_count: BUFFER_COUNT
            })
        );

        let actions = log.actions_for("cam0");
        assert_eq!(actions[0], "StreamOpen");
        assert!(actions[1].starts_with("Destination[0]=127.0.0.1:"));
        assert_eq!(actions[2], "PixelFormat=BayerRG8");

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(log.count("StreamClose"), 1);
        Ok(())
    }

    #[test]
    fn selects_source_before_configuring() -> anyhow::Result<()> {
        let (mut session, log) = session(SyntheticCameraConfig::new("cam0").with_source("Source1"))?;
        session.open()?;
        assert_eq!(log.actions_for("cam0")[0], "SourceSelector=Source1");
        Ok(())
    }

    #[test]
    fn failed_bind_leaves_nothing_to_close() -> anyhow::Result<()> {
        let (mut session, log) = session(
            SyntheticCameraConfig::new("cam0").with_behavior(SyntheticBehavior::FailBind),
        )?;
        assert!(matches!(session.open(), Err(OpenError::StreamBind(_))));
        assert_eq!(session.state(), SessionState::Created);
        assert!(session.buffer_pool_config().is_none());

        session.close();
        session.stop_acquisition();
        assert_eq!(session.state(), SessionState::Created);
        assert!(log.records().is_empty());
        Ok(())
    }

    #[test]
    fn rejected_configuration_closes_the_stream() -> anyhow::Result<()> {
        let (mut session, log) = session(
            SyntheticCameraConfig::new("cam0").with_behavior(SyntheticBehavior::RejectPixelFormat),
        )?;
        assert!(matches!(
            session.open(),
            Err(OpenError::Device(DeviceError::Rejected { .. }))
        ));
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(log.count("StreamClose"), 1);
        Ok(())
    }

    #[test]
    fn malformed_pixel_format_is_an_open_error() -> anyhow::Result<()> {
        let (mut session, _log) =
            session(SyntheticCameraConfig::new("cam0").with_pixel_format("YUV422_8"))?;
        assert!(matches!(session.open(), Err(OpenError::PixelFormat(_))));
        Ok(())
    }

    #[test]
    fn open_twice_is_rejected() -> anyhow::Result<()> {
        let (mut session, _log) = session(SyntheticCameraConfig::new("cam0"))?;
        session.open()?;
        assert!(matches!(
            session.open(),
            Err(OpenError::InvalidState(SessionState::Opened))
        ));
        Ok(())
    }

    #[test]
    fn packet_delay_is_written_once() -> anyhow::Result<()> {
        let (mut session, log) = session(SyntheticCameraConfig::new("cam0"))?;
        assert!(matches!(
            session.apply_packet_delay(1),
            Err(SessionError::InvalidState { .. })
        ));
        session.open()?;
        session.apply_packet_delay(72112)?;
        assert!(matches!(
            session.apply_packet_delay(1),
            Err(SessionError::PacingAlreadyApplied)
        ));
        assert_eq!(session.packet_delay(), Some(72112));
        assert_eq!(log.count("GevSCPD=72112"), 1);
        Ok(())
    }

    #[test]
    fn usb_sessions_skip_network_configuration() -> anyhow::Result<()> {
        let (mut session, log) = session(SyntheticCameraConfig::new("u3v").with_kind(DeviceKind::Usb3))?;
        session.open()?;
        session.apply_packet_delay(72112)?;
        let actions = log.actions_for("u3v");
        assert!(!actions.iter().any(|a| a.starts_with("Destination")));
        assert!(!actions.iter().any(|a| a.starts_with("GevSCPD")));
        Ok(())
    }

    #[test]
    fn worker_streams_until_stopped() -> anyhow::Result<()> {
        let (mut session, log) = session(SyntheticCameraConfig::new("cam0").with_fps(100))?;
        session.open()?;
        session.start_acquisition()?;
        let session = Arc::new(session);
        let sink = Arc::new(FrameStatsSink::new());
        let worker = run_worker(&session, &sink);

        assert!(wait_until(Duration::from_secs(2), || sink.frames("cam0") >= 3));
        assert_eq!(session.state(), SessionState::Acquiring);
        assert!(session.is_running());
        assert!(session.outstanding_buffers() <= BUFFER_COUNT);

        session.stop_acquisition();
        let exit = worker.join().expect("worker thread");
        assert_eq!(exit, WorkerExit::Stopped);
        session.close();

        let stats = &sink.snapshot()["cam0"];
        assert_eq!((stats.last_width, stats.last_height), (16, 12));
        assert_eq!(stats.last_layout, Some(ImageLayout::Rgb8));
        assert_eq!(session.frames_displayed(), sink.frames("cam0"));
        assert_eq!(session.outstanding_buffers(), 0);

        let actions = log.actions_for("cam0");
        let start = actions.iter().position(|a| a == "AcquisitionStart");
        let stop = actions.iter().position(|a| a == "AcquisitionStop");
        assert!(start < stop && start.is_some());
        assert_eq!(actions.last().map(String::as_str), Some("StreamClose"));
        Ok(())
    }

    #[test]
    fn mono_frames_pass_through() -> anyhow::Result<()> {
        let (mut session, _log) = session(
            SyntheticCameraConfig::new("cam0")
                .with_pixel_format("Mono8")
                .with_fps(100),
        )?;
        session.open()?;
        session.start_acquisition()?;
        let session = Arc::new(session);
        let sink = Arc::new(FrameStatsSink::new());
        let worker = run_worker(&session, &sink);

        assert!(wait_until(Duration::from_secs(2), || sink.frames("cam0") >= 1));
        session.stop_acquisition();
        worker.join().expect("worker thread");
        assert_eq!(
            sink.snapshot()["cam0"].last_layout,
            Some(ImageLayout::Mono8)
        );
        Ok(())
    }

    #[test]
    fn stalled_source_exits_within_one_timeout() -> anyhow::Result<()> {
        let (mut session, _log) = session(
            SyntheticCameraConfig::new("cam0").with_behavior(SyntheticBehavior::Stall),
        )?;
        session.open()?;
        session.start_acquisition()?;
        let session = Arc::new(session);
        let sink = Arc::new(FrameStatsSink::new());

        let started = Instant::now();
        let exit = run_worker(&session, &sink).join().expect("worker thread");
        assert!(started.elapsed() < Duration::from_millis(800));
        assert!(matches!(
            exit,
            WorkerExit::RetrieveFailed(RetrieveError::Timeout(_))
        ));
        assert!(!session.is_running());

        // Controller still stops and closes normally afterwards.
        session.stop_acquisition();
        session.stop_acquisition();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        Ok(())
    }

    #[test]
    fn empty_frame_ends_the_loop() -> anyhow::Result<()> {
        let (mut session, _log) = session(
            SyntheticCameraConfig::new("cam0")
                .with_behavior(SyntheticBehavior::EmptyFrames)
                .with_fps(100),
        )?;
        session.open()?;
        session.start_acquisition()?;
        let session = Arc::new(session);
        let sink = Arc::new(FrameStatsSink::new());

        let exit = run_worker(&session, &sink).join().expect("worker thread");
        assert_eq!(exit, WorkerExit::InvalidFrame);
        assert_eq!(session.exit(), Some(WorkerExit::InvalidFrame));
        assert_eq!(sink.frames("cam0"), 0);
        assert_eq!(session.outstanding_buffers(), 0);
        session.stop_acquisition();
        session.close();
        Ok(())
    }

    #[test]
    fn unsupported_frames_are_dropped_and_loop_continues() -> anyhow::Result<()> {
        let (mut session, _log) = session(
            SyntheticCameraConfig::new("cam0")
                .with_pixel_format("YCbCr8")
                .with_fps(100),
        )?;
        session.open()?;
        session.start_acquisition()?;
        let session = Arc::new(session);
        let sink = Arc::new(FrameStatsSink::new());
        let worker = run_worker(&session, &sink);

        assert!(wait_until(Duration::from_secs(2), || session.frames_dropped() >= 3));
        assert!(session.is_running());
        session.stop_acquisition();
        assert_eq!(worker.join().expect("worker thread"), WorkerExit::Stopped);
        assert_eq!(sink.frames("cam0"), 0);
        Ok(())
    }

    #[test]
    fn stop_before_barrier_skips_start_command() -> anyhow::Result<()> {
        let (mut session, log) = session(SyntheticCameraConfig::new("cam0"))?;
        session.open()?;
        session.start_acquisition()?;
        session.stop_acquisition();
        let exit = session.run(&Barrier::new(1), &FrameStatsSink::new());
        assert_eq!(exit, WorkerExit::Stopped);
        assert_eq!(log.count("AcquisitionStart"), 0);
        Ok(())
    }
}
