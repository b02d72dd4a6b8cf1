//! Acquisition orchestrator.
//!
//! Drives one run end to end:
//! 1. Discover devices and connect the usable ones
//! 2. Open one `SourceSession` per device; failed opens are discarded
//! 3. Compute the packet delay once from the opened count and apply it
//! 4. Launch one worker thread per session behind a shared start barrier
//! 5. Wait for a stop signal or for every worker to exit on its own
//! 6. Stop, join and close every session
//!
//! Only a run with no usable session at all is reported as an error. Everything that
//! goes wrong inside one session stays in that session's log lines and `WorkerExit`.

use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::display::DisplaySink;
use crate::error::AcquireError;
use crate::ingest::DeviceDiscovery;
use crate::pacing::PacingParams;
use crate::session::{SessionConfig, SessionReport, SourceSession, WorkerExit};

/// Default interval at which the controller checks worker liveness.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug)]
pub struct OrchestratorConfig {
    pub pacing: PacingParams,
    pub session: SessionConfig,
    /// Skip devices that are not GigE Vision-like.
    pub gev_only: bool,
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pacing: PacingParams::default(),
            session: SessionConfig::default(),
            gev_only: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Why the controller left its wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// A stop was requested (or every stop sender went away).
    Signal,
    /// Every worker exited on its own before any stop request.
    AllWorkersExited,
}

#[derive(Clone, Debug)]
pub struct AcquisitionReport {
    pub packet_delay: u64,
    pub stop_reason: Option<StopReason>,
    pub sessions: Vec<SessionReport>,
}

impl AcquisitionReport {
    pub fn frames_displayed(&self) -> u64 {
        self.sessions.iter().map(|s| s.frames_displayed).sum()
    }

    /// Sessions whose worker ended on anything other than a requested stop.
    pub fn failed_sessions(&self) -> impl Iterator<Item = &SessionReport> {
        self.sessions
            .iter()
            .filter(|s| s.exit.as_ref().map_or(true, WorkerExit::is_failure))
    }
}

pub struct Orchestrator<D: DeviceDiscovery> {
    config: OrchestratorConfig,
    discovery: D,
    sink: Arc<dyn DisplaySink>,
}

impl<D: DeviceDiscovery> Orchestrator<D> {
    pub fn new(config: OrchestratorConfig, discovery: D, sink: Arc<dyn DisplaySink>) -> Self {
        Self {
            config,
            discovery,
            sink,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Discover, connect and open sessions, then apply the shared packet delay.
    pub fn open_sessions(&mut self) -> Result<OpenedSessions, AcquireError> {
        let found = self
            .discovery
            .find()
            .map_err(|err| AcquireError::Discovery(err.to_string()))?;
        log::info!("Orchestrator: discovered {} device(s)", found.len());

        let mut candidates = Vec::new();
        for info in found {
            if self.config.gev_only && !info.kind.is_network() {
                log::info!(
                    "Orchestrator: skipping {} ({} transport)",
                    info.display_id,
                    info.kind
                );
                continue;
            }
            match self.discovery.connect(&info) {
                Ok(device) => candidates.push(SourceSession::new(&info, device, self.config.session)),
                Err(err) => log::error!("{}: connect failed: {}", info.display_id, err),
            }
        }
        if candidates.is_empty() {
            return Err(AcquireError::NoDevices);
        }

        let mut sessions = Vec::with_capacity(candidates.len());
        for mut session in candidates {
            match session.open() {
                Ok(()) => {
                    log::info!("{}: opened", session.source_id());
                    sessions.push(session);
                }
                Err(err) => log::error!("{}: open failed: {}", session.source_id(), err),
            }
        }
        if sessions.is_empty() {
            return Err(AcquireError::NoSessionsOpened);
        }

        let packet_delay = self.config.pacing.packet_delay(sessions.len());
        log::info!(
            "Orchestrator: {} session(s) opened, packet delay {}",
            sessions.len(),
            packet_delay
        );
        for session in &mut sessions {
            if let Err(err) = session.apply_packet_delay(packet_delay) {
                log::warn!("{}: packet delay not applied: {}", session.source_id(), err);
            }
        }

        Ok(OpenedSessions {
            sessions,
            packet_delay,
            sink: Arc::clone(&self.sink),
            poll_interval: self.config.poll_interval,
        })
    }

    /// Run to completion: open, start, wait for `stop` or all workers, shut down.
    pub fn run(&mut self, stop: &Receiver<()>) -> Result<AcquisitionReport, AcquireError> {
        let running = self.open_sessions()?.start()?;
        let reason = running.wait_for_stop(stop);
        log::info!("Orchestrator: leaving acquisition ({:?})", reason);
        let mut report = running.shutdown();
        report.stop_reason = Some(reason);
        Ok(report)
    }
}

/// Sessions that passed `open`, paced, not yet running.
pub struct OpenedSessions {
    sessions: Vec<SourceSession>,
    packet_delay: u64,
    sink: Arc<dyn DisplaySink>,
    poll_interval: Duration,
}

impl OpenedSessions {
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn packet_delay(&self) -> u64 {
        self.packet_delay
    }

    pub fn sessions(&self) -> &[SourceSession] {
        &self.sessions
    }

    /// Enable streaming on every session and launch the workers.
    ///
    /// Workers are spawned first and handed the start barrier only once every spawn
    /// succeeded, so the barrier is always sized to the threads actually waiting on it.
    pub fn start(self) -> Result<RunningAcquisition, AcquireError> {
        let OpenedSessions {
            sessions,
            packet_delay,
            sink,
            poll_interval,
        } = self;

        let mut ready = Vec::with_capacity(sessions.len());
        for session in sessions {
            match session.start_acquisition() {
                Ok(()) => ready.push(Arc::new(session)),
                Err(err) => {
                    log::error!("{}: start failed: {}", session.source_id(), err);
                    session.close();
                }
            }
        }
        if ready.is_empty() {
            return Err(AcquireError::NoSessionsStarted);
        }

        let mut workers = Vec::with_capacity(ready.len());
        let mut gates: Vec<Sender<Arc<Barrier>>> = Vec::with_capacity(ready.len());
        let mut ready = ready.into_iter();
        while let Some(session) = ready.next() {
            let (gate_tx, gate_rx) = bounded::<Arc<Barrier>>(1);
            let thread_session = Arc::clone(&session);
            let thread_sink = Arc::clone(&sink);
            let spawned = std::thread::Builder::new()
                .name(format!("acquire-{}", session.source_id()))
                .spawn(move || match gate_rx.recv() {
                    Ok(barrier) => thread_session.run(&barrier, thread_sink.as_ref()),
                    Err(_) => WorkerExit::Aborted,
                });
            match spawned {
                Ok(handle) => {
                    gates.push(gate_tx);
                    workers.push(Worker {
                        session,
                        handle: Some(handle),
                        joined: None,
                    });
                }
                Err(err) => {
                    log::error!("{}: worker spawn failed: {}", session.source_id(), err);
                    // Dropping the gates releases every spawned worker with `Aborted`.
                    drop(gates);
                    for session in std::iter::once(session).chain(ready) {
                        session.stop_acquisition();
                        session.close();
                    }
                    let mut abandoned = RunningAcquisition {
                        workers,
                        packet_delay,
                        poll_interval,
                    };
                    abandoned.shutdown_workers();
                    return Err(AcquireError::Spawn(err));
                }
            }
        }

        let barrier = Arc::new(Barrier::new(workers.len()));
        log::info!(
            "Orchestrator: releasing {} worker(s) through start barrier",
            workers.len()
        );
        for gate in gates {
            if gate.send(Arc::clone(&barrier)).is_err() {
                log::error!("Orchestrator: worker exited before receiving the start barrier");
            }
        }

        Ok(RunningAcquisition {
            workers,
            packet_delay,
            poll_interval,
        })
    }
}

struct Worker {
    session: Arc<SourceSession>,
    handle: Option<JoinHandle<WorkerExit>>,
    joined: Option<WorkerExit>,
}

impl Worker {
    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let exit = handle.join().unwrap_or_else(|_| {
                log::error!("{}: worker thread panicked", self.session.source_id());
                WorkerExit::Aborted
            });
            self.joined = Some(exit);
        }
    }

    fn report(&self) -> SessionReport {
        let mut report = self.session.report();
        if report.exit.is_none() {
            report.exit = self.joined.clone();
        }
        report
    }
}

/// Workers launched and past (or waiting at) the start barrier.
pub struct RunningAcquisition {
    workers: Vec<Worker>,
    packet_delay: u64,
    poll_interval: Duration,
}

impl RunningAcquisition {
    pub fn packet_delay(&self) -> u64 {
        self.packet_delay
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SourceSession> {
        self.workers.iter().map(|worker| worker.session.as_ref())
    }

    pub fn all_workers_exited(&self) -> bool {
        self.workers.iter().all(Worker::is_finished)
    }

    /// Block until `stop` fires (or disconnects) or every worker has exited.
    pub fn wait_for_stop(&self, stop: &Receiver<()>) -> StopReason {
        loop {
            match stop.recv_timeout(self.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return StopReason::Signal,
                Err(RecvTimeoutError::Timeout) => {
                    if self.all_workers_exited() {
                        return StopReason::AllWorkersExited;
                    }
                }
            }
        }
    }

    /// Stop every session, join every worker, close every session.
    pub fn shutdown(mut self) -> AcquisitionReport {
        let sessions = self.shutdown_workers();
        AcquisitionReport {
            packet_delay: self.packet_delay,
            stop_reason: None,
            sessions,
        }
    }

    fn shutdown_workers(&mut self) -> Vec<SessionReport> {
        if self.workers.is_empty() {
            return Vec::new();
        }
        log::info!("Orchestrator: stopping {} session(s)", self.workers.len());
        for worker in &self.workers {
            worker.session.stop_acquisition();
        }
        for worker in &mut self.workers {
            worker.join();
        }
        for worker in &self.workers {
            worker.session.close();
        }
        self.workers.drain(..).map(|worker| worker.report()).collect()
    }
}

impl Drop for RunningAcquisition {
    fn drop(&mut self) {
        self.shutdown_workers();
    }
}
