use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use multicam_acquire::ingest::{
    CommandLog, DeviceDiscovery, SyntheticBehavior, SyntheticCameraConfig, SyntheticDiscovery,
};
use multicam_acquire::{
    AcquireError, DisplaySink, FrameStatsSink, Orchestrator, OrchestratorConfig,
    PresentationSize, SessionConfig, SessionState, SourceSession, StopReason, WorkerExit,
};

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        session: SessionConfig {
            retrieve_timeout: Duration::from_millis(300),
            fill_poll: Duration::from_millis(20),
            presentation: PresentationSize {
                width: 32,
                height: 24,
            },
        },
        poll_interval: Duration::from_millis(20),
        ..OrchestratorConfig::default()
    }
}

fn orchestrator(
    cameras: Vec<SyntheticCameraConfig>,
) -> (Orchestrator<SyntheticDiscovery>, CommandLog, Arc<FrameStatsSink>) {
    let discovery = SyntheticDiscovery::new(cameras);
    let log = discovery.log();
    let sink = Arc::new(FrameStatsSink::new());
    let orchestrator = Orchestrator::new(
        fast_config(),
        discovery,
        Arc::clone(&sink) as Arc<dyn DisplaySink>,
    );
    (orchestrator, log, sink)
}

fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn three_cameras_run_paced_and_shut_down_cleanly() -> anyhow::Result<()> {
    let (mut orchestrator, log, sink) = orchestrator(vec![
        SyntheticCameraConfig::new("cam0").with_fps(60),
        SyntheticCameraConfig::new("cam1").with_fps(60),
        SyntheticCameraConfig::new("cam2").with_fps(60),
    ]);

    let opened = orchestrator.open_sessions()?;
    assert_eq!(opened.len(), 3);
    assert_eq!(opened.packet_delay(), 144224);
    assert_eq!(log.count("GevSCPD=144224"), 3);
    // Pacing lands before any start command.
    assert_eq!(log.count("AcquisitionStart"), 0);

    let running = opened.start()?;
    assert!(wait_until(Duration::from_secs(3), || {
        ["cam0", "cam1", "cam2"]
            .iter()
            .all(|id| sink.frames(id) >= 3)
    }));
    assert_eq!(log.count("AcquisitionStart"), 3);

    let (stop_tx, stop_rx) = bounded::<()>(1);
    stop_tx.send(())?;
    assert_eq!(running.wait_for_stop(&stop_rx), StopReason::Signal);

    let started = Instant::now();
    let report = running.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(report.packet_delay, 144224);
    assert_eq!(report.sessions.len(), 3);
    for session in &report.sessions {
        assert_eq!(session.state, SessionState::Closed);
        assert_eq!(session.exit, Some(WorkerExit::Stopped));
        assert_eq!(session.packet_delay, Some(144224));
        assert!(session.frames_displayed >= 3);
        assert_eq!(session.frames_dropped, 0);
    }
    assert_eq!(log.count("AcquisitionStop"), 3);
    assert_eq!(log.count("StreamClose"), 3);

    let stats = sink.snapshot();
    assert_eq!((stats["cam1"].last_width, stats["cam1"].last_height), (32, 24));
    Ok(())
}

#[test]
fn start_commands_wait_for_every_participant() -> anyhow::Result<()> {
    let ids = ["s0", "s1", "s2"];
    let mut discovery =
        SyntheticDiscovery::new(ids.iter().map(|id| SyntheticCameraConfig::new(*id)).collect());
    let log = discovery.log();
    let sink = Arc::new(FrameStatsSink::new());

    let mut sessions = Vec::new();
    for info in discovery.find()? {
        let device = discovery.connect(&info)?;
        let mut session = SourceSession::new(&info, device, fast_config().session);
        session.open()?;
        session.start_acquisition()?;
        sessions.push(Arc::new(session));
    }

    // The test thread is the last participant.
    let barrier = Arc::new(Barrier::new(sessions.len() + 1));
    let workers: Vec<_> = sessions
        .iter()
        .map(|session| {
            let session = Arc::clone(session);
            let barrier = Arc::clone(&barrier);
            let sink = Arc::clone(&sink);
            std::thread::spawn(move || session.run(&barrier, sink.as_ref()))
        })
        .collect();

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(log.count("AcquisitionStart"), 0);

    let released = Instant::now();
    barrier.wait();
    assert!(wait_until(Duration::from_secs(2), || log.count("AcquisitionStart") == 3));
    for id in ids {
        let at = log.first(id, "AcquisitionStart").expect("start recorded");
        assert!(at >= released);
    }

    for session in &sessions {
        session.stop_acquisition();
    }
    for worker in workers {
        assert_eq!(worker.join().expect("worker thread"), WorkerExit::Stopped);
    }
    for session in &sessions {
        session.close();
    }
    Ok(())
}

#[test]
fn stalled_camera_exits_alone() -> anyhow::Result<()> {
    let (mut orchestrator, _log, sink) = orchestrator(vec![
        SyntheticCameraConfig::new("stuck").with_behavior(SyntheticBehavior::Stall),
        SyntheticCameraConfig::new("live").with_fps(60),
    ]);
    let running = orchestrator.open_sessions()?.start()?;

    // One timeout plus scheduling slack.
    std::thread::sleep(Duration::from_millis(600));
    let stuck = running
        .sessions()
        .find(|s| s.source_id() == "stuck")
        .expect("stuck session");
    assert!(!stuck.is_running());
    assert!(matches!(stuck.exit(), Some(WorkerExit::RetrieveFailed(_))));

    let before = sink.frames("live");
    std::thread::sleep(Duration::from_millis(200));
    assert!(sink.frames("live") > before);
    assert!(!running.all_workers_exited());

    let report = running.shutdown();
    assert_eq!(report.failed_sessions().count(), 1);
    assert_eq!(report.failed_sessions().next().map(|s| s.source_id.as_str()), Some("stuck"));
    Ok(())
}

#[test]
fn no_devices_is_a_run_failure() {
    let (mut orchestrator, log, _sink) = orchestrator(Vec::new());
    let (_stop_tx, stop_rx) = bounded::<()>(1);
    assert!(matches!(
        orchestrator.run(&stop_rx),
        Err(AcquireError::NoDevices)
    ));
    assert!(log.records().is_empty());
}

#[test]
fn no_opened_sessions_is_a_run_failure() {
    let (mut orchestrator, log, _sink) = orchestrator(vec![
        SyntheticCameraConfig::new("a").with_behavior(SyntheticBehavior::FailBind),
        SyntheticCameraConfig::new("b").with_behavior(SyntheticBehavior::RejectPixelFormat),
    ]);
    let (_stop_tx, stop_rx) = bounded::<()>(1);
    assert!(matches!(
        orchestrator.run(&stop_rx),
        Err(AcquireError::NoSessionsOpened)
    ));
    assert_eq!(log.count("AcquisitionStart"), 0);
    assert!(!log.records().iter().any(|r| r.action.starts_with("GevSCPD")));
    // The camera that bound its stream released it again.
    assert_eq!(log.count("StreamOpen"), log.count("StreamClose"));
}

#[test]
fn dropping_a_running_acquisition_shuts_it_down() -> anyhow::Result<()> {
    let (mut orchestrator, log, _sink) = orchestrator(vec![SyntheticCameraConfig::new("cam0")]);
    let running = orchestrator.open_sessions()?.start()?;
    assert!(wait_until(Duration::from_secs(2), || log.count("AcquisitionStart") == 1));
    drop(running);
    assert_eq!(log.count("AcquisitionStop"), 1);
    assert_eq!(log.count("StreamClose"), 1);
    Ok(())
}
