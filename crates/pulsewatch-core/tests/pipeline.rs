//! End-to-end tests for the acquisition pipeline.
//!
//! These drive a real `Pipeline` (ingestion task, controller, hub) with a
//! scripted serial transport in place of hardware:
//! connect → ingest → filter → buffer → broadcast → disconnect.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pulsewatch_core::{
    HubMessage, LineTransport, Pipeline, PipelineConfig, PortDescriptor, Position, Sample,
    SampleSource, SourceMode, TransportOpener, ViewerConnection,
};

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

enum Step {
    Line(&'static str),
    Fail,
}

#[derive(Default)]
struct Script {
    steps: Mutex<VecDeque<Step>>,
    reopen_ok: AtomicBool,
    reopens: AtomicUsize,
    closed: AtomicBool,
    /// Line returned whenever the script is empty, as if the wire never idles.
    flood: Option<&'static str>,
}

struct FakeTransport {
    port: PortDescriptor,
    script: Arc<Script>,
}

impl LineTransport for FakeTransport {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let step = self.script.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Line(line)) => Ok(Some(line.to_string())),
            Some(Step::Fail) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled")),
            None if self.script.flood.is_some() => Ok(self.script.flood.map(str::to_string)),
            None => {
                // Behave like a read timeout with nothing on the wire.
                std::thread::sleep(Duration::from_millis(2));
                Ok(None)
            }
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.script.reopens.fetch_add(1, Ordering::SeqCst);
        if self.script.reopen_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "device gone"))
        }
    }

    fn descriptor(&self) -> &PortDescriptor {
        &self.port
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.script.closed.store(true, Ordering::SeqCst);
    }
}

/// Opens `/dev/ttyFAKE*` ports backed by scripts; everything else fails.
#[derive(Default)]
struct FakeOpener {
    scripts: Mutex<Vec<(String, Arc<Script>)>>,
    opens: AtomicUsize,
}

impl FakeOpener {
    fn with_port(self, name: &str, steps: Vec<Step>, reopen_ok: bool) -> (Self, Arc<Script>) {
        self.with_script(
            name,
            Script {
                steps: Mutex::new(steps.into()),
                reopen_ok: AtomicBool::new(reopen_ok),
                ..Script::default()
            },
        )
    }

    fn with_flood(self, name: &str, line: &'static str) -> (Self, Arc<Script>) {
        self.with_script(
            name,
            Script {
                flood: Some(line),
                ..Script::default()
            },
        )
    }

    fn with_script(self, name: &str, script: Script) -> (Self, Arc<Script>) {
        let script = Arc::new(script);
        self.scripts
            .lock()
            .unwrap()
            .push((name.to_string(), Arc::clone(&script)));
        (self, script)
    }
}

impl TransportOpener for FakeOpener {
    fn available_ports(&self) -> Vec<String> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn open(
        &self,
        port: &PortDescriptor,
        _timeout: Duration,
    ) -> io::Result<Box<dyn LineTransport>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let scripts = self.scripts.lock().unwrap();
        let (_, script) = scripts
            .iter()
            .find(|(name, _)| *name == port.name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such port"))?;
        Ok(Box::new(FakeTransport {
            port: port.clone(),
            script: Arc::clone(script),
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        idle_interval_ms: 20,
        live_poll_interval_ms: 1,
        read_timeout_ms: 5,
        simulation_step_secs: 0.01,
        ..PipelineConfig::default()
    }
}

fn start(config: PipelineConfig, opener: FakeOpener) -> (Pipeline, Arc<FakeOpener>) {
    let opener = Arc::new(opener);
    let pipeline = Pipeline::start_with(config, opener.clone(), Some(7)).unwrap();
    (pipeline, opener)
}

async fn next_sample(viewer: &mut ViewerConnection) -> Sample {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(1), viewer.outbox.recv())
            .await
            .expect("no sample within 1s")
            .expect("hub dropped the viewer");
        if let HubMessage::Sample(sample) = message {
            return sample;
        }
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1s");
}

// ---------------------------------------------------------------------------
// Debug port
// ---------------------------------------------------------------------------

#[tokio::test]
async fn debug_port_streams_simulation_then_disconnects() {
    let (pipeline, opener) = start(fast_config(), FakeOpener::default());
    let controller = pipeline.controller();
    assert!(!controller.status().connected);

    let reply = controller.connect("DEBUG_COM1", Some(115_200)).await;
    assert!(reply.is_success());
    assert_eq!(reply.mode, Some(SourceMode::Debug));
    assert_eq!(reply.port.as_deref(), Some("DEBUG_COM1"));
    assert_eq!(opener.opens.load(Ordering::SeqCst), 0);

    let mut viewer = pipeline.hub().register();
    let sample = next_sample(&mut viewer).await;
    assert_eq!(sample.source, SampleSource::Simulation);
    assert!(sample.status.is_some());
    assert_eq!(sample.pulse_rate, Some(72.0));

    let status = pipeline.status();
    assert!(status.is_connected);
    assert!(status.using_simulated_data);
    assert_eq!(status.viewers, 1);

    assert!(controller.disconnect().await.is_success());
    let status = pipeline.status();
    assert!(!status.is_connected);
    assert_eq!(status.mode, SourceMode::Simulated);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn simulator_waits_for_a_viewer() {
    let (pipeline, _) = start(fast_config(), FakeOpener::default());
    pipeline.controller().connect("DEBUG_COM2", None).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.buffer().lengths(), [0, 0, 0]);

    let mut viewer = pipeline.hub().register();
    next_sample(&mut viewer).await;
    assert!(pipeline.buffer().lock().len(Position::Cun) >= 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn every_viewer_gets_the_same_samples() {
    let (pipeline, _) = start(fast_config(), FakeOpener::default());
    let mut a = pipeline.hub().register();
    let mut b = pipeline.hub().register();
    pipeline.controller().connect("DEBUG_COM1", None).await;

    for _ in 0..3 {
        assert_eq!(next_sample(&mut a).await, next_sample(&mut b).await);
    }
    drop(b);
    // The dropped viewer is removed on the next publish.
    wait_until(|| pipeline.hub().viewer_count() == 1).await;
    next_sample(&mut a).await;
    pipeline.shutdown().await;
}

// ---------------------------------------------------------------------------
// Real ports
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_real_port_reports_error_and_stays_disconnected() {
    let pipeline = Pipeline::start(fast_config()).unwrap();
    let reply = pipeline
        .controller()
        .connect("/dev/pulsewatch-missing", Some(9600))
        .await;
    assert!(!reply.is_success());
    assert!(reply.message.is_some());
    let state = pipeline.controller().status();
    assert!(!state.connected);
    assert_eq!(state.mode, SourceMode::Simulated);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn empty_port_name_is_rejected() {
    let (pipeline, opener) = start(fast_config(), FakeOpener::default());
    let reply = pipeline.controller().connect("  ", None).await;
    assert!(!reply.is_success());
    assert_eq!(opener.opens.load(Ordering::SeqCst), 0);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn live_records_are_filtered_and_published() {
    let (opener, script) = FakeOpener::default().with_port(
        "/dev/ttyFAKE0",
        vec![
            Step::Line("1.0,2.0,3.0"),
            Step::Line("not,a,record"),
            Step::Line("1.5,2.5,3.5,0,80"),
        ],
        true,
    );
    let config = PipelineConfig {
        fallback_to_simulation: false,
        ..fast_config()
    };
    let (pipeline, _) = start(config, opener);
    let mut viewer = pipeline.hub().register();

    let reply = pipeline.controller().connect("/dev/ttyFAKE0", None).await;
    assert!(reply.is_success(), "{reply:?}");
    assert_eq!(reply.baudrate, Some(115_200));
    assert_eq!(reply.mode, Some(SourceMode::Live));

    let first = next_sample(&mut viewer).await;
    assert_eq!(first.source, SampleSource::Hardware);
    assert_eq!((first.cun, first.guan, first.chi), (1.0, 2.0, 3.0));
    assert_eq!(first.timestamp, 0.001);
    assert_eq!(first.pulse_rate, None);

    // The malformed line is dropped without disturbing the counter.
    let second = next_sample(&mut viewer).await;
    assert_eq!(second.timestamp, 0.002);
    assert_eq!(second.pulse_rate, Some(80.0));

    let status = pipeline.status();
    assert!(status.is_connected);
    assert!(!status.using_simulated_data);
    assert_eq!(status.port_info.map(|p| p.is_open), Some(true));
    assert_eq!(status.buffered.cun, 2);

    pipeline.controller().disconnect().await;
    assert!(script.closed.load(Ordering::SeqCst));
    assert_eq!(pipeline.controller().status().mode, SourceMode::None);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn dead_transport_fails_back_to_simulation() {
    let (opener, script) = FakeOpener::default().with_port(
        "/dev/ttyFAKE0",
        vec![Step::Line("1,1,1"), Step::Fail],
        false,
    );
    let (pipeline, _) = start(fast_config(), opener);
    assert!(pipeline.controller().connect("/dev/ttyFAKE0", None).await.is_success());

    wait_until(|| !pipeline.controller().status().connected).await;
    let state = pipeline.controller().status();
    assert_eq!(state.mode, SourceMode::Simulated);
    assert_eq!(state.port.map(|p| p.is_open), Some(false));
    assert_eq!(script.reopens.load(Ordering::SeqCst), 1);
    wait_until(|| script.closed.load(Ordering::SeqCst)).await;

    // Fallback simulation keeps the stream alive.
    let mut viewer = pipeline.hub().register();
    assert_eq!(next_sample(&mut viewer).await.source, SampleSource::Simulation);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn failback_right_after_connect_sticks() {
    for _ in 0..20 {
        let (opener, _) =
            FakeOpener::default().with_port("/dev/ttyFAKE0", vec![Step::Fail], false);
        let (pipeline, _) = start(fast_config(), opener);
        assert!(pipeline.controller().connect("/dev/ttyFAKE0", None).await.is_success());

        wait_until(|| !pipeline.controller().status().connected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let state = pipeline.controller().status();
        assert!(!state.connected);
        assert_eq!(state.mode, SourceMode::Simulated);
        pipeline.shutdown().await;
    }
}

#[tokio::test]
async fn live_intake_keeps_up_with_the_sampling_rate() {
    let (opener, _) = FakeOpener::default().with_flood("/dev/ttyFAKE0", "1,2,3");
    let config = PipelineConfig {
        live_poll_interval_ms: 10,
        viewer_outbox: 100_000,
        fallback_to_simulation: false,
        ..fast_config()
    };
    let sampling_rate = config.sampling_rate;
    let (pipeline, _) = start(config, opener);
    let mut viewer = pipeline.hub().register();
    assert!(pipeline.controller().connect("/dev/ttyFAKE0", None).await.is_success());

    tokio::time::sleep(Duration::from_secs(1)).await;
    pipeline.controller().disconnect().await;

    let mut received = 0usize;
    while let Ok(message) = viewer.outbox.try_recv() {
        if matches!(message, HubMessage::Sample(_)) {
            received += 1;
        }
    }
    assert!(
        received as f64 >= sampling_rate / 2.0,
        "only {received} samples in one second"
    );
    pipeline.shutdown().await;
}

#[tokio::test]
async fn transport_recovers_after_successful_reopen() {
    let (opener, script) = FakeOpener::default().with_port(
        "/dev/ttyFAKE0",
        vec![Step::Fail, Step::Line("4,5,6")],
        true,
    );
    let config = PipelineConfig {
        fallback_to_simulation: false,
        ..fast_config()
    };
    let (pipeline, _) = start(config, opener);
    let mut viewer = pipeline.hub().register();
    pipeline.controller().connect("/dev/ttyFAKE0", None).await;

    let sample = next_sample(&mut viewer).await;
    assert_eq!((sample.cun, sample.guan, sample.chi), (4.0, 5.0, 6.0));
    assert_eq!(script.reopens.load(Ordering::SeqCst), 1);
    assert!(pipeline.controller().status().connected);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn reconnecting_closes_the_previous_transport() {
    let (opener, first) = FakeOpener::default().with_port("/dev/ttyFAKE0", vec![], true);
    let (opener, second) = opener.with_port("/dev/ttyFAKE1", vec![], true);
    let (pipeline, _) = start(fast_config(), opener);

    pipeline.controller().connect("/dev/ttyFAKE0", None).await;
    assert!(!first.closed.load(Ordering::SeqCst));
    pipeline.controller().connect("/dev/ttyFAKE1", Some(9600)).await;
    assert!(first.closed.load(Ordering::SeqCst));
    assert!(!second.closed.load(Ordering::SeqCst));

    let port = pipeline.controller().status().port.unwrap();
    assert_eq!((port.port.as_str(), port.baudrate), ("/dev/ttyFAKE1", 9600));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn history_survives_a_source_switch() {
    let (opener, _) =
        FakeOpener::default().with_port("/dev/ttyFAKE0", vec![Step::Line("9,9,9")], true);
    let (pipeline, _) = start(fast_config(), opener);
    let mut viewer = pipeline.hub().register();

    pipeline.controller().connect("DEBUG_COM1", None).await;
    for _ in 0..3 {
        next_sample(&mut viewer).await;
    }
    pipeline.controller().connect("/dev/ttyFAKE0", None).await;
    let hardware = loop {
        let sample = next_sample(&mut viewer).await;
        if sample.source == SampleSource::Hardware {
            break sample;
        }
    };
    let cun = pipeline.buffer().lock().entries(Position::Cun);
    assert!(cun.len() >= 4);
    assert_eq!(cun.last().copied(), Some((0.001, hardware.cun)));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn ports_list_real_then_debug() {
    let (opener, _) = FakeOpener::default().with_port("/dev/ttyFAKE0", vec![], true);
    let (pipeline, _) = start(fast_config(), opener);
    assert_eq!(
        pipeline.controller().list_sources(),
        vec!["/dev/ttyFAKE0", "DEBUG_COM1", "DEBUG_COM2", "DEBUG_COM3"]
    );
    pipeline.shutdown().await;
}
