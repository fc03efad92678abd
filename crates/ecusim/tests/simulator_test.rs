//! End-to-end tests: mode controller and diagnostic server on the mock bus
//!
//! Run with: cargo test --test simulator_test

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use ecusim::config::TransportKind;
use ecusim::{
    CycleObserver, EcuSimConfig, ModeController, ModeState, ModeTiming, SimError, Simulator,
};
use ecusim_transport::{BusTransport, MockBus, MockConfig};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

const NM_WAKE: u32 = 0x600;
const NM_STATE: u32 = 0x391;

fn mock_bus() -> Arc<MockBus> {
    Arc::new(MockBus::new(&MockConfig::default()))
}

#[derive(Default)]
struct RecordingObserver {
    cycles: Mutex<Vec<u64>>,
}

impl CycleObserver for RecordingObserver {
    fn cycle_started(&self, cycle: u64) {
        self.cycles.lock().push(cycle);
    }
}

fn default_controller(bus: &Arc<MockBus>, observer: Arc<RecordingObserver>) -> ModeController {
    let transport: Arc<dyn BusTransport> = bus.clone();
    let jobs = EcuSimConfig::default().build_jobs(&transport).unwrap();
    ModeController::with_observer(jobs, transport, ModeTiming::default(), observer)
}

// =============================================================================
// Mode Transitions
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_polling_never_overlaps_normal_frames() {
    let bus = mock_bus();
    let controller = default_controller(&bus, Arc::default());

    controller.normal().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_510)).await;
    controller.polling().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // nm_state keep-alive carries state 0x01, the arm request starts with 0x04
    let state_frames = bus.frames_for(NM_STATE);
    let first_arm = state_frames
        .iter()
        .rposition(|sent| sent.frame.data()[5] == 0x01)
        .map(|last_normal| last_normal + 1)
        .unwrap();
    assert!(state_frames[..first_arm]
        .iter()
        .all(|sent| sent.frame.data()[5] != 0x00 && sent.frame.data()[5] != 0x02));
    assert_eq!(state_frames[first_arm].frame.data()[5], 0x04);
    assert!(state_frames[first_arm..]
        .iter()
        .all(|sent| sent.frame.data()[5] != 0x01));
}

#[tokio::test(start_paused = true)]
async fn test_arm_sequence_then_auto_stop() {
    let bus = mock_bus();
    let controller = default_controller(&bus, Arc::default());

    controller.polling().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5_100)).await;

    let states: Vec<u8> = bus
        .frames_for(NM_STATE)
        .iter()
        .map(|sent| sent.frame.data()[5])
        .collect();
    assert_eq!(&states[..10], &[0x04; 10]);
    assert_eq!(&states[10..20], &[0x02; 10]);
    assert!(states[20..].iter().all(|s| *s == 0x00));
    assert_eq!(controller.mode(), ModeState::Idle);

    bus.clear();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(bus.sent_frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_auto_cycle_reports_every_normal_entry() {
    let bus = mock_bus();
    let observer = Arc::new(RecordingObserver::default());
    let controller = default_controller(&bus, observer.clone());
    let start = Instant::now();

    controller.auto_test().await.unwrap();
    tokio::time::sleep(Duration::from_secs(111)).await;

    // Normal at 0, 55 and 110 s
    assert_eq!(*observer.cycles.lock(), vec![1, 2, 3]);
    assert_eq!(controller.cycles(), 3);
    assert_eq!(controller.mode(), ModeState::AutoTestCycle);

    // quiescent window: nothing on the bus between 10 s and 55 s
    let quiet = bus.sent_frames().into_iter().filter(|sent| {
        let t = sent.at - start;
        t > Duration::from_millis(10_100) && t < Duration::from_millis(54_900)
    });
    assert_eq!(quiet.count(), 0);

    // wake frames appear again in the second cycle
    assert!(bus
        .frames_for(NM_WAKE)
        .iter()
        .any(|sent| sent.at - start >= Duration::from_secs(55)));

    controller.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn test_terminate_mid_cycle_has_no_late_steps() {
    let bus = mock_bus();
    let observer = Arc::new(RecordingObserver::default());
    let controller = default_controller(&bus, observer.clone());

    controller.auto_test().await.unwrap();
    tokio::time::sleep(Duration::from_millis(7_000)).await;
    controller.terminate().await;

    let sent = bus.sent_frames().len();
    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(bus.sent_frames().len(), sent);
    assert_eq!(*observer.cycles.lock(), vec![1]);
    assert!(controller.auto_test().await.is_err());
}

// =============================================================================
// Diagnostic Server
// =============================================================================

fn case_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        br#"[
            {"req": "10 03", "res": "50 03 00 32 01 F4"},
            {"req": "22F190", "res": "62F190574D49"}
        ]"#,
    )
    .unwrap();
    file
}

fn mock_config(cases: &tempfile::NamedTempFile) -> EcuSimConfig {
    let mut config = EcuSimConfig::default();
    config.transport.kind = TransportKind::Mock;
    config.cases = cases.path().display().to_string();
    config
}

#[tokio::test(start_paused = true)]
async fn test_server_answers_every_request() {
    let cases = case_file();
    let bus = mock_bus();
    let sim = Simulator::with_transport(&mock_config(&cases), bus.clone()).unwrap();
    sim.start().await;

    bus.inject_request(vec![0x10, 0x03]);
    bus.inject_request(vec![0x00, 0x05]);
    bus.inject_request(vec![0x36, 0x01, 0xAA]);
    bus.inject_request(vec![]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        bus.sent_payloads(),
        vec![
            vec![0x50, 0x03, 0x00, 0x32, 0x01, 0xF4],
            vec![0x00, 0x01, 0x02, 0x03, 0x04],
            vec![0x76, 0x01],
            vec![0x7F, 0x00, 0x31],
        ]
    );

    sim.shutdown().await;
    assert!(!bus.is_open());
    assert!(!sim.server().is_running().await);
    assert_eq!(sim.controller().mode(), ModeState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_server_keeps_running_after_send_failure() {
    let cases = case_file();
    let bus = mock_bus();
    let sim = Simulator::with_transport(&mock_config(&cases), bus.clone()).unwrap();
    sim.start().await;

    bus.set_fail_sends(true);
    bus.inject_request(vec![0x10, 0x03]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(bus.sent_payloads().is_empty());

    bus.set_fail_sends(false);
    bus.inject_request(vec![0x22, 0xF1, 0x90]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bus.sent_payloads(), vec![b"\x62\xF1\x90WMI".to_vec()]);

    sim.shutdown().await;
}

#[tokio::test]
async fn test_missing_case_file_is_fatal() {
    let mut config = EcuSimConfig::default();
    config.cases = "/nonexistent/cases.json".to_string();
    let result = Simulator::with_transport(&config, mock_bus());
    assert!(matches!(result, Err(SimError::Cases(_))));
}

#[tokio::test(start_paused = true)]
async fn test_default_config_serves_shipped_case_table() {
    let bus = mock_bus();
    let sim = Simulator::with_transport(&EcuSimConfig::default(), bus.clone()).unwrap();
    sim.start().await;

    bus.inject_request(vec![0x3E, 0x00]);
    bus.inject_request(vec![0x31, 0x01, 0xFF, 0x00]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        bus.sent_payloads(),
        vec![vec![0x7E, 0x00], vec![0x7F, 0x31, 0x31]]
    );
    sim.shutdown().await;
}

#[tokio::test]
async fn test_from_config_opens_mock_transport() {
    let mut config = EcuSimConfig::default();
    config.transport.kind = TransportKind::Mock;
    config.transport.node = Some("VCU".to_string());

    let sim = Simulator::from_config(&config).await.unwrap();
    assert_eq!(sim.controller().mode(), ModeState::Idle);
    assert_eq!(sim.controller().snapshot().jobs.len(), 4);
    sim.shutdown().await;
}
