//! 集成测试 - 扫描会话
//!
//! 使用内存蓝牙栈驱动 ScanSession 的完整生命周期。

mod support;

use blescout_core::{
    PeerListener, PeerRecord, RadioError, RawScanEvent, ScanFailure, ScanOptions, ScanPhase,
    ScanSession, StaticPermissionGate,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::{FakeRadio, Recorder, addr, named, wait_until};
use tokio::sync::Notify;
use uuid::Uuid;

fn session_with(radio: &Arc<FakeRadio>, options: ScanOptions) -> ScanSession {
    ScanSession::new(
        radio.clone(),
        Arc::new(StaticPermissionGate::Granted),
        radio.clone(),
        options,
    )
}

fn session(radio: &Arc<FakeRadio>) -> ScanSession {
    session_with(radio, ScanOptions::default())
}

fn addresses(peers: &[PeerRecord]) -> Vec<String> {
    peers.iter().map(|p| p.address.to_string()).collect()
}

#[tokio::test]
async fn test_start_fails_when_radio_powered_off() {
    let radio = FakeRadio::powered_off();
    let session = session(&radio);

    let result = session.start(Recorder::new()).await;

    assert_eq!(result, Err(RadioError::RadioDisabled));
    assert!(!session.is_active());
    assert_eq!(session.phase(), ScanPhase::Idle);
    assert!(session.current_peers().is_empty());
    assert_eq!(radio.active_registrations(), 0);
}

#[tokio::test]
async fn test_start_reports_capability_errors_in_order() {
    let radio = FakeRadio::new();
    radio.supported.store(false, Ordering::SeqCst);
    radio.has_adapter.store(false, Ordering::SeqCst);
    let session = session(&radio);

    assert_eq!(
        session.start(Recorder::new()).await,
        Err(RadioError::UnsupportedHardware)
    );

    radio.supported.store(true, Ordering::SeqCst);
    assert_eq!(
        session.start(Recorder::new()).await,
        Err(RadioError::RadioUnavailable)
    );

    radio.has_adapter.store(true, Ordering::SeqCst);
    assert_eq!(session.start(Recorder::new()).await, Ok(()));
    assert!(session.is_active());
}

#[tokio::test]
async fn test_start_without_permission() {
    let radio = FakeRadio::new();
    let session = ScanSession::new(
        radio.clone(),
        Arc::new(StaticPermissionGate::Denied),
        radio.clone(),
        ScanOptions::default(),
    );

    assert_eq!(
        session.start(Recorder::new()).await,
        Err(RadioError::PermissionDenied)
    );
    assert!(!session.is_active());
    assert_eq!(radio.active_registrations(), 0);
}

#[tokio::test]
async fn test_events_flow_into_registry_and_listener() {
    let radio = FakeRadio::new();
    let session = session(&radio);
    let listener = Recorder::new();
    session.start(listener.clone()).await.unwrap();

    radio.discover("AA:01", Some("P1"));
    radio.update("AA:01", Some("P2"));
    radio.discover("BB:02", Some("P3"));

    let seen = listener.seen();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].1);
    assert_eq!(seen[0].0.sequence_number, 1);
    assert!(!seen[1].1);
    assert_eq!(seen[1].0.sequence_number, 1);
    assert_eq!(seen[1].0.occurrence_count, 2);
    assert_eq!(seen[1].0.last_observation.name.as_deref(), Some("P2"));
    assert!(seen[2].1);
    assert_eq!(seen[2].0.sequence_number, 2);

    let peers = session.current_peers();
    assert_eq!(addresses(&peers), vec!["BB:02", "AA:01"]);
}

#[tokio::test]
async fn test_second_start_keeps_original_listener() {
    let radio = FakeRadio::new();
    let session = session(&radio);
    let first = Recorder::new();
    let second = Recorder::new();

    session.start(first.clone()).await.unwrap();
    radio.discover("AA:01", None);

    assert_eq!(
        session.start(second.clone()).await,
        Err(RadioError::AlreadyActive)
    );
    assert!(session.is_active());
    assert_eq!(radio.active_registrations(), 1);

    radio.update("AA:01", None);
    assert_eq!(first.count(), 2);
    assert_eq!(second.count(), 0);
    assert_eq!(session.current_peers()[0].occurrence_count, 2);
}

#[tokio::test]
async fn test_stray_events_after_stop_are_ignored() {
    let radio = FakeRadio::new();
    let session = session(&radio);
    let listener = Recorder::new();
    session.start(listener.clone()).await.unwrap();

    radio.discover("AA:01", Some("P1"));
    radio.discover("BB:02", Some("P2"));
    session.stop().await;

    assert!(!session.is_active());
    assert_eq!(radio.active_registrations(), 0);
    let after_stop = session.current_peers();

    radio.emit_stray(RawScanEvent::Discovered(addr("CC:03"), named(Some("late"))));
    radio.emit_stray(RawScanEvent::Updated(addr("AA:01"), named(Some("late"))));
    radio.emit_stray(RawScanEvent::BatchDiscovered(vec![(addr("DD:04"), named(None))]));

    assert_eq!(session.current_peers(), after_stop);
    assert_eq!(listener.count(), 2);
    assert!(!session.is_active());
}

#[tokio::test]
async fn test_restart_uses_fresh_registry() {
    let radio = FakeRadio::new();
    let session = session(&radio);
    session.start(Recorder::new()).await.unwrap();
    radio.discover("AA:01", None);
    radio.discover("BB:02", None);
    session.stop().await;

    let listener = Recorder::new();
    session.start(listener.clone()).await.unwrap();
    assert!(session.current_peers().is_empty());

    // 上一次会话的在途事件不能混入新会话
    radio.emit_stray(RawScanEvent::Discovered(addr("AA:01"), named(None)));
    let peers = session.current_peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].sequence_number, 1);
    assert_eq!(peers[0].occurrence_count, 1);
    assert_eq!(listener.count(), 1);
}

#[tokio::test]
async fn test_lost_is_additive_and_batch_is_ingested() {
    let radio = FakeRadio::new();
    let session = session(&radio);
    let listener = Recorder::new();
    session.start(listener.clone()).await.unwrap();

    radio.emit(RawScanEvent::BatchDiscovered(vec![
        (addr("AA:01"), named(Some("a"))),
        (addr("BB:02"), named(Some("b"))),
        (addr("AA:01"), named(Some("a2"))),
    ]));
    radio.emit(RawScanEvent::Lost(addr("AA:01")));

    let peers = session.current_peers();
    assert_eq!(peers.len(), 2);
    let a = peers
        .iter()
        .find(|p| p.address == addr("AA:01"))
        .unwrap();
    assert_eq!(a.occurrence_count, 2);
    assert_eq!(
        listener.seen().iter().map(|(_, is_new)| *is_new).collect::<Vec<_>>(),
        vec![true, true, false]
    );
}

#[tokio::test]
async fn test_only_named_devices() {
    let radio = FakeRadio::new();
    let session = session_with(
        &radio,
        ScanOptions {
            only_named_devices: true,
            ..Default::default()
        },
    );
    session.start(Recorder::new()).await.unwrap();

    radio.discover("AA:01", None);
    radio.discover("BB:02", Some("Band"));
    // 名称未解析的后续观测同样跳过，不会覆盖已有记录
    radio.update("BB:02", None);

    let peers = session.current_peers();
    assert_eq!(addresses(&peers), vec!["BB:02"]);
    assert_eq!(peers[0].occurrence_count, 1);
}

#[tokio::test]
async fn test_scan_failure_is_reported_and_session_stays_active() {
    let radio = FakeRadio::new();
    let session = session(&radio);
    let listener = Recorder::new();
    session.start(listener.clone()).await.unwrap();

    radio.emit(RawScanEvent::Failure(ScanFailure::from_code(6)));

    assert_eq!(
        *listener.failures.lock().unwrap(),
        vec![ScanFailure::ScanningTooFrequently]
    );
    assert!(session.is_active());
}

#[tokio::test]
async fn test_timeout_stops_scan() {
    let radio = FakeRadio::new();
    let session = session_with(
        &radio,
        ScanOptions {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );
    session.start(Recorder::new()).await.unwrap();
    radio.discover("AA:01", None);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!session.is_active());
    assert_eq!(radio.active_registrations(), 0);
    assert_eq!(session.current_peers().len(), 1);
}

#[tokio::test]
async fn test_timeout_of_old_session_does_not_stop_new_one() {
    let radio = FakeRadio::new();
    let session = session_with(
        &radio,
        ScanOptions {
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        },
    );
    session.start(Recorder::new()).await.unwrap();
    session.stop().await;
    session.start(Recorder::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(session.is_active());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!session.is_active());
}

#[tokio::test]
async fn test_registration_failure_restores_previous_results() {
    let radio = FakeRadio::new();
    let session = session(&radio);
    session.start(Recorder::new()).await.unwrap();
    radio.discover("AA:01", None);
    session.stop().await;

    radio.fail_register.store(true, Ordering::SeqCst);
    let result = session.start(Recorder::new()).await;

    assert!(matches!(result, Err(RadioError::Backend(_))));
    assert!(!session.is_active());
    assert_eq!(addresses(&session.current_peers()), vec!["AA:01"]);
}

#[tokio::test]
async fn test_stop_when_idle_is_noop() {
    let radio = FakeRadio::new();
    let session = session(&radio);

    session.stop().await;
    assert!(!session.is_active());
    assert!(session.current_peers().is_empty());

    session.start(Recorder::new()).await.unwrap();
    session.stop().await;
    session.stop().await;
    assert!(!session.is_active());
}

#[tokio::test]
async fn test_service_filter_is_passed_through() {
    let radio = FakeRadio::new();
    let service = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
    let session = session_with(
        &radio,
        ScanOptions {
            service_filter: vec![service],
            ..Default::default()
        },
    );
    session.start(Recorder::new()).await.unwrap();

    let filter = radio.last_filter.lock().unwrap().clone().unwrap();
    assert_eq!(filter.services, vec![service]);
}

#[tokio::test]
async fn test_closure_listener() {
    let radio = FakeRadio::new();
    let session = session(&radio);
    let names = Arc::new(Mutex::new(Vec::new()));
    let sink = names.clone();
    let listener: Arc<dyn PeerListener> = Arc::new(move |record: &PeerRecord, is_new: bool| {
        if is_new {
            sink.lock()
                .unwrap()
                .push(record.last_observation.display_name().to_string());
        }
    });
    session.start(listener).await.unwrap();

    radio.discover("AA:01", Some("Pixel"));
    radio.discover("BB:02", None);
    radio.update("AA:01", Some("Pixel"));

    assert_eq!(*names.lock().unwrap(), vec!["Pixel", "<unknown>"]);
}

#[tokio::test]
async fn test_stop_during_checks_cancels_start() {
    let radio = FakeRadio::new();
    let gate = Arc::new(Notify::new());
    *radio.hold_checks.lock().unwrap() = Some(gate.clone());
    let session = session(&radio);

    let starting = {
        let session = session.clone();
        tokio::spawn(async move { session.start(Recorder::new()).await })
    };
    wait_until(|| session.phase() == ScanPhase::Starting).await;

    session.stop().await;
    assert_eq!(session.phase(), ScanPhase::Idle);

    gate.notify_one();
    assert_eq!(starting.await.unwrap(), Ok(()));
    assert!(!session.is_active());
    assert_eq!(radio.register_calls.load(Ordering::SeqCst), 0);
    assert_eq!(radio.active_registrations(), 0);

    // 取消后可以正常启动
    *radio.hold_checks.lock().unwrap() = None;
    session.start(Recorder::new()).await.unwrap();
    assert!(session.is_active());
}

#[tokio::test]
async fn test_stop_during_registration_releases_it() {
    let radio = FakeRadio::new();
    let gate = Arc::new(Notify::new());
    *radio.hold_register.lock().unwrap() = Some(gate.clone());
    let session = session(&radio);

    let starting = {
        let session = session.clone();
        tokio::spawn(async move { session.start(Recorder::new()).await })
    };
    wait_until(|| radio.register_calls.load(Ordering::SeqCst) == 1).await;

    let stopping = {
        let session = session.clone();
        tokio::spawn(async move { session.stop().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    // stop 等待注册完成后再注销
    assert!(!stopping.is_finished());

    gate.notify_one();
    assert_eq!(starting.await.unwrap(), Ok(()));
    stopping.await.unwrap();

    assert!(!session.is_active());
    assert_eq!(radio.active_registrations(), 0);
    assert_eq!(radio.calls(), vec!["register", "unregister"]);

    radio.emit_stray(RawScanEvent::Discovered(addr("AA:01"), named(None)));
    assert!(session.current_peers().is_empty());
}

#[tokio::test]
async fn test_restart_waits_for_pending_unregister() {
    let radio = FakeRadio::new();
    let session = session(&radio);
    session.start(Recorder::new()).await.unwrap();

    let gate = Arc::new(Notify::new());
    *radio.hold_unregister.lock().unwrap() = Some(gate.clone());
    let stopping = {
        let session = session.clone();
        tokio::spawn(async move { session.stop().await })
    };
    wait_until(|| radio.unregister_calls.load(Ordering::SeqCst) == 1).await;

    let restarting = {
        let session = session.clone();
        tokio::spawn(async move { session.start(Recorder::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    // 旧的注销完成前不能注册新的平台扫描
    assert_eq!(radio.register_calls.load(Ordering::SeqCst), 1);

    gate.notify_one();
    stopping.await.unwrap();
    assert_eq!(restarting.await.unwrap(), Ok(()));

    assert!(session.is_active());
    assert_eq!(radio.active_registrations(), 1);
    assert_eq!(radio.calls(), vec!["register", "unregister", "register"]);
}
