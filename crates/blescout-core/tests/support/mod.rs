//! 测试用的内存蓝牙栈

#![allow(dead_code)]

use blescout_core::error::AdvertiseFailure;
use blescout_core::radio::{
    AdapterHandle, AdvertiseFailureHandler, AdvertisePayload, Broadcaster, RadioCapability,
    RawEventHandler, RawScanEvent, ScanEventSource, ScanFilter, ScanRegistration,
};
use blescout_core::{
    AdvertiseObserver, Observation, PeerAddress, PeerListener, PeerRecord, RadioError,
    ScanFailure,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub struct FakeRadio {
    pub supported: AtomicBool,
    pub has_adapter: AtomicBool,
    pub powered: AtomicBool,
    pub fail_register: AtomicBool,
    handlers: Mutex<HashMap<ScanRegistration, RawEventHandler>>,
    /// 所有注册过的处理函数，包括已注销的，用于模拟在途事件
    every_handler: Mutex<Vec<RawEventHandler>>,
    next_registration: AtomicU64,
    pub last_filter: Mutex<Option<ScanFilter>>,
    /// 设置后，对应调用会等到 `notify_one` 才继续
    pub hold_checks: Mutex<Option<Arc<Notify>>>,
    pub hold_register: Mutex<Option<Arc<Notify>>>,
    pub hold_unregister: Mutex<Option<Arc<Notify>>>,
    /// 进入 register / unregister 的次数
    pub register_calls: AtomicUsize,
    pub unregister_calls: AtomicUsize,
    /// 完成的平台调用，按顺序
    pub calls: Mutex<Vec<&'static str>>,

    pub reject_with: Mutex<Option<AdvertiseFailure>>,
    pub broadcasts: Mutex<Vec<AdvertisePayload>>,
    failure_handler: Mutex<Option<AdvertiseFailureHandler>>,
    pub stop_broadcast_calls: AtomicUsize,
}

impl FakeRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            supported: AtomicBool::new(true),
            has_adapter: AtomicBool::new(true),
            powered: AtomicBool::new(true),
            fail_register: AtomicBool::new(false),
            handlers: Mutex::new(HashMap::new()),
            every_handler: Mutex::new(Vec::new()),
            next_registration: AtomicU64::new(1),
            last_filter: Mutex::new(None),
            hold_checks: Mutex::new(None),
            hold_register: Mutex::new(None),
            hold_unregister: Mutex::new(None),
            register_calls: AtomicUsize::new(0),
            unregister_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            reject_with: Mutex::new(None),
            broadcasts: Mutex::new(Vec::new()),
            failure_handler: Mutex::new(None),
            stop_broadcast_calls: AtomicUsize::new(0),
        })
    }

    pub fn powered_off() -> Arc<Self> {
        let radio = Self::new();
        radio.powered.store(false, Ordering::SeqCst);
        radio
    }

    /// 投递给当前注册的处理函数
    pub fn emit(&self, event: RawScanEvent) {
        let handlers: Vec<_> = self.handlers.lock().unwrap().values().cloned().collect();
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// 投递给所有注册过的处理函数，模拟注销后仍在途的平台回调
    pub fn emit_stray(&self, event: RawScanEvent) {
        let handlers: Vec<_> = self.every_handler.lock().unwrap().clone();
        for handler in handlers {
            handler(event.clone());
        }
    }

    pub fn discover(&self, address: &str, name: Option<&str>) {
        self.emit(RawScanEvent::Discovered(addr(address), named(name)));
    }

    pub fn update(&self, address: &str, name: Option<&str>) {
        self.emit(RawScanEvent::Updated(addr(address), named(name)));
    }

    pub fn active_registrations(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_advertising(&self, reason: AdvertiseFailure) {
        let handler = self.failure_handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(reason);
        }
    }
}

#[async_trait::async_trait]
impl RadioCapability for FakeRadio {
    async fn supports_low_energy_radio(&self) -> bool {
        wait_on(&self.hold_checks).await;
        self.supported.load(Ordering::SeqCst)
    }

    async fn adapter(&self) -> Option<AdapterHandle> {
        self.has_adapter
            .load(Ordering::SeqCst)
            .then(|| AdapterHandle {
                index: 0,
                info: "fake0".to_string(),
            })
    }

    async fn is_powered(&self, _adapter: &AdapterHandle) -> bool {
        self.powered.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ScanEventSource for FakeRadio {
    async fn register(
        &self,
        _adapter: &AdapterHandle,
        filter: &ScanFilter,
        handler: RawEventHandler,
    ) -> Result<ScanRegistration, RadioError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        wait_on(&self.hold_register).await;
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(RadioError::Backend("registration failed".to_string()));
        }
        *self.last_filter.lock().unwrap() = Some(filter.clone());
        let registration =
            ScanRegistration(self.next_registration.fetch_add(1, Ordering::SeqCst));
        self.every_handler.lock().unwrap().push(handler.clone());
        self.handlers.lock().unwrap().insert(registration, handler);
        self.calls.lock().unwrap().push("register");
        Ok(registration)
    }

    async fn unregister(&self, registration: ScanRegistration) {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        wait_on(&self.hold_unregister).await;
        self.handlers.lock().unwrap().remove(&registration);
        self.calls.lock().unwrap().push("unregister");
    }
}

#[async_trait::async_trait]
impl Broadcaster for FakeRadio {
    async fn start_broadcast(
        &self,
        _adapter: &AdapterHandle,
        payload: &AdvertisePayload,
        on_failure: AdvertiseFailureHandler,
    ) -> Result<(), AdvertiseFailure> {
        if let Some(reason) = *self.reject_with.lock().unwrap() {
            return Err(reason);
        }
        self.broadcasts.lock().unwrap().push(payload.clone());
        *self.failure_handler.lock().unwrap() = Some(on_failure);
        Ok(())
    }

    async fn stop_broadcast(&self, _adapter: &AdapterHandle) {
        self.stop_broadcast_calls.fetch_add(1, Ordering::SeqCst);
    }
}

async fn wait_on(hold: &Mutex<Option<Arc<Notify>>>) {
    let gate = hold.lock().unwrap().clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

/// 轮询直到条件成立，最多等 1 秒
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub fn addr(s: &str) -> PeerAddress {
    PeerAddress::opaque(s)
}

pub fn named(name: Option<&str>) -> Observation {
    Observation {
        name: name.map(str::to_string),
        ..Observation::now()
    }
}

/// 记录所有回调的监听器
#[derive(Default)]
pub struct Recorder {
    pub seen: Mutex<Vec<(PeerRecord, bool)>>,
    pub failures: Mutex<Vec<ScanFailure>>,
    pub advertise_failures: Mutex<Vec<AdvertiseFailure>>,
    pub advertise_started: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<(PeerRecord, bool)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl PeerListener for Recorder {
    fn on_peer_observed(&self, record: &PeerRecord, is_new: bool) {
        self.seen.lock().unwrap().push((record.clone(), is_new));
    }

    fn on_scan_failed(&self, failure: ScanFailure) {
        self.failures.lock().unwrap().push(failure);
    }
}

impl AdvertiseObserver for Recorder {
    fn on_advertise_started(&self) {
        self.advertise_started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_advertise_failed(&self, reason: AdvertiseFailure) {
        self.advertise_failures.lock().unwrap().push(reason);
    }
}
