//! BLE Scanner - 扫描会话状态机
//!
//! 状态: `Idle → Starting → Active → Idle`（停止或启动失败时回到 Idle）。
//!
//! # 会话代号
//!
//! 每次 `start` 都会递增会话代号 (generation)。注册到平台的事件处理函数
//! 持有启动时的代号，事件到达时先检查代号和阶段，不匹配的事件直接丢弃。
//! 这样 `stop` 返回后，即使平台线程上还有在途事件，也不会再修改注册表。
//!
//! 每次启动都会创建新的 [`DiscoveryRegistry`]，序号从 1 重新开始。
//!
//! # 启动与停止
//!
//! 平台注册和注销由同一把异步锁串行化：`stop` 在注销完成前不会释放，
//! 新的 `start` 必须等它完成才能注册。检查阶段 (`Starting`) 调用 `stop`
//! 会作废这次启动，`start` 不再注册并返回 `Ok(())`。

use crate::error::{RadioError, ScanFailure};
use crate::peer::{Observation, PeerAddress, PeerRecord};
use crate::radio::{
    AdapterHandle, PermissionGate, RadioCapability, RawEventHandler, RawScanEvent, ScanEventSource, ScanFilter,
    ScanRegistration,
};
use crate::registry::DiscoveryRegistry;
use log::{Level, debug, info, log, trace, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// 扫描监听器，在事件投递线程上同步调用
pub trait PeerListener: Send + Sync {
    fn on_peer_observed(&self, record: &PeerRecord, is_new: bool);

    /// 平台上报扫描失败，会话状态不变
    fn on_scan_failed(&self, failure: ScanFailure) {
        warn!("Scan failed: {}", failure);
    }
}

impl<F> PeerListener for F
where
    F: Fn(&PeerRecord, bool) + Send + Sync,
{
    fn on_peer_observed(&self, record: &PeerRecord, is_new: bool) {
        self(record, is_new)
    }
}

/// 扫描选项
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 超时后自动停止，`None` 表示一直扫描
    pub timeout: Option<Duration>,
    /// 跳过没有名称的设备
    pub only_named_devices: bool,
    /// 原样交给平台的服务过滤
    pub service_filter: Vec<Uuid>,
    /// 以 debug 级别记录每个原始事件
    pub scan_log: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Starting,
    Active,
}

struct SessionState {
    phase: ScanPhase,
    generation: u64,
    registry: Option<Arc<DiscoveryRegistry>>,
    listener: Option<Arc<dyn PeerListener>>,
    registration: Option<ScanRegistration>,
    timer: Option<JoinHandle<()>>,
}

impl SessionState {
    fn is_current(&self, generation: u64) -> bool {
        self.phase == ScanPhase::Active && self.generation == generation
    }

    fn is_starting(&self, generation: u64) -> bool {
        self.phase == ScanPhase::Starting && self.generation == generation
    }
}

struct SessionInner {
    radio: Arc<dyn RadioCapability>,
    permissions: Arc<dyn PermissionGate>,
    source: Arc<dyn ScanEventSource>,
    options: ScanOptions,
    state: Mutex<SessionState>,
    /// 串行化平台注册/注销
    lifecycle: tokio::sync::Mutex<()>,
}

/// 扫描会话
///
/// 克隆得到的是同一个会话的句柄。
#[derive(Clone)]
pub struct ScanSession {
    inner: Arc<SessionInner>,
}

impl ScanSession {
    pub fn new(
        radio: Arc<dyn RadioCapability>,
        permissions: Arc<dyn PermissionGate>,
        source: Arc<dyn ScanEventSource>,
        options: ScanOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                radio,
                permissions,
                source,
                options,
                state: Mutex::new(SessionState {
                    phase: ScanPhase::Idle,
                    generation: 0,
                    registry: None,
                    listener: None,
                    registration: None,
                    timer: None,
                }),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// 开始扫描
    ///
    /// 已在扫描时返回 [`RadioError::AlreadyActive`]，现有会话和监听器不受影响。
    /// 检查期间被 `stop` 取消时返回 `Ok(())`，会话保持 Idle。
    pub async fn start(&self, listener: Arc<dyn PeerListener>) -> Result<(), RadioError> {
        let generation = {
            let mut state = self.inner.lock();
            if state.phase != ScanPhase::Idle {
                warn!("Scanning was already started");
                return Err(RadioError::AlreadyActive);
            }
            state.phase = ScanPhase::Starting;
            state.generation += 1;
            state.generation
        };

        debug!("Start scanning (generation {})", generation);
        let result = self.inner.activate(generation, listener).await;
        if let Err(e) = &result {
            warn!("Failed to start scanning: {}", e);
        }
        result
    }

    /// 停止扫描，未在扫描时什么也不做
    pub async fn stop(&self) {
        self.inner.stop(None, true).await;
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().phase == ScanPhase::Active
    }

    pub fn phase(&self) -> ScanPhase {
        self.inner.lock().phase
    }

    /// 当前会话发现的对端，最近观测的在前
    ///
    /// 停止后保留最后一次会话的结果，从未启动时为空。
    pub fn current_peers(&self) -> Vec<PeerRecord> {
        let registry = self.inner.lock().registry.clone();
        registry.map(|r| r.snapshot()).unwrap_or_default()
    }
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn activate(
        self: &Arc<Self>,
        generation: u64,
        listener: Arc<dyn PeerListener>,
    ) -> Result<(), RadioError> {
        let adapter = match self.checked_adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                self.abandon_start(generation);
                return Err(e);
            }
        };

        // 等待上一次 stop 的注销完成，平台扫描的开关不能交错
        let _lifecycle = self.lifecycle.lock().await;

        let registry = Arc::new(DiscoveryRegistry::new());
        registry.reset();

        let previous = {
            let mut state = self.lock();
            if !state.is_starting(generation) {
                debug!("Scan start cancelled (generation {})", generation);
                return Ok(());
            }
            state.phase = ScanPhase::Active;
            state.listener = Some(listener);
            state.registry.replace(registry)
        };

        let filter = ScanFilter {
            services: self.options.service_filter.clone(),
        };
        debug!("Scan filters: {:?}", filter);
        let handler = Self::event_handler(Arc::downgrade(self), generation);

        let registration = match self.source.register(&adapter, &filter, handler).await {
            Ok(registration) => registration,
            Err(e) => {
                let mut state = self.lock();
                state.phase = ScanPhase::Idle;
                state.listener = None;
                state.registry = previous;
                return Err(e);
            }
        };

        {
            let mut state = self.lock();
            state.registration = Some(registration);
            if let Some(timeout) = self.options.timeout {
                state.timer = Some(self.spawn_timer(generation, timeout));
            }
        }
        info!(
            "BLE scan started on adapter {} ({})",
            adapter.index, adapter.info
        );
        Ok(())
    }

    /// 依次检查硬件、适配器、电源状态和权限
    async fn checked_adapter(&self) -> Result<AdapterHandle, RadioError> {
        let adapter = self.radio.ready_adapter().await?;
        if !self.permissions.has_required_access() {
            warn!("No scan permissions");
            return Err(RadioError::PermissionDenied);
        }
        Ok(adapter)
    }

    /// 启动检查失败，未被取消时回到 Idle
    fn abandon_start(&self, generation: u64) {
        let mut state = self.lock();
        if state.is_starting(generation) {
            state.phase = ScanPhase::Idle;
        }
    }

    fn spawn_timer(self: &Arc<Self>, generation: u64, timeout: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                debug!("Scan timeout of {:?} elapsed", timeout);
                inner.stop(Some(generation), false).await;
            }
        })
    }

    async fn stop(&self, expected_generation: Option<u64>, abort_timer: bool) {
        // 注销完成前持有，之后的 start 才能重新注册
        let _lifecycle = self.lifecycle.lock().await;

        let (registration, timer) = {
            let mut state = self.lock();
            if expected_generation.is_some_and(|g| g != state.generation) {
                return;
            }
            match state.phase {
                ScanPhase::Idle => {
                    trace!("Stop requested while idle, ignoring");
                    return;
                }
                ScanPhase::Starting => {
                    // 作废正在检查的 start
                    state.generation += 1;
                    state.phase = ScanPhase::Idle;
                    debug!("Scan stopped before it became active");
                    return;
                }
                ScanPhase::Active => {}
            }
            state.phase = ScanPhase::Idle;
            state.listener = None;
            (state.registration.take(), state.timer.take())
        };

        if let Some(timer) = timer {
            if abort_timer {
                timer.abort();
            }
        }
        if let Some(registration) = registration {
            self.source.unregister(registration).await;
        }

        let total = self.lock().registry.as_ref().map_or(0, |r| r.len());
        info!("Scan stopped: found {} device(s)", total);
    }

    fn event_handler(weak: Weak<Self>, generation: u64) -> RawEventHandler {
        Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_raw_event(generation, event);
            }
        })
    }

    fn on_raw_event(&self, generation: u64, event: RawScanEvent) {
        match event {
            RawScanEvent::Discovered(address, observation) => {
                self.on_peers(generation, "first match", vec![(address, observation)]);
            }
            RawScanEvent::Updated(address, observation) => {
                self.on_peers(generation, "all match", vec![(address, observation)]);
            }
            RawScanEvent::BatchDiscovered(results) => {
                debug!("Batch scan results: {}", results.len());
                self.on_peers(generation, "batch", results);
            }
            RawScanEvent::Lost(address) => {
                log!(self.scan_log_level(), "[match lost] address: {}", address);
            }
            RawScanEvent::Failure(failure) => {
                let listener = {
                    let state = self.lock();
                    if !state.is_current(generation) {
                        return;
                    }
                    state.listener.clone()
                };
                debug!("Forwarding scan failure {} to listener", failure.code());
                if let Some(listener) = listener {
                    listener.on_scan_failed(failure);
                }
            }
        }
    }

    fn on_peers(&self, generation: u64, tag: &str, results: Vec<(PeerAddress, Observation)>) {
        let level = self.scan_log_level();
        let mut notifications = Vec::with_capacity(results.len());

        // 在会话锁内写入注册表，stop() 返回前在途事件必须完成或被丢弃
        let listener = {
            let state = self.lock();
            if !state.is_current(generation) {
                trace!("Dropping {} stale event(s) from generation {}", results.len(), generation);
                return;
            }
            let (Some(registry), Some(listener)) = (&state.registry, &state.listener) else {
                return;
            };

            for (address, observation) in results {
                log!(
                    level,
                    "[{}] rssi: {:?}, address: {}, name: [{}]",
                    tag,
                    observation.rssi,
                    address,
                    observation.display_name()
                );
                if self.options.only_named_devices && observation.name.is_none() {
                    continue;
                }
                notifications.push(registry.ingest(address, observation));
            }
            log!(level, "Total scan results: {}", registry.len());
            listener.clone()
        };

        for (record, is_new) in &notifications {
            listener.on_peer_observed(record, *is_new);
        }
    }

    fn scan_log_level(&self) -> Level {
        if self.options.scan_log {
            Level::Debug
        } else {
            Level::Trace
        }
    }
}
