use crate::error::{AdvertiseFailure, RadioError};
use crate::radio::{AdapterHandle, AdvertisePayload, Broadcaster, RadioCapability};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// 广播状态回调
pub trait AdvertiseObserver: Send + Sync {
    fn on_advertise_started(&self) {}

    /// 平台异步上报的广播失败，不会自动清除广播标志
    fn on_advertise_failed(&self, reason: AdvertiseFailure);
}

impl<F> AdvertiseObserver for F
where
    F: Fn(AdvertiseFailure) + Send + Sync,
{
    fn on_advertise_failed(&self, reason: AdvertiseFailure) {
        self(reason)
    }
}

/// 广播本机存在
///
/// 同一个会话同时只有一个广播；重复 `start` 返回 [`RadioError::AlreadyActive`]，
/// 现有广播继续运行。
pub struct AdvertisingSession {
    radio: Arc<dyn RadioCapability>,
    broadcaster: Arc<dyn Broadcaster>,
    local_name: String,
    connectable: bool,
    /// 正在广播的适配器，start/stop 互斥
    active: Mutex<Option<AdapterHandle>>,
    advertising: AtomicBool,
}

impl AdvertisingSession {
    pub fn new(
        radio: Arc<dyn RadioCapability>,
        broadcaster: Arc<dyn Broadcaster>,
        local_name: impl Into<String>,
    ) -> Self {
        Self {
            radio,
            broadcaster,
            local_name: local_name.into(),
            connectable: false,
            active: Mutex::new(None),
            advertising: AtomicBool::new(false),
        }
    }

    pub fn connectable(mut self, connectable: bool) -> Self {
        self.connectable = connectable;
        self
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    /// 开始广播服务 UUID 和本机名称，不设超时
    pub async fn start(
        &self,
        service_uuid: Uuid,
        observer: Option<Arc<dyn AdvertiseObserver>>,
    ) -> Result<(), RadioError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            warn!("Advertising was already started");
            return Err(RadioError::AlreadyActive);
        }

        let adapter = self.radio.ready_adapter().await?;

        let payload = AdvertisePayload {
            service_uuid,
            local_name: self.local_name.clone(),
            connectable: self.connectable,
        };
        debug!("Start advertising: {:?}", payload);

        let failure_observer = observer.clone();
        let on_failure = Arc::new(move |reason: AdvertiseFailure| {
            warn!("Advertising failed: {}", reason);
            if let Some(observer) = &failure_observer {
                observer.on_advertise_failed(reason);
            }
        });

        if let Err(reason) = self
            .broadcaster
            .start_broadcast(&adapter, &payload, on_failure)
            .await
        {
            warn!("Advertising rejected: {}", reason);
            return Err(reason.into());
        }

        *active = Some(adapter);
        self.advertising.store(true, Ordering::SeqCst);
        drop(active);

        info!("Advertising started: service={}", service_uuid);
        if let Some(observer) = observer {
            observer.on_advertise_started();
        }
        Ok(())
    }

    /// 停止广播，未广播时什么也不做
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(adapter) = active.take() else {
            debug!("No advertising started");
            return;
        };

        self.broadcaster.stop_broadcast(&adapter).await;
        self.advertising.store(false, Ordering::SeqCst);
        info!("Advertising stopped");
    }
}
