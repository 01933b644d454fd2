//! 平台边界接口
//!
//! 核心逻辑只依赖这里的 trait，具体实现见 [`crate::ble::central`]（btleplug）
//! 和 [`crate::ble::mgmt_advertiser`]（BlueZ MGMT）。

use crate::error::{AdvertiseFailure, RadioError, ScanFailure};
use crate::peer::{Observation, PeerAddress};
use std::sync::Arc;
use uuid::Uuid;

/// 平台适配器的句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterHandle {
    /// 适配器在平台上的索引 (hci0 = 0)
    pub index: u16,
    /// 平台给出的描述，如 `hci0 (usb:v1D6Bp0246d0540)`
    pub info: String,
}

/// 查询蓝牙硬件能力，本身无状态
#[async_trait::async_trait]
pub trait RadioCapability: Send + Sync {
    /// 平台是否支持 BLE 扫描/广播
    async fn supports_low_energy_radio(&self) -> bool;

    async fn adapter(&self) -> Option<AdapterHandle>;

    async fn is_powered(&self, adapter: &AdapterHandle) -> bool;

    /// 依次检查硬件、适配器、电源状态
    async fn ready_adapter(&self) -> Result<AdapterHandle, RadioError> {
        if !self.supports_low_energy_radio().await {
            return Err(RadioError::UnsupportedHardware);
        }
        let adapter = self.adapter().await.ok_or(RadioError::RadioUnavailable)?;
        if !self.is_powered(&adapter).await {
            return Err(RadioError::RadioDisabled);
        }
        Ok(adapter)
    }
}

/// 扫描所需权限
pub trait PermissionGate: Send + Sync {
    fn has_required_access(&self) -> bool;

    /// 请求权限，结果通过回调异步返回
    fn request_access(&self, on_result: Box<dyn FnOnce(bool) + Send>);
}

/// 固定结果的权限检查
#[derive(Debug, Clone, Copy)]
pub enum StaticPermissionGate {
    Granted,
    Denied,
    /// 需要以 root 运行（或具有等效能力）
    Privileged,
}

impl StaticPermissionGate {
    fn check(&self) -> bool {
        match self {
            StaticPermissionGate::Granted => true,
            StaticPermissionGate::Denied => false,
            // SAFETY: geteuid 没有前置条件
            StaticPermissionGate::Privileged => unsafe { libc::geteuid() == 0 },
        }
    }
}

impl PermissionGate for StaticPermissionGate {
    fn has_required_access(&self) -> bool {
        self.check()
    }

    fn request_access(&self, on_result: Box<dyn FnOnce(bool) + Send>) {
        // 无法在进程内提升权限，直接报告当前状态
        on_result(self.check());
    }
}

/// 平台扫描栈投递的原始事件
#[derive(Debug, Clone, PartialEq)]
pub enum RawScanEvent {
    /// 首次匹配
    Discovered(PeerAddress, Observation),
    /// 再次匹配（广播数据、RSSI 等更新）
    Updated(PeerAddress, Observation),
    /// 匹配丢失，只记录日志
    Lost(PeerAddress),
    BatchDiscovered(Vec<(PeerAddress, Observation)>),
    Failure(ScanFailure),
}

/// 原始事件处理函数，可能在平台线程上并发调用
pub type RawEventHandler = Arc<dyn Fn(RawScanEvent) + Send + Sync>;

/// 扫描过滤参数，原样交给平台
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub services: Vec<Uuid>,
}

/// 一次注册的凭证，注销时交回
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanRegistration(pub u64);

/// 原始扫描事件源，每个会话注册一个处理函数
#[async_trait::async_trait]
pub trait ScanEventSource: Send + Sync {
    async fn register(
        &self,
        adapter: &AdapterHandle,
        filter: &ScanFilter,
        handler: RawEventHandler,
    ) -> Result<ScanRegistration, RadioError>;

    /// 返回后不再调用该注册的处理函数
    async fn unregister(&self, registration: ScanRegistration);
}

/// 广播失败回调
pub type AdvertiseFailureHandler = Arc<dyn Fn(AdvertiseFailure) + Send + Sync>;

/// 待广播的负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisePayload {
    pub service_uuid: Uuid,
    pub local_name: String,
    pub connectable: bool,
}

/// 平台广播栈
#[async_trait::async_trait]
pub trait Broadcaster: Send + Sync {
    /// 开始广播，不设超时
    ///
    /// `Err` 表示平台同步拒绝，广播没有开始；之后的异步失败通过 `on_failure` 上报。
    async fn start_broadcast(
        &self,
        adapter: &AdapterHandle,
        payload: &AdvertisePayload,
        on_failure: AdvertiseFailureHandler,
    ) -> Result<(), AdvertiseFailure>;

    async fn stop_broadcast(&self, adapter: &AdapterHandle);
}
