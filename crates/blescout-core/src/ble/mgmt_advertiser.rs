//! Legacy BLE Advertising via BlueZ MGMT API
//!
//! 直接使用 BlueZ Management Socket 发送 Legacy Advertising。
//! btleplug 只支持 Central 角色，广播走这条路径。
//!
//! 通过不设置 `SecondaryChannelWithLe*` 标志，强制使用 Legacy 模式（31 字节限制）。
//!
//! # 权限要求
//!
//! 需要 `CAP_NET_ADMIN` 权限：
//! ```bash
//! sudo setcap 'cap_net_admin+eip' your_binary
//! ```

use crate::advertisement::AdvertisementBuilder;
use crate::error::AdvertiseFailure;
use crate::radio::{AdapterHandle, AdvertiseFailureHandler, AdvertisePayload, Broadcaster};
use btmgmt::Client;
use btmgmt::command::{AddAdvertising, RemoveAdvertising};
use btmgmt::packet::{AdvDataScanResp, AdvertiseInstance, AdvertisingFlag};
use log::{debug, error, info};
use tokio::sync::Mutex;

/// 默认广播实例 ID (1-255)
pub const DEFAULT_INSTANCE: u8 = 1;

/// MGMT Legacy 广播器
pub struct MgmtBroadcaster {
    /// 首次使用时打开
    client: Mutex<Option<Client>>,
    instance: u8,
}

impl MgmtBroadcaster {
    pub fn new() -> Self {
        Self::with_instance(DEFAULT_INSTANCE)
    }

    pub fn with_instance(instance: u8) -> Self {
        Self {
            client: Mutex::new(None),
            instance,
        }
    }

    fn flags(payload: &AdvertisePayload) -> AdvertisingFlag {
        let mut flags = AdvertisingFlag::AdvertiseAsDiscoverable;
        if payload.connectable {
            flags |= AdvertisingFlag::SwitchIntoConnectableMode;
        }
        flags | AdvertisingFlag::AddFlagsFieldToAdvData
    }
}

impl Default for MgmtBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Broadcaster for MgmtBroadcaster {
    /// MGMT 命令的结果都是同步返回的，`on_failure` 不会被调用
    async fn start_broadcast(
        &self,
        adapter: &AdapterHandle,
        payload: &AdvertisePayload,
        _on_failure: AdvertiseFailureHandler,
    ) -> Result<(), AdvertiseFailure> {
        let encoded = AdvertisementBuilder::new()
            .service_uuid(payload.service_uuid)
            .local_name(payload.local_name.clone())
            .reserve_flags_field()
            .build()?;
        debug!(
            "Legacy adv payload: adv_data={} bytes, scan_rsp={} bytes",
            encoded.adv_data.len(),
            encoded.scan_rsp.len()
        );

        let mut guard = self.client.lock().await;
        if guard.is_none() {
            debug!("Opening MGMT socket...");
            let client = Client::open().map_err(|e| {
                error!("Failed to open MGMT socket: {}", e);
                AdvertiseFailure::FeatureUnsupported
            })?;
            *guard = Some(client);
        }
        let Some(client) = guard.as_ref() else {
            return Err(AdvertiseFailure::InternalError);
        };

        let flags = Self::flags(payload);
        debug!(
            "Starting Legacy advertising with flags: {:?} (bits: 0x{:08x})",
            flags,
            flags.bits()
        );

        // duration = 0, timeout = 0: 一直广播直到被移除
        let cmd = AddAdvertising::new(
            AdvertiseInstance::new(self.instance),
            flags,
            0,
            0,
            AdvDataScanResp::new(encoded.adv_data, encoded.scan_rsp),
        );

        let reply = client.call(Some(adapter.index), cmd).await.map_err(|e| {
            error!("AddAdvertising rejected: {}", e);
            AdvertiseFailure::InternalError
        })?;

        info!(
            "Legacy advertising started: instance={}, reply={:?}",
            self.instance, reply
        );
        Ok(())
    }

    async fn stop_broadcast(&self, adapter: &AdapterHandle) {
        let guard = self.client.lock().await;
        let Some(client) = guard.as_ref() else {
            return;
        };

        let cmd = RemoveAdvertising::new(AdvertiseInstance::new(self.instance));
        match client.call(Some(adapter.index), cmd).await {
            Ok(_) => info!("Advertising instance {} removed", self.instance),
            Err(e) => error!("Failed to remove advertising: {}", e),
        }
    }
}
