//! btleplug 平台实现
//!
//! [`BtleplugRadio`] 同时实现 [`RadioCapability`] 和 [`ScanEventSource`]：
//! 注册时在 tokio 任务里消费 `Central::events()`，把每个
//! `DeviceDiscovered` / `DeviceUpdated` 等事件转换为 [`RawScanEvent`]。
//!
//! btleplug 没有 "match lost" 事件，因此这里从不产生 `RawScanEvent::Lost`。

use crate::error::RadioError;
use crate::peer::{Observation, PeerAddress};
use crate::radio::{
    AdapterHandle, RadioCapability, RawEventHandler, RawScanEvent, ScanEventSource, ScanFilter,
    ScanRegistration,
};
use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, Manager as _, Peripheral as _,
    ScanFilter as PlatformScanFilter,
};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures_util::StreamExt;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinHandle;

struct ActiveScan {
    adapter: Adapter,
    task: JoinHandle<()>,
}

pub struct BtleplugRadio {
    manager: Option<Manager>,
    /// 以 hci 控制器编号标识的适配器，与 MGMT 使用的编号一致
    adapters: Vec<(AdapterHandle, Adapter)>,
    preferred: u16,
    scans: Mutex<HashMap<ScanRegistration, ActiveScan>>,
    next_registration: AtomicU64,
}

impl BtleplugRadio {
    /// 探测平台蓝牙栈，使用 hci0
    pub async fn new() -> Self {
        Self::with_controller(0).await
    }

    /// 探测平台蓝牙栈，使用指定编号的控制器 (hciN)
    ///
    /// 平台不可用时不会失败，之后的 `supports_low_energy_radio` 返回 `false`。
    pub async fn with_controller(preferred: u16) -> Self {
        let manager = match Manager::new().await {
            Ok(manager) => Some(manager),
            Err(e) => {
                warn!("Bluetooth manager unavailable: {}", e);
                None
            }
        };

        let platform = match &manager {
            Some(manager) => manager.adapters().await.unwrap_or_else(|e| {
                warn!("Failed to list Bluetooth adapters: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        let mut adapters = Vec::with_capacity(platform.len());
        for (position, adapter) in platform.into_iter().enumerate() {
            let info = adapter
                .adapter_info()
                .await
                .unwrap_or_else(|_| format!("adapter {}", position));
            let index = controller_index(&info).unwrap_or(position as u16);
            debug!("Adapter {} -> controller {}", info, index);
            adapters.push((AdapterHandle { index, info }, adapter));
        }
        debug!("Found {} Bluetooth adapter(s)", adapters.len());

        Self {
            manager,
            adapters,
            preferred,
            scans: Mutex::new(HashMap::new()),
            next_registration: AtomicU64::new(1),
        }
    }

    /// 所有适配器及其电源状态
    pub async fn describe_adapters(&self) -> Vec<(AdapterHandle, bool)> {
        let mut out = Vec::with_capacity(self.adapters.len());
        for (handle, _) in &self.adapters {
            let powered = self.is_powered(handle).await;
            out.push((handle.clone(), powered));
        }
        out
    }

    fn platform(&self, handle: &AdapterHandle) -> Option<&Adapter> {
        self.adapters
            .iter()
            .find(|(h, _)| h.index == handle.index)
            .map(|(_, adapter)| adapter)
    }
}

/// 从 BlueZ 的适配器描述 (`hci1 (usb:v1D6Bp0246d0540)`) 中取出控制器编号
fn controller_index(info: &str) -> Option<u16> {
    let name = info.split_whitespace().next()?;
    name.strip_prefix("hci")?.parse().ok()
}

#[async_trait::async_trait]
impl RadioCapability for BtleplugRadio {
    async fn supports_low_energy_radio(&self) -> bool {
        self.manager.is_some()
    }

    async fn adapter(&self) -> Option<AdapterHandle> {
        self.adapters
            .iter()
            .find(|(h, _)| h.index == self.preferred)
            .map(|(h, _)| h.clone())
    }

    async fn is_powered(&self, adapter: &AdapterHandle) -> bool {
        let Some(platform) = self.platform(adapter) else {
            return false;
        };
        match platform.adapter_state().await {
            // Unknown 时按已开启处理，由 start_scan 报告真实错误
            Ok(state) => !matches!(state, CentralState::PoweredOff),
            Err(e) => {
                warn!("Failed to query adapter state: {}", e);
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl ScanEventSource for BtleplugRadio {
    async fn register(
        &self,
        adapter: &AdapterHandle,
        filter: &ScanFilter,
        handler: RawEventHandler,
    ) -> Result<ScanRegistration, RadioError> {
        let platform = self
            .platform(adapter)
            .cloned()
            .ok_or(RadioError::RadioUnavailable)?;

        let mut events = platform
            .events()
            .await
            .map_err(|e| RadioError::Backend(e.to_string()))?;
        platform
            .start_scan(PlatformScanFilter {
                services: filter.services.clone(),
            })
            .await
            .map_err(|e| RadioError::Backend(e.to_string()))?;

        let task_adapter = platform.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) => {
                        if let Some((address, observation)) = observe(&task_adapter, &id).await {
                            handler(RawScanEvent::Discovered(address, observation));
                        }
                    }
                    CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. }
                    | CentralEvent::ServiceDataAdvertisement { id, .. }
                    | CentralEvent::ServicesAdvertisement { id, .. } => {
                        if let Some((address, observation)) = observe(&task_adapter, &id).await {
                            handler(RawScanEvent::Updated(address, observation));
                        }
                    }
                    other => trace!("Ignoring central event: {:?}", other),
                }
            }
            debug!("Central event stream closed");
        });

        let registration =
            ScanRegistration(self.next_registration.fetch_add(1, Ordering::SeqCst));
        self.scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                registration,
                ActiveScan {
                    adapter: platform,
                    task,
                },
            );
        info!("Platform scan registered ({:?})", registration);
        Ok(registration)
    }

    async fn unregister(&self, registration: ScanRegistration) {
        let scan = self
            .scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&registration);
        let Some(scan) = scan else {
            return;
        };

        scan.task.abort();
        if let Err(e) = scan.adapter.stop_scan().await {
            warn!("Failed to stop platform scan: {}", e);
        }
        debug!("Platform scan unregistered ({:?})", registration);
    }
}

/// 读取外设当前属性，构建一次观测
async fn observe(adapter: &Adapter, id: &PeripheralId) -> Option<(PeerAddress, Observation)> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let props = peripheral.properties().await.ok()??;

    // CoreBluetooth 不暴露硬件地址，退回到平台标识
    let address = if props.address == BDAddr::default() {
        PeerAddress::opaque(format!("{:?}", id))
    } else {
        PeerAddress::parse(&props.address.to_string())
            .unwrap_or_else(|_| PeerAddress::opaque(props.address.to_string()))
    };

    let observation = Observation {
        name: props.local_name,
        rssi: props.rssi,
        tx_power: props.tx_power_level,
        service_uuids: props.services,
        service_data: props.service_data,
        manufacturer_data: props.manufacturer_data,
        ..Observation::now()
    };
    Some((address, observation))
}
