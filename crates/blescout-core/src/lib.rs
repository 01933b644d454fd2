//! blescout Core Library
//!
//! 发现附近的 BLE 设备并维护一个去重、按新鲜度排序的设备列表，
//! 同时支持广播本机存在。
//!
//! # 模块
//!
//! - **registry**: 发现注册表，按地址去重并计数
//! - **ble**: 扫描会话、广播会话，以及 btleplug / BlueZ MGMT 平台实现
//! - **radio**: 平台边界接口（硬件能力、权限、原始事件源、广播栈）
//! - **advertisement**: 广播数据 (AD structures) 编解码
//! - **config**: 设置持久化
//!
//! # 使用示例
//!
//! ```ignore
//! use blescout_core::{BtleplugRadio, PeerRecord, ScanOptions, ScanSession, StaticPermissionGate};
//! use std::sync::Arc;
//!
//! let radio = Arc::new(BtleplugRadio::new().await);
//! let session = ScanSession::new(
//!     radio.clone(),
//!     Arc::new(StaticPermissionGate::Granted),
//!     radio,
//!     ScanOptions::default(),
//! );
//!
//! session
//!     .start(Arc::new(|record: &PeerRecord, is_new: bool| {
//!         println!("{} {}", record.address, is_new);
//!     }))
//!     .await?;
//!
//! // ...
//! session.stop().await;
//! let peers = session.current_peers();
//! ```

pub mod advertisement;
pub mod ble;
pub mod config;
pub mod error;
pub mod logging;
pub mod peer;
pub mod radio;
pub mod registry;

pub use advertisement::{AdvertisementBuilder, AdvertisementData};
pub use ble::{
    AdvertiseObserver, AdvertisingSession, BtleplugRadio, MgmtBroadcaster, PeerListener,
    SCOUT_SERVICE_UUID, ScanOptions, ScanPhase, ScanSession,
};
pub use config::ScoutSettings;
pub use error::{AdvertiseFailure, RadioError, ScanFailure};
pub use peer::{Observation, PeerAddress, PeerRecord};
pub use radio::{
    AdapterHandle, AdvertisePayload, Broadcaster, PermissionGate, RadioCapability, RawScanEvent,
    ScanEventSource, StaticPermissionGate,
};
pub use registry::DiscoveryRegistry;
