pub mod advertiser;
pub mod central;
pub mod mgmt_advertiser;
pub mod scanner;

use uuid::Uuid;

pub use advertiser::{AdvertiseObserver, AdvertisingSession};
pub use central::BtleplugRadio;
pub use mgmt_advertiser::MgmtBroadcaster;
pub use scanner::{PeerListener, ScanOptions, ScanPhase, ScanSession};

/// 默认广播/过滤的服务 UUID
pub const SCOUT_SERVICE_UUID: Uuid = Uuid::from_u128(0x735dc4fa_348e_11e7_a919_92ebcb67fe33);
