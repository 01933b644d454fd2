//! 对端设备数据模型
//!
//! [`PeerRecord`] 是注册表中每个不同地址的唯一条目，
//! [`Observation`] 是一次原始发现事件携带的负载。

use crate::advertisement::{AdvertisementData, uuid_from_u16};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::{Instant, SystemTime};
use uuid::Uuid;

/// 对端地址，注册表的去重键
///
/// 通常是 `AA:BB:CC:DD:EE:FF` 形式的硬件地址（统一为大写）。
/// 部分平台（如 CoreBluetooth）不暴露硬件地址，此时使用 [`PeerAddress::opaque`]。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Bad address: {0}")]
pub struct AddressParseError(pub String);

impl PeerAddress {
    /// 解析 17 字符、冒号分隔的十六进制地址
    pub fn parse(s: &str) -> Result<Self, AddressParseError> {
        Self::to_bytes_str(s)
            .map(Self::from_bytes)
            .ok_or_else(|| AddressParseError(s.to_string()))
    }

    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let s = bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");
        PeerAddress(s)
    }

    /// 平台提供的不透明标识，不做格式校验
    pub fn opaque(id: impl Into<String>) -> Self {
        PeerAddress(id.into())
    }

    /// 转换回 6 字节地址，不透明标识返回 `None`
    pub fn to_bytes(&self) -> Option<[u8; 6]> {
        Self::to_bytes_str(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_bytes_str(s: &str) -> Option<[u8; 6]> {
        if s.len() != 17 {
            return None;
        }
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for slot in out.iter_mut() {
            let part = parts.next()?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            *slot = u8::from_str_radix(part, 16).ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(out)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<[u8; 6]> for PeerAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self::from_bytes(bytes)
    }
}

/// 一次发现事件的原始负载
///
/// 每次观测都整体替换上一次的负载，字段缺失时保持为空，不从历史观测中补齐。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// 显示名称（可能尚未解析）
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub tx_power: Option<i16>,
    /// 收到事件时的墙上时钟，仅用于显示
    pub timestamp: SystemTime,
    pub service_uuids: Vec<Uuid>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl Observation {
    /// 空负载，时间戳为当前时间
    pub fn now() -> Self {
        Self {
            name: None,
            rssi: None,
            tx_power: None,
            timestamp: SystemTime::now(),
            service_uuids: Vec::new(),
            service_data: HashMap::new(),
            manufacturer_data: HashMap::new(),
        }
    }

    /// 从解析后的扫描记录构建负载
    ///
    /// 完整名称优先，缺失时退回到短名称。
    pub fn from_advertisement(data: &AdvertisementData, rssi: Option<i16>) -> Self {
        Self {
            name: data
                .device_name
                .clone()
                .or_else(|| data.local_name_short.clone()),
            rssi,
            tx_power: data.tx_power_level.map(i16::from),
            service_uuids: data.service_uuids.clone(),
            service_data: data
                .service_data
                .iter()
                .map(|(id, bytes)| (uuid_from_u16(*id), bytes.clone()))
                .collect(),
            manufacturer_data: data.manufacturer_data.clone(),
            ..Self::now()
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unknown>")
    }
}

/// 注册表中的一个对端条目
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    /// 首次发现顺序，从 1 开始，分配后不变
    pub sequence_number: u64,
    pub address: PeerAddress,
    /// 观测次数，至少为 1
    pub occurrence_count: u64,
    pub last_observation: Observation,
    /// 最近一次观测的单调时间，仅用于排序
    pub observed_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::AdvertisementData;

    #[test]
    fn test_address_roundtrip() {
        let addr = PeerAddress::parse("aa:bb:cc:dd:ee:0f").unwrap();
        assert_eq!(addr.as_str(), "AA:BB:CC:DD:EE:0F");
        assert_eq!(
            addr.to_bytes(),
            Some([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x0F])
        );
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!(PeerAddress::parse("AA:BB:CC:DD:EE").is_err());
        assert!(PeerAddress::parse("AA-BB-CC-DD-EE-FF").is_err());
        assert!(PeerAddress::parse("AA:BB:CC:DD:EE:GG").is_err());
        assert!(PeerAddress::parse("AAA:B:CC:DD:EE:FF").is_err());
    }

    #[test]
    fn test_opaque_address() {
        let addr = PeerAddress::opaque("3F2504E0-4F89-11D3-9A0C-0305E82C3301");
        assert_eq!(addr.to_bytes(), None);
    }

    #[test]
    fn test_observation_from_advertisement() {
        // flags + short name "ab" + 16-bit service data 0x180F = [0x64]
        let raw = [
            0x02, 0x01, 0x06, //
            0x03, 0x08, b'a', b'b', //
            0x04, 0x16, 0x0F, 0x18, 0x64,
        ];
        let data = AdvertisementData::parse(&raw).unwrap();
        let obs = Observation::from_advertisement(&data, Some(-60));

        assert_eq!(obs.name.as_deref(), Some("ab"));
        assert_eq!(obs.rssi, Some(-60));
        assert_eq!(obs.service_data.get(&uuid_from_u16(0x180F)), Some(&vec![0x64]));
    }
}
