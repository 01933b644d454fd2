//! 广播数据 (AD structures) 编解码
//!
//! 广播负载由若干 `[len, type, data...]` 结构组成，`len` 包含 type 字节，
//! `len == 0` 表示后续为填充。
//!
//! # Legacy 广播限制
//!
//! Legacy 广播数据和扫描响应各最多 31 字节。[`AdvertisementBuilder`]
//! 把服务 UUID 放进广播数据，把设备名称放进扫描响应，名称过长时截断为短名称。

use crate::error::AdvertiseFailure;
use log::trace;
use std::collections::HashMap;
use uuid::Uuid;

pub const TYPE_FLAGS: u8 = 0x01;
pub const TYPE_SERVICE_UUID_16_BIT_PARTIAL: u8 = 0x02;
pub const TYPE_SERVICE_UUID_16_BIT: u8 = 0x03;
pub const TYPE_SERVICE_UUID_128_BIT_PARTIAL: u8 = 0x06;
pub const TYPE_SERVICE_UUID_128_BIT: u8 = 0x07;
pub const TYPE_LOCAL_NAME_SHORT: u8 = 0x08;
pub const TYPE_LOCAL_NAME_COMPLETE: u8 = 0x09;
pub const TYPE_TX_POWER_LEVEL: u8 = 0x0A;
pub const TYPE_SERVICE_DATA_16_BIT: u8 = 0x16;
pub const TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// LE General Discoverable + BR/EDR Not Supported
pub const FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

/// Legacy 广播数据 / 扫描响应的最大长度
pub const LEGACY_ADV_MAX_LEN: usize = 31;

/// 蓝牙基准 UUID: 0000xxxx-0000-1000-8000-00805f9b34fb
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;
const BASE_UUID_MASK: u128 = u128::MAX ^ (0xFFFF_u128 << 96);

/// 16-bit UUID 转换为完整 UUID
pub fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((short as u128) << 96))
}

/// 完整 UUID 是否可以用 16-bit 形式表示
pub fn uuid_to_u16(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & BASE_UUID_MASK == BASE_UUID {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdParseError {
    #[error("AD structure at offset {offset} runs past end of data")]
    Truncated { offset: usize },

    #[error("Bad length {len} for AD type 0x{ad_type:02x}")]
    BadLength { ad_type: u8, len: usize },
}

/// 解析后的广播数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvertisementData {
    /// 有效负载长度（不含尾部填充）
    pub payload_size: usize,
    pub flags: Option<u8>,
    pub service_uuids: Vec<Uuid>,
    pub local_name_short: Option<String>,
    pub device_name: Option<String>,
    pub tx_power_level: Option<i8>,
    pub service_data: HashMap<u16, Vec<u8>>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl AdvertisementData {
    pub fn parse(data: &[u8]) -> Result<Self, AdParseError> {
        let mut parsed = AdvertisementData::default();
        let mut index = 0;

        while index < data.len() {
            let len = data[index] as usize;
            if len == 0 {
                break;
            }
            let end = index + 1 + len;
            if end > data.len() {
                return Err(AdParseError::Truncated { offset: index });
            }
            let ad_type = data[index + 1];
            parsed.process(ad_type, &data[index + 2..end])?;

            index = end;
            parsed.payload_size = index;
        }

        trace!(
            "Parsed AD payload: {} bytes, {} service UUIDs",
            parsed.payload_size,
            parsed.service_uuids.len()
        );
        Ok(parsed)
    }

    fn process(&mut self, ad_type: u8, field: &[u8]) -> Result<(), AdParseError> {
        let bad_length = || AdParseError::BadLength {
            ad_type,
            len: field.len(),
        };

        match ad_type {
            TYPE_FLAGS => {
                if field.len() != 1 {
                    return Err(bad_length());
                }
                self.flags = Some(field[0]);
            }
            TYPE_SERVICE_UUID_16_BIT | TYPE_SERVICE_UUID_16_BIT_PARTIAL => {
                if field.len() % 2 != 0 {
                    return Err(bad_length());
                }
                self.service_uuids.extend(
                    field
                        .chunks_exact(2)
                        .map(|c| uuid_from_u16(u16::from_le_bytes([c[0], c[1]]))),
                );
            }
            TYPE_SERVICE_UUID_128_BIT | TYPE_SERVICE_UUID_128_BIT_PARTIAL => {
                if field.len() % 16 != 0 {
                    return Err(bad_length());
                }
                for chunk in field.chunks_exact(16) {
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(chunk);
                    bytes.reverse();
                    self.service_uuids.push(Uuid::from_bytes(bytes));
                }
            }
            TYPE_LOCAL_NAME_SHORT => {
                self.local_name_short = Some(String::from_utf8_lossy(field).into_owned());
            }
            TYPE_LOCAL_NAME_COMPLETE => {
                self.device_name = Some(String::from_utf8_lossy(field).into_owned());
            }
            TYPE_TX_POWER_LEVEL => {
                if field.len() != 1 {
                    return Err(bad_length());
                }
                self.tx_power_level = Some(field[0] as i8);
            }
            TYPE_SERVICE_DATA_16_BIT => {
                // 只有 UUID、没有数据也是合法的
                if field.len() < 2 {
                    return Err(bad_length());
                }
                let id = u16::from_le_bytes([field[0], field[1]]);
                self.service_data.insert(id, field[2..].to_vec());
            }
            TYPE_MANUFACTURER_DATA => {
                if field.len() < 2 {
                    return Err(bad_length());
                }
                let vendor = u16::from_le_bytes([field[0], field[1]]);
                self.manufacturer_data.insert(vendor, field[2..].to_vec());
            }
            other => {
                trace!("Skipping AD type 0x{:02x} ({} bytes)", other, field.len());
            }
        }
        Ok(())
    }
}

/// 编码后的 Legacy 广播负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyAdvertisement {
    pub adv_data: Vec<u8>,
    pub scan_rsp: Vec<u8>,
}

/// 构建 Legacy 广播数据
#[derive(Debug, Clone, Default)]
pub struct AdvertisementBuilder {
    flags: Option<u8>,
    service_uuid: Option<Uuid>,
    service_data: Option<(u16, Vec<u8>)>,
    local_name: Option<String>,
    /// 由控制器追加到广播数据中的字节数
    reserved: usize,
}

impl AdvertisementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = Some(uuid);
        self
    }

    pub fn service_data(mut self, uuid16: u16, data: Vec<u8>) -> Self {
        self.service_data = Some((uuid16, data));
        self
    }

    pub fn local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// 内核会自动追加 Flags 字段 (3 字节)，广播数据里不能再放 flags
    pub fn reserve_flags_field(mut self) -> Self {
        self.flags = None;
        self.reserved = 3;
        self
    }

    /// 编码为广播数据 + 扫描响应
    ///
    /// 广播数据超过 31 字节时返回 [`AdvertiseFailure::DataTooLarge`]；
    /// 名称会被截断以放入扫描响应。
    pub fn build(&self) -> Result<LegacyAdvertisement, AdvertiseFailure> {
        let mut adv_data = Vec::with_capacity(LEGACY_ADV_MAX_LEN);

        if let Some(flags) = self.flags {
            adv_data.extend_from_slice(&[2, TYPE_FLAGS, flags]);
        }

        if let Some(uuid) = &self.service_uuid {
            match uuid_to_u16(uuid) {
                Some(short) => {
                    adv_data.extend_from_slice(&[3, TYPE_SERVICE_UUID_16_BIT]);
                    adv_data.extend_from_slice(&short.to_le_bytes());
                }
                None => {
                    let mut bytes = *uuid.as_bytes();
                    bytes.reverse();
                    adv_data.extend_from_slice(&[17, TYPE_SERVICE_UUID_128_BIT]);
                    adv_data.extend_from_slice(&bytes);
                }
            }
        }

        if let Some((id, data)) = &self.service_data {
            adv_data.push((3 + data.len()) as u8);
            adv_data.push(TYPE_SERVICE_DATA_16_BIT);
            adv_data.extend_from_slice(&id.to_le_bytes());
            adv_data.extend_from_slice(data);
        }

        if adv_data.len() + self.reserved > LEGACY_ADV_MAX_LEN {
            return Err(AdvertiseFailure::DataTooLarge);
        }

        let mut scan_rsp = Vec::with_capacity(LEGACY_ADV_MAX_LEN);
        if let Some(name) = self.local_name.as_deref().filter(|n| !n.is_empty()) {
            let max_name_len = LEGACY_ADV_MAX_LEN - 2;
            let (bytes, ad_type) = if name.len() > max_name_len {
                (truncate_utf8(name, max_name_len), TYPE_LOCAL_NAME_SHORT)
            } else {
                (name.as_bytes(), TYPE_LOCAL_NAME_COMPLETE)
            };
            scan_rsp.push((1 + bytes.len()) as u8);
            scan_rsp.push(ad_type);
            scan_rsp.extend_from_slice(bytes);
        }

        trace!("Adv data: {:02x?}", adv_data);
        trace!("Scan rsp: {:02x?}", scan_rsp);

        Ok(LegacyAdvertisement { adv_data, scan_rsp })
    }
}

fn truncate_utf8(s: &str, max: usize) -> &[u8] {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s.as_bytes()[..end]
}
