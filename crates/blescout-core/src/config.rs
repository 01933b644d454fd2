//! 应用配置和持久化
//!
//! 提供设备名称、广播服务、扫描选项等设置的存储和读取。

use crate::ble::{SCOUT_SERVICE_UUID, ScanOptions};
use crate::logging::LogLevel;
use crate::radio::AdvertisePayload;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutSettings {
    /// 广播时使用的设备名称
    pub device_name: String,
    /// 广播的服务 UUID
    pub service_uuid: Uuid,
    /// 扫描超时（秒），不设置则一直扫描
    pub scan_timeout_secs: Option<u64>,
    /// 只显示有名称的设备
    pub only_named_devices: bool,
    /// 交给平台的服务过滤
    pub service_filter: Vec<Uuid>,
    /// 详细扫描日志
    pub scan_log: bool,
    pub log_level: LogLevel,
    /// 适配器索引 (hci0 = 0)
    pub controller_index: u16,
    /// 广播是否可连接
    pub connectable: bool,
}

impl Default for ScoutSettings {
    fn default() -> Self {
        Self {
            device_name: get_default_device_name(),
            service_uuid: SCOUT_SERVICE_UUID,
            scan_timeout_secs: Some(10),
            only_named_devices: false,
            service_filter: Vec::new(),
            scan_log: false,
            log_level: LogLevel::Info,
            controller_index: 0,
            connectable: false,
        }
    }
}

impl ScoutSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blescout");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            timeout: self.scan_timeout_secs.map(Duration::from_secs),
            only_named_devices: self.only_named_devices,
            service_filter: self.service_filter.clone(),
            scan_log: self.scan_log,
        }
    }

    pub fn advertise_payload(&self) -> AdvertisePayload {
        AdvertisePayload {
            service_uuid: self.service_uuid,
            local_name: self.device_name.clone(),
            connectable: self.connectable,
        }
    }
}

/// 获取默认设备名称（主机名）
fn get_default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "blescout".to_string())
}
