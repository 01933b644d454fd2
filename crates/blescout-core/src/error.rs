//! 错误类型
//!
//! - [`RadioError`]: `start` 同步返回的错误
//! - [`ScanFailure`]: 扫描过程中由平台异步上报的失败
//! - [`AdvertiseFailure`]: 广播过程中由平台异步上报的失败

use std::fmt;

/// `ScanSession::start` / `AdvertisingSession::start` 的同步错误
///
/// 这些错误都不是致命的，调用方解决原因（开启蓝牙、授予权限）后可以重试。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    #[error("This device doesn't support Bluetooth LE")]
    UnsupportedHardware,

    #[error("Failed to get Bluetooth adapter")]
    RadioUnavailable,

    #[error("Bluetooth not enabled")]
    RadioDisabled,

    #[error("Missing permissions required for scanning")]
    PermissionDenied,

    /// 会话已在运行，现有会话不受影响
    #[error("Session already active")]
    AlreadyActive,

    /// 平台调用本身失败（注册扫描回调、发送 MGMT 命令等）
    #[error("Radio backend error: {0}")]
    Backend(String),

    /// 平台同步拒绝了广播请求
    #[error("Advertising rejected: {0}")]
    Advertise(AdvertiseFailure),
}

impl From<AdvertiseFailure> for RadioError {
    fn from(reason: AdvertiseFailure) -> Self {
        RadioError::Advertise(reason)
    }
}

/// 扫描失败码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    AlreadyStarted,
    RegistrationFailed,
    InternalError,
    FeatureUnsupported,
    OutOfHardwareResources,
    ScanningTooFrequently,
    Unknown(i32),
}

impl ScanFailure {
    /// 从平台错误码创建
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ScanFailure::AlreadyStarted,
            2 => ScanFailure::RegistrationFailed,
            3 => ScanFailure::InternalError,
            4 => ScanFailure::FeatureUnsupported,
            5 => ScanFailure::OutOfHardwareResources,
            6 => ScanFailure::ScanningTooFrequently,
            other => ScanFailure::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ScanFailure::AlreadyStarted => 1,
            ScanFailure::RegistrationFailed => 2,
            ScanFailure::InternalError => 3,
            ScanFailure::FeatureUnsupported => 4,
            ScanFailure::OutOfHardwareResources => 5,
            ScanFailure::ScanningTooFrequently => 6,
            ScanFailure::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanFailure::AlreadyStarted => write!(f, "ALREADY_STARTED"),
            ScanFailure::RegistrationFailed => write!(f, "APPLICATION_REGISTRATION_FAILED"),
            ScanFailure::InternalError => write!(f, "INTERNAL_ERROR"),
            ScanFailure::FeatureUnsupported => write!(f, "FEATURE_UNSUPPORTED"),
            ScanFailure::OutOfHardwareResources => write!(f, "OUT_OF_HARDWARE_RESOURCES"),
            ScanFailure::ScanningTooFrequently => write!(f, "SCANNING_TOO_FREQUENTLY"),
            ScanFailure::Unknown(code) => write!(f, "UNKNOWN_ERROR-[{}]", code),
        }
    }
}

/// 广播失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseFailure {
    DataTooLarge,
    TooManyAdvertisers,
    AlreadyStarted,
    InternalError,
    FeatureUnsupported,
    Unknown(i32),
}

impl AdvertiseFailure {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => AdvertiseFailure::DataTooLarge,
            2 => AdvertiseFailure::TooManyAdvertisers,
            3 => AdvertiseFailure::AlreadyStarted,
            4 => AdvertiseFailure::InternalError,
            5 => AdvertiseFailure::FeatureUnsupported,
            other => AdvertiseFailure::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AdvertiseFailure::DataTooLarge => 1,
            AdvertiseFailure::TooManyAdvertisers => 2,
            AdvertiseFailure::AlreadyStarted => 3,
            AdvertiseFailure::InternalError => 4,
            AdvertiseFailure::FeatureUnsupported => 5,
            AdvertiseFailure::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for AdvertiseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertiseFailure::DataTooLarge => write!(f, "DATA_TOO_LARGE"),
            AdvertiseFailure::TooManyAdvertisers => write!(f, "TOO_MANY_ADVERTISERS"),
            AdvertiseFailure::AlreadyStarted => write!(f, "ALREADY_STARTED"),
            AdvertiseFailure::InternalError => write!(f, "INTERNAL_ERROR"),
            AdvertiseFailure::FeatureUnsupported => write!(f, "FEATURE_UNSUPPORTED"),
            AdvertiseFailure::Unknown(_) => write!(f, "UNKNOWN_ERROR"),
        }
    }
}
