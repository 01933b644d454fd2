//! 子命令实现

use anyhow::{Context, Result};
use blescout_core::{
    AdvertiseFailure, AdvertisingSession, BtleplugRadio, MgmtBroadcaster, PeerRecord,
    PermissionGate, ScanSession, ScoutSettings, StaticPermissionGate,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// 扫描结束条件的轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Serialize)]
struct PeerRow<'a> {
    sequence: u64,
    address: &'a str,
    name: Option<&'a str>,
    rssi: Option<i16>,
    occurrences: u64,
}

impl<'a> From<&'a PeerRecord> for PeerRow<'a> {
    fn from(record: &'a PeerRecord) -> Self {
        Self {
            sequence: record.sequence_number,
            address: record.address.as_str(),
            name: record.last_observation.name.as_deref(),
            rssi: record.last_observation.rssi,
            occurrences: record.occurrence_count,
        }
    }
}

pub async fn scan(settings: &ScoutSettings, json: bool) -> Result<()> {
    let radio = Arc::new(BtleplugRadio::with_controller(settings.controller_index).await);
    // BlueZ 通过 D-Bus 策略授权扫描，不需要额外权限
    let session = ScanSession::new(
        radio.clone(),
        Arc::new(StaticPermissionGate::Granted),
        radio,
        settings.scan_options(),
    );

    let quiet = json;
    let listener = Arc::new(move |record: &PeerRecord, is_new: bool| {
        if is_new && !quiet {
            println!(
                "   [{}] {} ({}) rssi={}",
                record.sequence_number,
                record.last_observation.display_name(),
                record.address,
                record
                    .last_observation
                    .rssi
                    .map_or_else(|| "?".to_string(), |r| r.to_string())
            );
        }
    });

    session.start(listener).await?;

    match settings.scan_timeout_secs {
        Some(secs) if !json => println!("🔍 扫描设备 ({}s, Ctrl-C 停止)...", secs),
        None if !json => println!("🔍 扫描设备 (Ctrl-C 停止)..."),
        _ => {}
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                if !session.is_active() {
                    break;
                }
            }
        }
    }
    session.stop().await;

    let peers = session.current_peers();
    if json {
        let rows: Vec<PeerRow<'_>> = peers.iter().map(PeerRow::from).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print_table(&peers);
    }
    Ok(())
}

fn print_table(peers: &[PeerRecord]) {
    if peers.is_empty() {
        println!("   未发现设备");
        return;
    }
    println!();
    println!("{:>4}  {:<17}  {:>5}  {:>5}  NAME", "SEQ", "ADDRESS", "RSSI", "SEEN");
    for record in peers {
        println!(
            "{:>4}  {:<17}  {:>5}  {:>5}  {}",
            record.sequence_number,
            record.address,
            record
                .last_observation
                .rssi
                .map_or_else(|| "-".to_string(), |r| r.to_string()),
            record.occurrence_count,
            record.last_observation.display_name()
        );
    }
}

pub async fn advertise(settings: &ScoutSettings) -> Result<()> {
    // MGMT 广播需要 CAP_NET_ADMIN；通过 setcap 授权时 euid 不是 0，只给出警告
    let gate = StaticPermissionGate::Privileged;
    if !gate.has_required_access() && !request_access(&gate).await {
        tracing::warn!("Not running as root, MGMT advertising may be rejected");
    }

    let radio = Arc::new(BtleplugRadio::with_controller(settings.controller_index).await);
    let payload = settings.advertise_payload();
    let session = AdvertisingSession::new(
        radio,
        Arc::new(MgmtBroadcaster::new()),
        payload.local_name.clone(),
    )
    .connectable(payload.connectable);

    let observer = Arc::new(|reason: AdvertiseFailure| {
        tracing::error!("Advertising failed: {} ({})", reason, reason.code());
    });
    session
        .start(payload.service_uuid, Some(observer))
        .await
        .context("无法开始广播")?;

    println!(
        "📡 正在广播 {} ({}), Ctrl-C 停止",
        payload.local_name, payload.service_uuid
    );
    tokio::signal::ctrl_c().await?;

    session.stop().await;
    println!("⏹️  广播已停止");
    Ok(())
}

pub async fn adapters(settings: &ScoutSettings) {
    let radio = BtleplugRadio::new().await;
    let adapters = radio.describe_adapters().await;
    if adapters.is_empty() {
        println!("   未找到蓝牙适配器");
        return;
    }
    for (handle, powered) in adapters {
        let marker = if handle.index == settings.controller_index {
            "*"
        } else {
            " "
        };
        println!(
            "{} [{}] {} ({})",
            marker,
            handle.index,
            handle.info,
            if powered { "powered" } else { "off" }
        );
    }
}

pub fn render_settings(settings: &ScoutSettings) -> Result<String> {
    Ok(toml::to_string_pretty(settings)?)
}

/// 请求一次权限，等待结果
async fn request_access(gate: &dyn PermissionGate) -> bool {
    let (tx, rx) = oneshot::channel();
    gate.request_access(Box::new(move |granted| {
        let _ = tx.send(granted);
    }));
    let granted = rx.await.unwrap_or(false);
    tracing::debug!("Permission request result: {}", granted);
    granted
}
