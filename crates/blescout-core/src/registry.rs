//! 发现注册表
//!
//! 把可能重复、乱序的原始发现事件整理成按地址去重的对端集合。
//! 记录表和序号计数器由同一把锁保护，`snapshot` 复制出结果，
//! 调用方拿到的列表不会被后续 `ingest` 修改。

use crate::peer::{Observation, PeerAddress, PeerRecord};
use log::trace;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

struct RegistryState {
    records: HashMap<PeerAddress, PeerRecord>,
    next_sequence: u64,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            next_sequence: 1,
        }
    }
}

/// 一次扫描会话内的对端集合
///
/// 只增不减：`Lost` 事件不会移除记录，相同负载的重复事件仍然计数。
#[derive(Default)]
pub struct DiscoveryRegistry {
    state: Mutex<RegistryState>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // 每个临界区结束时状态都是一致的，中毒后可以继续使用
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 清空所有记录，序号从 1 重新开始
    pub fn reset(&self) {
        *self.lock() = RegistryState::default();
    }

    /// 记录一次观测，返回最新记录以及是否为首次发现
    pub fn ingest(&self, address: PeerAddress, payload: Observation) -> (PeerRecord, bool) {
        self.ingest_at(address, payload, Instant::now())
    }

    /// 与 [`ingest`](Self::ingest) 相同，但由调用方提供单调时间
    pub fn ingest_at(
        &self,
        address: PeerAddress,
        payload: Observation,
        observed_at: Instant,
    ) -> (PeerRecord, bool) {
        let mut state = self.lock();
        let total_before = state.records.len();

        if let Some(record) = state.records.get_mut(&address) {
            record.last_observation = payload;
            record.occurrence_count += 1;
            record.observed_at = observed_at;
            trace!(
                "Peer {} seen again (#{}, count={})",
                address, record.sequence_number, record.occurrence_count
            );
            return (record.clone(), false);
        }

        let sequence_number = state.next_sequence;
        state.next_sequence += 1;
        let record = PeerRecord {
            sequence_number,
            address: address.clone(),
            occurrence_count: 1,
            last_observation: payload,
            observed_at,
        };
        state.records.insert(address, record.clone());
        trace!(
            "New peer {} (#{}), total peers: {}",
            record.address,
            sequence_number,
            total_before + 1
        );
        (record, true)
    }

    /// 所有记录，最近观测的在前；时间相同时最近发现的在前
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.lock().records.values().cloned().collect();
        records.sort_by(|a, b| {
            b.observed_at
                .cmp(&a.observed_at)
                .then_with(|| b.sequence_number.cmp(&a.sequence_number))
        });
        records
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
