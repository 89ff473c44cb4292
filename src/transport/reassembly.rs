// 该文件是 Xunying （寻影） 项目的一部分。
// src/transport/reassembly.rs - 分片重组
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  collections::HashMap,
  net::SocketAddr,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::{FragmentError, FragmentHeader};

/// 默认重组超时
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(300);
/// 默认同时进行重组的帧数上限
pub const DEFAULT_MAX_PENDING: usize = 64;
/// 默认单帧最大字节数 (32 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ReassemblyConfig {
  pub timeout: Duration,
  pub max_pending: usize,
  pub max_frame_bytes: usize,
}

impl Default for ReassemblyConfig {
  fn default() -> Self {
    Self {
      timeout: DEFAULT_REASSEMBLY_TIMEOUT,
      max_pending: DEFAULT_MAX_PENDING,
      max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReassemblyError {
  #[error("分片头无效: {0}")]
  Fragment(#[from] FragmentError),
  #[error("帧过大: {0} 字节")]
  FrameTooLarge(usize),
  #[error("分片与已有状态不一致: 帧 {0}")]
  Inconsistent(u32),
  #[error("重组后长度不匹配: 声明 {declared} 字节，实际 {actual} 字节")]
  LengthMismatch { declared: usize, actual: usize },
}

type FrameKey = (SocketAddr, u32);

struct PartialFrame {
  started: Instant,
  fragment_count: u16,
  payload_length: usize,
  received: usize,
  bytes_received: usize,
  fragments: Vec<Option<Box<[u8]>>>,
}

impl PartialFrame {
  fn new(header: &FragmentHeader, now: Instant) -> Self {
    Self {
      started: now,
      fragment_count: header.fragment_count,
      payload_length: header.payload_length as usize,
      received: 0,
      bytes_received: 0,
      fragments: vec![None; header.fragment_count as usize],
    }
  }

  fn is_complete(&self) -> bool {
    self.received == self.fragment_count as usize
  }

  fn assemble(self) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(self.bytes_received);
    for fragment in self.fragments.into_iter().flatten() {
      bytes.extend_from_slice(&fragment);
    }
    bytes
  }
}

/// 按 (对端地址, 帧编号) 重组分片
///
/// 所有时间都由调用者传入，方便在测试中模拟超时。
pub struct Reassembler {
  config: ReassemblyConfig,
  pending: HashMap<FrameKey, PartialFrame>,
  expired: u64,
  evicted: u64,
}

impl Reassembler {
  pub fn new(config: ReassemblyConfig) -> Self {
    Self {
      config,
      pending: HashMap::new(),
      expired: 0,
      evicted: 0,
    }
  }

  /// 正在重组的帧数量
  pub fn pending(&self) -> usize {
    self.pending.len()
  }

  /// 因超时被丢弃的帧总数
  pub fn expired(&self) -> u64 {
    self.expired
  }

  /// 因容量不足被淘汰的帧总数
  pub fn evicted(&self) -> u64 {
    self.evicted
  }

  /// 接收一个数据报，帧完整时返回整帧字节
  pub fn accept(
    &mut self,
    peer: SocketAddr,
    datagram: &[u8],
    now: Instant,
  ) -> Result<Option<Vec<u8>>, ReassemblyError> {
    let (header, body) = FragmentHeader::parse(datagram)?;
    let declared = header.payload_length as usize;
    if declared > self.config.max_frame_bytes {
      return Err(ReassemblyError::FrameTooLarge(declared));
    }

    let key = (peer, header.frame_id);
    if !self.pending.contains_key(&key) {
      self.make_room(now);
    }
    let partial = self
      .pending
      .entry(key)
      .or_insert_with(|| PartialFrame::new(&header, now));

    if partial.fragment_count != header.fragment_count || partial.payload_length != declared {
      warn!(
        "来自 {} 的帧 {} 分片头不一致，丢弃该帧",
        peer, header.frame_id
      );
      self.pending.remove(&key);
      return Err(ReassemblyError::Inconsistent(header.frame_id));
    }

    let slot = &mut partial.fragments[header.fragment_index as usize];
    if slot.is_some() {
      debug!(
        "重复分片: 帧 {} 分片 {}",
        header.frame_id, header.fragment_index
      );
      return Ok(None);
    }

    let actual = partial.bytes_received + body.len();
    if actual > partial.payload_length {
      self.pending.remove(&key);
      return Err(ReassemblyError::LengthMismatch { declared, actual });
    }

    *slot = Some(body.into());
    partial.received += 1;
    partial.bytes_received += body.len();

    if !partial.is_complete() {
      return Ok(None);
    }

    let partial = match self.pending.remove(&key) {
      Some(partial) => partial,
      None => return Ok(None),
    };
    if partial.bytes_received != partial.payload_length {
      return Err(ReassemblyError::LengthMismatch {
        declared: partial.payload_length,
        actual: partial.bytes_received,
      });
    }

    Ok(Some(partial.assemble()))
  }

  /// 清除超时的半成品帧，返回本次清除的数量
  pub fn purge_expired(&mut self, now: Instant) -> usize {
    let timeout = self.config.timeout;
    let before = self.pending.len();
    self.pending.retain(|(peer, frame_id), partial| {
      let alive = now.saturating_duration_since(partial.started) < timeout;
      if !alive {
        warn!(
          "重组超时: 来自 {} 的帧 {} 只收到 {}/{} 个分片",
          peer, frame_id, partial.received, partial.fragment_count
        );
      }
      alive
    });
    let purged = before - self.pending.len();
    self.expired += purged as u64;
    purged
  }

  fn make_room(&mut self, now: Instant) {
    self.purge_expired(now);
    while self.pending.len() >= self.config.max_pending.max(1) {
      let oldest = self
        .pending
        .iter()
        .min_by_key(|(_, partial)| partial.started)
        .map(|(key, _)| *key);
      match oldest {
        Some(key) => {
          warn!("重组缓冲已满，淘汰来自 {} 的帧 {}", key.0, key.1);
          self.pending.remove(&key);
          self.evicted += 1;
        }
        None => break,
      }
    }
  }
}
