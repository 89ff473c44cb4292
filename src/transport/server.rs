// 该文件是 Xunying （寻影） 项目的一部分。
// src/transport/server.rs - 服务端传输会话
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
  io::ErrorKind,
  net::{SocketAddr, ToSocketAddrs, UdpSocket},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use super::{Reassembler, ReassemblyConfig, TransportError};
use crate::{
  codec::FrameCodec,
  frame::Frame,
  protocol::MAX_DATAGRAM,
  result::ResultSet,
};

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 传输层计数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionCounters {
  pub datagrams: u64,
  pub rejected_fragments: u64,
  pub decode_failures: u64,
  pub frames: u64,
}

/// 服务端会话：接收分片、重组、解码，并回复结果
pub struct ServerSession {
  socket: UdpSocket,
  reassembler: Reassembler,
  buf: Box<[u8]>,
  shutdown: Option<Arc<AtomicBool>>,
  counters: SessionCounters,
}

impl ServerSession {
  /// 绑定服务端地址，失败即致命
  pub fn bind<A: ToSocketAddrs + std::fmt::Display>(
    addr: A,
    config: ReassemblyConfig,
  ) -> Result<Self, TransportError> {
    // 超时为零时每个半成品帧都会在下一次清理时被丢弃
    if config.timeout.is_zero() {
      return Err(TransportError::InvalidConfig("重组超时必须大于零".to_string()));
    }

    let socket = UdpSocket::bind(&addr).map_err(|e| TransportError::Bind(addr.to_string(), e))?;

    let poll = (config.timeout / 4).clamp(Duration::from_millis(1), MAX_POLL_INTERVAL);
    socket
      .set_read_timeout(Some(poll))
      .map_err(|e| TransportError::Bind(addr.to_string(), e))?;

    if let Ok(local) = socket.local_addr() {
      info!("监听 UDP 地址: {}", local);
    }

    Ok(Self {
      socket,
      reassembler: Reassembler::new(config),
      buf: vec![0u8; MAX_DATAGRAM + 1].into_boxed_slice(),
      shutdown: None,
      counters: SessionCounters::default(),
    })
  }

  /// 设置退出标志，置位后 `receive_frame` 返回 `None`
  pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
    self.shutdown = Some(shutdown);
    self
  }

  pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
    self.socket.local_addr().map_err(TransportError::Receive)
  }

  pub fn counters(&self) -> SessionCounters {
    self.counters
  }

  pub fn reassembler(&self) -> &Reassembler {
    &self.reassembler
  }

  fn should_stop(&self) -> bool {
    self
      .shutdown
      .as_ref()
      .map(|flag| flag.load(Ordering::SeqCst))
      .unwrap_or(false)
  }

  /// 阻塞直到收到一帧完整且可解码的图像
  ///
  /// 解码失败与无效分片只记录日志并继续等待下一帧。
  pub fn receive_frame(&mut self) -> Result<Option<(Frame, SocketAddr)>, TransportError> {
    loop {
      if self.should_stop() {
        return Ok(None);
      }

      let (len, peer) = match self.socket.recv_from(&mut self.buf) {
        Ok(received) => received,
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
          self.reassembler.purge_expired(Instant::now());
          continue;
        }
        Err(e) if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::Interrupted) => {
          debug!("接收被中断: {}", e);
          continue;
        }
        Err(e) => return Err(TransportError::Receive(e)),
      };

      let now = Instant::now();
      self.counters.datagrams += 1;

      let assembled = self.reassembler.accept(peer, &self.buf[..len], now);
      self.reassembler.purge_expired(now);

      let bytes = match assembled {
        Ok(Some(bytes)) => bytes,
        Ok(None) => continue,
        Err(e) => {
          warn!("丢弃来自 {} 的分片: {}", peer, e);
          self.counters.rejected_fragments += 1;
          continue;
        }
      };

      match FrameCodec::decode(&bytes) {
        Ok(frame) => {
          self.counters.frames += 1;
          debug!(
            "收到来自 {} 的帧: {}x{}, {} 字节",
            peer,
            frame.width(),
            frame.height(),
            bytes.len()
          );
          return Ok(Some((frame, peer)));
        }
        Err(e) => {
          warn!("来自 {} 的帧解码失败，跳过: {}", peer, e);
          self.counters.decode_failures += 1;
        }
      }
    }
  }

  /// 向对端发送一帧的结果
  pub fn send_results(
    &self,
    peer: SocketAddr,
    results: &ResultSet,
  ) -> Result<usize, TransportError> {
    let bytes = results.encode()?;
    if bytes.len() > MAX_DATAGRAM {
      return Err(TransportError::ReplyTooLarge(bytes.len()));
    }
    self
      .socket
      .send_to(&bytes, peer)
      .map_err(TransportError::Write)
  }
}
