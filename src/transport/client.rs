// 该文件是 Xunying （寻影） 项目的一部分。
// src/transport/client.rs - 客户端传输会话
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
  time::Duration,
};

use tracing::{debug, info, warn};

use super::TransportError;
use crate::{codec::FrameCodec, frame::Frame, protocol::MAX_DATAGRAM, result::ResultSet};

/// 客户端会话：发送即忘，不做重传
pub struct ClientSession {
  socket: UdpSocket,
  server: SocketAddr,
  codec: FrameCodec,
  next_frame_id: u32,
  buf: Box<[u8]>,
}

impl ClientSession {
  pub fn connect<A: ToSocketAddrs + std::fmt::Display>(
    server: A,
    codec: FrameCodec,
  ) -> Result<Self, TransportError> {
    let server_addr = server
      .to_socket_addrs()
      .map_err(|_| TransportError::Resolve(server.to_string()))?
      .next()
      .ok_or_else(|| TransportError::Resolve(server.to_string()))?;

    let local: SocketAddr = if server_addr.is_ipv4() {
      SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
      SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(local).map_err(|e| TransportError::Bind(local.to_string(), e))?;
    socket
      .connect(server_addr)
      .map_err(|e| TransportError::Bind(server_addr.to_string(), e))?;

    if let Ok(local) = socket.local_addr() {
      info!("UDP 客户端 {} -> {}", local, server_addr);
    }

    Ok(Self {
      socket,
      server: server_addr,
      codec,
      next_frame_id: 0,
      buf: vec![0u8; MAX_DATAGRAM + 1].into_boxed_slice(),
    })
  }

  pub fn server(&self) -> SocketAddr {
    self.server
  }

  pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
    self.socket.local_addr().map_err(TransportError::Receive)
  }

  /// 编码并发送一帧，返回使用的帧编号
  pub fn send_frame(&mut self, frame: &Frame) -> Result<u32, TransportError> {
    let frame_id = self.next_frame_id;
    self.next_frame_id = self.next_frame_id.wrapping_add(1);

    let payload = self.codec.encode(frame, frame_id)?;
    for datagram in &payload.datagrams {
      self.socket.send(datagram).map_err(TransportError::Write)?;
    }
    debug!("帧 {} 已发送: {} 个分片", frame_id, payload.len());
    Ok(frame_id)
  }

  /// 等待一个结果回复，`timeout` 为零时不阻塞
  pub fn recv_results(&mut self, timeout: Duration) -> Result<Option<ResultSet>, TransportError> {
    if timeout.is_zero() {
      self
        .socket
        .set_nonblocking(true)
        .map_err(TransportError::Receive)?;
    } else {
      self
        .socket
        .set_nonblocking(false)
        .map_err(TransportError::Receive)?;
      self
        .socket
        .set_read_timeout(Some(timeout))
        .map_err(TransportError::Receive)?;
    }

    match self.socket.recv(&mut self.buf) {
      Ok(len) => Ok(Some(ResultSet::decode(&self.buf[..len])?)),
      Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
      Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
        warn!("服务端 {} 不可达", self.server);
        Ok(None)
      }
      Err(e) => Err(TransportError::Receive(e)),
    }
  }
}
