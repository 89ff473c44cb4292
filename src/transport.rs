// 该文件是 Xunying （寻影） 项目的一部分。
// src/transport.rs - UDP 传输会话
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

use thiserror::Error;

use crate::{codec::EncodeError, result::ResultCodecError};

mod client;
mod reassembly;
mod server;

pub use self::client::ClientSession;
pub use self::reassembly::{
  DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_PENDING, DEFAULT_REASSEMBLY_TIMEOUT, Reassembler,
  ReassemblyConfig, ReassemblyError,
};
pub use self::server::{ServerSession, SessionCounters};

#[derive(Error, Debug)]
pub enum TransportError {
  #[error("无法绑定地址 {0}: {1}")]
  Bind(String, std::io::Error),
  #[error("传输配置无效: {0}")]
  InvalidConfig(String),
  #[error("无法解析地址: {0}")]
  Resolve(String),
  #[error("接收数据失败: {0}")]
  Receive(std::io::Error),
  #[error("发送数据失败: {0}")]
  Write(std::io::Error),
  #[error("回复过大: {0} 字节")]
  ReplyTooLarge(usize),
  #[error("帧编码失败: {0}")]
  Encode(#[from] EncodeError),
  #[error("结果编解码失败: {0}")]
  Reply(#[from] ResultCodecError),
}
