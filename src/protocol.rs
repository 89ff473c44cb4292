// 该文件是 Xunying （寻影） 项目的一部分。
// src/protocol.rs - UDP 分片协议定义
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

/// 姿态估计服务默认端口
pub const DEFAULT_POSE_PORT: u16 = 8080;
/// 人脸检测服务默认端口
pub const DEFAULT_FACE_PORT: u16 = 8081;

/// 默认最大传输单元，低于常见路径 MTU
pub const DEFAULT_MTU: usize = 1200;

/// UDP 单个数据报的最大负载
pub const MAX_DATAGRAM: usize = 65507;

/// 分片头长度（字节）
pub const FRAGMENT_HEADER_LEN: usize = 12;

/// 分片头，所有字段均为大端序
///
/// `payload_length` 是整帧编码后的总长度，每个分片都携带同一个值，
/// 重组后的字节数必须与之相等。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
  pub frame_id: u32,
  pub fragment_index: u16,
  pub fragment_count: u16,
  pub payload_length: u32,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FragmentError {
  #[error("数据报过短: {0} 字节")]
  Truncated(usize),
  #[error("分片数量为零")]
  ZeroCount,
  #[error("分片索引越界: {index} / {count}")]
  IndexOutOfRange { index: u16, count: u16 },
  #[error("分片负载为空")]
  EmptyBody,
}

impl FragmentHeader {
  pub fn write_to(&self, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&self.frame_id.to_be_bytes());
    buf.extend_from_slice(&self.fragment_index.to_be_bytes());
    buf.extend_from_slice(&self.fragment_count.to_be_bytes());
    buf.extend_from_slice(&self.payload_length.to_be_bytes());
  }

  /// 解析一个数据报，返回分片头与分片负载
  pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8]), FragmentError> {
    if datagram.len() < FRAGMENT_HEADER_LEN {
      return Err(FragmentError::Truncated(datagram.len()));
    }

    let (head, body) = datagram.split_at(FRAGMENT_HEADER_LEN);
    let header = FragmentHeader {
      frame_id: u32::from_be_bytes([head[0], head[1], head[2], head[3]]),
      fragment_index: u16::from_be_bytes([head[4], head[5]]),
      fragment_count: u16::from_be_bytes([head[6], head[7]]),
      payload_length: u32::from_be_bytes([head[8], head[9], head[10], head[11]]),
    };

    if header.fragment_count == 0 {
      return Err(FragmentError::ZeroCount);
    }
    if header.fragment_index >= header.fragment_count {
      return Err(FragmentError::IndexOutOfRange {
        index: header.fragment_index,
        count: header.fragment_count,
      });
    }
    if body.is_empty() {
      return Err(FragmentError::EmptyBody);
    }

    Ok((header, body))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn datagram(header: FragmentHeader, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    header.write_to(&mut buf);
    buf.extend_from_slice(body);
    buf
  }

  #[test]
  fn header_layout_is_big_endian() {
    let header = FragmentHeader {
      frame_id: 0x01020304,
      fragment_index: 1,
      fragment_count: 2,
      payload_length: 0x0a0b0c0d,
    };
    let buf = datagram(header, &[0xff]);
    assert_eq!(
      &buf[..FRAGMENT_HEADER_LEN],
      &[1, 2, 3, 4, 0, 1, 0, 2, 0x0a, 0x0b, 0x0c, 0x0d]
    );
    let (parsed, body) = FragmentHeader::parse(&buf).unwrap();
    assert_eq!(parsed, header);
    assert_eq!(body, &[0xff]);
  }

  #[test]
  fn rejects_invalid_headers() {
    assert_eq!(
      FragmentHeader::parse(&[0; 5]).unwrap_err(),
      FragmentError::Truncated(5)
    );

    let zero = FragmentHeader {
      frame_id: 1,
      fragment_index: 0,
      fragment_count: 0,
      payload_length: 1,
    };
    assert_eq!(
      FragmentHeader::parse(&datagram(zero, &[1])).unwrap_err(),
      FragmentError::ZeroCount
    );

    let out_of_range = FragmentHeader {
      fragment_index: 3,
      fragment_count: 3,
      ..zero
    };
    assert_eq!(
      FragmentHeader::parse(&datagram(out_of_range, &[1])).unwrap_err(),
      FragmentError::IndexOutOfRange { index: 3, count: 3 }
    );

    let empty = FragmentHeader {
      fragment_count: 1,
      ..zero
    };
    assert_eq!(
      FragmentHeader::parse(&datagram(empty, &[])).unwrap_err(),
      FragmentError::EmptyBody
    );
  }
}
