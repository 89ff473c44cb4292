// 该文件是 Xunying （寻影） 项目的一部分。
// src/codec.rs - 帧编解码与分片
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

use image::{ExtendedColorType, ImageEncoder, ImageFormat, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{Frame, FrameError, PixelFormat, expected_len},
  protocol::{DEFAULT_MTU, FRAGMENT_HEADER_LEN, FragmentHeader},
};

const FRAME_MAGIC: [u8; 2] = *b"XY";
const FRAME_VERSION: u8 = 1;
/// 帧头长度: magic(2) + version + format + compression + reserved + width + height + body_len
pub const FRAME_HEADER_LEN: usize = 18;

/// 帧负载的压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
  Raw,
  Jpeg { quality: u8 },
}

impl Compression {
  fn to_wire(self) -> u8 {
    match self {
      Compression::Raw => 0,
      Compression::Jpeg { .. } => 1,
    }
  }
}

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("MTU 过小: {0} 字节，无法容纳分片头")]
  MtuTooSmall(usize),
  #[error("分片数量过多: 需要 {0} 个分片")]
  TooManyFragments(usize),
  #[error("编码后的帧过大: {0} 字节")]
  FrameTooLarge(usize),
  #[error("JPEG 编码错误: {0}")]
  Jpeg(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("帧数据过短: {0} 字节")]
  Truncated(usize),
  #[error("帧标识不匹配")]
  BadMagic,
  #[error("不支持的帧版本: {0}")]
  UnsupportedVersion(u8),
  #[error("未知的像素编码: {0}")]
  UnknownFormat(u8),
  #[error("未知的压缩方式: {0}")]
  UnknownCompression(u8),
  #[error("负载长度不匹配: 声明 {declared} 字节，实际 {actual} 字节")]
  BodyLength { declared: usize, actual: usize },
  #[error("JPEG 尺寸不匹配: 声明 {declared:?}，实际 {actual:?}")]
  DimensionMismatch {
    declared: (u32, u32),
    actual: (u32, u32),
  },
  #[error("JPEG 解码错误: {0}")]
  Jpeg(#[from] image::ImageError),
  #[error("帧数据无效: {0}")]
  Frame(#[from] FrameError),
}

/// 一帧编码后的全部数据报，按分片索引排列
#[derive(Debug, Clone)]
pub struct WirePayload {
  pub frame_id: u32,
  pub datagrams: Vec<Vec<u8>>,
}

impl WirePayload {
  pub fn len(&self) -> usize {
    self.datagrams.len()
  }

  pub fn is_empty(&self) -> bool {
    self.datagrams.is_empty()
  }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
  mtu: usize,
  compression: Compression,
}

impl Default for FrameCodec {
  fn default() -> Self {
    Self {
      mtu: DEFAULT_MTU,
      compression: Compression::Raw,
    }
  }
}

impl FrameCodec {
  pub fn with_mtu(mut self, mtu: usize) -> Self {
    self.mtu = mtu;
    self
  }

  pub fn with_compression(mut self, compression: Compression) -> Self {
    self.compression = compression;
    self
  }

  pub fn mtu(&self) -> usize {
    self.mtu
  }

  /// 编码整帧并切分为分片，永不截断
  pub fn encode(&self, frame: &Frame, frame_id: u32) -> Result<WirePayload, EncodeError> {
    let bytes = self.encode_frame(frame)?;
    self.fragment(frame_id, &bytes)
  }

  /// 编码整帧（不分片）
  pub fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    let body = match self.compression {
      Compression::Raw => frame.data().to_vec(),
      Compression::Jpeg { quality } => encode_jpeg(frame, quality)?,
    };

    let body_len = u32::try_from(body.len()).map_err(|_| EncodeError::FrameTooLarge(body.len()))?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.push(FRAME_VERSION);
    buf.push(frame.format().to_wire());
    buf.push(self.compression.to_wire());
    buf.push(0);
    buf.extend_from_slice(&frame.width().to_be_bytes());
    buf.extend_from_slice(&frame.height().to_be_bytes());
    buf.extend_from_slice(&body_len.to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
  }

  /// 将编码后的帧切分为不超过 MTU 的数据报
  pub fn fragment(&self, frame_id: u32, bytes: &[u8]) -> Result<WirePayload, EncodeError> {
    if self.mtu <= FRAGMENT_HEADER_LEN {
      return Err(EncodeError::MtuTooSmall(self.mtu));
    }
    let chunk = self.mtu - FRAGMENT_HEADER_LEN;
    let payload_length =
      u32::try_from(bytes.len()).map_err(|_| EncodeError::FrameTooLarge(bytes.len()))?;

    let count = bytes.len().div_ceil(chunk).max(1);
    let fragment_count =
      u16::try_from(count).map_err(|_| EncodeError::TooManyFragments(count))?;

    let datagrams = bytes
      .chunks(chunk)
      .enumerate()
      .map(|(index, body)| {
        let header = FragmentHeader {
          frame_id,
          fragment_index: index as u16,
          fragment_count,
          payload_length,
        };
        let mut datagram = Vec::with_capacity(FRAGMENT_HEADER_LEN + body.len());
        header.write_to(&mut datagram);
        datagram.extend_from_slice(body);
        datagram
      })
      .collect::<Vec<_>>();

    debug!(
      "帧 {} 编码完成: {} 字节, {} 个分片",
      frame_id,
      bytes.len(),
      datagrams.len()
    );

    Ok(WirePayload {
      frame_id,
      datagrams,
    })
  }

  /// 将重组后的字节解码为帧
  pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    if bytes.len() < FRAME_HEADER_LEN {
      return Err(DecodeError::Truncated(bytes.len()));
    }
    let (head, body) = bytes.split_at(FRAME_HEADER_LEN);

    if head[0..2] != FRAME_MAGIC {
      return Err(DecodeError::BadMagic);
    }
    if head[2] != FRAME_VERSION {
      return Err(DecodeError::UnsupportedVersion(head[2]));
    }
    let format = PixelFormat::from_wire(head[3]).ok_or(DecodeError::UnknownFormat(head[3]))?;
    let compression = head[4];
    let width = u32::from_be_bytes([head[6], head[7], head[8], head[9]]);
    let height = u32::from_be_bytes([head[10], head[11], head[12], head[13]]);
    let declared = u32::from_be_bytes([head[14], head[15], head[16], head[17]]) as usize;

    if declared != body.len() {
      return Err(DecodeError::BodyLength {
        declared,
        actual: body.len(),
      });
    }

    match compression {
      0 => {
        let expected = expected_len(width, height, format).unwrap_or(usize::MAX);
        if body.len() != expected {
          return Err(DecodeError::BodyLength {
            declared: expected,
            actual: body.len(),
          });
        }
        Ok(Frame::new(width, height, format, body.to_vec())?)
      }
      1 => decode_jpeg(body, width, height, format),
      other => Err(DecodeError::UnknownCompression(other)),
    }
  }
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, image::ImageError> {
  let mut buf = Vec::new();
  let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
  match frame.format() {
    PixelFormat::Gray8 => encoder.write_image(
      frame.data(),
      frame.width(),
      frame.height(),
      ExtendedColorType::L8,
    )?,
    _ => encoder.write_image(
      &frame.to_three_channel(true),
      frame.width(),
      frame.height(),
      ExtendedColorType::Rgb8,
    )?,
  }
  Ok(buf)
}

fn decode_jpeg(
  body: &[u8],
  width: u32,
  height: u32,
  format: PixelFormat,
) -> Result<Frame, DecodeError> {
  let image = image::load_from_memory_with_format(body, ImageFormat::Jpeg)?;
  if (image.width(), image.height()) != (width, height) {
    return Err(DecodeError::DimensionMismatch {
      declared: (width, height),
      actual: (image.width(), image.height()),
    });
  }

  let frame = match format {
    PixelFormat::Gray8 => Frame::new(width, height, format, image.to_luma8().into_raw())?,
    _ => Frame::from_rgb_image(&image.to_rgb8(), format)?,
  };
  Ok(frame)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gradient(width: u32, height: u32) -> Frame {
    let data = (0..(width * height * 3))
      .map(|i| (i % 251) as u8)
      .collect::<Vec<_>>();
    Frame::new(width, height, PixelFormat::Bgr8, data).unwrap()
  }

  fn reassemble(payload: &WirePayload) -> Vec<u8> {
    payload
      .datagrams
      .iter()
      .flat_map(|d| FragmentHeader::parse(d).unwrap().1.to_vec())
      .collect()
  }

  #[test]
  fn raw_round_trip_across_many_fragments() {
    let frame = gradient(64, 48);
    let codec = FrameCodec::default();
    let payload = codec.encode(&frame, 7).unwrap();

    let encoded_len = FRAME_HEADER_LEN + 64 * 48 * 3;
    assert_eq!(payload.len(), encoded_len.div_ceil(DEFAULT_MTU - FRAGMENT_HEADER_LEN));
    for datagram in &payload.datagrams {
      assert!(datagram.len() <= DEFAULT_MTU);
      let (header, _) = FragmentHeader::parse(datagram).unwrap();
      assert_eq!(header.frame_id, 7);
      assert_eq!(header.payload_length as usize, encoded_len);
    }

    let decoded = FrameCodec::decode(&reassemble(&payload)).unwrap();
    assert_eq!(decoded, frame);
  }

  #[test]
  fn large_frame_is_fragmented_not_truncated() {
    // 640x480 BGR 远大于 22000 字节
    let frame = gradient(640, 480);
    let payload = FrameCodec::default().encode(&frame, 1).unwrap();
    let bytes = reassemble(&payload);
    assert_eq!(bytes.len(), FRAME_HEADER_LEN + 640 * 480 * 3);
    assert_eq!(FrameCodec::decode(&bytes).unwrap(), frame);
  }

  #[test]
  fn small_frame_fits_single_fragment() {
    let frame = Frame::new(2, 2, PixelFormat::Gray8, vec![1, 2, 3, 4]).unwrap();
    let payload = FrameCodec::default().encode(&frame, 0).unwrap();
    assert!(!payload.is_empty());
    assert_eq!(payload.len(), 1);
    assert_eq!(FrameCodec::decode(&reassemble(&payload)).unwrap(), frame);
  }

  #[test]
  fn tiny_mtu_is_rejected() {
    let frame = gradient(2, 2);
    let err = FrameCodec::default()
      .with_mtu(FRAGMENT_HEADER_LEN)
      .encode(&frame, 0)
      .unwrap_err();
    assert!(matches!(err, EncodeError::MtuTooSmall(_)));
  }

  #[test]
  fn too_many_fragments_fails_loudly() {
    let frame = gradient(300, 300);
    let err = FrameCodec::default()
      .with_mtu(FRAGMENT_HEADER_LEN + 1)
      .encode(&frame, 0)
      .unwrap_err();
    assert!(matches!(err, EncodeError::TooManyFragments(_)));
  }

  #[test]
  fn decode_rejects_implausible_lengths() {
    let frame = gradient(4, 4);
    let mut bytes = FrameCodec::default().encode_frame(&frame).unwrap();

    bytes.pop();
    assert!(matches!(
      FrameCodec::decode(&bytes),
      Err(DecodeError::BodyLength { .. })
    ));

    // 声明长度与实际一致，但与尺寸不符
    let mut forged = FrameCodec::default().encode_frame(&frame).unwrap();
    forged[10..14].copy_from_slice(&5u32.to_be_bytes());
    assert!(matches!(
      FrameCodec::decode(&forged),
      Err(DecodeError::BodyLength { .. })
    ));
  }

  #[test]
  fn decode_rejects_bad_header() {
    assert!(matches!(
      FrameCodec::decode(&[0; 4]),
      Err(DecodeError::Truncated(4))
    ));

    let frame = gradient(1, 1);
    let mut bytes = FrameCodec::default().encode_frame(&frame).unwrap();
    bytes[0] = b'Z';
    assert!(matches!(FrameCodec::decode(&bytes), Err(DecodeError::BadMagic)));

    let mut bytes = FrameCodec::default().encode_frame(&frame).unwrap();
    bytes[3] = 9;
    assert!(matches!(
      FrameCodec::decode(&bytes),
      Err(DecodeError::UnknownFormat(9))
    ));

    let mut bytes = FrameCodec::default().encode_frame(&frame).unwrap();
    bytes[4] = 7;
    assert!(matches!(
      FrameCodec::decode(&bytes),
      Err(DecodeError::UnknownCompression(7))
    ));
  }

  #[test]
  fn jpeg_keeps_dimensions() {
    let frame = gradient(32, 16);
    let codec = FrameCodec::default().with_compression(Compression::Jpeg { quality: 90 });
    let bytes = codec.encode_frame(&frame).unwrap();
    assert_eq!(bytes[4], 1);

    let decoded = FrameCodec::decode(&bytes).unwrap();
    assert_eq!(decoded.width(), 32);
    assert_eq!(decoded.height(), 16);
    assert_eq!(decoded.format(), PixelFormat::Bgr8);
  }
}
