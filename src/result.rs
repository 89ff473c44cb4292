// 该文件是 Xunying （寻影） 项目的一部分。
// src/result.rs - 推理结果与回复编码
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

use serde_json::{Value, json};
use thiserror::Error;

const KIND_POSE: u8 = 0;
const KIND_DETECTIONS: u8 = 1;
const POSE_RECORD_LEN: usize = 16;
const DETECTION_RECORD_LEN: usize = 20;
const REPLY_HEADER_LEN: usize = 3;

/// 源图像像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
  pub x: i32,
  pub y: i32,
}

impl Point {
  pub fn new(x: i32, y: i32) -> Self {
    Self { x, y }
  }
}

/// 骨架上的一段连线
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoseSegment {
  pub from: Point,
  pub to: Point,
}

/// 检测框，坐标为源图像像素
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionBox {
  pub left: i32,
  pub top: i32,
  pub right: i32,
  pub bottom: i32,
  pub confidence: f32,
}

/// 单帧的推理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSet {
  Pose(Vec<PoseSegment>),
  Detections(Vec<DetectionBox>),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResultCodecError {
  #[error("结果数量过多: {0}")]
  TooManyRecords(usize),
  #[error("回复数据过短: 期望 {expected} 字节，实际 {actual} 字节")]
  Truncated { expected: usize, actual: usize },
  #[error("回复数据多出 {0} 字节")]
  TrailingBytes(usize),
  #[error("未知的结果类型: {0}")]
  UnknownKind(u8),
}

impl ResultSet {
  pub fn len(&self) -> usize {
    match self {
      ResultSet::Pose(segments) => segments.len(),
      ResultSet::Detections(boxes) => boxes.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 编码为 `kind u8 | count u16 | records`，大端序
  pub fn encode(&self) -> Result<Vec<u8>, ResultCodecError> {
    let count =
      u16::try_from(self.len()).map_err(|_| ResultCodecError::TooManyRecords(self.len()))?;

    let mut buf = Vec::new();
    match self {
      ResultSet::Pose(segments) => {
        buf.reserve(REPLY_HEADER_LEN + segments.len() * POSE_RECORD_LEN);
        buf.push(KIND_POSE);
        buf.extend_from_slice(&count.to_be_bytes());
        for segment in segments {
          for value in [segment.from.x, segment.from.y, segment.to.x, segment.to.y] {
            buf.extend_from_slice(&value.to_be_bytes());
          }
        }
      }
      ResultSet::Detections(boxes) => {
        buf.reserve(REPLY_HEADER_LEN + boxes.len() * DETECTION_RECORD_LEN);
        buf.push(KIND_DETECTIONS);
        buf.extend_from_slice(&count.to_be_bytes());
        for item in boxes {
          for value in [item.left, item.top, item.right, item.bottom] {
            buf.extend_from_slice(&value.to_be_bytes());
          }
          buf.extend_from_slice(&item.confidence.to_be_bytes());
        }
      }
    }
    Ok(buf)
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, ResultCodecError> {
    if bytes.len() < REPLY_HEADER_LEN {
      return Err(ResultCodecError::Truncated {
        expected: REPLY_HEADER_LEN,
        actual: bytes.len(),
      });
    }
    let kind = bytes[0];
    let count = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
    let record_len = match kind {
      KIND_POSE => POSE_RECORD_LEN,
      KIND_DETECTIONS => DETECTION_RECORD_LEN,
      other => return Err(ResultCodecError::UnknownKind(other)),
    };

    let body = &bytes[REPLY_HEADER_LEN..];
    let expected = count * record_len;
    if body.len() < expected {
      return Err(ResultCodecError::Truncated {
        expected: REPLY_HEADER_LEN + expected,
        actual: bytes.len(),
      });
    }
    if body.len() > expected {
      return Err(ResultCodecError::TrailingBytes(body.len() - expected));
    }

    let records = body.chunks_exact(record_len);
    let set = match kind {
      KIND_POSE => ResultSet::Pose(
        records
          .map(|r| PoseSegment {
            from: Point::new(read_i32(r, 0), read_i32(r, 4)),
            to: Point::new(read_i32(r, 8), read_i32(r, 12)),
          })
          .collect(),
      ),
      _ => ResultSet::Detections(
        records
          .map(|r| DetectionBox {
            left: read_i32(r, 0),
            top: read_i32(r, 4),
            right: read_i32(r, 8),
            bottom: read_i32(r, 12),
            confidence: f32::from_be_bytes([r[16], r[17], r[18], r[19]]),
          })
          .collect(),
      ),
    };
    Ok(set)
  }

  /// 以 JSON 形式呈现，便于客户端输出
  pub fn to_json(&self) -> Value {
    match self {
      ResultSet::Pose(segments) => json!({
        "kind": "pose",
        "segments": segments
          .iter()
          .map(|s| json!([[s.from.x, s.from.y], [s.to.x, s.to.y]]))
          .collect::<Vec<_>>(),
      }),
      ResultSet::Detections(boxes) => json!({
        "kind": "detections",
        "boxes": boxes
          .iter()
          .map(|b| json!({
            "left": b.left,
            "top": b.top,
            "right": b.right,
            "bottom": b.bottom,
            "confidence": b.confidence,
          }))
          .collect::<Vec<_>>(),
      }),
    }
  }
}

fn read_i32(record: &[u8], offset: usize) -> i32 {
  i32::from_be_bytes([
    record[offset],
    record[offset + 1],
    record[offset + 2],
    record[offset + 3],
  ])
}
