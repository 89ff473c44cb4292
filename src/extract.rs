// 该文件是 Xunying （寻影） 项目的一部分。
// src/extract.rs - 模型输出后处理
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

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::{
  model::{BlobParams, Tensor},
  protocol::{DEFAULT_FACE_PORT, DEFAULT_POSE_PORT},
  result::ResultSet,
};

mod detection;
mod pose;
mod variant;

pub use self::detection::{DEFAULT_DETECTION_THRESHOLD, DETECTION_STRIDE, DetectionExtractor};
pub use self::pose::{KEYPOINT_CONFIDENCE_FLOOR, Keypoint, PoseExtractor};
pub use self::variant::ModelVariant;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExtractError {
  #[error("未知的部位数量: {0}，COCO 模型应为 19，MPI 为 16，手部模型为 22")]
  UnknownPartCount(usize),
  #[error("张量形状无效: {0:?}")]
  Shape(Vec<usize>),
  #[error("模型输出通道数变化: 期望 {expected}，实际 {actual}")]
  VariantMismatch { expected: usize, actual: usize },
}

/// 服务模式，每个服务实例固定一种
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
  Pose,
  Face,
}

impl DetectionMode {
  pub fn default_port(&self) -> u16 {
    match self {
      DetectionMode::Pose => DEFAULT_POSE_PORT,
      DetectionMode::Face => DEFAULT_FACE_PORT,
    }
  }

  pub fn default_blob(&self) -> BlobParams {
    match self {
      DetectionMode::Pose => BlobParams::pose(),
      DetectionMode::Face => BlobParams::face(),
    }
  }
}

impl FromStr for DetectionMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pose" => Ok(DetectionMode::Pose),
      "face" => Ok(DetectionMode::Face),
      other => Err(format!("未知模式: {}，可选 pose 或 face", other)),
    }
  }
}

impl fmt::Display for DetectionMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DetectionMode::Pose => write!(f, "pose"),
      DetectionMode::Face => write!(f, "face"),
    }
  }
}

/// 后处理器，在启动时根据模式与模型输出确定
#[derive(Debug, Clone, Copy)]
pub enum Extractor {
  Pose(PoseExtractor),
  Detection(DetectionExtractor),
}

impl Extractor {
  /// 根据一次预热推理的输出选择后处理器
  ///
  /// 姿态模式下无法识别的部位数量属于配置错误。
  pub fn for_output(
    mode: DetectionMode,
    probe: &Tensor,
    threshold: f32,
  ) -> Result<Self, ExtractError> {
    match mode {
      DetectionMode::Pose => {
        let (_, channels, _, _) = probe
          .dims4()
          .ok_or_else(|| ExtractError::Shape(probe.shape().to_vec()))?;
        let variant =
          ModelVariant::from_channels(channels).ok_or(ExtractError::UnknownPartCount(channels))?;
        Ok(Extractor::Pose(PoseExtractor::new(variant)))
      }
      DetectionMode::Face => Ok(Extractor::Detection(
        DetectionExtractor::default().with_threshold(threshold),
      )),
    }
  }

  pub fn extract(
    &self,
    tensor: &Tensor,
    source_width: u32,
    source_height: u32,
  ) -> Result<ResultSet, ExtractError> {
    match self {
      Extractor::Pose(pose) => Ok(ResultSet::Pose(pose.extract(
        tensor,
        source_width,
        source_height,
      )?)),
      Extractor::Detection(detection) => Ok(ResultSet::Detections(detection.extract(
        tensor,
        source_width,
        source_height,
      ))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn probe(channels: usize) -> Tensor {
    Tensor::new(vec![1, channels, 2, 2], vec![0.0; channels * 4]).unwrap()
  }

  #[test]
  fn unknown_part_count_is_a_configuration_error() {
    assert_eq!(
      Extractor::for_output(DetectionMode::Pose, &probe(17), 0.5).unwrap_err(),
      ExtractError::UnknownPartCount(17)
    );
  }

  #[test]
  fn known_part_counts_select_variant() {
    for (channels, variant) in [
      (19, ModelVariant::Coco),
      (16, ModelVariant::Mpi),
      (22, ModelVariant::Hand),
    ] {
      match Extractor::for_output(DetectionMode::Pose, &probe(channels), 0.5).unwrap() {
        Extractor::Pose(pose) => assert_eq!(pose.variant(), variant),
        other => panic!("unexpected extractor {:?}", other),
      }
    }
  }

  #[test]
  fn face_mode_uses_threshold() {
    let flat = Tensor::new(vec![1, 1, 0, 7], vec![]).unwrap();
    match Extractor::for_output(DetectionMode::Face, &flat, 0.7).unwrap() {
      Extractor::Detection(detection) => assert_eq!(detection.threshold(), 0.7),
      other => panic!("unexpected extractor {:?}", other),
    }
  }

  #[test]
  fn mode_parsing() {
    assert_eq!("pose".parse::<DetectionMode>(), Ok(DetectionMode::Pose));
    assert_eq!("face".parse::<DetectionMode>(), Ok(DetectionMode::Face));
    assert!("hand".parse::<DetectionMode>().is_err());
    assert_eq!(DetectionMode::Face.default_port(), 8081);
  }
}
