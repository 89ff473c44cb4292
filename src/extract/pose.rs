// 该文件是 Xunying （寻影） 项目的一部分。
// src/extract/pose.rs - 热力图关键点提取
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

use tracing::debug;

use super::{ExtractError, ModelVariant};
use crate::{
  model::Tensor,
  result::{Point, PoseSegment},
};

/// 热力图峰值的置信度下限
pub const KEYPOINT_CONFIDENCE_FLOOR: f32 = 0.1;

/// 热力图坐标系中的关键点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
  pub x: usize,
  pub y: usize,
  pub confidence: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct PoseExtractor {
  variant: ModelVariant,
}

impl PoseExtractor {
  pub fn new(variant: ModelVariant) -> Self {
    Self { variant }
  }

  pub fn variant(&self) -> ModelVariant {
    self.variant
  }

  /// 在每个部位的热力图中寻找全局最大值
  pub fn keypoints(&self, tensor: &Tensor) -> Result<Vec<Option<Keypoint>>, ExtractError> {
    let (batch, channels, height, width) = tensor
      .dims4()
      .ok_or_else(|| ExtractError::Shape(tensor.shape().to_vec()))?;
    if batch == 0 || height == 0 || width == 0 {
      return Err(ExtractError::Shape(tensor.shape().to_vec()));
    }
    if channels != self.variant.output_channels() {
      return Err(ExtractError::VariantMismatch {
        expected: self.variant.output_channels(),
        actual: channels,
      });
    }

    let plane = height * width;
    let keypoints = tensor
      .data()
      .chunks_exact(plane)
      .take(self.variant.part_count())
      .map(|heatmap| {
        let (index, &value) = heatmap
          .iter()
          .enumerate()
          .fold(None::<(usize, &f32)>, |best, (i, v)| match best {
            Some((_, b)) if *v <= *b => best,
            _ => Some((i, v)),
          })?;
        (value > KEYPOINT_CONFIDENCE_FLOOR).then_some(Keypoint {
          x: index % width,
          y: index / width,
          confidence: value,
        })
      })
      .collect::<Vec<_>>();

    Ok(keypoints)
  }

  /// 提取骨架连线并缩放到源图像像素坐标
  pub fn extract(
    &self,
    tensor: &Tensor,
    source_width: u32,
    source_height: u32,
  ) -> Result<Vec<PoseSegment>, ExtractError> {
    let keypoints = self.keypoints(tensor)?;
    let (_, _, height, width) = tensor
      .dims4()
      .ok_or_else(|| ExtractError::Shape(tensor.shape().to_vec()))?;

    // 按整数倍缩放，与模型的空间下采样一致
    let sx = (source_width as f32 / width as f32) as i32;
    let sy = (source_height as f32 / height as f32) as i32;

    let segments = self
      .variant
      .pairs()
      .iter()
      .filter_map(|&(a, b)| {
        let a = keypoints.get(a).copied().flatten()?;
        let b = keypoints.get(b).copied().flatten()?;
        Some(PoseSegment {
          from: Point::new(a.x as i32 * sx, a.y as i32 * sy),
          to: Point::new(b.x as i32 * sx, b.y as i32 * sy),
        })
      })
      .collect::<Vec<_>>();

    debug!(
      "{}: 检测到 {} 个关键点, {} 条连线",
      self.variant.name(),
      keypoints.iter().flatten().count(),
      segments.len()
    );
    Ok(segments)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const H: usize = 28;
  const W: usize = 28;

  fn heatmaps(variant: ModelVariant, peaks: &[(usize, usize, usize, f32)]) -> Tensor {
    let channels = variant.output_channels();
    let mut data = vec![0.0f32; channels * H * W];
    for &(part, x, y, value) in peaks {
      data[part * H * W + y * W + x] = value;
    }
    Tensor::new(vec![1, channels, H, W], data).unwrap()
  }

  #[test]
  fn single_peak_becomes_keypoint() {
    let extractor = PoseExtractor::new(ModelVariant::Coco);
    let tensor = heatmaps(ModelVariant::Coco, &[(3, 5, 7, 0.8)]);
    let keypoints = extractor.keypoints(&tensor).unwrap();
    assert_eq!(keypoints.len(), 18);
    assert_eq!(
      keypoints[3],
      Some(Keypoint {
        x: 5,
        y: 7,
        confidence: 0.8
      })
    );
    assert!(keypoints.iter().enumerate().all(|(i, k)| i == 3 || k.is_none()));
  }

  #[test]
  fn pair_is_scaled_to_source_pixels() {
    let extractor = PoseExtractor::new(ModelVariant::Coco);
    // 连接 (1, 2)
    let tensor = heatmaps(ModelVariant::Coco, &[(1, 4, 6, 0.9), (2, 10, 12, 0.5)]);
    // 224 / 28 = 8, 300 / 28 = 10.7 -> 10
    let segments = extractor.extract(&tensor, 224, 300).unwrap();
    assert_eq!(
      segments,
      vec![PoseSegment {
        from: Point::new(32, 60),
        to: Point::new(80, 120),
      }]
    );
  }

  #[test]
  fn weak_peak_is_absent_and_pairs_are_omitted() {
    let extractor = PoseExtractor::new(ModelVariant::Coco);
    // 部位 2 的最大值恰好等于下限
    let tensor = heatmaps(ModelVariant::Coco, &[(1, 4, 6, 0.9), (2, 10, 12, 0.1)]);
    let keypoints = extractor.keypoints(&tensor).unwrap();
    assert_eq!(keypoints[2], None);
    assert!(extractor.extract(&tensor, 224, 224).unwrap().is_empty());
  }

  #[test]
  fn keypoint_at_origin_is_present() {
    let extractor = PoseExtractor::new(ModelVariant::Mpi);
    // 连接 (0, 1)
    let tensor = heatmaps(ModelVariant::Mpi, &[(0, 0, 0, 0.7), (1, 2, 3, 0.7)]);
    let segments = extractor.extract(&tensor, 56, 56).unwrap();
    assert_eq!(
      segments,
      vec![PoseSegment {
        from: Point::new(0, 0),
        to: Point::new(4, 6),
      }]
    );
  }

  #[test]
  fn first_maximum_wins_on_ties() {
    let extractor = PoseExtractor::new(ModelVariant::Hand);
    let tensor = heatmaps(ModelVariant::Hand, &[(0, 9, 2, 0.5), (0, 1, 20, 0.5)]);
    let keypoints = extractor.keypoints(&tensor).unwrap();
    assert_eq!(keypoints.len(), 22);
    assert_eq!(keypoints[0].map(|k| (k.x, k.y)), Some((9, 2)));
  }

  #[test]
  fn wrong_layout_is_an_error() {
    let extractor = PoseExtractor::new(ModelVariant::Coco);
    let tensor = heatmaps(ModelVariant::Mpi, &[]);
    assert_eq!(
      extractor.keypoints(&tensor).unwrap_err(),
      ExtractError::VariantMismatch {
        expected: 19,
        actual: 16
      }
    );

    let flat = Tensor::new(vec![7], vec![0.0; 7]).unwrap();
    assert!(matches!(
      extractor.keypoints(&flat),
      Err(ExtractError::Shape(_))
    ));
  }

  #[test]
  fn extraction_is_deterministic() {
    let extractor = PoseExtractor::new(ModelVariant::Coco);
    let tensor = heatmaps(
      ModelVariant::Coco,
      &[(0, 1, 1, 0.4), (1, 2, 2, 0.4), (14, 3, 3, 0.4), (16, 4, 4, 0.4)],
    );
    let first = extractor.extract(&tensor, 640, 480).unwrap();
    let second = extractor.extract(&tensor, 640, 480).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
  }
}
