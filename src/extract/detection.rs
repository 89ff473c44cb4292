// 该文件是 Xunying （寻影） 项目的一部分。
// src/extract/detection.rs - 检测框提取
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

use crate::{model::Tensor, result::DetectionBox};

/// 每条检测记录: [batch_id, class_id, confidence, left, top, right, bottom]
pub const DETECTION_STRIDE: usize = 7;
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct DetectionExtractor {
  threshold: f32,
}

impl Default for DetectionExtractor {
  fn default() -> Self {
    Self {
      threshold: DEFAULT_DETECTION_THRESHOLD,
    }
  }
}

impl DetectionExtractor {
  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  /// 置信度严格大于阈值的记录被保留，归一化坐标乘以源图像尺寸
  pub fn extract(
    &self,
    tensor: &Tensor,
    source_width: u32,
    source_height: u32,
  ) -> Vec<DetectionBox> {
    let w = source_width as f32;
    let h = source_height as f32;

    let boxes = tensor
      .data()
      .chunks_exact(DETECTION_STRIDE)
      .filter(|record| record[2] > self.threshold)
      .map(|record| DetectionBox {
        left: (record[3] * w) as i32,
        top: (record[4] * h) as i32,
        right: (record[5] * w) as i32,
        bottom: (record[6] * h) as i32,
        confidence: record[2],
      })
      .collect::<Vec<_>>();

    debug!("检测到 {} 个目标 (阈值 {})", boxes.len(), self.threshold);
    boxes
  }
}
