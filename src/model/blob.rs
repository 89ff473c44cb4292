// 该文件是 Xunying （寻影） 项目的一部分。
// src/model/blob.rs - 模型输入张量构造
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

use image::{RgbImage, imageops::FilterType};

use super::tensor::{Tensor, TensorError};
use crate::frame::Frame;

const BLOB_CHANNELS: usize = 3;

/// 归一化参数
///
/// 输出为 `[1, 3, height, width]`，值为 `(pixel - mean[c]) * scale`。
/// `swap_rb` 在减均值之前交换第 0 与第 2 通道。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobParams {
  pub width: u32,
  pub height: u32,
  pub mean: [f32; 3],
  pub scale: f32,
  pub swap_rb: bool,
}

impl BlobParams {
  /// OpenPose 系列模型
  pub fn pose() -> Self {
    Self {
      width: 224,
      height: 224,
      mean: [0.0, 0.0, 0.0],
      scale: 1.0,
      swap_rb: false,
    }
  }

  /// res10 SSD 人脸检测模型
  pub fn face() -> Self {
    Self {
      width: 300,
      height: 300,
      mean: [104.0, 177.0, 123.0],
      scale: 1.0,
      swap_rb: false,
    }
  }

  pub fn shape(&self) -> [usize; 4] {
    [1, BLOB_CHANNELS, self.height as usize, self.width as usize]
  }

  /// 构造归一化后的 NCHW 输入张量
  pub fn build(&self, frame: &Frame) -> Result<Tensor, TensorError> {
    let pixels = frame.to_three_channel(false);
    let source = RgbImage::from_raw(frame.width(), frame.height(), pixels).unwrap_or_default();
    let resized = if source.dimensions() == (self.width, self.height) {
      source
    } else {
      image::imageops::resize(&source, self.width, self.height, FilterType::Triangle)
    };

    let plane = (self.width as usize) * (self.height as usize);
    let mut data = vec![0f32; BLOB_CHANNELS * plane];
    for (index, pixel) in resized.pixels().enumerate() {
      for c in 0..BLOB_CHANNELS {
        let src = if self.swap_rb { BLOB_CHANNELS - 1 - c } else { c };
        data[c * plane + index] = (pixel[src] as f32 - self.mean[c]) * self.scale;
      }
    }

    Tensor::new(self.shape().to_vec(), data)
  }
}
