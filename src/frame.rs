// 该文件是 Xunying （寻影） 项目的一部分。
// src/frame.rs - 图像帧定义
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

use image::RgbImage;
use thiserror::Error;

/// 像素编码，均为 8 位紧密排列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  Bgr8,
  Rgb8,
  Gray8,
}

impl PixelFormat {
  pub fn channels(&self) -> usize {
    match self {
      PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
      PixelFormat::Gray8 => 1,
    }
  }

  pub fn to_wire(self) -> u8 {
    match self {
      PixelFormat::Bgr8 => 0,
      PixelFormat::Rgb8 => 1,
      PixelFormat::Gray8 => 2,
    }
  }

  pub fn from_wire(value: u8) -> Option<Self> {
    match value {
      0 => Some(PixelFormat::Bgr8),
      1 => Some(PixelFormat::Rgb8),
      2 => Some(PixelFormat::Gray8),
      _ => None,
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("图像尺寸为零: {0}x{1}")]
  EmptyShape(u32, u32),
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 一帧采集到的图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  width: u32,
  height: u32,
  format: PixelFormat,
  data: Box<[u8]>,
}

/// 计算给定尺寸与编码下的像素字节数，溢出时返回 None
pub fn expected_len(width: u32, height: u32, format: PixelFormat) -> Option<usize> {
  (width as usize)
    .checked_mul(height as usize)
    .and_then(|v| v.checked_mul(format.channels()))
}

impl Frame {
  pub fn new(
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::EmptyShape(width, height));
    }

    let expected = expected_len(width, height, format).ok_or(FrameError::LengthMismatch {
      expected: usize::MAX,
      actual: data.len(),
    })?;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      format,
      data: data.into_boxed_slice(),
    })
  }

  /// 全零图像，用于模型预热
  pub fn blank(width: u32, height: u32, format: PixelFormat) -> Result<Self, FrameError> {
    let len = expected_len(width, height, format).unwrap_or(0);
    Self::new(width, height, format, vec![0u8; len])
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn channels(&self) -> usize {
    self.format.channels()
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  /// 转换为 RGB 图像，BGR 会交换通道，灰度图会复制到三个通道
  pub fn to_rgb_image(&self) -> RgbImage {
    let rgb = self.to_three_channel(true);
    RgbImage::from_raw(self.width, self.height, rgb).unwrap_or_default()
  }

  /// 展开为三通道字节序列
  ///
  /// `as_rgb` 为 true 时输出 RGB 顺序，否则保持帧本身的通道顺序。
  pub fn to_three_channel(&self, as_rgb: bool) -> Vec<u8> {
    match self.format {
      PixelFormat::Gray8 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
      PixelFormat::Rgb8 => self.data.to_vec(),
      PixelFormat::Bgr8 if as_rgb => self
        .data
        .chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect(),
      PixelFormat::Bgr8 => self.data.to_vec(),
    }
  }

  /// 从 RGB 图像构造指定编码的帧
  pub fn from_rgb_image(image: &RgbImage, format: PixelFormat) -> Result<Self, FrameError> {
    let (width, height) = image.dimensions();
    let raw = image.as_raw();
    let data = match format {
      PixelFormat::Rgb8 => raw.clone(),
      PixelFormat::Bgr8 => raw
        .chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect(),
      PixelFormat::Gray8 => raw
        .chunks_exact(3)
        .map(|px| {
          let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
          luma.round().clamp(0.0, 255.0) as u8
        })
        .collect(),
    };
    Self::new(width, height, format, data)
  }
}
