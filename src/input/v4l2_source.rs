// 该文件是 Xunying （寻影） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
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

use std::pin::Pin;

use tracing::{info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{CaptureError, CaptureSource, query_param};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, PixelFormat},
};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

/// V4L2 摄像头输入源，输出 BGR 帧
///
/// v4l 的 Stream 需要引用 Device，这里用 Pin<Box<Device>> 固定设备的
/// 内存地址，从而可以安全地创建引用它的 Stream。
pub struct V4l2Source {
  /// 捕获流（生命周期与 device 关联，必须先于 device 释放）
  stream: Option<Stream<'static>>,
  /// V4L2 设备
  device: Pin<Box<Device>>,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for V4l2Source {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2Source {
  type Error = CaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(CaptureError::SchemeMismatch(url.scheme().to_string()));
    }
    let width = query_param(url, "width")?.unwrap_or(DEFAULT_WIDTH);
    let height = query_param(url, "height")?.unwrap_or(DEFAULT_HEIGHT);
    Self::open(url.path(), width, height)
  }
}

impl V4l2Source {
  /// 打开设备，设备不可用属于致命错误
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CaptureError> {
    let open_error = |reason: String| CaptureError::Open {
      source_name: device_path.to_string(),
      reason,
    };

    let device = Box::pin(Device::with_path(device_path).map_err(|e| open_error(e.to_string()))?);

    // 设置视频格式
    let mut format = device.format().map_err(|e| open_error(e.to_string()))?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| open_error(e.to_string()))?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(open_error(format!("设备不支持 YUYV，实际为 {}", format.fourcc)));
    }

    let mut source = Self {
      stream: None,
      device,
      width: format.width,
      height: format.height,
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上，不会移动；
    // stream 存储在同一个结构体中，并在 Drop 中先于 device 释放。
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, STREAM_BUFFERS)
        .map_err(|e| open_error(format!("无法创建捕获流: {}", e)))?
    };
    source.stream = Some(stream);

    info!(
      "V4L2 设备已打开: {} ({}x{})",
      device_path, source.width, source.height
    );
    Ok(source)
  }

  /// 将 YUYV 格式转换为 BGR
  fn yuyv_to_bgr(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut bgr = Vec::with_capacity((width * height * 3) as usize);

    for chunk in yuyv.chunks_exact(4) {
      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      for y in [y0, y1] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        bgr.extend_from_slice(&[b, g, r]);
      }
    }

    bgr
  }
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
  }
}

impl CaptureSource for V4l2Source {
  fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(None);
    };

    let (buffer, _meta) = stream
      .next()
      .map_err(|e| CaptureError::Read(e.to_string()))?;

    let mut bgr = Self::yuyv_to_bgr(buffer, self.width, self.height);
    let expected = (self.width * self.height * 3) as usize;
    if bgr.len() < expected {
      warn!("帧数据不完整: {} / {} 字节", bgr.len(), expected);
      return Err(CaptureError::Read(format!(
        "帧数据不完整: {} / {} 字节",
        bgr.len(),
        expected
      )));
    }
    bgr.truncate(expected);

    Ok(Some(Frame::new(
      self.width,
      self.height,
      PixelFormat::Bgr8,
      bgr,
    )?))
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    Some(30.0) // V4L2 默认帧率
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_gray_maps_to_gray_bgr() {
    let bgr = V4l2Source::yuyv_to_bgr(&[100, 128, 200, 128], 2, 1);
    assert_eq!(bgr, vec![100, 100, 100, 200, 200, 200]);
  }
}
