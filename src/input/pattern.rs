// 该文件是 Xunying （寻影） 项目的一部分。
// src/input/pattern.rs - 合成测试图案输入源
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

use tracing::info;
use url::Url;

use super::{CaptureError, CaptureSource, FramePacer, query_param};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, PixelFormat},
};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// 滚动渐变图案，`pattern://?width=W&height=H&frames=N&fps=F`
///
/// 不指定 `frames` 时无限输出。
pub struct PatternSource {
  width: u32,
  height: u32,
  frames: Option<u64>,
  fps: Option<f64>,
  index: u64,
  pacer: FramePacer,
}

impl FromUrlWithScheme for PatternSource {
  const SCHEME: &'static str = "pattern";
}

impl FromUrl for PatternSource {
  type Error = CaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(CaptureError::SchemeMismatch(url.scheme().to_string()));
    }

    let width = query_param(url, "width")?.unwrap_or(DEFAULT_WIDTH);
    let height = query_param(url, "height")?.unwrap_or(DEFAULT_HEIGHT);
    if width == 0 || height == 0 {
      return Err(CaptureError::Open {
        source_name: url.to_string(),
        reason: format!("尺寸无效: {}x{}", width, height),
      });
    }
    let frames = query_param(url, "frames")?;
    let fps = query_param(url, "fps")?;

    info!("测试图案: {}x{}, 帧数 {:?}, 帧率 {:?}", width, height, frames, fps);
    Ok(Self::new(width, height, frames, fps))
  }
}

impl PatternSource {
  pub fn new(width: u32, height: u32, frames: Option<u64>, fps: Option<f64>) -> Self {
    Self {
      width,
      height,
      frames,
      fps,
      index: 0,
      pacer: FramePacer::new(fps),
    }
  }

  fn render(&self) -> Result<Frame, CaptureError> {
    let shift = self.index as usize;
    let (width, height) = (self.width as usize, self.height as usize);
    let mut data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
      for x in 0..width {
        let b = ((x + shift) * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let r = ((x + y + shift) % 256) as u8;
        data.extend_from_slice(&[b, g, r]);
      }
    }
    Ok(Frame::new(self.width, self.height, PixelFormat::Bgr8, data)?)
  }
}

impl CaptureSource for PatternSource {
  fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
    if self.frames.is_some_and(|frames| self.index >= frames) {
      return Ok(None);
    }
    self.pacer.wait();
    let frame = self.render()?;
    self.index += 1;
    Ok(Some(frame))
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_requested_number_of_frames() {
    let url = Url::parse("pattern://?width=16&height=8&frames=3").unwrap();
    let mut source = PatternSource::from_url(&url).unwrap();
    assert_eq!((source.width(), source.height()), (16, 8));

    let mut count = 0;
    while let Some(frame) = source.read_frame().unwrap() {
      assert_eq!(frame.data().len(), 16 * 8 * 3);
      assert_eq!(frame.format(), PixelFormat::Bgr8);
      count += 1;
    }
    assert_eq!(count, 3);
  }

  #[test]
  fn frames_change_over_time() {
    let mut source = PatternSource::new(8, 8, Some(2), None);
    let first = source.read_frame().unwrap().unwrap();
    let second = source.read_frame().unwrap().unwrap();
    assert_ne!(first, second);
  }

  #[test]
  fn zero_size_is_rejected() {
    let url = Url::parse("pattern://?width=0").unwrap();
    assert!(matches!(
      PatternSource::from_url(&url),
      Err(CaptureError::Open { .. })
    ));
  }
}
