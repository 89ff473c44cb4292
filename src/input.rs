// 该文件是 Xunying （寻影） 项目的一部分。
// src/input.rs - 视频/图像采集源
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

use std::{
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameError},
};

mod pattern;
pub use self::pattern::PatternSource;

#[cfg(feature = "read_image_file")]
mod image_file;
#[cfg(feature = "read_image_file")]
pub use self::image_file::ImageFileSource;

#[cfg(feature = "v4l2_input")]
mod v4l2_source;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2_source::V4l2Source;

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("无法打开采集源 {source_name}: {reason}")]
  Open { source_name: String, reason: String },
  #[error("无法读取帧: {0}")]
  Read(String),
  #[error("无效的采集源地址: {0}")]
  InvalidUrl(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("帧数据无效: {0}")]
  Frame(#[from] FrameError),
}

/// 采集源，`read_frame` 返回 `None` 表示流结束
///
/// 关闭设备由 `Drop` 完成。
pub trait CaptureSource {
  fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
  fn width(&self) -> u32;
  fn height(&self) -> u32;
  fn fps(&self) -> Option<f64>;
}

/// 将命令行参数解析为采集源地址，纯数字视为 V4L2 设备编号
pub fn parse_source(source: &str) -> Result<Url, CaptureError> {
  if let Ok(index) = source.parse::<u32>() {
    return Url::parse(&format!("v4l2:///dev/video{}", index))
      .map_err(|e| CaptureError::InvalidUrl(format!("{}: {}", source, e)));
  }
  Url::parse(source).map_err(|e| CaptureError::InvalidUrl(format!("{}: {}", source, e)))
}

/// 从 URL 查询参数中读取数值
pub(crate) fn query_param<T: std::str::FromStr>(
  url: &Url,
  key: &str,
) -> Result<Option<T>, CaptureError> {
  match url.query_pairs().find(|(k, _)| k == key) {
    Some((_, v)) => v
      .parse::<T>()
      .map(Some)
      .map_err(|_| CaptureError::InvalidUrl(format!("{}: 参数 {}={} 无效", url, key, v))),
    None => Ok(None),
  }
}

/// 按固定帧率节流，模拟设备的原生采集速度
#[derive(Debug)]
pub(crate) struct FramePacer {
  interval: Option<Duration>,
  last: Option<Instant>,
}

impl FramePacer {
  pub(crate) fn new(fps: Option<f64>) -> Self {
    let interval = fps
      .filter(|fps| *fps > 0.0 && fps.is_finite())
      .map(|fps| Duration::from_secs_f64(1.0 / fps));
    Self {
      interval,
      last: None,
    }
  }

  pub(crate) fn wait(&mut self) {
    if let (Some(interval), Some(last)) = (self.interval, self.last) {
      let elapsed = last.elapsed();
      if elapsed < interval {
        thread::sleep(interval - elapsed);
      }
    }
    self.last = Some(Instant::now());
  }
}

pub enum InputWrapper {
  Pattern(PatternSource),
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileSource),
  #[cfg(feature = "v4l2_input")]
  V4l2(V4l2Source),
}

impl FromUrl for InputWrapper {
  type Error = CaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      PatternSource::SCHEME => Ok(InputWrapper::Pattern(PatternSource::from_url(url)?)),
      #[cfg(feature = "read_image_file")]
      ImageFileSource::SCHEME => Ok(InputWrapper::ImageFile(ImageFileSource::from_url(url)?)),
      #[cfg(feature = "v4l2_input")]
      V4l2Source::SCHEME => Ok(InputWrapper::V4l2(V4l2Source::from_url(url)?)),
      other => Err(CaptureError::SchemeMismatch(other.to_string())),
    }
  }
}

impl CaptureSource for InputWrapper {
  fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
    match self {
      InputWrapper::Pattern(source) => source.read_frame(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(source) => source.read_frame(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(source) => source.read_frame(),
    }
  }

  fn width(&self) -> u32 {
    match self {
      InputWrapper::Pattern(source) => source.width(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(source) => source.width(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(source) => source.width(),
    }
  }

  fn height(&self) -> u32 {
    match self {
      InputWrapper::Pattern(source) => source.height(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(source) => source.height(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(source) => source.height(),
    }
  }

  fn fps(&self) -> Option<f64> {
    match self {
      InputWrapper::Pattern(source) => source.fps(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(source) => source.fps(),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(source) => source.fps(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn device_index_maps_to_v4l2() {
    let url = parse_source("0").unwrap();
    assert_eq!(url.scheme(), "v4l2");
    assert_eq!(url.path(), "/dev/video0");
  }

  #[test]
  fn urls_pass_through() {
    let url = parse_source("pattern://?width=8&height=4").unwrap();
    assert_eq!(url.scheme(), "pattern");
    assert!(parse_source("not a url").is_err());
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera.local/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(CaptureError::SchemeMismatch(s)) if s == "rtsp"
    ));
  }

  #[test]
  fn query_params_are_typed() {
    let url = Url::parse("pattern://?width=8&fps=abc").unwrap();
    assert_eq!(query_param::<u32>(&url, "width").unwrap(), Some(8));
    assert_eq!(query_param::<u32>(&url, "height").unwrap(), None);
    assert!(query_param::<f64>(&url, "fps").is_err());
  }
}
