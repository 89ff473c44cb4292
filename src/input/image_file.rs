// 该文件是 Xunying （寻影） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
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

use image::ImageReader;
use tracing::{error, info};
use url::Url;

use super::{CaptureError, CaptureSource, FramePacer, query_param};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, PixelFormat},
};

/// 图像文件输入，`image:///path/file.jpg?repeat=N&fps=F`
///
/// `repeat=0` 表示无限重复，默认只输出一次。
pub struct ImageFileSource {
  frame: Frame,
  repeat: u64,
  emitted: u64,
  fps: Option<f64>,
  pacer: FramePacer,
}

impl FromUrlWithScheme for ImageFileSource {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileSource {
  type Error = CaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(CaptureError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = url.path();
    let open_error = |reason: String| CaptureError::Open {
      source_name: path.to_string(),
      reason,
    };
    let image = ImageReader::open(path)
      .map_err(|e| open_error(e.to_string()))?
      .decode()
      .map_err(|e| open_error(e.to_string()))?
      .to_rgb8();
    let frame = Frame::from_rgb_image(&image, PixelFormat::Bgr8)?;

    let repeat = query_param(url, "repeat")?.unwrap_or(1);
    let fps = query_param(url, "fps")?;
    info!(
      "图像文件: {} ({}x{}), 重复 {} 次",
      path,
      frame.width(),
      frame.height(),
      repeat
    );

    Ok(Self {
      frame,
      repeat,
      emitted: 0,
      fps,
      pacer: FramePacer::new(fps),
    })
  }
}

impl CaptureSource for ImageFileSource {
  fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
    if self.repeat != 0 && self.emitted >= self.repeat {
      return Ok(None);
    }
    self.pacer.wait();
    self.emitted += 1;
    Ok(Some(self.frame.clone()))
  }

  fn width(&self) -> u32 {
    self.frame.width()
  }

  fn height(&self) -> u32 {
    self.frame.height()
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn repeats_the_image() {
    let dir = std::env::temp_dir().join(format!("xunying-image-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("frame.png");
    RgbImage::from_pixel(6, 4, image::Rgb([200, 100, 50]))
      .save(&path)
      .unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("image://{}?repeat=2", url.path())).unwrap();
    let mut source = ImageFileSource::from_url(&url).unwrap();

    let frame = source.read_frame().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (6, 4));
    assert_eq!(&frame.data()[..3], &[50, 100, 200]);
    assert!(source.read_frame().unwrap().is_some());
    assert!(source.read_frame().unwrap().is_none());

    std::fs::remove_dir_all(&dir).ok();
  }

  #[test]
  fn missing_file_fails_to_open() {
    let url = Url::parse("image:///nonexistent/xunying.png").unwrap();
    assert!(matches!(
      ImageFileSource::from_url(&url),
      Err(CaptureError::Open { .. })
    ));
  }
}
