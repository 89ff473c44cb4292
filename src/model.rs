// 该文件是 Xunying （寻影） 项目的一部分。
// src/model.rs - 推理适配层
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

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::frame::Frame;
#[cfg(feature = "backend-tract")]
use crate::{FromUrl, FromUrlWithScheme};

mod blob;
mod tensor;
#[cfg(feature = "backend-tract")]
mod tract_backend;

pub use self::blob::BlobParams;
pub use self::tensor::{Tensor, TensorError};
#[cfg(feature = "backend-tract")]
pub use self::tract_backend::{TractBackend, TractBackendBuilder};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {path}: {reason}")]
  Load { path: String, reason: String },
  #[error("模型推理错误: {0}")]
  Forward(String),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("模型配置错误: {0}")]
  Config(String),
  #[error("不支持的模型方案: {0}")]
  UnsupportedScheme(String),
}

/// 外部推理后端
///
/// 给定归一化后的输入张量，返回模型原始输出。
pub trait InferenceBackend {
  fn name(&self) -> &'static str;
  fn forward(&mut self, input: &Tensor) -> Result<Tensor, ModelError>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
  fn name(&self) -> &'static str {
    (**self).name()
  }

  fn forward(&mut self, input: &Tensor) -> Result<Tensor, ModelError> {
    (**self).forward(input)
  }
}

/// 模型配置文件，所有字段可选，覆盖模式默认值
///
/// ```json
/// { "width": 368, "height": 368, "mean": [0, 0, 0], "scale": 0.003921, "swap_rb": false }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
  pub width: Option<u32>,
  pub height: Option<u32>,
  pub mean: Option<[f32; 3]>,
  pub scale: Option<f32>,
  pub swap_rb: Option<bool>,
}

impl ModelConfig {
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
      .map_err(|e| ModelError::Config(format!("{}: {}", path.display(), e)))?;
    Self::parse(&text).map_err(|e| ModelError::Config(format!("{}: {}", path.display(), e)))
  }

  pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(text)
  }

  pub fn apply(&self, base: BlobParams) -> Result<BlobParams, ModelError> {
    let params = BlobParams {
      width: self.width.unwrap_or(base.width),
      height: self.height.unwrap_or(base.height),
      mean: self.mean.unwrap_or(base.mean),
      scale: self.scale.unwrap_or(base.scale),
      swap_rb: self.swap_rb.unwrap_or(base.swap_rb),
    };
    if params.width == 0 || params.height == 0 {
      return Err(ModelError::Config(format!(
        "模型输入尺寸无效: {}x{}",
        params.width, params.height
      )));
    }
    Ok(params)
  }
}

/// 将帧转换为模型输入并调用后端
pub struct InferenceAdapter<B> {
  backend: B,
  blob: BlobParams,
}

impl<B: InferenceBackend> InferenceAdapter<B> {
  pub fn new(backend: B, blob: BlobParams) -> Self {
    info!(
      "推理后端: {}, 输入尺寸: {}x{}",
      backend.name(),
      blob.width,
      blob.height
    );
    Self { backend, blob }
  }

  pub fn blob(&self) -> &BlobParams {
    &self.blob
  }

  pub fn infer(&mut self, frame: &Frame) -> Result<Tensor, ModelError> {
    let input = self.blob.build(frame)?;
    debug!("执行模型推理，输入形状: {:?}", input.shape());
    let output = self.backend.forward(&input)?;
    debug!("模型输出形状: {:?}", output.shape());
    Ok(output)
  }
}

/// 根据 URL 加载推理后端
///
/// 目前支持 `onnx:///path/model.onnx`（需要 `backend-tract` 特性）。
pub fn load_backend(
  url: &Url,
  #[cfg_attr(not(feature = "backend-tract"), allow(unused_variables))] blob: &BlobParams,
) -> Result<Box<dyn InferenceBackend>, ModelError> {
  match url.scheme() {
    #[cfg(feature = "backend-tract")]
    TractBackendBuilder::SCHEME => {
      let backend = TractBackendBuilder::from_url(url)?
        .input_size(blob.width, blob.height)
        .build()?;
      Ok(Box::new(backend))
    }
    other => Err(ModelError::UnsupportedScheme(other.to_string())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::PixelFormat;

  /// 确定性的后端：输出为输入每个通道的均值
  struct ChannelMean;

  impl InferenceBackend for ChannelMean {
    fn name(&self) -> &'static str {
      "channel-mean"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor, ModelError> {
      let (_, c, h, w) = input
        .dims4()
        .ok_or_else(|| ModelError::Forward("需要四维输入".to_string()))?;
      let plane = h * w;
      let data = input
        .data()
        .chunks(plane)
        .take(c)
        .map(|p| p.iter().sum::<f32>() / plane as f32)
        .collect();
      Ok(Tensor::new(vec![1, c, 1, 1], data)?)
    }
  }

  #[test]
  fn infer_is_deterministic() {
    let data = (0..(40 * 30 * 3)).map(|i| (i % 255) as u8).collect();
    let frame = Frame::new(40, 30, PixelFormat::Bgr8, data).unwrap();
    let mut adapter = InferenceAdapter::new(ChannelMean, BlobParams::face());

    let first = adapter.infer(&frame).unwrap();
    let second = adapter.infer(&frame).unwrap();
    assert_eq!(first.shape(), &[1, 3, 1, 1]);
    assert_eq!(first, second);
  }

  #[test]
  fn config_overrides_defaults() {
    let config = ModelConfig::parse(r#"{"width": 368, "scale": 0.5}"#).unwrap();
    let params = config.apply(BlobParams::pose()).unwrap();
    assert_eq!(params.width, 368);
    assert_eq!(params.height, 224);
    assert_eq!(params.scale, 0.5);
    assert!(!params.swap_rb);
  }

  #[test]
  fn config_rejects_bad_input() {
    assert!(ModelConfig::parse(r#"{"depth": 3}"#).is_err());
    let config = ModelConfig::parse(r#"{"height": 0}"#).unwrap();
    assert!(matches!(
      config.apply(BlobParams::face()),
      Err(ModelError::Config(_))
    ));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("caffe:///models/pose.caffemodel").unwrap();
    assert!(matches!(
      load_backend(&url, &BlobParams::pose()),
      Err(ModelError::UnsupportedScheme(s)) if s == "caffe"
    ));
  }
}
