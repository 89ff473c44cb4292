// 该文件是 Xunying （寻影） 项目的一部分。
// src/model/tract_backend.rs - 基于 tract 的 ONNX 推理后端
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

use tracing::{debug, error, info};
use tract_onnx::prelude::{
  Datum, Framework, InferenceFact, InferenceModelExt, IntoTensor, TypedModel,
  TypedRunnableModel, tract_ndarray, tvec,
};
use url::Url;

use super::{InferenceBackend, ModelError, Tensor};
use crate::{FromUrl, FromUrlWithScheme};

pub struct TractBackend {
  model: TypedRunnableModel<TypedModel>,
}

pub struct TractBackendBuilder {
  model_path: String,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for TractBackendBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractBackendBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::UnsupportedScheme(url.scheme().to_string()));
    }

    Ok(TractBackendBuilder {
      model_path: url.path().to_string(),
      width: 224,
      height: 224,
    })
  }
}

impl TractBackendBuilder {
  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.width = width;
    self.height = height;
    self
  }

  pub fn build(self) -> Result<TractBackend, ModelError> {
    info!("加载模型文件: {}", self.model_path);
    let load_error = |e: tract_onnx::prelude::TractError| {
      error!("模型加载失败: {:#}", e);
      ModelError::Load {
        path: self.model_path.clone(),
        reason: format!("{:#}", e),
      }
    };

    let model = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(load_error)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(
          f32::datum_type(),
          tvec!(1, 3, self.height as usize, self.width as usize),
        ),
      )
      .map_err(load_error)?
      .into_optimized()
      .map_err(load_error)?
      .into_runnable()
      .map_err(load_error)?;

    info!("模型加载完成");
    Ok(TractBackend { model })
  }
}

impl InferenceBackend for TractBackend {
  fn name(&self) -> &'static str {
    "tract"
  }

  fn forward(&mut self, input: &Tensor) -> Result<Tensor, ModelError> {
    let array = tract_ndarray::ArrayD::from_shape_vec(
      tract_ndarray::IxDyn(input.shape()),
      input.data().to_vec(),
    )
    .map_err(|e| ModelError::Forward(e.to_string()))?;

    let outputs = self
      .model
      .run(tvec!(array.into_tensor().into()))
      .map_err(|e| ModelError::Forward(format!("{:#}", e)))?;

    let output = outputs
      .first()
      .ok_or_else(|| ModelError::Forward("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| ModelError::Forward(format!("模型输出不是 f32: {:#}", e)))?;

    debug!("tract 输出形状: {:?}", view.shape());
    Ok(Tensor::new(view.shape().to_vec(), view.iter().copied().collect())?)
  }
}
