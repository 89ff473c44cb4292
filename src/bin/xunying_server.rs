// 该文件是 Xunying （寻影） 项目的一部分。
// src/bin/xunying_server.rs - 姿态/人脸检测 UDP 服务端
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

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use xunying::{
  extract::{DEFAULT_DETECTION_THRESHOLD, DetectionMode},
  model::{InferenceAdapter, ModelConfig, load_backend},
  task::{ServeTask, ServerContext, Task, shutdown_flag},
  transport::{
    DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_PENDING, ReassemblyConfig, ServerSession,
  },
};

/// Xunying 检测服务参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 服务模式: pose（姿态）或 face（人脸）
  #[arg(long, value_name = "MODE", default_value = "pose")]
  pub mode: DetectionMode,

  /// 监听地址，默认 0.0.0.0 加模式默认端口（pose 8080，face 8081）
  #[arg(long, value_name = "ADDR")]
  pub bind: Option<String>,

  /// 模型地址，例如 onnx:///models/pose.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 模型配置文件 (JSON)，覆盖输入尺寸与归一化参数
  #[arg(long, value_name = "FILE")]
  pub model_config: Option<PathBuf>,

  /// 人脸检测置信度阈值，严格大于该值才输出
  #[arg(long, value_name = "THRESHOLD", default_value_t = DEFAULT_DETECTION_THRESHOLD)]
  pub threshold: f32,

  /// 分片重组超时（毫秒）
  #[arg(
    long,
    value_name = "MS",
    default_value_t = 300,
    value_parser = clap::value_parser!(u64).range(1..)
  )]
  pub reassembly_timeout_ms: u64,

  /// 单帧最大字节数
  #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_FRAME_BYTES)]
  pub max_frame_bytes: usize,

  /// 处理指定帧数后退出，0 表示不限制
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let bind = args
    .bind
    .clone()
    .unwrap_or_else(|| format!("0.0.0.0:{}", args.mode.default_port()));

  info!("服务模式: {}", args.mode);
  info!("模型地址: {}", args.model);
  info!("监听地址: {}", bind);

  let mut blob = args.mode.default_blob();
  if let Some(path) = &args.model_config {
    info!("模型配置: {}", path.display());
    blob = ModelConfig::load(path)?.apply(blob)?;
  }

  let backend = load_backend(&args.model, &blob)?;
  let adapter = InferenceAdapter::new(backend, blob);
  let mut context = ServerContext::new(args.mode, adapter, args.threshold)?;

  let config = ReassemblyConfig {
    timeout: Duration::from_millis(args.reassembly_timeout_ms),
    max_pending: DEFAULT_MAX_PENDING,
    max_frame_bytes: args.max_frame_bytes,
  };
  let mut session = ServerSession::bind(bind.as_str(), config)?.with_shutdown(shutdown_flag()?);

  ServeTask::default()
    .with_frame_number((args.frame_number > 0).then_some(args.frame_number))
    .run_task(&mut session, &mut context)?;

  info!("服务已退出");
  Ok(())
}
