// 该文件是 Xunying （寻影） 项目的一部分。
// src/bin/xunying_client.rs - 摄像头推流客户端
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

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use tracing::info;

use xunying::{
  FromUrl,
  codec::{Compression, FrameCodec},
  input::{InputWrapper, parse_source},
  protocol::DEFAULT_MTU,
  task::{StreamTask, Task, shutdown_flag},
  transport::ClientSession,
};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum CompressionArg {
  Raw,
  Jpeg,
}

/// Xunying 推流客户端参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源: 设备编号 (0)、v4l2:///dev/video0、image:///path.jpg 或 pattern://
  #[arg(long, value_name = "SOURCE")]
  pub input: String,

  /// 服务端地址，例如 127.0.0.1:8080
  #[arg(long, value_name = "ADDR")]
  pub server: String,

  /// 每个数据报的最大字节数
  #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MTU)]
  pub mtu: usize,

  /// 帧负载压缩方式
  #[arg(long, value_enum, default_value_t = CompressionArg::Raw)]
  pub compression: CompressionArg,

  /// JPEG 质量 (1-100)
  #[arg(long, value_name = "QUALITY", default_value_t = 80)]
  pub jpeg_quality: u8,

  /// 以 JSON 行输出结果
  #[arg(long)]
  pub json: bool,

  /// 发送指定帧数后退出，0 表示不限制
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  if !(1..=100).contains(&args.jpeg_quality) {
    bail!("JPEG 质量必须在 1 到 100 之间: {}", args.jpeg_quality);
  }

  let compression = match args.compression {
    CompressionArg::Raw => Compression::Raw,
    CompressionArg::Jpeg => Compression::Jpeg {
      quality: args.jpeg_quality,
    },
  };

  let source_url = parse_source(&args.input)?;
  info!("输入来源: {}", source_url);
  info!("服务端地址: {}", args.server);

  let mut source = InputWrapper::from_url(&source_url)?;
  let codec = FrameCodec::default()
    .with_mtu(args.mtu)
    .with_compression(compression);
  let mut client = ClientSession::connect(args.server.as_str(), codec)?;

  StreamTask::default()
    .with_frame_number((args.frame_number > 0).then_some(args.frame_number))
    .with_json(args.json)
    .with_shutdown(shutdown_flag()?)
    .run_task(&mut source, &mut client)?;

  Ok(())
}
