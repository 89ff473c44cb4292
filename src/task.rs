// 该文件是 Xunying （寻影） 项目的一部分。
// src/task.rs - 服务端处理循环与客户端推流循环
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  extract::{DetectionMode, ExtractError, Extractor},
  frame::{Frame, FrameError, PixelFormat},
  input::CaptureSource,
  model::{InferenceAdapter, InferenceBackend, ModelError},
  result::ResultSet,
  transport::{ClientSession, ServerSession, TransportError},
};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);
const DEFAULT_REPLY_LINGER: Duration = Duration::from_millis(500);

pub trait Task<I, W>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, worker: W) -> Result<Self::Output, Self::Error>;
}

/// 注册 Ctrl-C 处理，返回退出标志
///
/// 第二次中断或 30 秒内未退出时强制结束进程。整个进程只能调用一次。
pub fn shutdown_flag() -> Result<Arc<AtomicBool>, ctrlc::Error> {
  let flag = Arc::new(AtomicBool::new(false));
  let handler_flag = flag.clone();

  ctrlc::set_handler(move || {
    if handler_flag.swap(true, Ordering::SeqCst) {
      warn!("再次收到中断信号，强制退出");
      std::process::exit(1);
    }
    info!("收到中断信号，准备退出...");
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  Ok(flag)
}

fn is_set(flag: &Option<Arc<AtomicBool>>) -> bool {
  flag
    .as_ref()
    .map(|flag| flag.load(Ordering::SeqCst))
    .unwrap_or(false)
}

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("{0}")]
  Model(#[from] ModelError),
  #[error("{0}")]
  Extract(#[from] ExtractError),
  #[error("预热帧无效: {0}")]
  Frame(#[from] FrameError),
}

/// 单帧处理所需的全部状态：推理适配器、后处理器与服务模式
pub struct ServerContext<B> {
  adapter: InferenceAdapter<B>,
  extractor: Extractor,
  mode: DetectionMode,
}

impl<B: InferenceBackend> ServerContext<B> {
  /// 用一帧空白图像预热模型，并根据输出确定后处理器
  ///
  /// 姿态模型的部位数量无法识别时返回错误，服务不应启动。
  pub fn new(
    mode: DetectionMode,
    mut adapter: InferenceAdapter<B>,
    threshold: f32,
  ) -> Result<Self, ProcessError> {
    let blob = *adapter.blob();
    let warmup = Frame::blank(blob.width, blob.height, PixelFormat::Bgr8)?;

    let now = Instant::now();
    let probe = adapter.infer(&warmup)?;
    info!(
      "预热推理完成，耗时: {:.2?}，输出形状: {:?}",
      now.elapsed(),
      probe.shape()
    );

    let extractor = Extractor::for_output(mode, &probe, threshold)?;
    match &extractor {
      Extractor::Pose(pose) => info!("姿态模型: {}", pose.variant().name()),
      Extractor::Detection(detection) => info!("检测阈值: {}", detection.threshold()),
    }

    Ok(Self {
      adapter,
      extractor,
      mode,
    })
  }

  pub fn mode(&self) -> DetectionMode {
    self.mode
  }

  pub fn extractor(&self) -> &Extractor {
    &self.extractor
  }

  /// 推理并提取一帧的结果，坐标相对于该帧的像素尺寸
  pub fn process_frame(&mut self, frame: &Frame) -> Result<ResultSet, ProcessError> {
    let output = self.adapter.infer(frame)?;
    let results = self
      .extractor
      .extract(&output, frame.width(), frame.height())?;
    Ok(results)
  }
}

/// 服务端统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
  pub frames_received: u64,
  pub frames_processed: u64,
  pub decode_failures: u64,
  pub inference_failures: u64,
  pub write_failures: u64,
  pub reassembly_timeouts: u64,
  pub rejected_fragments: u64,
}

impl ServerStats {
  fn sync_transport(&mut self, session: &ServerSession) {
    let counters = session.counters();
    self.frames_received = counters.frames;
    self.decode_failures = counters.decode_failures;
    self.rejected_fragments = counters.rejected_fragments;
    self.reassembly_timeouts =
      session.reassembler().expired() + session.reassembler().evicted();
  }
}

/// 服务端主循环：接收 → 推理 → 提取 → 回复
#[derive(Default, Debug)]
pub struct ServeTask {
  frame_number: Option<usize>,
}

impl ServeTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<'a, B: InferenceBackend> Task<&'a mut ServerSession, &'a mut ServerContext<B>> for ServeTask {
  type Output = ServerStats;
  type Error = TransportError;

  fn run_task(
    self,
    session: &'a mut ServerSession,
    context: &'a mut ServerContext<B>,
  ) -> Result<ServerStats, TransportError> {
    info!("开始服务，模式: {}", context.mode());
    let mut stats = ServerStats::default();
    let mut handled = 0usize;

    while let Some((frame, peer)) = session.receive_frame()? {
      handled += 1;
      let now = Instant::now();

      match context.process_frame(&frame) {
        Ok(results) => {
          stats.frames_processed += 1;
          let elapsed = now.elapsed();
          match session.send_results(peer, &results) {
            Ok(sent) => debug!(
              "第 {} 帧: {} 条结果, {} 字节 -> {}，耗时: {:.2?}",
              handled,
              results.len(),
              sent,
              peer,
              elapsed
            ),
            Err(e) => {
              warn!("向 {} 回复失败: {}", peer, e);
              stats.write_failures += 1;
            }
          }
        }
        Err(e) => {
          warn!("第 {} 帧处理失败，跳过: {}", handled, e);
          stats.inference_failures += 1;
        }
      }

      if self.frame_number.map(|n| handled >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", handled);
        break;
      }
    }

    stats.sync_transport(session);
    info!(
      "服务结束: 收到 {} 帧, 处理 {} 帧, 解码失败 {}, 推理失败 {}, 发送失败 {}, 重组超时 {}, 无效分片 {}",
      stats.frames_received,
      stats.frames_processed,
      stats.decode_failures,
      stats.inference_failures,
      stats.write_failures,
      stats.reassembly_timeouts,
      stats.rejected_fragments
    );
    Ok(stats)
  }
}

/// 客户端统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
  pub frames_sent: u64,
  pub replies_received: u64,
  pub bad_replies: u64,
  pub send_failures: u64,
}

/// 客户端推流循环：采集 → 发送 → 收取已到达的回复
///
/// 采集源结束后最多再等待 `linger` 收取剩余回复。
#[derive(Debug)]
pub struct StreamTask {
  frame_number: Option<usize>,
  json: bool,
  linger: Duration,
  shutdown: Option<Arc<AtomicBool>>,
}

impl Default for StreamTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      json: false,
      linger: DEFAULT_REPLY_LINGER,
      shutdown: None,
    }
  }
}

impl StreamTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 以 JSON 行输出每个回复
  pub fn with_json(mut self, json: bool) -> Self {
    self.json = json;
    self
  }

  pub fn with_linger(mut self, linger: Duration) -> Self {
    self.linger = linger;
    self
  }

  pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
    self.shutdown = Some(shutdown);
    self
  }

  fn report(&self, results: &ResultSet, stats: &mut StreamStats) {
    stats.replies_received += 1;
    if self.json {
      println!("{}", results.to_json());
    } else {
      info!("收到结果: {} 条", results.len());
      debug!("{:?}", results);
    }
  }

  /// 收取一个回复，格式错误的回复只计数
  fn receive(
    &self,
    client: &mut ClientSession,
    timeout: Duration,
    stats: &mut StreamStats,
  ) -> Result<bool, TransportError> {
    match client.recv_results(timeout) {
      Ok(Some(results)) => {
        self.report(&results, stats);
        Ok(true)
      }
      Ok(None) => Ok(false),
      Err(TransportError::Reply(e)) => {
        warn!("无法解析服务端回复: {}", e);
        stats.bad_replies += 1;
        Ok(true)
      }
      Err(e) => Err(e),
    }
  }
}

impl<'a, S: CaptureSource> Task<&'a mut S, &'a mut ClientSession> for StreamTask {
  type Output = StreamStats;
  type Error = anyhow::Error;

  fn run_task(
    self,
    source: &'a mut S,
    client: &'a mut ClientSession,
  ) -> anyhow::Result<StreamStats> {
    info!(
      "开始推流: {}x{} -> {}",
      source.width(),
      source.height(),
      client.server()
    );
    let mut stats = StreamStats::default();

    loop {
      if is_set(&self.shutdown) {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      let Some(frame) = source.read_frame()? else {
        info!("采集源结束");
        break;
      };

      match client.send_frame(&frame) {
        Ok(frame_id) => {
          stats.frames_sent += 1;
          debug!("发送第 {} 帧 (编号 {})", stats.frames_sent, frame_id);
        }
        // 服务端不可达等写入错误只丢弃当前帧，编码错误仍然致命
        Err(TransportError::Write(e)) => {
          stats.send_failures += 1;
          warn!("发送帧失败，丢弃该帧: {}", e);
        }
        Err(e) => return Err(e.into()),
      }

      while self.receive(client, Duration::ZERO, &mut stats)? {}

      if self
        .frame_number
        .map(|n| stats.frames_sent + stats.send_failures >= n as u64)
        .unwrap_or(false)
      {
        info!(
          "达到指定帧数 {}, 退出任务循环",
          stats.frames_sent + stats.send_failures
        );
        break;
      }
    }

    let deadline = Instant::now() + self.linger;
    while stats.replies_received + stats.bad_replies < stats.frames_sent && !is_set(&self.shutdown)
    {
      let remaining = deadline.saturating_duration_since(Instant::now());
      if remaining.is_zero() || !self.receive(client, remaining, &mut stats)? {
        break;
      }
    }

    info!(
      "推流结束: 发送 {} 帧, 发送失败 {} 帧, 收到 {} 个回复, 无效回复 {}",
      stats.frames_sent, stats.send_failures, stats.replies_received, stats.bad_replies
    );
    Ok(stats)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{BlobParams, Tensor},
    result::{Point, PoseSegment},
  };

  /// 每个部位在 (k, k) 处有一个峰值，部位数量可配置
  struct Diagonal {
    channels: usize,
  }

  impl InferenceBackend for Diagonal {
    fn name(&self) -> &'static str {
      "diagonal"
    }

    fn forward(&mut self, _input: &Tensor) -> Result<Tensor, ModelError> {
      let (h, w) = (28, 28);
      let mut data = vec![0f32; self.channels * h * w];
      for k in 0..self.channels {
        data[k * h * w + k * w + k] = 0.9;
      }
      Ok(Tensor::new(vec![1, self.channels, h, w], data)?)
    }
  }

  fn context(channels: usize) -> Result<ServerContext<Diagonal>, ProcessError> {
    let adapter = InferenceAdapter::new(Diagonal { channels }, BlobParams::pose());
    ServerContext::new(DetectionMode::Pose, adapter, 0.5)
  }

  #[test]
  fn unknown_part_count_stops_startup() {
    assert!(matches!(
      context(17),
      Err(ProcessError::Extract(ExtractError::UnknownPartCount(17)))
    ));
  }

  #[test]
  fn process_frame_scales_to_frame_size() {
    let mut context = context(19).unwrap();
    let frame = Frame::blank(224, 224, PixelFormat::Bgr8).unwrap();
    let ResultSet::Pose(segments) = context.process_frame(&frame).unwrap() else {
      panic!("expected pose results");
    };
    // 18 个部位全部存在，COCO 共 17 条连线
    assert_eq!(segments.len(), 17);
    assert_eq!(
      segments[0],
      PoseSegment {
        from: Point::new(8, 8),
        to: Point::new(16, 16),
      }
    );
  }

  #[test]
  fn startup_fails_when_warmup_forward_fails() {
    struct Broken;
    impl InferenceBackend for Broken {
      fn name(&self) -> &'static str {
        "broken"
      }
      fn forward(&mut self, _input: &Tensor) -> Result<Tensor, ModelError> {
        Err(ModelError::Forward("boom".to_string()))
      }
    }

    let adapter = InferenceAdapter::new(Broken, BlobParams::face());
    assert!(matches!(
      ServerContext::new(DetectionMode::Face, adapter, 0.5),
      Err(ProcessError::Model(ModelError::Forward(_)))
    ));
  }

  #[test]
  fn stream_task_defaults() {
    let task = StreamTask::default().with_json(true).with_frame_number(Some(3));
    assert!(task.json);
    assert_eq!(task.frame_number, Some(3));
    assert_eq!(task.linger, DEFAULT_REPLY_LINGER);
    assert!(!is_set(&task.shutdown));
  }
}
