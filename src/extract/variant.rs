// 该文件是 Xunying （寻影） 项目的一部分。
// src/extract/variant.rs - 姿态模型变体与骨架连接表
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

// 连接表参见 OpenPose 输出格式文档：
// https://github.com/CMU-Perceptual-Computing-Lab/openpose/blob/master/doc/output.md

const COCO_PAIRS: [(usize, usize); 17] = [
  (1, 2),
  (1, 5),
  (2, 3),
  (3, 4),
  (5, 6),
  (6, 7),
  (1, 8),
  (8, 9),
  (9, 10),
  (1, 11),
  (11, 12),
  (12, 13),
  (1, 0),
  (0, 14),
  (14, 16),
  (0, 15),
  (15, 17),
];

const MPI_PAIRS: [(usize, usize); 14] = [
  (0, 1),
  (1, 2),
  (2, 3),
  (3, 4),
  (1, 5),
  (5, 6),
  (6, 7),
  (1, 14),
  (14, 8),
  (8, 9),
  (9, 10),
  (14, 11),
  (11, 12),
  (12, 13),
];

#[rustfmt::skip]
const HAND_PAIRS: [(usize, usize); 20] = [
  (0, 1), (1, 2), (2, 3), (3, 4),       // 拇指
  (0, 5), (5, 6), (6, 7), (7, 8),       // 食指
  (0, 9), (9, 10), (10, 11), (11, 12),  // 中指
  (0, 13), (13, 14), (14, 15), (15, 16), // 无名指
  (0, 17), (17, 18), (18, 19), (19, 20), // 小指
];

/// 姿态模型变体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
  Coco,
  Mpi,
  Hand,
}

impl ModelVariant {
  pub const ALL: [ModelVariant; 3] = [ModelVariant::Coco, ModelVariant::Mpi, ModelVariant::Hand];

  /// 根据模型输出的通道数选择变体，身体模型额外带一个背景通道
  pub fn from_channels(channels: usize) -> Option<Self> {
    Self::ALL
      .into_iter()
      .find(|variant| variant.output_channels() == channels)
  }

  /// 模型输出的通道数
  pub fn output_channels(&self) -> usize {
    match self {
      ModelVariant::Coco => 19,
      ModelVariant::Mpi => 16,
      ModelVariant::Hand => 22,
    }
  }

  /// 参与提取的关键点数量
  pub fn part_count(&self) -> usize {
    match self {
      ModelVariant::Coco => 18,
      ModelVariant::Mpi => 15,
      ModelVariant::Hand => 22,
    }
  }

  pub fn pairs(&self) -> &'static [(usize, usize)] {
    match self {
      ModelVariant::Coco => &COCO_PAIRS,
      ModelVariant::Mpi => &MPI_PAIRS,
      ModelVariant::Hand => &HAND_PAIRS,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      ModelVariant::Coco => "COCO body",
      ModelVariant::Mpi => "MPI body",
      ModelVariant::Hand => "hand",
    }
  }
}
