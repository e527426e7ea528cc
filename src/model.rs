// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 检测模型
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

use thiserror::Error;

use crate::frame::RgbFrame;

mod labels;
pub use self::labels::{LabelSet, LabelSetError};

#[cfg(feature = "model_onnx")]
mod yolo_onnx;
#[cfg(feature = "model_onnx")]
pub use self::yolo_onnx::{YoloOnnx, YoloOnnxBuilder, YoloOnnxError};

/// 目标检测器
///
/// 启动时加载一次，之后被所有请求共享只读调用。
/// 如果底层推理引擎不可重入，实现者需要在内部自行串行化。
pub trait Detector: Send + Sync {
  fn detect(&self, frame: &RgbFrame) -> Result<DetectResult, DetectError>;

  fn labels(&self) -> &LabelSet;

  fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [left, top, right, bottom]，像素坐标
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}
