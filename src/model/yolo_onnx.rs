// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolo_onnx.rs - ONNX YOLO 检测模型
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

use std::{path::PathBuf, sync::Mutex};

use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::{
  execution_providers::CPUExecutionProvider,
  session::{Session, builder::GraphOptimizationLevel},
  value::Value,
};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{DetectError, DetectItem, DetectResult, Detector, LabelSet},
};

const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_DEFAULT_CONFIDENCE: f32 = 0.25;
const YOLO_DEFAULT_NMS_THRESHOLD: f32 = 0.45;
const YOLO_LETTERBOX_FILL: f32 = 114.0 / 255.0;
const YOLO_BOX_CHANNELS: usize = 4;

#[derive(Error, Debug)]
pub enum YoloOnnxError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("ONNX Runtime 会话错误: {0}")]
  Session(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
}

pub struct YoloOnnxBuilder {
  model_path: PathBuf,
  confidence: f32,
  nms_threshold: f32,
  input_size: u32,
  labels: LabelSet,
}

impl FromUrlWithScheme for YoloOnnxBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for YoloOnnxBuilder {
  type Error = YoloOnnxError;

  /// `onnx:trainedmodel.onnx` 为相对当前目录的路径，`onnx:///abs/model.onnx` 为绝对路径
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloOnnxError::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = url.path();
    if path.is_empty() {
      return Err(YoloOnnxError::ModelPathError("模型路径为空".to_string()));
    }

    Ok(YoloOnnxBuilder {
      model_path: PathBuf::from(path),
      confidence: YOLO_DEFAULT_CONFIDENCE,
      nms_threshold: YOLO_DEFAULT_NMS_THRESHOLD,
      input_size: YOLO_DEFAULT_INPUT_SIZE,
      labels: LabelSet::default(),
    })
  }
}

impl YoloOnnxBuilder {
  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence.clamp(0.0, 1.0);
    self
  }

  pub fn nms_threshold(mut self, nms_threshold: f32) -> Self {
    self.nms_threshold = nms_threshold.clamp(0.0, 1.0);
    self
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn labels(mut self, labels: LabelSet) -> Self {
    self.labels = labels;
    self
  }

  pub fn build(self) -> Result<YoloOnnx, YoloOnnxError> {
    if !self.model_path.exists() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(YoloOnnxError::ModelNotFound(self.model_path));
    }
    if self.input_size == 0 {
      return Err(YoloOnnxError::ModelInvalid("输入尺寸不能为 0".to_string()));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()
      .map_err(session_error)?
      .with_execution_providers([CPUExecutionProvider::default().build()])
      .map_err(session_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(session_error)?
      .commit_from_file(&self.model_path)
      .map_err(session_error)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or_else(|| YoloOnnxError::ModelInvalid("模型没有输入".to_string()))?;
    if session.outputs.is_empty() {
      return Err(YoloOnnxError::ModelInvalid("模型没有输出".to_string()));
    }

    debug!("模型输入: {}, 输出数量: {}", input_name, session.outputs.len());
    info!(
      "模型加载完成, 输入尺寸 {}x{}, 置信度阈值 {}, NMS 阈值 {}",
      self.input_size, self.input_size, self.confidence, self.nms_threshold
    );

    Ok(YoloOnnx {
      session: Mutex::new(session),
      input_name,
      confidence: self.confidence,
      nms_threshold: self.nms_threshold,
      input_size: self.input_size,
      labels: self.labels,
    })
  }
}

fn session_error(e: impl std::fmt::Display) -> YoloOnnxError {
  YoloOnnxError::Session(e.to_string())
}

/// ONNX Runtime 上的 YOLO 检测器，输出格式为 `[1, 4 + nc, N]`
///
/// `Session::run` 需要可变借用，推理通过互斥锁串行化。
pub struct YoloOnnx {
  session: Mutex<Session>,
  input_name: String,
  confidence: f32,
  nms_threshold: f32,
  input_size: u32,
  labels: LabelSet,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
}

impl Letterbox {
  fn new(width: u32, height: u32, target: u32) -> Self {
    let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
    let new_w = (width as f32 * scale).round();
    let new_h = (height as f32 * scale).round();
    Self {
      scale,
      pad_x: ((target as f32 - new_w) / 2.0).floor(),
      pad_y: ((target as f32 - new_h) / 2.0).floor(),
    }
  }

  fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
    ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
  }
}

impl YoloOnnx {
  fn preprocess(&self, frame: &RgbFrame) -> (Array4<f32>, Letterbox) {
    let size = self.input_size;
    let letterbox = Letterbox::new(frame.width(), frame.height(), size);
    let new_w = ((frame.width() as f32 * letterbox.scale).round() as u32).clamp(1, size);
    let new_h = ((frame.height() as f32 * letterbox.scale).round() as u32).clamp(1, size);
    let resized = imageops::resize(frame.image(), new_w, new_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::from_elem((1, 3, size as usize, size as usize), YOLO_LETTERBOX_FILL);
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
      let (tx, ty) = (x as usize + pad_x, y as usize + pad_y);
      if tx >= size as usize || ty >= size as usize {
        continue;
      }
      for c in 0..3 {
        tensor[[0, c, ty, tx]] = pixel[c] as f32 / 255.0;
      }
    }

    (tensor, letterbox)
  }
}

impl Detector for YoloOnnx {
  fn detect(&self, frame: &RgbFrame) -> Result<DetectResult, DetectError> {
    let (input, letterbox) = self.preprocess(frame);
    let input_value =
      Value::from_array(input).map_err(|e| DetectError::Inference(format!("无法创建输入张量: {}", e)))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| DetectError::Inference("推理会话锁已中毒".to_string()))?;

    debug!("执行模型推理");
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => input_value])
      .map_err(|e| DetectError::Inference(e.to_string()))?;

    let output = outputs[0]
      .try_extract_array::<f32>()
      .map_err(|e| DetectError::InvalidOutput(e.to_string()))?;
    let shape = output.shape().to_vec();
    let data: Vec<f32> = output.iter().copied().collect();
    debug!("模型输出形状: {:?}", shape);

    let items = postprocess(
      &data,
      &shape,
      letterbox,
      (frame.width(), frame.height()),
      self.confidence,
      self.nms_threshold,
    )?;
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult::from(items))
  }

  fn labels(&self) -> &LabelSet {
    &self.labels
  }

  fn name(&self) -> &str {
    "yolo-onnx"
  }
}

/// 解码 `[1, C, N]` 或 `[1, N, C]` 的输出，其中 `C = 4 + nc`，前 4 维为 `cx, cy, w, h`
fn postprocess(
  data: &[f32],
  shape: &[usize],
  letterbox: Letterbox,
  (frame_w, frame_h): (u32, u32),
  confidence: f32,
  nms_threshold: f32,
) -> Result<Vec<DetectItem>, DetectError> {
  let (rows, cols) = match shape {
    [1, a, b] => (*a, *b),
    [a, b] => (*a, *b),
    _ => {
      return Err(DetectError::InvalidOutput(format!(
        "不支持的输出形状: {:?}",
        shape
      )));
    }
  };
  if data.len() < rows * cols {
    return Err(DetectError::InvalidOutput(format!(
      "输出数据长度 {} 小于形状 {:?}",
      data.len(),
      shape
    )));
  }

  // 通道数通常远小于候选框数
  let channel_major = rows <= cols;
  let (channels, candidates) = if channel_major { (rows, cols) } else { (cols, rows) };
  if channels <= YOLO_BOX_CHANNELS {
    return Err(DetectError::InvalidOutput(format!(
      "输出通道数 {} 不足",
      channels
    )));
  }
  let at = |c: usize, i: usize| {
    if channel_major {
      data[c * candidates + i]
    } else {
      data[i * channels + c]
    }
  };

  let (max_x, max_y) = (frame_w as f32, frame_h as f32);
  let mut boxes = Vec::new();
  for i in 0..candidates {
    let (class_id, score) = (YOLO_BOX_CHANNELS..channels)
      .map(|c| (c - YOLO_BOX_CHANNELS, at(c, i)))
      .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if score <= confidence {
      continue;
    }

    let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
    let (left, top) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
    let (right, bottom) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);

    boxes.push(DetectItem {
      class_id: class_id as u32,
      score,
      bbox: [
        left.clamp(0.0, max_x),
        top.clamp(0.0, max_y),
        right.clamp(0.0, max_x),
        bottom.clamp(0.0, max_y),
      ],
    });
  }

  Ok(non_max_suppression(boxes, nms_threshold))
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = w * h;
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 按类别做 NMS，结果按置信度降序
fn non_max_suppression(mut boxes: Vec<DetectItem>, threshold: f32) -> Vec<DetectItem> {
  boxes.sort_by(|a, b| b.score.total_cmp(&a.score));
  let mut kept: Vec<DetectItem> = Vec::with_capacity(boxes.len());
  for candidate in boxes {
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}
