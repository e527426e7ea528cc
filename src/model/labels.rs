// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/labels.rs - 类别标签表
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

use std::{borrow::Cow, path::Path};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug)]
pub enum LabelSetError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件格式错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("标签文件为空")]
  Empty,
}

#[derive(Deserialize)]
struct LabelFile {
  names: Vec<String>,
}

/// 有序的类别名称表，下标即类别编号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
  names: Vec<String>,
}

impl Default for LabelSet {
  fn default() -> Self {
    Self::coco()
  }
}

impl LabelSet {
  pub fn coco() -> Self {
    Self::new(COCO_CLASSES.iter().map(|s| s.to_string()).collect())
  }

  pub fn new(names: Vec<String>) -> Self {
    Self { names }
  }

  /// 从 TOML 文件加载，格式为 `names = ["a", "b", ...]`
  pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelSetError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let labels = Self::from_toml_str(&text)?;
    info!("加载标签文件: {}, 共 {} 个类别", path.display(), labels.len());
    Ok(labels)
  }

  pub fn from_toml_str(text: &str) -> Result<Self, LabelSetError> {
    let file: LabelFile = toml::from_str(text)?;
    if file.names.is_empty() {
      return Err(LabelSetError::Empty);
    }
    Ok(Self::new(file.names))
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 超出范围的编号显示为 `class <id>`
  pub fn name(&self, class_id: u32) -> Cow<'_, str> {
    match self.names.get(class_id as usize) {
      Some(name) => Cow::Borrowed(name.as_str()),
      None => Cow::Owned(format!("class {}", class_id)),
    }
  }
}
