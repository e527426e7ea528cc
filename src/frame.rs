// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;

const RGB_CHANNELS: usize = 3;
const RGB_DTYPE: &str = "uint8";

/// 单帧 RGB 图像，HWC 排列，每个采样 8 位无符号整数
///
/// 由一次请求独占，推理和绘制都只读取它。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  image: RgbImage,
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

impl RgbFrame {
  /// 从紧密排列的 RGB 数据构造帧，长度不匹配时返回 `None`
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    RgbImage::from_raw(width, height, data).map(Self::from)
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// `[height, width, channels]`
  pub fn shape(&self) -> [usize; 3] {
    [
      self.image.height() as usize,
      self.image.width() as usize,
      RGB_CHANNELS,
    ]
  }

  pub fn dtype(&self) -> &'static str {
    RGB_DTYPE
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }
}

/// 绘制了检测结果的帧，尺寸与源帧一致
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
  image: RgbImage,
}

impl AnnotatedFrame {
  pub(crate) fn new(image: RgbImage) -> Self {
    Self { image }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn shape(&self) -> [usize; 3] {
    [
      self.image.height() as usize,
      self.image.width() as usize,
      RGB_CHANNELS,
    ]
  }

  pub fn dtype(&self) -> &'static str {
    RGB_DTYPE
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }
}
