// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::{
  frame::{AnnotatedFrame, RgbFrame},
  model::{DetectItem, DetectResult, LabelSet},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]); // 白色文本
const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: usize = 80;

static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法加载字体: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

pub struct Draw {
  font: FontArc,
  font_size: f32,
  label_text_padding: i32,
  box_thickness: i32,
  colors: Vec<Rgb<u8>>,
}

impl Draw {
  /// 使用内嵌的 DejaVu Sans 字体
  pub fn new() -> Result<Self, DrawError> {
    let font = FontArc::try_from_slice(EMBEDDED_FONT)?;
    Ok(Self::with_font(font))
  }

  pub fn from_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let font = FontArc::try_from_vec(std::fs::read(path)?)?;
    info!("加载标签字体: {}", path.display());
    Ok(Self::with_font(font))
  }

  fn with_font(font: FontArc) -> Self {
    // 每个类别一种颜色，色相均匀分布
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label_text_padding: LABEL_TEXT_PADDING,
      box_thickness: BOX_THICKNESS,
      colors,
    }
  }

  pub fn font_size(mut self, font_size: f32) -> Self {
    self.font_size = font_size;
    self
  }

  pub fn color_for(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  /// 在帧的副本上绘制检测结果，源帧保持不变
  pub fn annotate(&self, frame: &RgbFrame, result: &DetectResult, labels: &LabelSet) -> AnnotatedFrame {
    let mut image = frame.image().clone();
    for item in result.items.iter() {
      self.draw_bbox_with_label(&mut image, item, labels);
    }
    AnnotatedFrame::new(image)
  }

  // bbox 为像素坐标 [left, top, right, bottom]，超出图像的部分会被裁剪
  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem, labels: &LabelSet) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let [l, t, r, b] = item.bbox;
    // NaN 经过 `as` 转换为 0，不会 panic
    let x_min = (l.min(r).floor() as i32).clamp(0, w - 1);
    let y_min = (t.min(b).floor() as i32).clamp(0, h - 1);
    let x_max = (l.max(r).ceil() as i32).clamp(0, w - 1);
    let y_max = (t.max(b).ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = self.color_for(item.class_id);

    // 绘制边框
    for thickness in 0..self.box_thickness {
      let width = x_max - x_min + 1 - 2 * thickness;
      let height = y_max - y_min + 1 - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    // 创建标签文本
    let label = format!("{} {:.2}", labels.name(item.class_id), item.score);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, &self.font, &label);

    let pad = self.label_text_padding;
    let tab_height = text_h as i32 + 2 * pad;
    let tab_width = text_w as i32 + 2 * pad;

    // 标签放在边框上方，顶部放不下时放在框内
    let label_x = x_min;
    let label_y = if y_min - tab_height >= 0 {
      y_min - tab_height
    } else {
      y_min
    };

    let label_width = tab_width.min(w - label_x);
    let label_height = tab_height.min(h - label_y);
    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      LABEL_TEXT_COLOR,
      label_x + pad,
      label_y + pad,
      scale,
      &self.font,
      &label,
    );
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
