// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/encode.rs - 标注帧编码
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

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{ImageFormat, codecs::jpeg::JpegEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::frame::AnnotatedFrame;

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("JPEG 质量必须在 1..=100 之间: {0}")]
  InvalidQuality(u8),
}

/// 二进制模式：PNG
pub fn encode_png(frame: &AnnotatedFrame) -> Result<Vec<u8>, EncodeError> {
  let mut buf = Vec::new();
  frame
    .image()
    .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
  debug!("PNG 编码完成: {} 字节", buf.len());
  Ok(buf)
}

pub fn encode_jpeg(frame: &AnnotatedFrame, quality: u8) -> Result<Vec<u8>, EncodeError> {
  if !(1..=100).contains(&quality) {
    return Err(EncodeError::InvalidQuality(quality));
  }
  let mut buf = Vec::new();
  frame
    .image()
    .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
  debug!("JPEG 编码完成: {} 字节, 质量 {}", buf.len(), quality);
  Ok(buf)
}

/// JSON 信封模式的响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedChunkResponse {
  /// base64 编码的 JPEG
  pub annotated_chunk: String,
  /// `[height, width, channels]`
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub shape: Option<[usize; 3]>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dtype: Option<String>,
}

impl AnnotatedChunkResponse {
  pub fn encode(
    frame: &AnnotatedFrame,
    quality: u8,
    with_metadata: bool,
  ) -> Result<Self, EncodeError> {
    let jpeg = encode_jpeg(frame, quality)?;
    let (shape, dtype) = if with_metadata {
      (Some(frame.shape()), Some(frame.dtype().to_string()))
    } else {
      (None, None)
    };

    Ok(Self {
      annotated_chunk: STANDARD.encode(jpeg),
      shape,
      dtype,
    })
  }

  pub fn decode_chunk(&self) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(&self.annotated_chunk)
  }
}
