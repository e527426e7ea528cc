// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 上传帧提取
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

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbFrame;

mod image_bytes;
pub use self::image_bytes::decode_image_bytes;

mod staging;
pub use self::staging::StagedChunk;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerChunkDecoder, GStreamerInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("上传内容为空")]
  EmptyPayload,
  #[error("无法解码图像: {0}")]
  Decode(String),
  #[error("视频块中没有可读取的帧: {0}")]
  NoFrame(String),
  #[error("暂存视频块失败: {0}")]
  Staging(#[from] std::io::Error),
  /// 解码后端本身的故障，与上传内容无关
  #[error("视频解码后端错误: {0}")]
  Backend(String),
}

/// 上传内容的声明类型，由端点决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
  Image,
  VideoChunk,
}

impl UploadKind {
  /// 视频块端点也会收到单张图片（例如前端逐帧上传 JPEG），按图片签名识别
  pub fn sniff(self, bytes: &[u8]) -> UploadKind {
    match self {
      UploadKind::VideoChunk if image::guess_format(bytes).is_ok() => UploadKind::Image,
      kind => kind,
    }
  }
}

/// 一次请求的上传内容
#[derive(Debug, Clone)]
pub struct Upload {
  pub kind: UploadKind,
  pub bytes: Vec<u8>,
}

impl Upload {
  pub fn new(kind: UploadKind, bytes: impl Into<Vec<u8>>) -> Self {
    Self {
      kind,
      bytes: bytes.into(),
    }
  }
}

/// 视频块暂存方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStaging {
  /// 直接把字节推入解码管道
  #[default]
  Memory,
  /// 写入请求级临时文件后再打开，用于需要随机访问的容器
  Tempfile,
}

impl std::str::FromStr for VideoStaging {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "memory" => Ok(VideoStaging::Memory),
      "tempfile" => Ok(VideoStaging::Tempfile),
      other => Err(format!("未知的暂存方式: {}", other)),
    }
  }
}

/// 从视频块中取出第一帧
pub trait VideoChunkDecoder: Send + Sync {
  fn first_frame(&self, chunk: &[u8]) -> Result<RgbFrame, InputError>;
}

/// 未启用视频解码时使用
pub struct UnsupportedVideoDecoder;

impl VideoChunkDecoder for UnsupportedVideoDecoder {
  fn first_frame(&self, _chunk: &[u8]) -> Result<RgbFrame, InputError> {
    Err(InputError::Decode(
      "video chunk decoding is not enabled".to_string(),
    ))
  }
}

/// 每个请求只提取一帧
pub struct FrameExtractor {
  video: Box<dyn VideoChunkDecoder>,
}

impl FrameExtractor {
  pub fn new(video: Box<dyn VideoChunkDecoder>) -> Self {
    Self { video }
  }

  pub fn extract(&self, upload: &Upload) -> Result<RgbFrame, InputError> {
    if upload.bytes.is_empty() {
      return Err(InputError::EmptyPayload);
    }

    let kind = upload.kind.sniff(&upload.bytes);
    debug!(
      "提取帧: 声明类型 {:?}, 识别类型 {:?}, {} 字节",
      upload.kind,
      kind,
      upload.bytes.len()
    );

    match kind {
      UploadKind::Image => decode_image_bytes(&upload.bytes),
      UploadKind::VideoChunk => self.video.first_frame(&upload.bytes),
    }
  }
}
