// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use shanan_serve::{
  config::{ConfigError, ServeConfig},
  input::VideoStaging,
};

/// Shanan 检测上传服务
///
/// 未在命令行给出的参数依次取自配置文件与默认值。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件
  #[arg(long, env = "SHANAN_CONFIG", value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 监听地址，默认 0.0.0.0:8000
  #[arg(long, env = "SHANAN_BIND", value_name = "ADDR")]
  pub bind: Option<SocketAddr>,

  /// 模型 URL
  /// 支持格式:
  /// - onnx:trainedmodel.onnx（相对当前目录）
  /// - onnx:///opt/models/yolo.onnx
  #[arg(long, env = "SHANAN_MODEL", value_name = "URL")]
  pub model: Option<String>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "SHANAN_CONFIDENCE", value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, env = "SHANAN_NMS_THRESHOLD", value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,

  /// 模型输入边长
  #[arg(long, env = "SHANAN_INPUT_SIZE", value_name = "PIXELS")]
  pub input_size: Option<u32>,

  /// 类别名称文件（TOML, `names = [...]`）
  #[arg(long, env = "SHANAN_LABELS", value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 标签字体（TTF/OTF）
  #[arg(long, env = "SHANAN_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  #[arg(long, env = "SHANAN_LABEL_FONT_SIZE", value_name = "PIXELS")]
  pub label_font_size: Option<f32>,

  /// JSON 响应中 JPEG 的质量 (1 - 100)
  #[arg(long, env = "SHANAN_JPEG_QUALITY", value_name = "QUALITY")]
  pub jpeg_quality: Option<u8>,

  /// `/upload_video_chunk` 响应附带 shape 与 dtype
  #[arg(long, env = "SHANAN_CHUNK_METADATA")]
  pub chunk_metadata: Option<bool>,

  /// 视频块暂存方式: memory 或 tempfile
  #[arg(long, env = "SHANAN_VIDEO_STAGING", value_name = "MODE")]
  pub video_staging: Option<VideoStaging>,

  /// tempfile 暂存目录，默认系统临时目录
  #[arg(long, env = "SHANAN_STAGING_DIR", value_name = "DIR")]
  pub staging_dir: Option<PathBuf>,

  /// 视频块首帧解码超时（毫秒）
  #[arg(long, env = "SHANAN_VIDEO_DECODE_TIMEOUT_MS", value_name = "MS")]
  pub video_decode_timeout_ms: Option<u64>,

  /// 上传大小上限（字节）
  #[arg(long, env = "SHANAN_MAX_UPLOAD_BYTES", value_name = "BYTES")]
  pub max_upload_bytes: Option<usize>,

  /// `/upload/` 允许的来源，逗号分隔
  #[arg(long, env = "SHANAN_IMAGE_CORS_ORIGINS", value_name = "ORIGINS", value_delimiter = ',')]
  pub image_cors_origins: Option<Vec<String>>,

  /// 视频端点允许的来源，逗号分隔
  #[arg(long, env = "SHANAN_VIDEO_CORS_ORIGINS", value_name = "ORIGINS", value_delimiter = ',')]
  pub video_cors_origins: Option<Vec<String>>,
}

impl Args {
  /// 读取配置文件并用命令行参数覆盖，返回校验后的配置
  pub fn into_config(self) -> Result<ServeConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => ServeConfig::from_toml_file(path)?,
      None => ServeConfig::default(),
    };

    if let Some(bind) = self.bind {
      config.bind = bind;
    }
    if let Some(model) = self.model {
      config.model = model;
    }
    if let Some(confidence) = self.confidence {
      config.confidence = confidence;
    }
    if let Some(nms_threshold) = self.nms_threshold {
      config.nms_threshold = nms_threshold;
    }
    if let Some(input_size) = self.input_size {
      config.input_size = input_size;
    }
    if self.labels.is_some() {
      config.labels = self.labels;
    }
    if self.font.is_some() {
      config.font = self.font;
    }
    if let Some(size) = self.label_font_size {
      config.label_font_size = size;
    }
    if let Some(quality) = self.jpeg_quality {
      config.jpeg_quality = quality;
    }
    if let Some(chunk_metadata) = self.chunk_metadata {
      config.chunk_metadata = chunk_metadata;
    }
    if let Some(staging) = self.video_staging {
      config.video_staging = staging;
    }
    if self.staging_dir.is_some() {
      config.staging_dir = self.staging_dir;
    }
    if let Some(ms) = self.video_decode_timeout_ms {
      config.video_decode_timeout_ms = ms;
    }
    if let Some(bytes) = self.max_upload_bytes {
      config.max_upload_bytes = bytes;
    }
    if let Some(origins) = self.image_cors_origins {
      config.image_cors_origins = strip_empty(origins);
    }
    if let Some(origins) = self.video_cors_origins {
      config.video_cors_origins = strip_empty(origins);
    }

    config.validate()?;
    Ok(config)
  }
}

// `--video-cors-origins ''` 表示任意来源
fn strip_empty(origins: Vec<String>) -> Vec<String> {
  origins
    .into_iter()
    .map(|o| o.trim().to_string())
    .filter(|o| !o.is_empty())
    .collect()
}
