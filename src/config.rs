// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 服务配置
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

use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use axum::http::HeaderValue;
use serde::Deserialize;
use thiserror::Error;

use crate::{input::VideoStaging, output::DEFAULT_JPEG_QUALITY};

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_MODEL: &str = "onnx:trainedmodel.onnx";
pub const DEFAULT_VIDEO_ORIGIN: &str = "http://localhost:5173";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置文件解析错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

/// 服务配置，优先级为 命令行 > 配置文件 > 默认值
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
  pub bind: SocketAddr,
  /// 模型 URL，例如 `onnx:trainedmodel.onnx`
  pub model: String,
  pub confidence: f32,
  pub nms_threshold: f32,
  pub input_size: u32,
  /// 类别名称 TOML 文件，缺省为 COCO 80 类
  pub labels: Option<PathBuf>,
  /// 标签字体，缺省为内嵌的 DejaVu Sans
  pub font: Option<PathBuf>,
  pub label_font_size: f32,
  pub jpeg_quality: u8,
  /// `/upload_video_chunk` 是否返回 `shape` 与 `dtype`
  pub chunk_metadata: bool,
  pub video_staging: VideoStaging,
  pub staging_dir: Option<PathBuf>,
  pub video_decode_timeout_ms: u64,
  pub max_upload_bytes: usize,
  /// 为空表示允许任意来源
  pub image_cors_origins: Vec<String>,
  /// 为空表示允许任意来源，此时不携带凭据
  pub video_cors_origins: Vec<String>,
}

impl Default for ServeConfig {
  fn default() -> Self {
    Self {
      bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
      model: DEFAULT_MODEL.to_string(),
      confidence: 0.25,
      nms_threshold: 0.45,
      input_size: 640,
      labels: None,
      font: None,
      label_font_size: 16.0,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
      chunk_metadata: false,
      video_staging: VideoStaging::Memory,
      staging_dir: None,
      video_decode_timeout_ms: 10_000,
      max_upload_bytes: 32 * 1024 * 1024,
      image_cors_origins: Vec::new(),
      video_cors_origins: vec![DEFAULT_VIDEO_ORIGIN.to_string()],
    }
  }
}

impl ServeConfig {
  pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(content)?)
  }

  pub fn video_decode_timeout(&self) -> Duration {
    Duration::from_millis(self.video_decode_timeout_ms)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence) {
      return Err(ConfigError::Invalid(format!(
        "confidence 必须在 [0, 1] 之间: {}",
        self.confidence
      )));
    }
    if !(0.0..=1.0).contains(&self.nms_threshold) {
      return Err(ConfigError::Invalid(format!(
        "nms_threshold 必须在 [0, 1] 之间: {}",
        self.nms_threshold
      )));
    }
    if !(1..=100).contains(&self.jpeg_quality) {
      return Err(ConfigError::Invalid(format!(
        "jpeg_quality 必须在 1..=100 之间: {}",
        self.jpeg_quality
      )));
    }
    if self.input_size == 0 {
      return Err(ConfigError::Invalid("input_size 不能为 0".to_string()));
    }
    if self.label_font_size.is_nan() || self.label_font_size <= 0.0 {
      return Err(ConfigError::Invalid(format!(
        "label_font_size 必须大于 0: {}",
        self.label_font_size
      )));
    }
    if self.video_decode_timeout_ms == 0 {
      return Err(ConfigError::Invalid(
        "video_decode_timeout_ms 不能为 0".to_string(),
      ));
    }
    if self.max_upload_bytes == 0 {
      return Err(ConfigError::Invalid("max_upload_bytes 不能为 0".to_string()));
    }
    for origin in self.image_cors_origins.iter().chain(&self.video_cors_origins) {
      parse_origin(origin)?;
    }
    Ok(())
  }
}

pub fn parse_origin(origin: &str) -> Result<HeaderValue, ConfigError> {
  if origin.is_empty() || origin == "*" {
    return Err(ConfigError::Invalid(format!(
      "CORS 来源必须是具体地址, 任意来源请使用空列表: {:?}",
      origin
    )));
  }
  HeaderValue::from_str(origin)
    .map_err(|e| ConfigError::Invalid(format!("CORS 来源无效 {:?}: {}", origin, e)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let config = ServeConfig::default();
    config.validate().unwrap();
    assert_eq!(config.bind.to_string(), DEFAULT_BIND);
    assert_eq!(config.video_cors_origins, vec![DEFAULT_VIDEO_ORIGIN]);
    assert_eq!(config.video_decode_timeout(), Duration::from_secs(10));
    assert_eq!(config.jpeg_quality, DEFAULT_JPEG_QUALITY);
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = ServeConfig::from_toml_str(
      r#"
        bind = "127.0.0.1:9000"
        model = "onnx:///opt/models/yolo.onnx"
        video_staging = "tempfile"
        chunk_metadata = true
        video_cors_origins = []
      "#,
    )
    .unwrap();
    assert_eq!(config.bind.port(), 9000);
    assert_eq!(config.model, "onnx:///opt/models/yolo.onnx");
    assert_eq!(config.video_staging, VideoStaging::Tempfile);
    assert!(config.chunk_metadata);
    assert!(config.video_cors_origins.is_empty());
    assert_eq!(config.jpeg_quality, DEFAULT_JPEG_QUALITY);
    assert_eq!(config.input_size, 640);
  }

  #[test]
  fn test_unknown_key_is_rejected() {
    let result = ServeConfig::from_toml_str("confidnce = 0.3");
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
  }

  #[test]
  fn test_validate_rejects_bad_values() {
    let bad = [
      ServeConfig {
        confidence: 1.5,
        ..ServeConfig::default()
      },
      ServeConfig {
        nms_threshold: -0.1,
        ..ServeConfig::default()
      },
      ServeConfig {
        jpeg_quality: 0,
        ..ServeConfig::default()
      },
      ServeConfig {
        input_size: 0,
        ..ServeConfig::default()
      },
      ServeConfig {
        label_font_size: f32::NAN,
        ..ServeConfig::default()
      },
      ServeConfig {
        video_cors_origins: vec!["http://bad\norigin".to_string()],
        ..ServeConfig::default()
      },
      ServeConfig {
        image_cors_origins: vec!["*".to_string()],
        ..ServeConfig::default()
      },
    ];
    for config in bad {
      assert!(
        matches!(config.validate(), Err(ConfigError::Invalid(_))),
        "{:?}",
        config
      );
    }
  }

  #[test]
  fn test_missing_file_is_io_error() {
    let result = ServeConfig::from_toml_file("/definitely/not/here.toml");
    assert!(matches!(result, Err(ConfigError::IoError(_))));
  }
}
