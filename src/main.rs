// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 检测上传服务主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use shanan_serve::{
  config::ServeConfig,
  input::{FrameExtractor, VideoChunkDecoder},
  model::{Detector, LabelSet},
  output::Draw,
  pipeline::FramePipeline,
  server::{self, AppState, ResponseSettings},
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = args::Args::parse()
    .into_config()
    .context("配置无效")?;

  info!("Shanan 检测上传服务");
  info!("模型: {}", config.model);
  info!("置信度阈值: {}, NMS 阈值: {}", config.confidence, config.nms_threshold);
  info!("视频块暂存方式: {:?}", config.video_staging);

  let labels = match &config.labels {
    Some(path) => LabelSet::from_toml_file(path)
      .with_context(|| format!("无法加载类别文件 {}", path.display()))?,
    None => LabelSet::coco(),
  };

  // 模型加载失败时不监听端口
  let detector = build_detector(&config, labels)?;
  info!("检测器已就绪: {}", detector.name());

  let draw = match &config.font {
    Some(path) => Draw::from_font_file(path)
      .with_context(|| format!("无法加载字体 {}", path.display()))?,
    None => Draw::new().context("无法加载内嵌字体")?,
  }
  .font_size(config.label_font_size);

  let extractor = FrameExtractor::new(build_video_decoder(&config)?);
  let pipeline = FramePipeline::new(detector, extractor, draw);
  let state = AppState::new(pipeline, ResponseSettings::from(&config));

  let app = server::router(state, &config)?;
  server::serve(app, &config).await?;

  Ok(())
}

fn build_detector(config: &ServeConfig, labels: LabelSet) -> Result<Arc<dyn Detector>> {
  let url = Url::parse(&config.model).with_context(|| format!("模型 URL 无效: {}", config.model))?;

  #[cfg(feature = "model_onnx")]
  {
    use shanan_serve::{FromUrl, FromUrlWithScheme, model::YoloOnnxBuilder};

    if url.scheme() == YoloOnnxBuilder::SCHEME {
      let detector = YoloOnnxBuilder::from_url(&url)?
        .confidence(config.confidence)
        .nms_threshold(config.nms_threshold)
        .input_size(config.input_size)
        .labels(labels)
        .build()?;
      return Ok(Arc::new(detector));
    }
  }

  #[cfg(not(feature = "model_onnx"))]
  let _ = labels;

  anyhow::bail!("不支持的模型方案: {}", url.scheme())
}

#[cfg(feature = "gstreamer_input")]
fn build_video_decoder(config: &ServeConfig) -> Result<Box<dyn VideoChunkDecoder>> {
  use shanan_serve::input::GStreamerChunkDecoder;

  let decoder = GStreamerChunkDecoder::new(config.video_staging, config.video_decode_timeout())?
    .with_staging_dir(config.staging_dir.clone());
  Ok(Box::new(decoder))
}

#[cfg(not(feature = "gstreamer_input"))]
fn build_video_decoder(_config: &ServeConfig) -> Result<Box<dyn VideoChunkDecoder>> {
  use shanan_serve::input::UnsupportedVideoDecoder;

  tracing::warn!("未启用 gstreamer_input, 视频块上传将被拒绝");
  Ok(Box::new(UnsupportedVideoDecoder))
}
