// 该文件是 Shanan （山南西风） 项目的一部分。
// src/server.rs - HTTP 服务
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

use std::sync::Arc;

use axum::{
  Router,
  extract::DefaultBodyLimit,
  http::{Method, header},
  routing::{get, post},
};
use tower_http::{
  cors::{AllowOrigin, Any, CorsLayer},
  trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
  config::{ConfigError, ServeConfig, parse_origin},
  pipeline::FramePipeline,
};

mod handlers;
pub use self::handlers::ErrorBody;

pub const IMAGE_ROUTE: &str = "/upload/";
pub const VIDEO_CHUNK_ROUTE: &str = "/upload_video_chunk";
pub const VIDEO_FRAME_ROUTE: &str = "/upload_video_frame";
pub const HEALTH_ROUTE: &str = "/health";

/// 响应编码参数
#[derive(Debug, Clone, Copy)]
pub struct ResponseSettings {
  pub jpeg_quality: u8,
  pub chunk_metadata: bool,
}

impl From<&ServeConfig> for ResponseSettings {
  fn from(config: &ServeConfig) -> Self {
    Self {
      jpeg_quality: config.jpeg_quality,
      chunk_metadata: config.chunk_metadata,
    }
  }
}

#[derive(Clone)]
pub struct AppState {
  pipeline: Arc<FramePipeline>,
  settings: ResponseSettings,
}

impl AppState {
  pub fn new(pipeline: FramePipeline, settings: ResponseSettings) -> Self {
    Self {
      pipeline: Arc::new(pipeline),
      settings,
    }
  }
}

fn image_cors(origins: &[String]) -> Result<CorsLayer, ConfigError> {
  let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
  if origins.is_empty() {
    return Ok(layer.allow_origin(Any));
  }
  let origins = origins
    .iter()
    .map(|o| parse_origin(o))
    .collect::<Result<Vec<_>, _>>()?;
  Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

fn video_cors(origins: &[String]) -> Result<CorsLayer, ConfigError> {
  let layer = CorsLayer::new()
    .allow_methods([Method::POST, Method::OPTIONS])
    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
  if origins.is_empty() {
    // 任意来源时不能携带凭据
    return Ok(layer.allow_origin(Any));
  }
  let origins = origins
    .iter()
    .map(|o| parse_origin(o))
    .collect::<Result<Vec<_>, _>>()?;
  Ok(
    layer
      .allow_origin(AllowOrigin::list(origins))
      .allow_credentials(true),
  )
}

/// 每个端点使用自己的 CORS 规则
pub fn router(state: AppState, config: &ServeConfig) -> Result<Router, ConfigError> {
  let image = Router::new()
    .route(IMAGE_ROUTE, post(handlers::upload_image))
    .layer(image_cors(&config.image_cors_origins)?);

  let video = Router::new()
    .route(VIDEO_CHUNK_ROUTE, post(handlers::upload_video_chunk))
    .route(VIDEO_FRAME_ROUTE, post(handlers::upload_video_frame))
    .layer(video_cors(&config.video_cors_origins)?);

  Ok(
    Router::new()
      .merge(image)
      .merge(video)
      .route(HEALTH_ROUTE, get(handlers::health))
      .layer(DefaultBodyLimit::max(config.max_upload_bytes))
      .layer(TraceLayer::new_for_http())
      .with_state(state),
  )
}

/// 监听直到收到 Ctrl-C
pub async fn serve(app: Router, config: &ServeConfig) -> std::io::Result<()> {
  let listener = tokio::net::TcpListener::bind(config.bind).await?;
  info!("服务已启动, 监听地址: {}", listener.local_addr()?);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  info!("服务已退出");
  Ok(())
}

async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("收到中断信号，准备退出..."),
    Err(e) => {
      warn!("无法监听中断信号: {}", e);
      std::future::pending::<()>().await;
    }
  }
}
