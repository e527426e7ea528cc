// 该文件是 Shanan （山南西风） 项目的一部分。
// src/server/handlers.rs - 上传端点
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

use axum::{
  Json,
  extract::{Multipart, State, multipart::MultipartRejection},
  http::{StatusCode, header},
  response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::{
  input::{Upload, UploadKind},
  output::AnnotatedChunkResponse,
  pipeline::{FramePipeline, PipelineError},
  server::AppState,
};

const IMAGE_FIELD: &str = "file";
const VIDEO_FIELD: &str = "video_chunk";
const NO_IMAGE_MESSAGE: &str = "No image file provided";
const NO_VIDEO_MESSAGE: &str = "No video chunk provided";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
  pub error: String,
}

#[derive(Debug, Clone, Copy)]
enum ErrorFormat {
  Json,
  PlainText,
}

pub(super) struct ApiError {
  error: PipelineError,
  format: ErrorFormat,
}

impl ApiError {
  fn json(error: PipelineError) -> Self {
    Self {
      error,
      format: ErrorFormat::Json,
    }
  }

  fn plain_text(error: PipelineError) -> Self {
    // 缺少字段时两类端点都返回 JSON
    let format = match error {
      PipelineError::MissingField(_) => ErrorFormat::Json,
      _ => ErrorFormat::PlainText,
    };
    Self { error, format }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.error.status();
    if self.error.is_client_error() {
      warn!("请求被拒绝 ({}): {}", status, self.error);
    } else {
      error!("请求处理失败 ({}): {}", status, self.error);
    }

    match self.format {
      ErrorFormat::Json => (
        status,
        Json(ErrorBody {
          error: self.error.json_message(),
        }),
      )
        .into_response(),
      ErrorFormat::PlainText => (status, self.error.to_string()).into_response(),
    }
  }
}

/// 取出指定字段的全部字节，其余字段忽略
async fn read_field(
  multipart: Result<Multipart, MultipartRejection>,
  name: &str,
  missing: &'static str,
) -> Result<Vec<u8>, PipelineError> {
  let mut multipart = multipart.map_err(|e| {
    debug!("不是 multipart 请求: {}", e);
    PipelineError::MissingField(missing)
  })?;

  loop {
    let field = multipart
      .next_field()
      .await
      .map_err(|e| PipelineError::UploadRead {
        too_large: e.status() == StatusCode::PAYLOAD_TOO_LARGE,
        message: e.body_text(),
      })?;
    let Some(field) = field else {
      return Err(PipelineError::MissingField(missing));
    };
    if field.name() != Some(name) {
      continue;
    }

    let bytes = field.bytes().await.map_err(|e| PipelineError::UploadRead {
      too_large: e.status() == StatusCode::PAYLOAD_TOO_LARGE,
      message: e.body_text(),
    })?;
    debug!("收到上传字段 {}: {} 字节", name, bytes.len());
    return Ok(bytes.to_vec());
  }
}

/// 流水线是 CPU 密集的同步代码，放到阻塞线程池执行
async fn run_blocking<T, F>(state: &AppState, job: F) -> Result<T, PipelineError>
where
  T: Send + 'static,
  F: FnOnce(&FramePipeline) -> Result<T, PipelineError> + Send + 'static,
{
  let pipeline = state.pipeline.clone();
  tokio::task::spawn_blocking(move || job(&pipeline))
    .await
    .map_err(|e| PipelineError::Inference(format!("处理任务异常退出: {}", e)))?
}

/// `POST /upload/`，返回 PNG
pub(super) async fn upload_image(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
  let bytes = read_field(multipart, IMAGE_FIELD, NO_IMAGE_MESSAGE)
    .await
    .map_err(ApiError::plain_text)?;
  let upload = Upload::new(UploadKind::Image, bytes);

  let png = run_blocking(&state, move |pipeline| pipeline.run_png(&upload))
    .await
    .map_err(ApiError::plain_text)?;

  Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// `POST /upload_video_chunk`，取视频块的第一帧
pub(super) async fn upload_video_chunk(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnnotatedChunkResponse>, ApiError> {
  let bytes = read_field(multipart, VIDEO_FIELD, NO_VIDEO_MESSAGE)
    .await
    .map_err(ApiError::json)?;
  let upload = Upload::new(UploadKind::VideoChunk, bytes);
  let settings = state.settings;

  let response = run_blocking(&state, move |pipeline| {
    pipeline.run_envelope(&upload, settings.jpeg_quality, settings.chunk_metadata)
  })
  .await
  .map_err(ApiError::json)?;

  Ok(Json(response))
}

/// `POST /upload_video_frame`，前端逐帧上传的静态图片
pub(super) async fn upload_video_frame(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnnotatedChunkResponse>, ApiError> {
  let bytes = read_field(multipart, VIDEO_FIELD, NO_VIDEO_MESSAGE)
    .await
    .map_err(ApiError::json)?;
  let upload = Upload::new(UploadKind::Image, bytes);
  let quality = state.settings.jpeg_quality;

  let response = run_blocking(&state, move |pipeline| {
    pipeline.run_envelope(&upload, quality, true)
  })
  .await
  .map_err(ApiError::json)?;

  Ok(Json(response))
}

pub(super) async fn health(State(state): State<AppState>) -> impl IntoResponse {
  Json(json!({
    "status": "ok",
    "detector": state.pipeline.detector_name(),
  }))
}
