// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline.rs - 单帧检测流水线
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

use std::{sync::Arc, time::Instant};

use axum::http::StatusCode;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::AnnotatedFrame,
  input::{FrameExtractor, InputError, Upload},
  model::{DetectError, DetectResult, Detector},
  output::{AnnotatedChunkResponse, Draw, EncodeError, encode_png},
};

const INVALID_CHUNK_MESSAGE: &str = "Invalid chunk data";
const NO_FRAME_MESSAGE: &str = "Failed to read video chunk";

/// 一次请求可能的失败，每种对应一个固定的 HTTP 状态码
#[derive(Error, Debug)]
pub enum PipelineError {
  /// 请求中没有上传字段，携带返回给客户端的提示
  #[error("{0}")]
  MissingField(&'static str),
  #[error("Failed to read upload: {message}")]
  UploadRead { message: String, too_large: bool },
  #[error("Empty upload")]
  EmptyPayload,
  #[error("{0}")]
  Decode(String),
  #[error("Failed to read video chunk: {0}")]
  NoFrame(String),
  #[error("{0}")]
  Inference(String),
}

impl PipelineError {
  pub fn status(&self) -> StatusCode {
    match self {
      PipelineError::MissingField(_) => StatusCode::BAD_REQUEST,
      PipelineError::UploadRead { too_large: true, .. } => StatusCode::PAYLOAD_TOO_LARGE,
      PipelineError::UploadRead { .. } => StatusCode::BAD_REQUEST,
      PipelineError::EmptyPayload => StatusCode::BAD_REQUEST,
      PipelineError::Decode(_) => StatusCode::BAD_REQUEST,
      PipelineError::NoFrame(_) => StatusCode::BAD_REQUEST,
      PipelineError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  /// JSON 端点返回的 `error` 字段，解码细节只写日志
  pub fn json_message(&self) -> String {
    match self {
      PipelineError::Decode(_) => INVALID_CHUNK_MESSAGE.to_string(),
      PipelineError::NoFrame(_) => NO_FRAME_MESSAGE.to_string(),
      other => other.to_string(),
    }
  }

  pub fn is_client_error(&self) -> bool {
    self.status().is_client_error()
  }
}

impl From<InputError> for PipelineError {
  fn from(err: InputError) -> Self {
    match err {
      InputError::EmptyPayload => PipelineError::EmptyPayload,
      InputError::Decode(msg) => PipelineError::Decode(msg),
      InputError::NoFrame(msg) => PipelineError::NoFrame(msg),
      // 暂存失败属于服务端问题
      InputError::Staging(e) => PipelineError::Inference(format!("暂存视频块失败: {}", e)),
      e @ InputError::Backend(_) => PipelineError::Inference(e.to_string()),
    }
  }
}

impl From<DetectError> for PipelineError {
  fn from(err: DetectError) -> Self {
    PipelineError::Inference(err.to_string())
  }
}

impl From<EncodeError> for PipelineError {
  fn from(err: EncodeError) -> Self {
    PipelineError::Inference(err.to_string())
  }
}

pub struct PipelineOutput {
  pub annotated: AnnotatedFrame,
  pub detections: DetectResult,
}

/// 解码 -> 推理 -> 绘制，每个请求执行一次
pub struct FramePipeline {
  detector: Arc<dyn Detector>,
  extractor: FrameExtractor,
  draw: Draw,
}

impl FramePipeline {
  pub fn new(detector: Arc<dyn Detector>, extractor: FrameExtractor, draw: Draw) -> Self {
    Self {
      detector,
      extractor,
      draw,
    }
  }

  pub fn detector_name(&self) -> &str {
    self.detector.name()
  }

  pub fn run(&self, upload: &Upload) -> Result<PipelineOutput, PipelineError> {
    let start = Instant::now();
    let frame = self.extractor.extract(upload)?;
    let decoded = start.elapsed();
    debug!("取得输入帧 {}x{}, 耗时: {:.2?}", frame.width(), frame.height(), decoded);

    let now = Instant::now();
    let detections = self.detector.detect(&frame)?;
    let inferred = now.elapsed();
    debug!("推理完成, {} 个目标, 耗时: {:.2?}", detections.len(), inferred);

    let now = Instant::now();
    let annotated = self
      .draw
      .annotate(&frame, &detections, self.detector.labels());
    let drawn = now.elapsed();

    info!(
      "处理完成: {} 个目标, 解码 {:.2?} / 推理 {:.2?} / 绘制 {:.2?}",
      detections.len(),
      decoded,
      inferred,
      drawn
    );

    Ok(PipelineOutput {
      annotated,
      detections,
    })
  }

  /// 二进制模式
  pub fn run_png(&self, upload: &Upload) -> Result<Vec<u8>, PipelineError> {
    let output = self.run(upload)?;
    let now = Instant::now();
    let png = encode_png(&output.annotated)?;
    debug!("编码耗时: {:.2?}", now.elapsed());
    Ok(png)
  }

  /// JSON 信封模式
  pub fn run_envelope(
    &self,
    upload: &Upload,
    jpeg_quality: u8,
    with_metadata: bool,
  ) -> Result<AnnotatedChunkResponse, PipelineError> {
    let output = self.run(upload)?;
    let now = Instant::now();
    let response = AnnotatedChunkResponse::encode(&output.annotated, jpeg_quality, with_metadata)?;
    debug!("编码耗时: {:.2?}", now.elapsed());
    Ok(response)
  }
}

#[cfg(test)]
mod tests {
  use std::{
    io::Cursor,
    sync::atomic::{AtomicUsize, Ordering},
  };

  use image::{ImageFormat, RgbImage};

  use super::*;
  use crate::{
    frame::RgbFrame,
    input::{UnsupportedVideoDecoder, UploadKind, VideoChunkDecoder},
    model::{DetectItem, LabelSet},
  };

  struct CountingDetector {
    calls: AtomicUsize,
    labels: LabelSet,
    fail: bool,
  }

  impl CountingDetector {
    fn new(fail: bool) -> Arc<Self> {
      Arc::new(Self {
        calls: AtomicUsize::new(0),
        labels: LabelSet::coco(),
        fail,
      })
    }
  }

  impl Detector for CountingDetector {
    fn detect(&self, frame: &RgbFrame) -> Result<DetectResult, DetectError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        return Err(DetectError::Inference("engine exploded".to_string()));
      }
      Ok(DetectResult::from(vec![DetectItem {
        class_id: 0,
        score: 0.9,
        bbox: [1.0, 1.0, frame.width() as f32 - 2.0, frame.height() as f32 - 2.0],
      }]))
    }

    fn labels(&self) -> &LabelSet {
      &self.labels
    }

    fn name(&self) -> &str {
      "counting"
    }
  }

  struct NoFrameDecoder;

  impl VideoChunkDecoder for NoFrameDecoder {
    fn first_frame(&self, _chunk: &[u8]) -> Result<RgbFrame, InputError> {
      Err(InputError::NoFrame("end of stream".to_string()))
    }
  }

  struct BackendDownDecoder;

  impl VideoChunkDecoder for BackendDownDecoder {
    fn first_frame(&self, _chunk: &[u8]) -> Result<RgbFrame, InputError> {
      Err(InputError::Backend("no element \"decodebin\"".to_string()))
    }
  }

  fn pipeline(detector: Arc<CountingDetector>, video: Box<dyn VideoChunkDecoder>) -> FramePipeline {
    FramePipeline::new(detector, FrameExtractor::new(video), Draw::new().unwrap())
  }

  fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    RgbImage::new(width, height)
      .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
      .unwrap();
    buf
  }

  #[test]
  fn test_image_runs_detector_once() {
    let detector = CountingDetector::new(false);
    let pipeline = pipeline(detector.clone(), Box::new(UnsupportedVideoDecoder));
    let output = pipeline
      .run(&Upload::new(UploadKind::Image, png(48, 32)))
      .unwrap();
    assert_eq!(output.annotated.shape(), [32, 48, 3]);
    assert_eq!(output.detections.len(), 1);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_decode_failure_skips_detector() {
    let detector = CountingDetector::new(false);
    let pipeline = pipeline(detector.clone(), Box::new(UnsupportedVideoDecoder));
    let err = pipeline
      .run_png(&Upload::new(UploadKind::Image, b"not an image".to_vec()))
      .unwrap_err();
    assert!(matches!(err, PipelineError::Decode(_)));
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_no_frame_maps_to_fixed_message() {
    let detector = CountingDetector::new(false);
    let pipeline = pipeline(detector.clone(), Box::new(NoFrameDecoder));
    let err = pipeline
      .run_envelope(&Upload::new(UploadKind::VideoChunk, vec![0x1a, 0x45, 0xdf, 0xa3]), 90, false)
      .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(err.json_message(), "Failed to read video chunk");
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_detector_failure_is_server_error() {
    let pipeline = pipeline(CountingDetector::new(true), Box::new(UnsupportedVideoDecoder));
    let err = pipeline
      .run_png(&Upload::new(UploadKind::Image, png(8, 8)))
      .unwrap_err();
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(err.json_message().contains("engine exploded"));
  }

  #[test]
  fn test_envelope_carries_metadata() {
    let pipeline = pipeline(CountingDetector::new(false), Box::new(UnsupportedVideoDecoder));
    let response = pipeline
      .run_envelope(&Upload::new(UploadKind::VideoChunk, png(20, 10)), 90, true)
      .unwrap();
    assert_eq!(response.shape, Some([10, 20, 3]));
    assert_eq!(response.dtype.as_deref(), Some("uint8"));
  }

  #[test]
  fn test_error_table() {
    let cases = [
      (PipelineError::MissingField("No video chunk provided"), 400, "No video chunk provided"),
      (
        PipelineError::UploadRead {
          message: "stream reset".to_string(),
          too_large: false,
        },
        400,
        "Failed to read upload: stream reset",
      ),
      (
        PipelineError::UploadRead {
          message: "length limit exceeded".to_string(),
          too_large: true,
        },
        413,
        "Failed to read upload: length limit exceeded",
      ),
      (PipelineError::EmptyPayload, 400, "Empty upload"),
      (PipelineError::Decode("bad magic".to_string()), 400, "Invalid chunk data"),
      (PipelineError::NoFrame("eos".to_string()), 400, "Failed to read video chunk"),
      (PipelineError::Inference("boom".to_string()), 500, "boom"),
    ];
    for (err, status, message) in cases {
      assert_eq!(err.status().as_u16(), status, "{:?}", err);
      assert_eq!(err.json_message(), message);
    }
  }

  #[test]
  fn test_plain_text_keeps_decoder_detail() {
    let err = PipelineError::from(InputError::Decode("bad magic".to_string()));
    assert_eq!(err.to_string(), "bad magic");
    let err = PipelineError::from(InputError::NoFrame("eos".to_string()));
    assert_eq!(err.to_string(), "Failed to read video chunk: eos");
  }

  #[test]
  fn test_decoder_backend_fault_is_server_error() {
    let detector = CountingDetector::new(false);
    let pipeline = pipeline(detector.clone(), Box::new(BackendDownDecoder));
    let err = pipeline
      .run(&Upload::new(UploadKind::VideoChunk, vec![0x1a, 0x45, 0xdf, 0xa3]))
      .err()
      .unwrap();

    assert!(matches!(err, PipelineError::Inference(_)), "{:?}", err);
    assert_eq!(err.status().as_u16(), 500);
    assert!(!err.is_client_error());
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
  }
}
