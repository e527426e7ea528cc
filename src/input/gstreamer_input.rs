// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频块首帧提取
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

//! # GStreamer 视频块输入模块
//!
//! 从前端上传的短视频块（通常是 MediaRecorder 产生的 WebM 片段）中解出第一帧。
//!
//! 支持两种暂存方式：
//! - `memory`：通过 `appsrc` 把字节直接推入 `decodebin`，不落盘
//! - `tempfile`：先写入请求级临时文件，再由 `filesrc` 打开，适用于 `moov`
//!   在文件末尾的 MP4 等需要随机访问的容器
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use std::time::Duration;
//! use shanan_serve::input::{GStreamerChunkDecoder, VideoChunkDecoder, VideoStaging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let decoder = GStreamerChunkDecoder::new(VideoStaging::Memory, Duration::from_secs(10))?;
//! let chunk = std::fs::read("chunk.webm")?;
//! let frame = decoder.first_frame(&chunk)?;
//! println!("首帧: {}x{}", frame.width(), frame.height());
//! # Ok(())
//! # }
//! ```

use std::{
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::RgbFrame,
  input::{InputError, StagedChunk, VideoChunkDecoder, VideoStaging},
};

const POLL_INTERVAL_MS: u64 = 50;
const RGB_CHANNELS: usize = 3;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取管道元素
  #[error("Failed to get pipeline element: {0}")]
  ElementNotFound(&'static str),
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 缺少必需的 GStreamer 插件
  #[error("GStreamer element factory not found: {0}")]
  MissingPlugin(&'static str),
  /// 管道搭建或样本读取错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 总线上报的解码错误
  #[error("Decode error: {0}")]
  DecodeError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 推送数据失败
  #[error("Flow error: {0:?}")]
  FlowError(gst::FlowError),
  /// 第一帧之前就已结束
  #[error("End of stream before the first frame")]
  EndOfStream,
  /// 解码超时
  #[error("No frame within {0:?}")]
  Timeout(Duration),
}

impl From<GStreamerInputError> for InputError {
  fn from(err: GStreamerInputError) -> Self {
    match err {
      // 由上传内容引起的失败
      GStreamerInputError::DecodeError(_)
      | GStreamerInputError::EndOfStream
      | GStreamerInputError::Timeout(_)
      | GStreamerInputError::VideoInfoError
      | GStreamerInputError::UnsupportedFormat
      | GStreamerInputError::BufferSizeMismatch { .. }
      | GStreamerInputError::FlowError(_) => InputError::NoFrame(err.to_string()),
      GStreamerInputError::GStreamerError(_)
      | GStreamerInputError::GStreamerBoolError(_)
      | GStreamerInputError::ElementNotFound(_)
      | GStreamerInputError::MissingPlugin(_)
      | GStreamerInputError::PipelineError(_)
      | GStreamerInputError::StateChangeError(_) => InputError::Backend(err.to_string()),
    }
  }
}

const MEMORY_PIPELINE: &str = "appsrc name=src ! decodebin ! videoconvert ! video/x-raw,format=RGB \
   ! appsink name=sink max-buffers=1 sync=false";

// 文件路径通过属性设置，不拼进描述字符串
const FILE_PIPELINE: &str = "filesrc name=src ! decodebin ! videoconvert ! video/x-raw,format=RGB \
   ! appsink name=sink max-buffers=1 sync=false";

fn required_elements(staging: VideoStaging) -> [&'static str; 4] {
  let source = match staging {
    VideoStaging::Memory => "appsrc",
    VideoStaging::Tempfile => "filesrc",
  };
  [source, "decodebin", "videoconvert", "appsink"]
}

fn ensure_elements(names: &[&'static str]) -> Result<(), GStreamerInputError> {
  match names
    .iter()
    .copied()
    .find(|name| gst::ElementFactory::find(name).is_none())
  {
    Some(name) => Err(GStreamerInputError::MissingPlugin(name)),
    None => Ok(()),
  }
}

/// 基于 GStreamer 的视频块解码器
///
/// 每次调用新建一条管道，调用之间不共享任何状态。
pub struct GStreamerChunkDecoder {
  staging: VideoStaging,
  staging_dir: Option<PathBuf>,
  timeout: Duration,
}

impl GStreamerChunkDecoder {
  /// 初始化 GStreamer 并确认所需插件都已安装
  pub fn new(staging: VideoStaging, timeout: Duration) -> Result<Self, GStreamerInputError> {
    gst::init()?;
    ensure_elements(&required_elements(staging))?;
    info!("GStreamer 已初始化, 暂存方式 {:?}, 超时 {:?}", staging, timeout);
    Ok(Self {
      staging,
      staging_dir: None,
      timeout,
    })
  }

  /// 临时文件所在目录，仅 `tempfile` 方式使用
  pub fn with_staging_dir(mut self, dir: Option<PathBuf>) -> Self {
    self.staging_dir = dir;
    self
  }
}

impl VideoChunkDecoder for GStreamerChunkDecoder {
  fn first_frame(&self, chunk: &[u8]) -> Result<RgbFrame, InputError> {
    match self.staging {
      VideoStaging::Memory => {
        let pipeline = FirstFramePipeline::parse(MEMORY_PIPELINE)?;
        pipeline.play()?;
        pipeline.push_all(chunk)?;
        Ok(pipeline.pull_first_frame(self.timeout)?)
      }
      VideoStaging::Tempfile => {
        let staged = StagedChunk::write(self.staging_dir.as_deref(), chunk)?;
        // 管道先于暂存文件释放
        let frame = FirstFramePipeline::parse(FILE_PIPELINE).and_then(|pipeline| {
          pipeline.set_location(staged.path())?;
          pipeline.play()?;
          pipeline.pull_first_frame(self.timeout)
        });
        if let Err(e) = staged.close() {
          warn!("删除暂存文件失败: {}", e);
        }
        Ok(frame?)
      }
    }
  }
}

struct FirstFramePipeline {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for FirstFramePipeline {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl FirstFramePipeline {
  fn parse(description: &str) -> Result<Self, GStreamerInputError> {
    debug!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::ElementNotFound("sink"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::ElementNotFound("sink"))?;

    Ok(Self { pipeline, appsink })
  }

  fn play(&self) -> Result<(), GStreamerInputError> {
    self.pipeline.set_state(gst::State::Playing)?;
    Ok(())
  }

  fn set_location(&self, path: &Path) -> Result<(), GStreamerInputError> {
    let location = path.to_str().ok_or_else(|| {
      GStreamerInputError::PipelineError(format!("Staging path is not UTF-8: {}", path.display()))
    })?;
    let filesrc = self
      .pipeline
      .by_name("src")
      .ok_or(GStreamerInputError::ElementNotFound("src"))?;
    filesrc.set_property("location", location);
    Ok(())
  }

  fn push_all(&self, chunk: &[u8]) -> Result<(), GStreamerInputError> {
    let appsrc = self
      .pipeline
      .by_name("src")
      .ok_or(GStreamerInputError::ElementNotFound("src"))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerInputError::ElementNotFound("src"))?;

    appsrc.set_max_bytes(0);
    appsrc
      .push_buffer(gst::Buffer::from_slice(chunk.to_vec()))
      .map_err(GStreamerInputError::FlowError)?;
    appsrc
      .end_of_stream()
      .map_err(GStreamerInputError::FlowError)?;
    Ok(())
  }

  /// 轮询 appsink，同时检查总线上的错误与结束消息
  fn pull_first_frame(&self, timeout: Duration) -> Result<RgbFrame, GStreamerInputError> {
    let deadline = Instant::now() + timeout;
    let bus = self
      .pipeline
      .bus()
      .ok_or(GStreamerInputError::ElementNotFound("bus"))?;

    loop {
      if let Some(sample) = self
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(POLL_INTERVAL_MS))
      {
        return convert_sample_to_frame(sample);
      }

      while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) {
        match msg.view() {
          gst::MessageView::Error(err) => {
            debug!("GStreamer 错误: {} ({:?})", err.error(), err.debug());
            return Err(GStreamerInputError::DecodeError(err.error().to_string()));
          }
          gst::MessageView::Eos(..) => {
            // 结束消息之前入队的样本仍然可以取出
            return match self.appsink.try_pull_sample(gst::ClockTime::ZERO) {
              Some(sample) => convert_sample_to_frame(sample),
              None => Err(GStreamerInputError::EndOfStream),
            };
          }
          _ => {}
        }
      }

      if Instant::now() >= deadline {
        return Err(GStreamerInputError::Timeout(timeout));
      }
    }
  }
}

fn convert_sample_to_frame(sample: gst::Sample) -> Result<RgbFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info
    .stride()
    .first()
    .map(|s| *s as usize)
    .ok_or(GStreamerInputError::VideoInfoError)?;
  if width == 0 || height == 0 || stride < width * RGB_CHANNELS {
    return Err(GStreamerInputError::VideoInfoError);
  }

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  // 行之间可能有对齐填充
  let row_bytes = width * RGB_CHANNELS;
  let expected_size = stride * (height - 1) + row_bytes;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_bytes * height);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for h in 0..height {
        let start = h * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for h in 0..height {
        let start = h * stride;
        for bgr in data[start..start + row_bytes].chunks_exact(RGB_CHANNELS) {
          pixels.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  debug!("取得首帧: {}x{}, 行跨度 {}", width, height, stride);

  RgbFrame::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row_bytes * height,
      actual: data.len(),
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_content_failures_map_to_no_frame() {
    let errors = [
      GStreamerInputError::DecodeError("Could not determine type of stream".to_string()),
      GStreamerInputError::EndOfStream,
      GStreamerInputError::Timeout(Duration::from_secs(1)),
      GStreamerInputError::VideoInfoError,
      GStreamerInputError::UnsupportedFormat,
      GStreamerInputError::BufferSizeMismatch {
        expected: 12,
        actual: 6,
      },
      GStreamerInputError::FlowError(gst::FlowError::Error),
    ];
    for err in errors {
      let mapped = InputError::from(err);
      assert!(matches!(mapped, InputError::NoFrame(_)), "{:?}", mapped);
    }
  }

  #[test]
  fn test_setup_failures_map_to_backend() {
    let errors = [
      GStreamerInputError::MissingPlugin("decodebin"),
      GStreamerInputError::ElementNotFound("sink"),
      GStreamerInputError::PipelineError("Failed to create pipeline".to_string()),
      GStreamerInputError::StateChangeError(gst::StateChangeError),
    ];
    for err in errors {
      let mapped = InputError::from(err);
      assert!(matches!(mapped, InputError::Backend(_)), "{:?}", mapped);
    }
  }

  #[test]
  fn test_required_elements_follow_staging() {
    assert_eq!(required_elements(VideoStaging::Memory)[0], "appsrc");
    assert_eq!(required_elements(VideoStaging::Tempfile)[0], "filesrc");
    assert!(!FILE_PIPELINE.contains("location"));
  }

  #[test]
  fn test_missing_element_is_reported_by_name() {
    gst::init().unwrap();
    let result = ensure_elements(&["shanan-no-such-element"]);
    assert!(matches!(
      result,
      Err(GStreamerInputError::MissingPlugin("shanan-no-such-element"))
    ));
  }
}
