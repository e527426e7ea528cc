// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/video_chunk.rs - GStreamer 视频块首帧提取测试
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

#![cfg(feature = "gstreamer_input")]

use std::{path::Path, time::Duration};

use gstreamer::{self as gst, prelude::*};

use shanan_serve::input::{
  FrameExtractor, GStreamerChunkDecoder, GStreamerInputError, InputError, Upload, UploadKind,
  VideoChunkDecoder, VideoStaging,
};

const TIMEOUT: Duration = Duration::from_secs(10);
const RAW_AVI_ELEMENTS: [&str; 8] = [
  "videotestsrc",
  "avimux",
  "avidemux",
  "appsrc",
  "filesrc",
  "decodebin",
  "videoconvert",
  "appsink",
];
const GARBAGE: &[u8] = b"\x1a\x45\xdf\xa3 this is not really a matroska stream";

fn decoder(staging: VideoStaging, dir: Option<&Path>) -> GStreamerChunkDecoder {
  GStreamerChunkDecoder::new(staging, TIMEOUT)
    .unwrap()
    .with_staging_dir(dir.map(Path::to_path_buf))
}

fn has_elements(names: &[&str]) -> bool {
  gst::init().unwrap();
  names
    .iter()
    .all(|name| gst::ElementFactory::find(name).is_some())
}

fn decoder_plugins_ready() -> bool {
  let ready = has_elements(&["appsrc", "filesrc", "decodebin", "videoconvert", "appsink"]);
  if !ready {
    eprintln!("缺少 GStreamer 插件，跳过");
  }
  ready
}

/// 用 videotestsrc 生成一段未压缩的 AVI，避免依赖编码器插件
fn raw_avi(dir: &Path, width: u32, height: u32) -> Vec<u8> {
  let path = dir.join("sample.avi");
  let description = format!(
    "videotestsrc num-buffers=3 ! video/x-raw,format=I420,width={},height={},framerate=10/1 \
     ! avimux ! filesink location=\"{}\"",
    width,
    height,
    path.display()
  );
  let pipeline = gst::parse::launch(&description)
    .unwrap()
    .downcast::<gst::Pipeline>()
    .unwrap();
  pipeline.set_state(gst::State::Playing).unwrap();

  let bus = pipeline.bus().unwrap();
  let msg = bus
    .timed_pop_filtered(
      gst::ClockTime::from_seconds(10),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    )
    .expect("生成测试视频超时");
  pipeline.set_state(gst::State::Null).unwrap();
  assert!(
    matches!(msg.view(), gst::MessageView::Eos(..)),
    "生成测试视频失败"
  );

  std::fs::read(path).unwrap()
}

#[test]
fn test_garbage_chunk_in_memory_has_no_frame() {
  if !decoder_plugins_ready() {
    return;
  }
  let result = decoder(VideoStaging::Memory, None).first_frame(GARBAGE);
  assert!(matches!(result, Err(InputError::NoFrame(_))), "{:?}", result.err());
}

#[test]
fn test_garbage_chunk_in_tempfile_leaves_no_file() {
  if !decoder_plugins_ready() {
    return;
  }
  let dir = tempfile::tempdir().unwrap();
  let result = decoder(VideoStaging::Tempfile, Some(dir.path())).first_frame(GARBAGE);

  assert!(matches!(result, Err(InputError::NoFrame(_))), "{:?}", result.err());
  assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_first_frame_of_raw_avi() {
  if !has_elements(&RAW_AVI_ELEMENTS) {
    eprintln!("缺少 GStreamer 插件，跳过");
    return;
  }

  let work = tempfile::tempdir().unwrap();
  let chunk = raw_avi(work.path(), 64, 48);

  let frame = decoder(VideoStaging::Memory, None).first_frame(&chunk).unwrap();
  assert_eq!(frame.shape(), [48, 64, 3]);

  let staging = tempfile::tempdir().unwrap();
  let frame = decoder(VideoStaging::Tempfile, Some(staging.path()))
    .first_frame(&chunk)
    .unwrap();
  assert_eq!((frame.width(), frame.height()), (64, 48));
  assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
}

#[test]
fn test_extractor_routes_chunk_to_gstreamer() {
  if !decoder_plugins_ready() {
    return;
  }
  let extractor = FrameExtractor::new(Box::new(decoder(VideoStaging::Memory, None)));
  let result = extractor.extract(&Upload::new(UploadKind::VideoChunk, GARBAGE.to_vec()));
  assert!(matches!(result, Err(InputError::NoFrame(_))));
}

#[test]
fn test_tempfile_staging_dir_with_quotes_and_spaces() {
  if !has_elements(&RAW_AVI_ELEMENTS) {
    eprintln!("缺少 GStreamer 插件，跳过");
    return;
  }

  let work = tempfile::tempdir().unwrap();
  let chunk = raw_avi(work.path(), 32, 24);

  let root = tempfile::tempdir().unwrap();
  let staging = root.path().join("upload \"dir\" \\ ! filesink");
  std::fs::create_dir(&staging).unwrap();

  let frame = decoder(VideoStaging::Tempfile, Some(&staging))
    .first_frame(&chunk)
    .unwrap();
  assert_eq!(frame.shape(), [24, 32, 3]);
  assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
}

#[test]
fn test_decoder_requires_its_plugins() {
  let result = GStreamerChunkDecoder::new(VideoStaging::Tempfile, TIMEOUT);
  if has_elements(&["filesrc", "decodebin", "videoconvert", "appsink"]) {
    assert!(result.is_ok());
  } else {
    assert!(matches!(result, Err(GStreamerInputError::MissingPlugin(_))));
  }
}
