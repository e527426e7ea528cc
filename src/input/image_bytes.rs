// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/image_bytes.rs - 图像字节解码
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

use image::ImageReader;
use tracing::{debug, warn};

use crate::{frame::RgbFrame, input::InputError};

/// 解码任意受支持格式的图像，统一转换为三通道 RGB
///
/// 带透明通道的图像直接丢弃 alpha，灰度图扩展为三通道。
pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbFrame, InputError> {
  if bytes.is_empty() {
    return Err(InputError::EmptyPayload);
  }

  let reader = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()
    .map_err(|e| InputError::Decode(e.to_string()))?;
  let format = reader.format();

  let image = reader.decode().map_err(|e| {
    warn!("图像解码失败: {}", e);
    InputError::Decode(e.to_string())
  })?;

  debug!(
    "图像解码完成: {:?}, {}x{}, 原始色彩 {:?}",
    format,
    image.width(),
    image.height(),
    image.color()
  );

  Ok(RgbFrame::from(image.to_rgb8()))
}

#[cfg(test)]
mod tests {
  use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};

  use super::*;

  fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
  }

  #[test]
  fn test_rgba_png_drops_alpha() {
    let mut rgba = RgbaImage::new(3, 2);
    rgba.put_pixel(0, 0, Rgba([10, 20, 30, 0]));
    let frame = decode_image_bytes(&encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png)).unwrap();
    assert_eq!(frame.shape(), [2, 3, 3]);
    assert_eq!(frame.image().get_pixel(0, 0).0, [10, 20, 30]);
  }

  #[test]
  fn test_grayscale_is_expanded() {
    let mut gray = GrayImage::new(4, 4);
    gray.put_pixel(1, 1, Luma([200]));
    let frame = decode_image_bytes(&encode(DynamicImage::ImageLuma8(gray), ImageFormat::Png)).unwrap();
    assert_eq!(frame.shape(), [4, 4, 3]);
    assert_eq!(frame.image().get_pixel(1, 1).0, [200, 200, 200]);
  }

  #[test]
  fn test_jpeg_keeps_dimensions() {
    let rgb = DynamicImage::new_rgb8(33, 17);
    let frame = decode_image_bytes(&encode(rgb, ImageFormat::Jpeg)).unwrap();
    assert_eq!((frame.width(), frame.height()), (33, 17));
  }

  #[test]
  fn test_garbage_is_decode_error() {
    let result = decode_image_bytes(b"definitely not an image");
    assert!(matches!(result, Err(InputError::Decode(_))));
  }

  #[test]
  fn test_truncated_png_is_decode_error() {
    let bytes = encode(DynamicImage::new_rgb8(16, 16), ImageFormat::Png);
    let result = decode_image_bytes(&bytes[..bytes.len() / 2]);
    assert!(matches!(result, Err(InputError::Decode(_))));
  }

  #[test]
  fn test_empty_is_empty_payload() {
    assert!(matches!(decode_image_bytes(&[]), Err(InputError::EmptyPayload)));
  }
}
