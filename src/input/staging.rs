// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/staging.rs - 视频块临时暂存
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

use std::{
  io::Write,
  path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::debug;

const STAGING_PREFIX: &str = "shanan-chunk-";
const STAGING_SUFFIX: &str = ".webm";

/// 请求级的视频块暂存文件
///
/// 文件在值被释放时删除，无论解码成功还是失败。
pub struct StagedChunk {
  file: NamedTempFile,
}

impl StagedChunk {
  /// `dir` 为空时使用系统临时目录
  pub fn write(dir: Option<&Path>, bytes: &[u8]) -> std::io::Result<Self> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(STAGING_PREFIX).suffix(STAGING_SUFFIX);
    let mut file = match dir {
      Some(dir) => builder.tempfile_in(dir)?,
      None => builder.tempfile()?,
    };

    file.write_all(bytes)?;
    file.flush()?;
    debug!("暂存视频块: {} ({} 字节)", file.path().display(), bytes.len());

    Ok(Self { file })
  }

  pub fn path(&self) -> &Path {
    self.file.path()
  }

  /// 显式删除，返回删除时的 I/O 错误
  pub fn close(self) -> std::io::Result<()> {
    let path: PathBuf = self.file.path().to_path_buf();
    self.file.close()?;
    debug!("删除暂存文件: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_file_holds_bytes_and_is_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let path = {
      let staged = StagedChunk::write(Some(dir.path()), b"chunk-bytes").unwrap();
      assert_eq!(std::fs::read(staged.path()).unwrap(), b"chunk-bytes");
      staged.path().to_path_buf()
    };
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[test]
  fn test_close_removes_file() {
    let dir = tempfile::tempdir().unwrap();
    let staged = StagedChunk::write(Some(dir.path()), b"x").unwrap();
    let path = staged.path().to_path_buf();
    staged.close().unwrap();
    assert!(!path.exists());
  }

  #[test]
  fn test_missing_dir_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert!(StagedChunk::write(Some(&missing), b"x").is_err());
  }
}
