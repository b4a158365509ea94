// 该文件是 Rimagine 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像文件
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

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::SourceImage,
  model::DetectResult,
  output::{Render, draw::Draw},
};

/// 保存标注图像
///
/// 路径为目录（已存在或以 `/` 结尾）时文件名为 `processed_<毫秒时间戳>.jpg`；
/// 为文件时，批量输入的第二张起在文件名后追加序号。
pub struct SaveImageFileOutput {
  path: PathBuf,
  is_directory: bool,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(Self::new(uri.path()))
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl AsRef<Path>) -> Self {
    let path = path.as_ref();
    let is_directory = path.is_dir() || path.to_string_lossy().ends_with('/');
    Self {
      path: path.to_path_buf(),
      is_directory,
      draw: Draw::default(),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  /// 计算本次输出的文件路径
  pub fn target_path(&self, frame: &SourceImage) -> PathBuf {
    if self.is_directory {
      let millis = Utc::now().timestamp_millis();
      let mut path = self.path.join(format!("processed_{millis}.jpg"));
      // 同一毫秒内的多张图像
      let mut n = 1;
      while path.exists() {
        path = self.path.join(format!("processed_{millis}_{n}.jpg"));
        n += 1;
      }
      path
    } else if frame.index == 0 {
      self.path.clone()
    } else {
      let stem = self
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
      let name = match self.path.extension() {
        Some(ext) => format!("{stem}_{}.{}", frame.index, ext.to_string_lossy()),
        None => format!("{stem}_{}", frame.index),
      };
      self.path.with_file_name(name)
    }
  }

  fn save_image(&self, image: image::RgbImage, path: &Path) -> Result<(), SaveImageFileError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(path)?;
    info!("保存图像到文件: {}", path.display());

    Ok(())
  }
}

impl Render<SourceImage, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(
    &self,
    frame: &SourceImage,
    result: &DetectResult,
  ) -> Result<Option<PathBuf>, Self::Error> {
    let image = self.draw.annotate(&frame.image, result);
    let path = self.target_path(frame);
    self.save_image(image, &path)?;
    Ok(Some(path))
  }
}
