// 该文件是 Rimagine 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::SourceImage,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, Record},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 记录方式：标注图像，或原图加文本记录
pub enum RecordMode {
  Draw,
  Record(Record),
}

impl RecordMode {
  fn from_query(value: Option<&str>) -> Self {
    match value {
      Some("id") => RecordMode::Record(Record {
        label_with_name: false,
      }),
      Some(_) => RecordMode::Record(Record {
        label_with_name: true,
      }),
      None => RecordMode::Draw,
    }
  }
}

/// 按日期分目录保存每一帧，`folder:///path?record=name|id&always`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  mode: RecordMode,
  draw: Draw,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| v.into_owned());
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(Self::new(
      uri.path(),
      RecordMode::from_query(record.as_deref()),
      always,
    ))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl AsRef<Path>, mode: RecordMode, always: bool) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      mode,
      draw: Draw::default(),
      frame_counter: AtomicU32::new(0),
      always,
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<SourceImage, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &SourceImage,
    result: &DetectResult,
  ) -> Result<Option<PathBuf>, Self::Error> {
    if !self.always && result.is_empty() {
      debug!("无检测结果，跳过记录");
      return Ok(None);
    }

    let path = self.frame_path()?;
    match &self.mode {
      RecordMode::Draw => {
        self.draw.annotate(&frame.image, result).save(&path)?;
      }
      RecordMode::Record(record) => {
        frame.image.to_rgb8().save(&path)?;
        record.record(self.draw.labels(), result, &path)?;
      }
    }
    debug!("记录帧: {}", path.display());

    Ok(Some(path))
  }
}
