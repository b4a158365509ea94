// 该文件是 Rimagine 项目的一部分。
// src/input.rs - 图像输入
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

use std::path::PathBuf;

use image::{DynamicImage, RgbImage};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 已解码的 RGB 源图像
#[derive(Debug, Clone)]
pub struct SourceImage {
  pub image: DynamicImage,
  /// 来源文件，内存中的图像为 None
  pub path: Option<PathBuf>,
  /// 在输入序列中的序号
  pub index: usize,
}

impl SourceImage {
  pub fn from_rgb(image: RgbImage) -> Self {
    Self {
      image: DynamicImage::ImageRgb8(image),
      path: None,
      index: 0,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}
