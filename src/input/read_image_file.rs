// 该文件是 Rimagine 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{DynamicImage, ImageReader};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::SourceImage};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {path}: {source}")]
  ImageLoadError {
    path: PathBuf,
    source: image::ImageError,
  },
  #[error("No image found in {0}")]
  Empty(PathBuf),
}

/// 图像文件输入：单个文件或目录下的全部图像（按文件名排序）
///
/// 图像在迭代时才解码，单张图像解码失败不影响后续图像。
#[derive(Debug)]
pub struct ImageFileInput {
  paths: std::vec::IntoIter<PathBuf>,
  index: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(Path::new(url.path()))
  }
}

impl ImageFileInput {
  pub fn open(path: &Path) -> Result<Self, ImageFileInputError> {
    let paths = if path.is_dir() {
      let mut paths = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image_file(p))
        .collect::<Vec<_>>();
      paths.sort();
      if paths.is_empty() {
        return Err(ImageFileInputError::Empty(path.to_path_buf()));
      }
      info!("从目录 {} 读取 {} 张图像", path.display(), paths.len());
      paths
    } else if path.is_file() {
      vec![path.to_path_buf()]
    } else {
      return Err(ImageFileInputError::IoError(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} 不存在", path.display()),
      )));
    };

    Ok(Self {
      paths: paths.into_iter(),
      index: 0,
    })
  }

  pub fn remaining(&self) -> usize {
    self.paths.len()
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// 解码图像文件并转换为 RGB
pub fn read_image(path: &Path) -> Result<DynamicImage, ImageFileInputError> {
  let to_error = |source| ImageFileInputError::ImageLoadError {
    path: path.to_path_buf(),
    source,
  };
  let image = ImageReader::open(path)?
    .with_guessed_format()?
    .decode()
    .map_err(to_error)?;
  debug!(
    "读取图像 {}: {}x{} {:?}",
    path.display(),
    image.width(),
    image.height(),
    image.color()
  );

  Ok(match image {
    DynamicImage::ImageRgb8(_) => image,
    other => DynamicImage::ImageRgb8(other.to_rgb8()),
  })
}

impl Iterator for ImageFileInput {
  type Item = Result<SourceImage, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.paths.next()?;
    let index = self.index;
    self.index += 1;
    Some(read_image(&path).map(|image| SourceImage {
      image,
      path: Some(path),
      index,
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage, RgbaImage};

  fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rimagine-input-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  #[test]
  fn test_directory_input_sorted_and_filtered() {
    let dir = temp_dir("dir");
    RgbImage::from_pixel(4, 3, Rgb([1, 2, 3]))
      .save(dir.join("b.png"))
      .unwrap();
    RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]))
      .save(dir.join("a.png"))
      .unwrap();
    std::fs::write(dir.join("notes.txt"), "skip").unwrap();

    let input = ImageFileInput::open(&dir).unwrap();
    assert_eq!(input.remaining(), 2);
    let images = input.collect::<Result<Vec<_>, _>>().unwrap();
    std::fs::remove_dir_all(&dir).unwrap();

    assert_eq!(images[0].index, 0);
    assert_eq!((images[0].width(), images[0].height()), (2, 2));
    assert_eq!((images[1].width(), images[1].height()), (4, 3));
  }

  #[test]
  fn test_rgba_file_is_converted_to_rgb() {
    let dir = temp_dir("rgba");
    let path = dir.join("alpha.png");
    RgbaImage::new(3, 3).save(&path).unwrap();
    let image = read_image(&path).unwrap();
    std::fs::remove_dir_all(&dir).unwrap();
    assert!(matches!(image, DynamicImage::ImageRgb8(_)));
  }

  #[test]
  fn test_corrupt_file_surfaces_decode_error() {
    let dir = temp_dir("corrupt");
    let path = dir.join("broken.jpg");
    std::fs::write(&path, b"\xff\xd8\xff garbage").unwrap();
    let mut input = ImageFileInput::open(&path).unwrap();
    let err = input.next().unwrap().unwrap_err();
    std::fs::remove_dir_all(&dir).unwrap();

    // 错误信息带上出错文件的路径
    assert!(matches!(&err, ImageFileInputError::ImageLoadError { path: p, .. } if *p == path));
    assert!(err.to_string().contains("broken.jpg"));
  }

  #[test]
  fn test_scheme_mismatch() {
    let url = Url::parse("folder:///tmp").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
