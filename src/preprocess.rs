// 该文件是 Rimagine 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use std::{borrow::Cow, fmt, str::FromStr};

use image::{
  DynamicImage, GenericImageView, Rgb, RgbImage,
  error::{ImageError, ParameterError, ParameterErrorKind},
  imageops::{self, FilterType},
};
use tracing::debug;

use crate::{
  error::DetectError,
  frame::{InputTensor, RGB_CHANNELS},
};

/// 信箱填充背景色（黑色）
pub const LETTERBOX_COLOR: [u8; 3] = [0, 0, 0];

pub const DEFAULT_NORMALIZATION_MEAN: f32 = 127.5;
pub const DEFAULT_NORMALIZATION_STD: f32 = 127.5;

/// 缩放策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeStrategy {
  /// 直接拉伸到目标尺寸，不保持宽高比
  #[default]
  Stretch,
  /// 保持宽高比缩放，居中放置在黑色画布上
  LetterboxPad,
}

impl FromStr for ResizeStrategy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "stretch" => Ok(ResizeStrategy::Stretch),
      "letterbox" | "letterbox-pad" | "letterboxpad" => Ok(ResizeStrategy::LetterboxPad),
      other => Err(format!("未知的缩放策略: {}", other)),
    }
  }
}

impl fmt::Display for ResizeStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ResizeStrategy::Stretch => write!(f, "stretch"),
      ResizeStrategy::LetterboxPad => write!(f, "letterbox"),
    }
  }
}

/// 预处理配置，在模型加载期间保持不变
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessConfig {
  pub target_width: u32,
  pub target_height: u32,
  pub normalization_mean: f32,
  pub normalization_std: f32,
  pub resize_strategy: ResizeStrategy,
}

impl PreprocessConfig {
  pub fn new(target_width: u32, target_height: u32) -> Self {
    Self {
      target_width,
      target_height,
      normalization_mean: DEFAULT_NORMALIZATION_MEAN,
      normalization_std: DEFAULT_NORMALIZATION_STD,
      resize_strategy: ResizeStrategy::default(),
    }
  }

  pub fn with_strategy(mut self, strategy: ResizeStrategy) -> Self {
    self.resize_strategy = strategy;
    self
  }

  pub fn with_normalization(mut self, mean: f32, std: f32) -> Self {
    self.normalization_mean = mean;
    self.normalization_std = std;
    self
  }

  /// 将 0..=255 的像素值归一化：`(v/255 - mean/255) / (std/255)`
  #[inline]
  pub fn normalize(&self, value: u8) -> f32 {
    (value as f32 / 255.0 - self.normalization_mean / 255.0) / (self.normalization_std / 255.0)
  }
}

/// 从模型输入坐标映射回原图坐标所需的信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleInfo {
  /// 原图到模型输入的 x 方向缩放
  pub scale_x: f32,
  /// 原图到模型输入的 y 方向缩放
  pub scale_y: f32,
  /// 水平填充偏移
  pub pad_x: f32,
  /// 垂直填充偏移
  pub pad_y: f32,
  pub source_width: u32,
  pub source_height: u32,
}

impl ScaleInfo {
  /// 原图坐标 -> 模型输入坐标
  pub fn to_model(&self, x: f32, y: f32) -> (f32, f32) {
    (x * self.scale_x + self.pad_x, y * self.scale_y + self.pad_y)
  }

  /// 模型输入坐标 -> 原图坐标，不做截断
  pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
    ((x - self.pad_x) / self.scale_x, (y - self.pad_y) / self.scale_y)
  }
}

/// 解码图像字节后再做预处理
pub fn prepare_encoded(
  bytes: &[u8],
  config: &PreprocessConfig,
) -> Result<(InputTensor, ScaleInfo), DetectError> {
  let image = image::load_from_memory(bytes)?;
  prepare(&image, config)
}

/// 将任意尺寸的 RGB 图像转换为模型输入张量
pub fn prepare(
  image: &DynamicImage,
  config: &PreprocessConfig,
) -> Result<(InputTensor, ScaleInfo), DetectError> {
  let channels = image.color().channel_count();
  if channels as usize != RGB_CHANNELS {
    return Err(DetectError::UnsupportedFormat { channels });
  }

  let (source_width, source_height) = image.dimensions();
  if source_width == 0 || source_height == 0 {
    return Err(DetectError::Decode(ImageError::Parameter(
      ParameterError::from_kind(ParameterErrorKind::DimensionMismatch),
    )));
  }

  let rgb: Cow<'_, RgbImage> = match image {
    DynamicImage::ImageRgb8(rgb) => Cow::Borrowed(rgb),
    _ => Cow::Owned(image.to_rgb8()),
  };

  let (target_width, target_height) = (config.target_width, config.target_height);
  let (canvas, scale_info) = match config.resize_strategy {
    ResizeStrategy::Stretch => {
      let canvas = imageops::resize(
        &*rgb,
        target_width,
        target_height,
        FilterType::Triangle,
      );
      let scale_info = ScaleInfo {
        scale_x: target_width as f32 / source_width as f32,
        scale_y: target_height as f32 / source_height as f32,
        pad_x: 0.0,
        pad_y: 0.0,
        source_width,
        source_height,
      };
      (canvas, scale_info)
    }
    ResizeStrategy::LetterboxPad => {
      let scale = (target_width as f32 / source_width as f32)
        .min(target_height as f32 / source_height as f32);
      let new_width = ((source_width as f32 * scale).round() as u32).clamp(1, target_width);
      let new_height = ((source_height as f32 * scale).round() as u32).clamp(1, target_height);
      let pad_x = (target_width - new_width) / 2;
      let pad_y = (target_height - new_height) / 2;

      let resized = imageops::resize(&*rgb, new_width, new_height, FilterType::Triangle);
      let mut canvas = RgbImage::from_pixel(target_width, target_height, Rgb(LETTERBOX_COLOR));
      imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

      let scale_info = ScaleInfo {
        scale_x: scale,
        scale_y: scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        source_width,
        source_height,
      };
      (canvas, scale_info)
    }
  };

  debug!(
    "预处理: {}x{} -> {}x{} ({}), 缩放 ({:.4}, {:.4}), 填充 ({}, {})",
    source_width,
    source_height,
    target_width,
    target_height,
    config.resize_strategy,
    scale_info.scale_x,
    scale_info.scale_y,
    scale_info.pad_x,
    scale_info.pad_y
  );

  let mut tensor = InputTensor::with_shape(target_width, target_height);
  let slice = tensor.as_mut();
  // 按行、列、通道顺序写入 (H x W x 3)
  for (index, pixel) in canvas.pixels().enumerate() {
    let base = index * RGB_CHANNELS;
    for c in 0..RGB_CHANNELS {
      slice[base + c] = config.normalize(pixel[c]);
    }
  }

  Ok((tensor, scale_info))
}
