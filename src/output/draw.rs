// 该文件是 Rimagine 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, FontVec, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
  label::ClassLabelTable,
  model::{DetectResult, Detection},
};

const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const TEXT_COLOR: [u8; 3] = [255, 0, 0];
const LABEL_BACKGROUND_ALPHA: u16 = 160;
const LABEL_PADDING: u32 = 4;
const MIN_TEXT_SIZE: f32 = 12.0;
// 无字体时每字符宽度与字号之比（粗略估计）
const CHAR_WIDTH_RATIO: f32 = 0.6;

// 默认字体 DejaVu Sans
static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

fn default_font() -> Option<FontArc> {
  match FontArc::try_from_slice(DEFAULT_FONT) {
    Ok(font) => Some(font),
    Err(e) => {
      error!("无法加载内置字体: {}", e);
      None
    }
  }
}

#[derive(Error, Debug)]
pub enum FontLoadError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 读取 TTF/OTF 字体文件
pub fn load_font(path: &Path) -> Result<FontVec, FontLoadError> {
  let data = std::fs::read(path)?;
  let font = FontVec::try_from_vec(data)?;
  debug!("加载字体: {}", path.display());
  Ok(font)
}

/// 边框线宽：长边的 1/150，至少 1 像素
pub fn stroke_width(width: u32, height: u32) -> u32 {
  (width.max(height) / 150).max(1)
}

/// 标签字号：长边的 1/30
pub fn text_scale(width: u32, height: u32) -> f32 {
  (width.max(height) as f32 / 30.0).max(MIN_TEXT_SIZE)
}

/// 标签文本 "<名称> <置信度>"
pub fn label_text(labels: &ClassLabelTable, detection: &Detection) -> String {
  format!(
    "{} {:.2}",
    labels.display_name(detection.class_id),
    detection.confidence
  )
}

/// 标签背景左上角：优先放在框上方，上方空间不足时放进框内
fn label_origin(detection: &Detection, label_size: (u32, u32), image_width: u32) -> (i32, i32) {
  let (label_width, label_height) = label_size;
  let max_x = image_width.saturating_sub(label_width) as i32;
  let x = (detection.left.floor() as i32).clamp(0, max_x.max(0));
  let top = detection.top.floor() as i32;
  let y = if top >= label_height as i32 {
    top - label_height as i32
  } else {
    top.max(0)
  };
  (x, y)
}

pub struct Draw {
  labels: ClassLabelTable,
  font: Option<FontArc>,
  box_color: Rgb<u8>,
  text_color: Rgb<u8>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(ClassLabelTable::default())
  }
}

impl Draw {
  pub fn new(labels: ClassLabelTable) -> Self {
    Self {
      labels,
      font: default_font(),
      box_color: Rgb(BOX_COLOR),
      text_color: Rgb(TEXT_COLOR),
    }
  }

  /// 替换内置字体
  pub fn with_font(mut self, font: impl Into<FontArc>) -> Self {
    self.font = Some(font.into());
    self
  }

  pub fn labels(&self) -> &ClassLabelTable {
    &self.labels
  }

  /// 复制源图像并绘制全部检测结果
  pub fn annotate(&self, image: &DynamicImage, result: &DetectResult) -> RgbImage {
    let mut canvas = image.to_rgb8();
    self.draw_detections(&mut canvas, result);
    canvas
  }

  /// 按检测顺序绘制，后绘制的覆盖先绘制的
  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult) {
    if self.font.is_none() && !result.is_empty() {
      warn!("未加载字体，仅绘制边框与标签背景");
    }

    let stroke = stroke_width(image.width(), image.height());
    let scale = text_scale(image.width(), image.height());
    for detection in result.iter() {
      self.draw_box(image, detection, stroke);
      self.draw_label(image, detection, scale);
    }
  }

  fn draw_box(&self, image: &mut RgbImage, detection: &Detection, stroke: u32) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x0 = (detection.left.floor() as i32).clamp(0, w - 1);
    let y0 = (detection.top.floor() as i32).clamp(0, h - 1);
    let x1 = (detection.right.ceil() as i32 - 1).clamp(0, w - 1);
    let y1 = (detection.bottom.ceil() as i32 - 1).clamp(0, h - 1);

    // 线宽向内生长
    for t in 0..stroke as i32 {
      let width = x1 - x0 + 1 - 2 * t;
      let height = y1 - y0 + 1 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x0 + t, y0 + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, self.box_color);
    }
  }

  fn label_size(&self, text: &str, scale: f32) -> (u32, u32) {
    let (text_width, text_height) = match &self.font {
      Some(font) => text_size(PxScale::from(scale), font, text),
      None => (
        (text.chars().count() as f32 * scale * CHAR_WIDTH_RATIO).ceil() as u32,
        scale.ceil() as u32,
      ),
    };
    (text_width + LABEL_PADDING, text_height + LABEL_PADDING)
  }

  fn draw_label(&self, image: &mut RgbImage, detection: &Detection, scale: f32) {
    let text = label_text(&self.labels, detection);
    let size = self.label_size(&text, scale);
    let (x, y) = label_origin(detection, size, image.width());

    fill_translucent(image, x, y, size);

    if let Some(font) = &self.font {
      let offset = (LABEL_PADDING / 2) as i32;
      draw_text_mut(
        image,
        self.text_color,
        x + offset,
        y + offset,
        PxScale::from(scale),
        font,
        &text,
      );
    }
  }
}

/// 在矩形区域内叠加半透明黑色
fn fill_translucent(image: &mut RgbImage, x: i32, y: i32, (width, height): (u32, u32)) {
  let x_end = (x + width as i32).min(image.width() as i32);
  let y_end = (y + height as i32).min(image.height() as i32);
  for py in y.max(0)..y_end {
    for px in x.max(0)..x_end {
      let pixel = image.get_pixel_mut(px as u32, py as u32);
      for c in pixel.0.iter_mut() {
        *c = (*c as u16 * (255 - LABEL_BACKGROUND_ALPHA) / 255) as u8;
      }
    }
  }
}

/// 以文本形式记录检测结果，每行 "名称, 置信度, 左, 上, 右, 下"
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn format(&self, labels: &ClassLabelTable, result: &DetectResult) -> String {
    result
      .iter()
      .map(|d| {
        let name = if self.label_with_name {
          labels.display_name(d.class_id).into_owned()
        } else {
          d.class_id.to_string()
        };
        format!(
          "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
          name, d.confidence, d.left, d.top, d.right, d.bottom
        )
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  pub fn record(
    &self,
    labels: &ClassLabelTable,
    result: &DetectResult,
    path: &Path,
  ) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.format(labels, result))
  }
}
