// 该文件是 Rimagine 项目的一部分。
// src/label.rs - 类别标签表
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

use std::{borrow::Cow, path::Path};

use thiserror::Error;
use tracing::debug;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 刹车盘检测模型的类别名称
///
/// 导出的模型输出 `[1, 8, 8400]`，即 4 个类别通道；前 3 个通道依次对应这里的名称
/// （后两个都是前盘），第 4 个通道没有标签，显示为 `Class 3`。
pub const DISK_CLASSES: [&str; 3] = ["back_disk", "front_disk", "front_disk"];

#[derive(Error, Debug)]
pub enum LabelTableError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 标签解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("JSON 标签文件必须是字符串数组")]
  NotAStringArray,
  #[error("标签表为空")]
  Empty,
}

/// 按类别索引排列的标签表，在模型加载时固定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassLabelTable {
  labels: Box<[String]>,
}

impl ClassLabelTable {
  pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
    Self {
      labels: labels.into_iter().map(Into::into).collect(),
    }
  }

  pub fn coco() -> Self {
    Self::new(COCO_CLASSES)
  }

  /// 从标签文件加载
  ///
  /// `.json` 文件为字符串数组，其他文件每行一个标签，忽略空行。
  pub fn from_file(path: &Path) -> Result<Self, LabelTableError> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
      .extension()
      .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let table = if is_json {
      Self::from_json(&content)?
    } else {
      Self::new(
        content
          .lines()
          .map(str::trim)
          .filter(|line| !line.is_empty()),
      )
    };

    if table.is_empty() {
      return Err(LabelTableError::Empty);
    }

    debug!("从 {} 加载了 {} 个标签", path.display(), table.len());
    Ok(table)
  }

  fn from_json(content: &str) -> Result<Self, LabelTableError> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let array = value.as_array().ok_or(LabelTableError::NotAStringArray)?;
    let labels = array
      .iter()
      .map(|v| v.as_str().map(str::to_string))
      .collect::<Option<Vec<_>>>()
      .ok_or(LabelTableError::NotAStringArray)?;
    Ok(Self::new(labels))
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.labels.get(class_id).map(String::as_str)
  }

  /// 用于显示的类别名称，越界的类别索引显示为 `Class <id>`
  pub fn display_name(&self, class_id: usize) -> Cow<'_, str> {
    match self.get(class_id) {
      Some(name) => Cow::Borrowed(name),
      None => Cow::Owned(format!("Class {}", class_id)),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}
