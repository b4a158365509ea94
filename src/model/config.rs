// 该文件是 Rimagine 项目的一部分。
// src/model/config.rs - 模型变体与加载配置
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

use std::{fmt, str::FromStr};

use tracing::{debug, error};

use crate::{
  error::DetectError,
  frame::BOX_CHANNELS,
  label::{COCO_CLASSES, ClassLabelTable, DISK_CLASSES},
  model::Model,
  preprocess::{PreprocessConfig, ResizeStrategy},
};

/// YOLO 检测头的下采样步长
pub const DEFAULT_STRIDES: [u32; 3] = [8, 16, 32];

/// 按检测头布局计算锚点数量，640x640 输入时为 8400
pub fn anchors_for(width: u32, height: u32) -> usize {
  DEFAULT_STRIDES
    .iter()
    .map(|&stride| ((width / stride) * (height / stride)) as usize)
    .sum()
}

/// 模型变体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelVariant {
  /// 刹车盘检测模型
  #[default]
  Disk,
  /// COCO 80 类通用检测模型
  Coco,
}

impl FromStr for ModelVariant {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "disk" => Ok(ModelVariant::Disk),
      "coco" => Ok(ModelVariant::Coco),
      other => Err(format!("未知的模型变体: {}", other)),
    }
  }
}

impl fmt::Display for ModelVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelVariant::Disk => write!(f, "disk"),
      ModelVariant::Coco => write!(f, "coco"),
    }
  }
}

/// 模型加载时确定的配置
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
  pub variant: ModelVariant,
  pub preprocess: PreprocessConfig,
  pub labels: ClassLabelTable,
  /// 输出张量中的类别通道数 C，可以多于标签数
  pub num_classes: usize,
  pub num_anchors: usize,
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
}

impl From<ModelVariant> for ModelConfig {
  fn from(variant: ModelVariant) -> Self {
    match variant {
      // 导出模型输出 [1, 8, 8400]，第 4 个类别通道没有对应标签
      // 输入只做 /255 归一化到 [0, 1]
      ModelVariant::Disk => Self {
        variant,
        preprocess: PreprocessConfig::new(640, 640)
          .with_strategy(ResizeStrategy::Stretch)
          .with_normalization(0.0, 255.0),
        labels: ClassLabelTable::new(DISK_CLASSES),
        num_classes: 4,
        num_anchors: anchors_for(640, 640),
        confidence_threshold: 0.6,
        iou_threshold: 0.2,
      },
      ModelVariant::Coco => Self {
        variant,
        preprocess: PreprocessConfig::new(640, 640).with_strategy(ResizeStrategy::LetterboxPad),
        labels: ClassLabelTable::new(COCO_CLASSES),
        num_classes: COCO_CLASSES.len(),
        num_anchors: anchors_for(640, 640),
        confidence_threshold: 0.25,
        iou_threshold: 0.45,
      },
    }
  }
}

impl ModelConfig {
  pub fn with_labels(mut self, labels: ClassLabelTable) -> Self {
    self.labels = labels;
    self
  }

  pub fn with_num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn with_strategy(mut self, strategy: ResizeStrategy) -> Self {
    self.preprocess.resize_strategy = strategy;
    self
  }

  pub fn with_normalization(mut self, mean: f32, std: f32) -> Self {
    self.preprocess = self.preprocess.with_normalization(mean, std);
    self
  }

  /// 修改输入尺寸，同时按检测头布局重算锚点数量
  pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
    self.preprocess.target_width = width;
    self.preprocess.target_height = height;
    self.num_anchors = anchors_for(width, height);
    self
  }

  pub fn with_num_anchors(mut self, num_anchors: usize) -> Self {
    self.num_anchors = num_anchors;
    self
  }

  pub fn input_size(&self) -> (u32, u32) {
    (self.preprocess.target_width, self.preprocess.target_height)
  }

  pub fn expected_output_shape(&self) -> [usize; 3] {
    [1, BOX_CHANNELS + self.num_classes, self.num_anchors]
  }

  /// 检查配置本身是否合理
  pub fn validate(&self) -> Result<(), DetectError> {
    let (width, height) = self.input_size();
    if width == 0 || height == 0 {
      return Err(DetectError::model_load(format!(
        "模型输入尺寸无效: {}x{}",
        width, height
      )));
    }
    if self.num_classes == 0 || self.num_anchors == 0 {
      return Err(DetectError::model_load(format!(
        "类别数 ({}) 和锚点数 ({}) 必须大于 0",
        self.num_classes, self.num_anchors
      )));
    }
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(DetectError::model_load(format!(
        "置信度阈值超出范围: {}",
        self.confidence_threshold
      )));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(DetectError::model_load(format!(
        "IoU 阈值超出范围: {}",
        self.iou_threshold
      )));
    }
    if self.preprocess.normalization_std == 0.0 || !self.preprocess.normalization_std.is_finite() {
      return Err(DetectError::model_load(format!(
        "归一化标准差无效: {}",
        self.preprocess.normalization_std
      )));
    }
    if self.labels.len() != self.num_classes {
      debug!(
        "标签数 {} 与类别通道数 {} 不一致，越界类别将显示为 Class <id>",
        self.labels.len(),
        self.num_classes
      );
    }
    Ok(())
  }

  /// 检查模型的输入输出形状与配置一致
  pub fn check_model<M: Model + ?Sized>(&self, model: &M) -> Result<(), DetectError> {
    let input_size = model.input_size();
    if input_size != self.input_size() {
      error!(
        "预期模型输入尺寸为 {:?}, 实际为 {:?}",
        self.input_size(),
        input_size
      );
      return Err(DetectError::model_load(format!(
        "预期模型输入尺寸为 {:?}, 实际为 {:?}",
        self.input_size(),
        input_size
      )));
    }

    let output_shape = model.output_shape();
    if output_shape != self.expected_output_shape() {
      error!(
        "预期模型输出形状为 {:?}, 实际为 {:?}",
        self.expected_output_shape(),
        output_shape
      );
      return Err(DetectError::model_load(format!(
        "预期模型输出形状为 {:?}, 实际为 {:?}",
        self.expected_output_shape(),
        output_shape
      )));
    }

    Ok(())
  }
}
