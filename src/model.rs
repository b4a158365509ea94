// 该文件是 Rimagine 项目的一部分。
// src/model.rs - 模型
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

use crate::{
  error::DetectError,
  frame::{InputTensor, OutputTensor},
};

/// 推理能力接口：张量进，张量出
///
/// 推理在 CPU、GPU 还是其他加速器上执行由实现决定，核心流程只依赖确定性的输入输出和可查询的形状。
pub trait Model {
  /// 模型输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  /// 模型输出形状 [1, 4 + C, A]
  fn output_shape(&self) -> [usize; 3];

  fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor, DetectError>;
}

impl<M: Model + ?Sized> Model for Box<M> {
  fn input_size(&self) -> (u32, u32) {
    (**self).input_size()
  }

  fn output_shape(&self) -> [usize; 3] {
    (**self).output_shape()
  }

  fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor, DetectError> {
    (**self).infer(input)
  }
}

/// 用闭包实现的模型，便于用合成张量驱动整条流水线
pub struct FnModel<F> {
  input_size: (u32, u32),
  output_shape: [usize; 3],
  infer: F,
}

impl<F> FnModel<F>
where
  F: FnMut(&InputTensor) -> Result<OutputTensor, DetectError>,
{
  pub fn new(input_size: (u32, u32), output_shape: [usize; 3], infer: F) -> Self {
    Self {
      input_size,
      output_shape,
      infer,
    }
  }
}

impl<F> Model for FnModel<F>
where
  F: FnMut(&InputTensor) -> Result<OutputTensor, DetectError>,
{
  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_shape(&self) -> [usize; 3] {
    self.output_shape
  }

  fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor, DetectError> {
    (self.infer)(input)
  }
}

/// 单个检测结果，坐标为像素坐标 [left, top, right, bottom]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
  pub confidence: f32,
  pub class_id: usize,
}

impl Detection {
  pub fn width(&self) -> f32 {
    (self.right - self.left).max(0.0)
  }

  pub fn height(&self) -> f32 {
    (self.bottom - self.top).max(0.0)
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn bbox(&self) -> [f32; 4] {
    [self.left, self.top, self.right, self.bottom]
  }
}

/// 一次推理的最终结果，按置信度降序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
  /// 原图尺寸 (宽, 高)
  pub image_size: (u32, u32),
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Detection> {
    self.items.iter()
  }
}

mod accelerator;
mod config;
#[cfg(feature = "model_onnx")]
mod onnx;
mod replay;

pub use self::accelerator::{Accelerator, AcceleratorPreference, negotiate_accelerator};
pub use self::config::{DEFAULT_STRIDES, ModelConfig, ModelVariant, anchors_for};
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxModel, OnnxModelBuilder, OnnxModelError};
pub use self::replay::{ReplayModel, ReplayModelError};
