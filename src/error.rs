// 该文件是 Rimagine 项目的一部分。
// src/error.rs - 检测流水线错误定义
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

use thiserror::Error;

/// 检测流水线错误
///
/// 任何一步失败都以错误返回，不会返回部分填充的检测结果。
#[derive(Error, Debug)]
pub enum DetectError {
  /// 模型文件缺失、损坏或形状不匹配，对当前会话是致命错误
  #[error("模型加载错误: {0}")]
  ModelLoad(String),
  /// 源图像无法解码
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  /// 源图像通道数不是 3
  #[error("不支持的图像格式: 期望 3 个通道, 实际 {channels} 个")]
  UnsupportedFormat { channels: u8 },
  /// 推理后端返回的错误，原样携带后端信息
  #[error("推理错误: {0}")]
  Inference(String),
  /// 输出张量形状与配置不符
  #[error("输出张量形状错误: 期望 {expected}, 实际 {actual:?}")]
  InvalidShape { expected: String, actual: Vec<usize> },
  /// 任务在推理开始前被取消
  #[error("任务已取消")]
  Cancelled,
}

impl DetectError {
  pub fn model_load(msg: impl Into<String>) -> Self {
    DetectError::ModelLoad(msg.into())
  }

  pub fn inference(msg: impl Into<String>) -> Self {
    DetectError::Inference(msg.into())
  }

  pub fn invalid_shape(expected: impl Into<String>, actual: &[usize]) -> Self {
    DetectError::InvalidShape {
      expected: expected.into(),
      actual: actual.to_vec(),
    }
  }
}
