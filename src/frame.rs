// 该文件是 Rimagine 项目的一部分。
// src/frame.rs - 模型输入/输出张量定义
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

use crate::error::DetectError;

pub const RGB_CHANNELS: usize = 3;

/// 框参数通道数：cx, cy, w, h
pub const BOX_CHANNELS: usize = 4;

/// 模型输入张量，NHWC 布局（批大小为 1），RGB 顺序
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  width: u32,
  height: u32,
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn with_shape(width: u32, height: u32) -> Self {
    let size = RGB_CHANNELS * (width as usize) * (height as usize);
    Self {
      width,
      height,
      data: vec![0.0f32; size].into_boxed_slice(),
    }
  }

  pub fn from_nhwc(width: u32, height: u32, data: Vec<f32>) -> Result<Self, DetectError> {
    let expected = RGB_CHANNELS * (width as usize) * (height as usize);
    if data.len() != expected {
      return Err(DetectError::invalid_shape(
        format!("[1, {}, {}, {}]", height, width, RGB_CHANNELS),
        &[data.len()],
      ));
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_nhwc(&self) -> &[f32] {
    &self.data
  }

  /// 转换为 NCHW 布局，用于按通道平面读取输入的模型
  pub fn to_nchw(&self) -> Vec<f32> {
    let plane_size = (self.width as usize) * (self.height as usize);
    let mut data = vec![0.0f32; plane_size * RGB_CHANNELS];
    for (idx, pixel) in self.data.chunks_exact(RGB_CHANNELS).enumerate() {
      for (c, &value) in pixel.iter().enumerate() {
        data[c * plane_size + idx] = value;
      }
    }
    data
  }
}

impl AsMut<[f32]> for InputTensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

/// 模型原始输出张量，形状固定为 [1, 4 + C, A]，行主序
///
/// 通道 0..4 为归一化的 cx, cy, w, h，之后 C 个通道为各类别置信度。
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  shape: [usize; 3],
  data: Box<[f32]>,
}

impl OutputTensor {
  /// 由推理后端返回的形状和数据构造，只接受批大小为 1 的三维张量
  pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Result<Self, DetectError> {
    let [batch, channels, anchors] = match shape {
      &[b, c, a] => [b, c, a],
      _ => return Err(DetectError::invalid_shape("[1, 4+C, A]", shape)),
    };

    if batch != 1 || channels <= BOX_CHANNELS {
      return Err(DetectError::invalid_shape("[1, 4+C, A]", shape));
    }

    if channels * anchors != data.len() {
      return Err(DetectError::inference(format!(
        "输出数据长度 {} 与形状 {:?} 不符",
        data.len(),
        shape
      )));
    }

    Ok(Self {
      shape: [batch, channels, anchors],
      data: data.into_boxed_slice(),
    })
  }

  pub fn shape(&self) -> [usize; 3] {
    self.shape
  }

  pub fn num_classes(&self) -> usize {
    self.shape[1] - BOX_CHANNELS
  }

  pub fn num_anchors(&self) -> usize {
    self.shape[2]
  }

  #[inline]
  pub fn get(&self, channel: usize, anchor: usize) -> f32 {
    self.data[channel * self.shape[2] + anchor]
  }

  /// 校验形状与配置的 {4 + C, A} 一致，不做任何形式的强制转换
  pub fn expect_shape(&self, num_classes: usize, num_anchors: usize) -> Result<(), DetectError> {
    let expected = [1, BOX_CHANNELS + num_classes, num_anchors];
    if self.shape != expected {
      return Err(DetectError::invalid_shape(
        format!("{:?}", expected),
        &self.shape,
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_input_tensor_zeroed() {
    let tensor = InputTensor::with_shape(640, 480);
    assert_eq!((tensor.width(), tensor.height()), (640, 480));
    assert_eq!(tensor.as_nhwc().len(), 640 * 480 * 3);
    assert!(tensor.as_nhwc().iter().all(|&v| v == 0.0));
  }

  #[test]
  fn test_to_nchw() {
    // 1x2 图像：像素 0 = (1, 2, 3)，像素 1 = (4, 5, 6)
    let tensor = InputTensor::from_nhwc(2, 1, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    assert_eq!(tensor.to_nchw(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
  }

  #[test]
  fn test_input_tensor_length_mismatch() {
    let err = InputTensor::from_nhwc(2, 2, vec![0.0; 11]).unwrap_err();
    assert!(matches!(err, DetectError::InvalidShape { .. }));
  }

  #[test]
  fn test_output_tensor_layout() {
    // 2 个类别，3 个锚点
    let data: Vec<f32> = (0..18).map(|v| v as f32).collect();
    let tensor = OutputTensor::from_shape_vec(&[1, 6, 3], data).unwrap();
    assert_eq!(tensor.num_classes(), 2);
    assert_eq!(tensor.num_anchors(), 3);
    assert_eq!(tensor.get(0, 0), 0.0);
    assert_eq!(tensor.get(1, 2), 5.0);
    assert_eq!(tensor.get(5, 1), 16.0);
  }

  #[test]
  fn test_output_tensor_rejects_bad_rank() {
    let err = OutputTensor::from_shape_vec(&[6, 3], vec![0.0; 18]).unwrap_err();
    assert!(matches!(err, DetectError::InvalidShape { .. }));

    let err = OutputTensor::from_shape_vec(&[2, 6, 3], vec![0.0; 36]).unwrap_err();
    assert!(matches!(err, DetectError::InvalidShape { .. }));
  }

  #[test]
  fn test_output_tensor_rejects_short_data() {
    let err = OutputTensor::from_shape_vec(&[1, 6, 3], vec![0.0; 17]).unwrap_err();
    assert!(matches!(err, DetectError::Inference(_)));
  }

  #[test]
  fn test_expect_shape() {
    let tensor = OutputTensor::from_shape_vec(&[1, 7, 4], vec![0.0; 28]).unwrap();
    assert!(tensor.expect_shape(3, 4).is_ok());
    let err = tensor.expect_shape(80, 4).unwrap_err();
    assert_eq!(
      err.to_string(),
      "输出张量形状错误: 期望 [1, 84, 4], 实际 [1, 7, 4]"
    );
  }
}
