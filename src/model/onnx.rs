// 该文件是 Rimagine 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use ort::{
  execution_providers::{CUDAExecutionProvider, ExecutionProvider},
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  error::DetectError,
  frame::{InputTensor, OutputTensor},
  model::{Accelerator, AcceleratorPreference, Model, ModelConfig, negotiate_accelerator},
};

const ONNX_DEFAULT_THREADS: usize = 4;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
}

impl From<OnnxModelError> for DetectError {
  fn from(err: OnnxModelError) -> Self {
    DetectError::model_load(err.to_string())
  }
}

/// 输入张量在送入模型前的布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputLayout {
  Nchw,
  Nhwc,
}

pub struct OnnxModelBuilder {
  model_path: String,
  preference: AcceleratorPreference,
  threads: usize,
  layout: InputLayout,
  input_size: (u32, u32),
  output_shape: [usize; 3],
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = OnnxModelBuilder {
      model_path: url.path().to_string(),
      preference: AcceleratorPreference::default(),
      threads: ONNX_DEFAULT_THREADS,
      layout: InputLayout::Nchw,
      input_size: (0, 0),
      output_shape: [0; 3],
    };

    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "accelerator" => {
          builder.preference = v.parse().map_err(OnnxModelError::ModelPathError)?;
        }
        "threads" => {
          builder.threads = v
            .parse()
            .map_err(|_| OnnxModelError::ModelPathError(format!("线程数无效: {}", v)))?;
        }
        "layout" => {
          builder.layout = match v.as_ref() {
            "nchw" => InputLayout::Nchw,
            "nhwc" => InputLayout::Nhwc,
            other => {
              return Err(OnnxModelError::ModelPathError(format!(
                "未知的输入布局: {}",
                other
              )));
            }
          };
        }
        _ => debug!("忽略未知参数: {}={}", k, v),
      }
    }

    Ok(builder)
  }
}

impl OnnxModelBuilder {
  /// 使用加载配置中的输入尺寸与输出形状
  pub fn config(mut self, config: &ModelConfig) -> Self {
    self.input_size = config.input_size();
    self.output_shape = config.expected_output_shape();
    self
  }

  pub fn accelerator(mut self, preference: AcceleratorPreference) -> Self {
    self.preference = preference;
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxModelError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let accelerator = negotiate_accelerator(self.preference, || {
      CUDAExecutionProvider::default().is_available()
    });

    let mut builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.threads)?;
    if accelerator == Accelerator::Gpu {
      builder = builder.with_execution_providers([CUDAExecutionProvider::default().build()])?;
    }

    info!("创建 ONNX Runtime 推理会话 ({})", accelerator);
    let session = builder.commit_from_memory(&model_data)?;

    let input = session
      .inputs
      .first()
      .ok_or_else(|| OnnxModelError::ModelInvalid("模型没有输入".to_string()))?;
    let input_name = input.name.clone();
    let dims = input
      .input_type
      .tensor_shape()
      .map(|shape| shape.to_vec())
      .ok_or_else(|| OnnxModelError::ModelInvalid(format!("输入 {} 不是张量", input_name)))?;
    let input_size = resolve_input_size(&dims, self.layout, self.input_size)?;
    debug!("模型输入 {}: {:?} -> {:?}", input_name, dims, input_size);

    let mut model = OnnxModel {
      session,
      input_name,
      layout: self.layout,
      input_size,
      output_shape: self.output_shape,
      accelerator,
    };

    // 用全零输入预热一次，输出形状以实际结果为准，由检测器与配置比对
    let (width, height) = model.input_size;
    let output = model
      .run(&InputTensor::with_shape(width, height))
      .map_err(|e| OnnxModelError::ModelInvalid(e.to_string()))?;
    if output.shape() != self.output_shape {
      warn!(
        "预期模型输出形状为 {:?}, 实际为 {:?}",
        self.output_shape,
        output.shape()
      );
    }
    model.output_shape = output.shape();

    info!("模型加载完成");
    Ok(model)
  }
}

/// 由模型声明的输入维度求出 (宽, 高)，动态维度（-1）取配置值
fn resolve_input_size(
  dims: &[i64],
  layout: InputLayout,
  fallback: (u32, u32),
) -> Result<(u32, u32), OnnxModelError> {
  let [_, d1, d2, d3] = dims else {
    return Err(OnnxModelError::ModelInvalid(format!(
      "模型输入应为 4 维，实际为 {:?}",
      dims
    )));
  };
  let (channels, height, width) = match layout {
    InputLayout::Nchw => (*d1, *d2, *d3),
    InputLayout::Nhwc => (*d3, *d1, *d2),
  };
  if channels > 0 && channels != 3 {
    return Err(OnnxModelError::ModelInvalid(format!(
      "模型输入通道数应为 3，实际为 {}",
      channels
    )));
  }

  let pick = |dim: i64, configured: u32| -> Result<u32, OnnxModelError> {
    if dim > 0 {
      u32::try_from(dim)
        .map_err(|_| OnnxModelError::ModelInvalid(format!("模型输入尺寸无效: {}", dim)))
    } else if configured > 0 {
      Ok(configured)
    } else {
      Err(OnnxModelError::ModelInvalid(
        "模型输入尺寸为动态，且未设置配置尺寸".to_string(),
      ))
    }
  };
  Ok((pick(width, fallback.0)?, pick(height, fallback.1)?))
}

/// ONNX Runtime 会话，加载一次后在多次推理之间复用
pub struct OnnxModel {
  session: Session,
  input_name: String,
  layout: InputLayout,
  input_size: (u32, u32),
  output_shape: [usize; 3],
  accelerator: Accelerator,
}

impl OnnxModel {
  pub fn accelerator(&self) -> Accelerator {
    self.accelerator
  }

  fn run(&mut self, input: &InputTensor) -> Result<OutputTensor, DetectError> {
    let (width, height) = (input.width() as usize, input.height() as usize);
    let input_tensor = match self.layout {
      InputLayout::Nchw => Tensor::from_array(([1usize, 3, height, width], input.to_nchw())),
      InputLayout::Nhwc => Tensor::from_array(([1usize, height, width, 3], input.as_nhwc().to_vec())),
    }
    .map_err(|e| DetectError::inference(format!("无法创建输入张量: {}", e)))?;

    let outputs = self
      .session
      .run(ort::inputs![&self.input_name => input_tensor])
      .map_err(|e| DetectError::inference(format!("推理失败: {}", e)))?;

    let (shape, data) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(|e| DetectError::inference(format!("无法提取输出: {}", e)))?;

    let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    OutputTensor::from_shape_vec(&shape, data.to_vec())
  }
}

impl Model for OnnxModel {
  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_shape(&self) -> [usize; 3] {
    self.output_shape
  }

  fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor, DetectError> {
    debug!("执行模型推理");
    self.run(input)
  }
}

impl Drop for OnnxModel {
  fn drop(&mut self) {
    debug!("释放 ONNX Runtime 会话");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_static_nchw_input_size() {
    let size = resolve_input_size(&[1, 3, 480, 640], InputLayout::Nchw, (320, 320)).unwrap();
    assert_eq!(size, (640, 480));
  }

  #[test]
  fn test_static_nhwc_input_size() {
    let size = resolve_input_size(&[1, 480, 640, 3], InputLayout::Nhwc, (0, 0)).unwrap();
    assert_eq!(size, (640, 480));
  }

  #[test]
  fn test_dynamic_dims_use_config() {
    let size = resolve_input_size(&[-1, 3, -1, -1], InputLayout::Nchw, (640, 640)).unwrap();
    assert_eq!(size, (640, 640));
    let size = resolve_input_size(&[1, 3, 320, -1], InputLayout::Nchw, (640, 640)).unwrap();
    assert_eq!(size, (640, 320));
  }

  #[test]
  fn test_dynamic_dims_without_config_is_an_error() {
    let err = resolve_input_size(&[1, 3, -1, -1], InputLayout::Nchw, (0, 0)).unwrap_err();
    assert!(matches!(err, OnnxModelError::ModelInvalid(_)));
  }

  #[test]
  fn test_bad_input_rank_or_channels() {
    assert!(resolve_input_size(&[3, 640, 640], InputLayout::Nchw, (640, 640)).is_err());
    assert!(resolve_input_size(&[1, 640, 640, 3], InputLayout::Nchw, (640, 640)).is_err());
  }

  #[test]
  fn test_url_options() {
    let url = Url::parse("onnx:///models/disk.onnx?accelerator=gpu&threads=2&layout=nhwc").unwrap();
    let builder = OnnxModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, "/models/disk.onnx");
    assert_eq!(builder.preference, AcceleratorPreference::Gpu);
    assert_eq!(builder.threads, 2);
    assert_eq!(builder.layout, InputLayout::Nhwc);

    let url = Url::parse("onnx:///m.onnx?layout=chw").unwrap();
    assert!(OnnxModelBuilder::from_url(&url).is_err());
  }
}
