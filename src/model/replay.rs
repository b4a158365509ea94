// 该文件是 Rimagine 项目的一部分。
// src/model/replay.rs - 回放已保存的模型输出
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

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  error::DetectError,
  frame::{InputTensor, OutputTensor},
  model::Model,
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("张量文件格式错误: {0}")]
  FormatError(String),
  #[error("张量无效: {0}")]
  TensorError(#[from] DetectError),
}

impl From<ReplayModelError> for DetectError {
  fn from(err: ReplayModelError) -> Self {
    DetectError::model_load(err.to_string())
  }
}

/// 回放模型：每次推理都返回同一个保存下来的输出张量
///
/// 张量文件为 JSON：`{"input_size": [w, h], "shape": [1, 4 + C, A], "data": [...]}`。
/// 不依赖任何推理运行时即可跑通整条流水线。
#[derive(Debug, Clone)]
pub struct ReplayModel {
  input_size: (u32, u32),
  output: OutputTensor,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    info!("加载回放张量: {}", url.path());
    let content = std::fs::read_to_string(url.path())?;
    Self::from_json(&content)
  }
}

impl ReplayModel {
  pub fn new(input_size: (u32, u32), output: OutputTensor) -> Self {
    Self { input_size, output }
  }

  pub fn from_json(content: &str) -> Result<Self, ReplayModelError> {
    let value: Value = serde_json::from_str(content)?;

    let input_size = usize_array(&value, "input_size")?;
    let input_size = match input_size.as_slice() {
      &[w, h] => (w as u32, h as u32),
      _ => {
        return Err(ReplayModelError::FormatError(
          "input_size 必须是 [宽, 高]".to_string(),
        ));
      }
    };

    let shape = usize_array(&value, "shape")?;
    let data = value
      .get("data")
      .and_then(Value::as_array)
      .ok_or_else(|| ReplayModelError::FormatError("缺少 data 数组".to_string()))?
      .iter()
      .map(|v| v.as_f64().map(|f| f as f32))
      .collect::<Option<Vec<f32>>>()
      .ok_or_else(|| ReplayModelError::FormatError("data 必须全部为数字".to_string()))?;

    let output = OutputTensor::from_shape_vec(&shape, data)?;
    debug!("回放张量形状: {:?}", output.shape());

    Ok(Self { input_size, output })
  }
}

fn usize_array(value: &Value, key: &str) -> Result<Vec<usize>, ReplayModelError> {
  value
    .get(key)
    .and_then(Value::as_array)
    .and_then(|array| {
      array
        .iter()
        .map(|v| v.as_u64().map(|n| n as usize))
        .collect::<Option<Vec<_>>>()
    })
    .ok_or_else(|| ReplayModelError::FormatError(format!("{} 必须是非负整数数组", key)))
}

impl Model for ReplayModel {
  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_shape(&self) -> [usize; 3] {
    self.output.shape()
  }

  fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor, DetectError> {
    let (width, height) = self.input_size;
    if (input.width(), input.height()) != (width, height) {
      return Err(DetectError::inference(format!(
        "输入尺寸 {}x{} 与模型输入 {}x{} 不符",
        input.width(),
        input.height(),
        width,
        height
      )));
    }
    Ok(self.output.clone())
  }
}
