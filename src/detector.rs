// 该文件是 Rimagine 项目的一部分。
// src/detector.rs - 目标检测流水线
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

use image::{DynamicImage, GenericImageView};
use tracing::{debug, info};

use crate::{
  error::DetectError,
  label::ClassLabelTable,
  model::{DetectResult, Model, ModelConfig},
  postprocess::{PostprocessParams, postprocess},
  preprocess::prepare,
};

/// 目标检测器
///
/// 持有长期复用的模型句柄，每次调用独立完成 预处理 -> 推理 -> 后处理，调用之间不共享可变状态。
pub struct Detector<M> {
  config: ModelConfig,
  model: M,
}

impl<M: Model> Detector<M> {
  /// 校验配置与模型形状后创建检测器
  pub fn new(config: ModelConfig, model: M) -> Result<Self, DetectError> {
    config.validate()?;
    config.check_model(&model)?;

    info!(
      "检测器就绪: 变体 {}, 输入 {}x{}, {} 个类别, 置信度阈值 {}, IoU 阈值 {}",
      config.variant,
      config.preprocess.target_width,
      config.preprocess.target_height,
      config.num_classes,
      config.confidence_threshold,
      config.iou_threshold
    );

    Ok(Self { config, model })
  }

  pub fn config(&self) -> &ModelConfig {
    &self.config
  }

  pub fn labels(&self) -> &ClassLabelTable {
    &self.config.labels
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  /// 对一张已解码的 RGB 图像运行检测
  pub fn detect(&mut self, image: &DynamicImage) -> Result<DetectResult, DetectError> {
    let image_size = image.dimensions();
    let (input, scale_info) = prepare(image, &self.config.preprocess)?;

    let now = std::time::Instant::now();
    let output = self.model.infer(&input)?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    output.expect_shape(self.config.num_classes, self.config.num_anchors)?;

    let params = PostprocessParams {
      input_size: self.config.input_size(),
      confidence_threshold: self.config.confidence_threshold,
      iou_threshold: self.config.iou_threshold,
    };
    let items = postprocess(&output, &params, &scale_info);
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
      image_size,
    })
  }

  /// 解码图像字节后运行检测
  pub fn detect_encoded(&mut self, bytes: &[u8]) -> Result<DetectResult, DetectError> {
    let image = image::load_from_memory(bytes)?;
    self.detect(&image)
  }

  /// 结束会话并释放模型资源
  pub fn close(self) {
    info!("释放模型资源");
    drop(self.model);
  }
}
