// 该文件是 Rimagine 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::num::NonZeroUsize;

use anyhow::{Result, bail};
use clap::Parser;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

#[cfg(feature = "model_onnx")]
use rimagine::model::OnnxModelBuilder;
use rimagine::{
  Detector, FromUrl, FromUrlWithScheme,
  input::ImageFileInput,
  label::ClassLabelTable,
  model::{AcceleratorPreference, Model, ModelConfig, ReplayModel},
  output::{OutputWrapper, draw, report},
  task::{BatchTask, OneShotTask, Task},
};

use args::Args;

type BoxedModel = Box<dyn Model + Send>;

#[allow(unused_variables)]
fn load_model(
  url: &Url,
  config: &ModelConfig,
  accelerator: Option<AcceleratorPreference>,
) -> Result<BoxedModel> {
  match url.scheme() {
    ReplayModel::SCHEME => Ok(Box::new(ReplayModel::from_url(url)?)),
    #[cfg(feature = "model_onnx")]
    OnnxModelBuilder::SCHEME => {
      let mut builder = OnnxModelBuilder::from_url(url)?.config(config);
      if let Some(preference) = accelerator {
        builder = builder.accelerator(preference);
      }
      Ok(Box::new(builder.build()?))
    }
    other => bail!("不支持的模型方案: {}", other),
  }
}

fn model_config(args: &Args) -> Result<ModelConfig> {
  let mut config = ModelConfig::from(args.variant);
  if let Some(path) = &args.labels {
    config = config.with_labels(ClassLabelTable::from_file(path)?);
  }
  if let Some(confidence) = args.confidence {
    config = config.with_confidence_threshold(confidence);
  }
  if let Some(iou) = args.iou {
    config = config.with_iou_threshold(iou);
  }
  if let Some(strategy) = args.strategy {
    config = config.with_strategy(strategy);
  }
  Ok(config)
}

fn emit_report(args: &Args, report: &Value) -> Result<()> {
  match &args.report {
    Some(path) => report::write_report(path, report)?,
    None => println!("{}", serde_json::to_string_pretty(report)?),
  }
  Ok(())
}

/// 返回是否全部帧处理成功
fn run(args: &Args) -> Result<bool> {
  let config = model_config(args)?;
  let model = load_model(&args.model, &config, args.accelerator)?;
  let mut detector = Detector::new(config, model)?;

  let mut style = draw::Draw::new(detector.labels().clone());
  if let Some(path) = &args.font {
    style = style.with_font(draw::load_font(path)?);
  }
  let output = OutputWrapper::from_url(&args.output)?.with_draw(style);
  let input = ImageFileInput::from_url(&args.input)?;

  let reports = if input.remaining() == 1 {
    OneShotTask.run_task(input, &mut detector, &output)?
  } else {
    BatchTask::default()
      .with_frame_number(args.max_frames.map(NonZeroUsize::get))
      .run_task(input, &mut detector, &output)?
  };

  let labels = detector.labels();
  let json = match reports.as_slice() {
    [single] => single.to_json(labels),
    many => Value::Array(many.iter().map(|r| r.to_json(labels)).collect()),
  };
  emit_report(args, &json)?;

  let all_ok = reports.iter().all(|r| r.is_success());
  detector.close();
  Ok(all_ok)
}

fn main() -> Result<()> {
  // 日志写到标准错误，标准输出留给报告
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("模型预设: {}", args.variant);

  match run(&args) {
    Ok(true) => Ok(()),
    Ok(false) => bail!("部分图像处理失败"),
    Err(err) => {
      error!("检测失败: {err:#}");
      emit_report(&args, &report::error_report(format!("{err:#}")))?;
      Err(err)
    }
  }
}
