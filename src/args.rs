// 该文件是 Rimagine 项目的一部分。
// src/args.rs - 命令行参数
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

use std::{num::NonZeroUsize, path::PathBuf};

use clap::Parser;
use rimagine::{
  model::{AcceleratorPreference, ModelVariant},
  preprocess::ResizeStrategy,
};
use url::Url;

/// Rimagine 目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  /// - onnx:///path/to/model.onnx?accelerator=gpu&threads=4
  /// - replay:///path/to/output.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源，image:///path/to/photo.jpg 或 image:///path/to/dir
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// - image:///path/to/out.jpg 或 image:///path/to/dir/
  /// - folder:///path/to/records?record=name&always
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 模型预设 (disk, coco)
  #[arg(long, default_value_t = ModelVariant::Disk, value_name = "VARIANT")]
  pub variant: ModelVariant,

  /// 置信度阈值 (0.0 - 1.0)，默认取预设值
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IoU 阈值 (0.0 - 1.0)，默认取预设值
  #[arg(long, value_name = "THRESHOLD")]
  pub iou: Option<f32>,

  /// 缩放方式 (stretch, letterbox)，默认取预设值
  #[arg(long, value_name = "STRATEGY")]
  pub strategy: Option<ResizeStrategy>,

  /// 标签文件，每行一个标签的 .txt 或字符串数组 .json
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 标签字体 (TTF/OTF)，不指定时使用内置字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// JSON 报告路径，不指定时输出到标准输出
  #[arg(long, value_name = "FILE")]
  pub report: Option<PathBuf>,

  /// 推理设备 (cpu, gpu)，覆盖模型地址中的设置
  #[arg(long, value_name = "DEVICE")]
  pub accelerator: Option<AcceleratorPreference>,

  /// 最大处理帧数（仅对目录输入有效，至少为 1）
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<NonZeroUsize>,
}
