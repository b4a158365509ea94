// 该文件是 Rimagine 项目的一部分。
// src/output/report.rs - JSON 检测报告
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

use std::{fmt::Display, path::Path};

use serde_json::{Value, json};
use tracing::info;

use crate::{label::ClassLabelTable, model::DetectResult};

/// 成功报告
///
/// ```json
/// {"status": "success", "predictions": [{"class": "back_disk", "confidence": 0.91,
///   "bounding_box": [l, t, r, b]}], "output_image": "out.jpg"}
/// ```
pub fn success_report(
  labels: &ClassLabelTable,
  result: &DetectResult,
  output_image: Option<&Path>,
) -> Value {
  let predictions = result
    .iter()
    .map(|d| {
      json!({
        "class": labels.display_name(d.class_id),
        "confidence": d.confidence,
        "bounding_box": d.bbox(),
      })
    })
    .collect::<Vec<_>>();

  json!({
    "status": "success",
    "predictions": predictions,
    "output_image": output_image.map(|p| p.display().to_string()),
  })
}

/// 失败报告，不携带任何部分结果
pub fn error_report(err: impl Display) -> Value {
  json!({
    "status": "error",
    "message": err.to_string(),
  })
}

pub fn write_report(path: &Path, report: &Value) -> Result<(), std::io::Error> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  let text = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
  std::fs::write(path, text)?;
  info!("写入检测报告: {}", path.display());
  Ok(())
}
