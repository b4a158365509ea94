// 该文件是 Rimagine 项目的一部分。
// src/model/accelerator.rs - 加速器协商
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

use tracing::{debug, info, warn};

/// 调用方希望使用的推理设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceleratorPreference {
  #[default]
  Cpu,
  /// 尽量使用 GPU，不可用时回退到 CPU
  Gpu,
}

impl FromStr for AcceleratorPreference {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "cpu" => Ok(AcceleratorPreference::Cpu),
      "gpu" => Ok(AcceleratorPreference::Gpu),
      other => Err(format!("未知的加速器: {}", other)),
    }
  }
}

/// 协商后实际可用的设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
  Cpu,
  Gpu,
}

impl fmt::Display for Accelerator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Accelerator::Cpu => write!(f, "CPU"),
      Accelerator::Gpu => write!(f, "GPU"),
    }
  }
}

/// 启动时协商加速器
///
/// `is_gpu_available` 查询当前环境是否支持 GPU，查询失败与不支持一样回退到 CPU。
pub fn negotiate_accelerator<E, P>(preference: AcceleratorPreference, is_gpu_available: P) -> Accelerator
where
  E: fmt::Display,
  P: FnOnce() -> Result<bool, E>,
{
  match preference {
    AcceleratorPreference::Cpu => {
      debug!("使用 CPU 推理");
      Accelerator::Cpu
    }
    AcceleratorPreference::Gpu => match is_gpu_available() {
      Ok(true) => {
        info!("GPU 加速可用");
        Accelerator::Gpu
      }
      Ok(false) => {
        info!("当前设备不支持 GPU 加速，使用 CPU");
        Accelerator::Cpu
      }
      Err(e) => {
        warn!("GPU 加速不可用: {}", e);
        Accelerator::Cpu
      }
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cpu_preference_skips_gpu_check() {
    let accelerator = negotiate_accelerator(AcceleratorPreference::Cpu, || -> Result<bool, String> {
      panic!("GPU check must not run")
    });
    assert_eq!(accelerator, Accelerator::Cpu);
  }

  #[test]
  fn test_gpu_fallback() {
    let ok = negotiate_accelerator(AcceleratorPreference::Gpu, || Ok::<_, String>(true));
    assert_eq!(ok, Accelerator::Gpu);

    let unsupported = negotiate_accelerator(AcceleratorPreference::Gpu, || Ok::<_, String>(false));
    assert_eq!(unsupported, Accelerator::Cpu);

    let failed = negotiate_accelerator(AcceleratorPreference::Gpu, || {
      Err::<bool, _>("driver missing".to_string())
    });
    assert_eq!(failed, Accelerator::Cpu);
  }
}
