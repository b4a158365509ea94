// 该文件是 Rimagine 项目的一部分。
// src/postprocess.rs - 检测结果后处理
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

use tracing::debug;

use crate::{
  frame::{BOX_CHANNELS, OutputTensor},
  model::Detection,
  preprocess::ScaleInfo,
};

/// 将原始输出张量解码为模型输入坐标系下的候选框
///
/// 每个锚点在类别通道中线性扫描最大置信度，严格大于才替换，所以相同分数时先出现的类别胜出。
/// 没有任何类别分数大于 0 的锚点直接丢弃。框参数为相对输入尺寸归一化的 cx, cy, w, h。
pub fn decode(
  tensor: &OutputTensor,
  input_size: (u32, u32),
  confidence_threshold: f32,
) -> Vec<Detection> {
  let (input_w, input_h) = (input_size.0 as f32, input_size.1 as f32);
  let num_classes = tensor.num_classes();
  let mut detections = Vec::new();

  for anchor in 0..tensor.num_anchors() {
    let mut max_confidence = 0.0f32;
    let mut best_class = None;
    for class_id in 0..num_classes {
      let score = tensor.get(BOX_CHANNELS + class_id, anchor);
      if score > max_confidence {
        max_confidence = score;
        best_class = Some(class_id);
      }
    }

    let Some(class_id) = best_class else {
      continue;
    };
    if max_confidence <= confidence_threshold {
      continue;
    }

    let cx = tensor.get(0, anchor) * input_w;
    let cy = tensor.get(1, anchor) * input_h;
    let w = tensor.get(2, anchor) * input_w;
    let h = tensor.get(3, anchor) * input_h;
    if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
      continue;
    }

    detections.push(Detection {
      left: (cx - w / 2.0).clamp(0.0, input_w),
      top: (cy - h / 2.0).clamp(0.0, input_h),
      right: (cx + w / 2.0).clamp(0.0, input_w),
      bottom: (cy + h / 2.0).clamp(0.0, input_h),
      confidence: max_confidence,
      class_id,
    });
  }

  debug!(
    "解码 {} 个锚点，{} 个候选框超过阈值 {}",
    tensor.num_anchors(),
    detections.len(),
    confidence_threshold
  );
  detections
}

/// 计算两个框的 IoU
pub fn iou(a: &Detection, b: &Detection) -> f32 {
  let x1 = a.left.max(b.left);
  let y1 = a.top.max(b.top);
  let x2 = a.right.min(b.right);
  let y2 = a.bottom.min(b.bottom);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 按类别的贪心非极大值抑制
///
/// 按置信度稳定降序排序后依次保留未被抑制的框，并抑制其后所有同类别且 IoU 超过阈值的框。
/// 不同类别的框互不抑制。返回顺序即最终的检测顺序。
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut suppressed = vec![false; detections.len()];
  let mut kept = Vec::new();

  for i in 0..detections.len() {
    if suppressed[i] {
      continue;
    }
    let best = detections[i];
    kept.push(best);

    for j in (i + 1)..detections.len() {
      if suppressed[j] {
        continue;
      }
      let other = &detections[j];
      if other.class_id == best.class_id && iou(&best, other) > iou_threshold {
        suppressed[j] = true;
      }
    }
  }

  kept
}

/// 将模型输入坐标系下的框映射回原图坐标，并截断到原图范围内
pub fn rescale(detection: &Detection, scale_info: &ScaleInfo) -> Detection {
  let (width, height) = (
    scale_info.source_width as f32,
    scale_info.source_height as f32,
  );
  let (left, top) = scale_info.to_source(detection.left, detection.top);
  let (right, bottom) = scale_info.to_source(detection.right, detection.bottom);

  let left = left.clamp(0.0, width);
  let top = top.clamp(0.0, height);
  Detection {
    left,
    top,
    right: right.clamp(left, width),
    bottom: bottom.clamp(top, height),
    ..*detection
  }
}

/// 后处理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostprocessParams {
  pub input_size: (u32, u32),
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
}

/// 解码、抑制并映射回原图坐标
pub fn postprocess(
  tensor: &OutputTensor,
  params: &PostprocessParams,
  scale_info: &ScaleInfo,
) -> Vec<Detection> {
  let candidates = decode(tensor, params.input_size, params.confidence_threshold);
  let kept = nms(candidates, params.iou_threshold);
  debug!("NMS 后保留 {} 个检测框", kept.len());
  kept
    .iter()
    .map(|detection| rescale(detection, scale_info))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(bbox: [f32; 4], confidence: f32, class_id: usize) -> Detection {
    Detection {
      left: bbox[0],
      top: bbox[1],
      right: bbox[2],
      bottom: bbox[3],
      confidence,
      class_id,
    }
  }

  /// 按锚点给出 [cx, cy, w, h, score...]，生成 [1, 4 + C, A] 张量
  fn tensor(anchors: &[Vec<f32>]) -> OutputTensor {
    let channels = anchors[0].len();
    let mut data = vec![0.0; channels * anchors.len()];
    for (a, values) in anchors.iter().enumerate() {
      for (c, &v) in values.iter().enumerate() {
        data[c * anchors.len() + a] = v;
      }
    }
    OutputTensor::from_shape_vec(&[1, channels, anchors.len()], data).unwrap()
  }

  fn identity(width: u32, height: u32) -> ScaleInfo {
    ScaleInfo {
      scale_x: 1.0,
      scale_y: 1.0,
      pad_x: 0.0,
      pad_y: 0.0,
      source_width: width,
      source_height: height,
    }
  }

  #[test]
  fn test_decode_single_anchor() {
    let t = tensor(&[vec![0.5, 0.5, 0.25, 0.5, 0.9, 0.1]]);
    let detections = decode(&t, (640, 640), 0.6);
    assert_eq!(detections.len(), 1);
    let d = detections[0];
    assert_eq!(d.class_id, 0);
    assert!((d.confidence - 0.9).abs() < 1e-6);
    assert!((d.left - 240.0).abs() < 1e-4);
    assert!((d.top - 160.0).abs() < 1e-4);
    assert!((d.right - 400.0).abs() < 1e-4);
    assert!((d.bottom - 480.0).abs() < 1e-4);
  }

  #[test]
  fn test_decode_first_maximum_wins() {
    let t = tensor(&[vec![0.5, 0.5, 0.1, 0.1, 0.3, 0.8, 0.8]]);
    let detections = decode(&t, (100, 100), 0.5);
    assert_eq!(detections[0].class_id, 1);
  }

  #[test]
  fn test_decode_discards_anchor_without_class() {
    // 阈值为负时，全部类别分数为 0 的锚点也不能通过
    let t = tensor(&[vec![0.5, 0.5, 0.1, 0.1, 0.0, 0.0], vec![0.5, 0.5, 0.1, 0.1, -0.2, 0.0]]);
    assert!(decode(&t, (100, 100), -1.0).is_empty());
  }

  #[test]
  fn test_decode_threshold_is_strict() {
    let t = tensor(&[vec![0.5, 0.5, 0.1, 0.1, 0.5]]);
    assert!(decode(&t, (100, 100), 0.5).is_empty());
    assert_eq!(decode(&t, (100, 100), 0.49).len(), 1);
  }

  #[test]
  fn test_decode_skips_non_finite_boxes() {
    let t = tensor(&[vec![f32::NAN, 0.5, 0.1, 0.1, 0.9], vec![0.5, 0.5, 0.1, 0.1, f32::NAN]]);
    assert!(decode(&t, (100, 100), 0.1).is_empty());
  }

  #[test]
  fn test_decode_clamps_to_input() {
    let t = tensor(&[vec![0.0, 1.0, 0.5, 0.5, 0.9]]);
    let d = decode(&t, (200, 100), 0.1)[0];
    assert_eq!(d.left, 0.0);
    assert!((d.right - 50.0).abs() < 1e-4);
    assert!((d.top - 75.0).abs() < 1e-4);
    assert_eq!(d.bottom, 100.0);
  }

  #[test]
  fn test_decode_is_monotonic_in_threshold() {
    let t = tensor(&[
      vec![0.1, 0.1, 0.1, 0.1, 0.95, 0.0],
      vec![0.3, 0.3, 0.1, 0.1, 0.0, 0.7],
      vec![0.5, 0.5, 0.1, 0.1, 0.4, 0.2],
      vec![0.7, 0.7, 0.1, 0.1, 0.1, 0.05],
    ]);
    let thresholds = [0.0, 0.1, 0.3, 0.5, 0.9, 0.99];
    for pair in thresholds.windows(2) {
      let loose = decode(&t, (100, 100), pair[0]);
      let strict = decode(&t, (100, 100), pair[1]);
      assert!(strict.len() <= loose.len());
      for d in &strict {
        assert!(loose.contains(d));
      }
    }
  }

  #[test]
  fn test_iou_identical_and_disjoint() {
    let a = det([0.0, 0.0, 10.0, 10.0], 0.9, 0);
    let b = det([20.0, 20.0, 30.0, 30.0], 0.9, 0);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &b), 0.0);
    // 只有边相接
    let c = det([10.0, 0.0, 20.0, 10.0], 0.9, 0);
    assert_eq!(iou(&a, &c), 0.0);
  }

  #[test]
  fn test_iou_partial_overlap() {
    let a = det([0.0, 0.0, 10.0, 10.0], 0.9, 0);
    let b = det([5.0, 5.0, 15.0, 15.0], 0.8, 0);
    assert!((iou(&a, &b) - 25.0 / 175.0).abs() < 1e-4);
  }

  #[test]
  fn test_iou_degenerate_boxes() {
    let a = det([5.0, 5.0, 5.0, 5.0], 0.9, 0);
    assert_eq!(iou(&a, &a), 0.0);
  }

  #[test]
  fn test_nms_same_class_suppressed() {
    // IoU = 100 / 200 = 0.5
    let a = det([0.0, 0.0, 10.0, 15.0], 0.8, 0);
    let b = det([0.0, 5.0, 10.0, 20.0], 0.9, 0);
    let kept = nms(vec![a, b], 0.2);
    assert_eq!(kept.len(), 1);
    assert!((kept[0].confidence - 0.9).abs() < 1e-6);
    assert!((iou(&a, &b) - 0.5).abs() < 1e-4);
  }

  #[test]
  fn test_nms_different_classes_survive() {
    let a = det([0.0, 0.0, 10.0, 10.0], 0.9, 0);
    let b = det([0.0, 0.0, 10.0, 10.0], 0.8, 1);
    let kept = nms(vec![b, a], 0.2);
    assert_eq!(kept, vec![a, b]);
  }

  #[test]
  fn test_nms_stable_on_ties() {
    let a = det([0.0, 0.0, 10.0, 10.0], 0.7, 0);
    let b = det([50.0, 50.0, 60.0, 60.0], 0.7, 0);
    let c = det([80.0, 80.0, 90.0, 90.0], 0.7, 1);
    assert_eq!(nms(vec![a, b, c], 0.5), vec![a, b, c]);
    assert_eq!(nms(vec![c, b, a], 0.5), vec![c, b, a]);
  }

  #[test]
  fn test_nms_suppressed_box_does_not_suppress() {
    // b 被 a 抑制后不再抑制 c，即使 b 与 c 重叠
    let a = det([0.0, 0.0, 10.0, 10.0], 0.9, 0);
    let b = det([4.0, 0.0, 14.0, 10.0], 0.8, 0);
    let c = det([9.0, 0.0, 19.0, 10.0], 0.7, 0);
    assert!(iou(&a, &b) > 0.3);
    assert!(iou(&b, &c) > 0.3);
    assert!(iou(&a, &c) < 0.3);
    assert_eq!(nms(vec![a, b, c], 0.3), vec![a, c]);
  }

  #[test]
  fn test_nms_properties() {
    let input = vec![
      det([0.0, 0.0, 10.0, 10.0], 0.6, 0),
      det([1.0, 1.0, 11.0, 11.0], 0.9, 0),
      det([2.0, 2.0, 12.0, 12.0], 0.75, 1),
      det([3.0, 0.0, 13.0, 10.0], 0.8, 1),
      det([40.0, 40.0, 50.0, 50.0], 0.5, 0),
      det([41.0, 40.0, 51.0, 50.0], 0.55, 0),
      det([100.0, 0.0, 120.0, 30.0], 0.65, 2),
    ];
    let threshold = 0.3;
    let kept = nms(input.clone(), threshold);

    for d in &kept {
      assert!(input.contains(d));
    }
    for (i, a) in kept.iter().enumerate() {
      for b in &kept[i + 1..] {
        assert!(a.confidence >= b.confidence);
        if a.class_id == b.class_id {
          assert!(iou(a, b) <= threshold);
        }
      }
    }
    assert_eq!(nms(kept.clone(), threshold), kept);
  }

  #[test]
  fn test_rescale_letterbox() {
    let info = ScaleInfo {
      scale_x: 0.64,
      scale_y: 0.64,
      pad_x: 0.0,
      pad_y: 160.0,
      source_width: 1000,
      source_height: 500,
    };
    let d = det([320.0, 320.0, 384.0, 352.0], 0.9, 0);
    let r = rescale(&d, &info);
    assert!((r.left - 500.0).abs() < 1e-3);
    assert!((r.top - 250.0).abs() < 1e-3);
    assert!((r.right - 600.0).abs() < 1e-3);
    assert!((r.bottom - 300.0).abs() < 1e-3);
    assert_eq!(r.confidence, d.confidence);
    assert_eq!(r.class_id, d.class_id);
  }

  #[test]
  fn test_rescale_inverts_scale_info() {
    let info = ScaleInfo {
      scale_x: 0.5,
      scale_y: 0.5,
      pad_x: 0.0,
      pad_y: 60.0,
      source_width: 1280,
      source_height: 720,
    };
    let original = [100.0, 200.0, 640.5, 700.25];
    let (l, t) = info.to_model(original[0], original[1]);
    let (r, b) = info.to_model(original[2], original[3]);
    let back = rescale(&det([l, t, r, b], 0.9, 0), &info);
    for (got, want) in back.bbox().iter().zip(original) {
      assert!((got - want).abs() < 1e-3, "{got} != {want}");
    }
  }

  #[test]
  fn test_rescale_clamps_padding_region() {
    let info = ScaleInfo {
      scale_x: 0.64,
      scale_y: 0.64,
      pad_x: 0.0,
      pad_y: 160.0,
      source_width: 1000,
      source_height: 500,
    };
    // 框落在上方填充区域
    let r = rescale(&det([10.0, 0.0, 50.0, 100.0], 0.9, 0), &info);
    assert_eq!(r.top, 0.0);
    assert_eq!(r.bottom, 0.0);
    assert!(r.left <= r.right);
  }

  #[test]
  fn test_postprocess_orders_by_confidence() {
    let t = tensor(&[
      vec![0.2, 0.2, 0.1, 0.1, 0.7, 0.0],
      vec![0.8, 0.8, 0.1, 0.1, 0.0, 0.95],
      vec![0.21, 0.2, 0.1, 0.1, 0.65, 0.0],
      vec![0.5, 0.5, 0.1, 0.1, 0.1, 0.2],
    ]);
    let params = PostprocessParams {
      input_size: (100, 100),
      confidence_threshold: 0.5,
      iou_threshold: 0.2,
    };
    let result = postprocess(&t, &params, &identity(100, 100));
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].class_id, 1);
    assert_eq!(result[1].class_id, 0);
    assert!((result[1].confidence - 0.7).abs() < 1e-6);
    for d in &result {
      assert!(0.0 <= d.left && d.left <= d.right && d.right <= 100.0);
      assert!(0.0 <= d.top && d.top <= d.bottom && d.bottom <= 100.0);
      assert!(d.confidence > params.confidence_threshold);
    }
  }
}
