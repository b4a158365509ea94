// 该文件是 Rimagine 项目的一部分。
// src/task.rs - 检测任务
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

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc,
  },
  thread,
};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
  detector::Detector,
  error::DetectError,
  input::SourceImage,
  label::ClassLabelTable,
  model::{DetectResult, Model},
  output::{Render, report},
};

/// 单帧检测结果与写出的标注图像
#[derive(Debug, Clone)]
pub struct Detected {
  pub result: DetectResult,
  pub output_image: Option<PathBuf>,
}

/// 单帧处理记录，失败的帧不携带任何检测结果
#[derive(Debug)]
pub struct FrameReport {
  pub index: usize,
  pub source: Option<PathBuf>,
  pub outcome: anyhow::Result<Detected>,
}

impl FrameReport {
  pub fn is_success(&self) -> bool {
    self.outcome.is_ok()
  }

  pub fn to_json(&self, labels: &ClassLabelTable) -> Value {
    match &self.outcome {
      Ok(detected) => report::success_report(
        labels,
        &detected.result,
        detected.output_image.as_deref(),
      ),
      Err(err) => report::error_report(format!("{err:#}")),
    }
  }
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(
    self,
    input: I,
    detector: &mut Detector<M>,
    output: &O,
  ) -> Result<Vec<FrameReport>, Self::Error>;
}

/// 检测单帧并交给输出端
pub fn process_frame<M, O>(
  detector: &mut Detector<M>,
  output: &O,
  frame: &SourceImage,
) -> anyhow::Result<Detected>
where
  M: Model,
  O: Render<SourceImage, DetectResult>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  let now = std::time::Instant::now();
  let result = detector.detect(&frame.image)?;
  info!(
    "第 {} 帧检测完成，{} 个物体，耗时: {:.2?}",
    frame.index,
    result.len(),
    now.elapsed()
  );
  let output_image = output.render_result(frame, &result)?;
  Ok(Detected {
    result,
    output_image,
  })
}

/// 只处理第一帧
pub struct OneShotTask;

impl<I, E, M, O> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = Result<SourceImage, E>>,
  E: std::error::Error + Send + Sync + 'static,
  M: Model,
  O: Render<SourceImage, DetectResult>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    detector: &mut Detector<M>,
    output: &O,
  ) -> Result<Vec<FrameReport>, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let report = match frame {
      Ok(frame) => FrameReport {
        index: frame.index,
        source: frame.path.clone(),
        outcome: process_frame(detector, output, &frame),
      },
      Err(err) => FrameReport {
        index: 0,
        source: None,
        outcome: Err(err.into()),
      },
    };
    if let Err(err) = &report.outcome {
      error!("检测失败: {err:#}");
    }
    Ok(vec![report])
  }
}

/// 依次处理全部输入帧，单帧失败不中断任务
#[derive(Default, Debug)]
pub struct BatchTask {
  frame_number: Option<usize>,
}

impl BatchTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<I, E, M, O> Task<I, M, O> for BatchTask
where
  I: Iterator<Item = Result<SourceImage, E>>,
  E: std::error::Error + Send + Sync + 'static,
  M: Model,
  O: Render<SourceImage, DetectResult>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    detector: &mut Detector<M>,
    output: &O,
  ) -> Result<Vec<FrameReport>, Self::Error> {
    info!("开始任务...");
    if self.frame_number == Some(0) {
      warn!("帧数上限为 0，未处理任何帧");
      return Ok(Vec::new());
    }

    let mut reports = Vec::new();
    for (index, frame) in input.enumerate() {
      if self.frame_number.is_some_and(|n| index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", index);
        break;
      }

      let report = match frame {
        Ok(frame) => FrameReport {
          index,
          source: frame.path.clone(),
          outcome: process_frame(detector, output, &frame),
        },
        Err(err) => FrameReport {
          index,
          source: None,
          outcome: Err(err.into()),
        },
      };
      if let Err(err) = &report.outcome {
        warn!("第 {} 帧处理失败: {err:#}", index);
      }
      reports.push(report);
    }

    if reports.is_empty() {
      anyhow::bail!("没有输入帧");
    }
    let failed = reports.iter().filter(|r| !r.is_success()).count();
    info!("任务完成，共 {} 帧，失败 {} 帧", reports.len(), failed);
    Ok(reports)
  }
}

struct Job {
  frame: SourceImage,
  cancelled: Arc<AtomicBool>,
  reply: mpsc::Sender<anyhow::Result<Detected>>,
}

/// 后台检测任务的句柄
pub struct JobHandle {
  cancelled: Arc<AtomicBool>,
  reply: mpsc::Receiver<anyhow::Result<Detected>>,
}

impl JobHandle {
  /// 取消尚未开始推理的任务，已开始的任务不受影响
  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }

  /// 阻塞等待任务完成
  pub fn wait(self) -> anyhow::Result<Detected> {
    self
      .reply
      .recv()
      .map_err(|_| anyhow::anyhow!("后台线程已退出"))?
  }
}

/// 在后台线程上顺序执行检测任务，调用方提交后可等待或取消
pub struct BackgroundTask<M> {
  jobs: Option<mpsc::Sender<Job>>,
  worker: Option<thread::JoinHandle<Detector<M>>>,
}

impl<M> BackgroundTask<M>
where
  M: Model + Send + 'static,
{
  pub fn spawn<O>(mut detector: Detector<M>, output: O) -> Self
  where
    O: Render<SourceImage, DetectResult> + Send + 'static,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    let (tx, rx) = mpsc::channel::<Job>();
    let worker = thread::spawn(move || {
      info!("后台检测线程启动");
      for job in rx {
        let outcome = if job.cancelled.load(Ordering::SeqCst) {
          debug!("第 {} 帧已取消，跳过推理", job.frame.index);
          Err(DetectError::Cancelled.into())
        } else {
          process_frame(&mut detector, &output, &job.frame)
        };
        // 调用方可能已丢弃句柄
        let _ = job.reply.send(outcome);
      }
      info!("后台检测线程退出");
      detector
    });

    Self {
      jobs: Some(tx),
      worker: Some(worker),
    }
  }

  pub fn submit(&self, frame: SourceImage) -> anyhow::Result<JobHandle> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let (reply, reply_rx) = mpsc::channel();
    let jobs = self
      .jobs
      .as_ref()
      .ok_or_else(|| anyhow::anyhow!("后台任务已关闭"))?;
    jobs
      .send(Job {
        frame,
        cancelled: cancelled.clone(),
        reply,
      })
      .map_err(|_| anyhow::anyhow!("后台线程已退出"))?;

    Ok(JobHandle {
      cancelled,
      reply: reply_rx,
    })
  }

  /// 处理完已提交的任务后停止线程，交还检测器
  pub fn shutdown(mut self) -> anyhow::Result<Detector<M>> {
    self.jobs.take();
    let worker = self
      .worker
      .take()
      .ok_or_else(|| anyhow::anyhow!("后台任务已关闭"))?;
    worker
      .join()
      .map_err(|_| anyhow::anyhow!("后台检测线程异常退出"))
  }
}

impl<M> Drop for BackgroundTask<M> {
  fn drop(&mut self) {
    self.jobs.take();
    if let Some(worker) = self.worker.take()
      && worker.join().is_err()
    {
      error!("后台检测线程异常退出");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::{InputTensor, OutputTensor},
    model::{FnModel, ModelConfig, ModelVariant},
  };
  use image::{Rgb, RgbImage};
  use std::sync::Mutex;

  /// 记录渲染次数的输出端
  #[derive(Default)]
  struct CountingOutput {
    rendered: Mutex<Vec<usize>>,
  }

  impl Render<SourceImage, DetectResult> for CountingOutput {
    type Error = std::io::Error;

    fn render_result(
      &self,
      frame: &SourceImage,
      _result: &DetectResult,
    ) -> Result<Option<PathBuf>, Self::Error> {
      self.rendered.lock().unwrap().push(frame.index);
      Ok(None)
    }
  }

  fn config() -> ModelConfig {
    ModelConfig::from(ModelVariant::Disk)
      .with_num_classes(1)
      .with_num_anchors(1)
  }

  fn one_box(_: &InputTensor) -> Result<OutputTensor, DetectError> {
    OutputTensor::from_shape_vec(&[1, 5, 1], vec![0.5, 0.5, 0.2, 0.2, 0.9])
  }

  fn detector() -> Detector<FnModel<fn(&InputTensor) -> Result<OutputTensor, DetectError>>> {
    let model = FnModel::new(
      (640, 640),
      [1, 5, 1],
      one_box as fn(&InputTensor) -> Result<OutputTensor, DetectError>,
    );
    Detector::new(config(), model).unwrap()
  }

  fn frames(n: usize) -> impl Iterator<Item = Result<SourceImage, std::io::Error>> {
    (0..n).map(|index| {
      let mut frame = SourceImage::from_rgb(RgbImage::from_pixel(100, 100, Rgb([5, 5, 5])));
      frame.index = index;
      Ok(frame)
    })
  }

  #[test]
  fn test_one_shot_uses_first_frame() {
    let mut detector = detector();
    let output = CountingOutput::default();
    let reports = OneShotTask
      .run_task(frames(3), &mut detector, &output)
      .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome.as_ref().unwrap().result.len(), 1);
    assert_eq!(*output.rendered.lock().unwrap(), vec![0]);
  }

  #[test]
  fn test_batch_respects_frame_limit() {
    let mut detector = detector();
    let output = CountingOutput::default();
    let reports = BatchTask::default()
      .with_frame_number(Some(2))
      .run_task(frames(5), &mut detector, &output)
      .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(*output.rendered.lock().unwrap(), vec![0, 1]);
  }

  #[test]
  fn test_batch_continues_after_failed_frame() {
    let mut detector = detector();
    let output = CountingOutput::default();
    let input = frames(3).map(|f| match f {
      Ok(frame) if frame.index == 1 => Err(std::io::Error::other("broken")),
      other => other,
    });
    let reports = BatchTask::default()
      .run_task(input, &mut detector, &output)
      .unwrap();

    assert_eq!(reports.len(), 3);
    assert!(!reports[1].is_success());
    assert_eq!(reports[1].to_json(detector.labels())["status"], "error");
    assert_eq!(reports[2].to_json(detector.labels())["status"], "success");
    assert_eq!(*output.rendered.lock().unwrap(), vec![0, 2]);
  }

  #[test]
  fn test_batch_without_frames_fails() {
    let mut detector = detector();
    let output = CountingOutput::default();
    assert!(
      BatchTask::default()
        .run_task(frames(0), &mut detector, &output)
        .is_err()
    );
  }

  #[test]
  fn test_batch_zero_frame_limit_returns_empty() {
    let mut detector = detector();
    let output = CountingOutput::default();
    let reports = BatchTask::default()
      .with_frame_number(Some(0))
      .run_task(frames(3), &mut detector, &output)
      .unwrap();
    assert!(reports.is_empty());
    assert!(output.rendered.lock().unwrap().is_empty());
  }

  #[test]
  fn test_background_job_completes() {
    let task = BackgroundTask::spawn(detector(), CountingOutput::default());
    let handle = task.submit(frames(1).next().unwrap().unwrap()).unwrap();
    let detected = handle.wait().unwrap();
    assert_eq!(detected.result.len(), 1);
    let detector = task.shutdown().unwrap();
    detector.close();
  }

  #[test]
  fn test_background_cancel_before_inference() {
    // 第一帧推理阻塞在闸门上，第二帧在此期间被取消
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let model = FnModel::new((640, 640), [1, 5, 1], move |input: &InputTensor| {
      let _ = gate_rx.recv();
      one_box(input)
    });
    let detector = Detector::new(config(), model).unwrap();
    let task = BackgroundTask::spawn(detector, CountingOutput::default());

    let first = task.submit(frames(1).next().unwrap().unwrap()).unwrap();
    let second = task.submit(frames(1).next().unwrap().unwrap()).unwrap();
    second.cancel();
    assert!(second.is_cancelled());
    drop(gate_tx);

    assert!(first.wait().is_ok());
    let err = second.wait().unwrap_err();
    assert!(matches!(
      err.downcast_ref::<DetectError>(),
      Some(DetectError::Cancelled)
    ));
  }
}
