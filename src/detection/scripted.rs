// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 脚本检测器 (ScriptedDetector)
//!
//! 按JSON脚本回放检测结果的检测器实现,独立工作线程回复,用于离线演示与测试。

use std::fs;
use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::detector::{Completion, Detector, DetectorImage, DetectorOptions};
use super::types::Detection;
use crate::error::DetectorError;

/// 检测脚本: 每次提交依次回放 `cycles` 中的一项 (循环)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionScript {
    /// 模拟推理耗时
    pub latency_ms: u64,
    /// 每第N次提交返回失败 (None: 从不失败)
    pub fail_every: Option<u64>,
    pub cycles: Vec<Vec<Detection>>,
}

impl DetectionScript {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("读取检测脚本失败: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("检测脚本解析失败: {}", path.display()))
    }
}

struct Job {
    image: DetectorImage,
    completion: Completion,
}

pub struct ScriptedDetector {
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl ScriptedDetector {
    pub fn spawn(script: DetectionScript, options: DetectorOptions) -> Self {
        info!(
            "🔍 脚本检测器启动: {} 组结果, 延迟 {}ms, 选项 {:?}",
            script.cycles.len(),
            script.latency_ms,
            options
        );
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("scripted-detector".into())
            .spawn(move || run_script(rx, script, options))
            .ok();
        Self {
            tx: Some(tx),
            worker,
        }
    }
}

fn run_script(rx: Receiver<Job>, script: DetectionScript, options: DetectorOptions) {
    let latency = Duration::from_millis(script.latency_ms);
    let mut count = 0u64;

    while let Ok(Job { image, completion }) = rx.recv() {
        count += 1;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        if script.fail_every.is_some_and(|n| n > 0 && count % n == 0) {
            completion.fail(DetectorError::Failed(format!(
                "scripted failure on submission {}",
                count
            )));
            continue;
        }

        let mut detections = if script.cycles.is_empty() {
            Vec::new()
        } else {
            script.cycles[((count - 1) as usize) % script.cycles.len()].clone()
        };
        if !options.multiple_objects {
            detections.truncate(1);
        }
        if !options.classification {
            detections.iter_mut().for_each(|d| d.labels.clear());
        }

        debug!(
            "脚本检测: 帧 {} → {} 个目标",
            image.frame_id,
            detections.len()
        );
        completion.succeed(detections);
    }

    debug!("脚本检测器线程退出");
}

impl Detector for ScriptedDetector {
    fn submit(&self, image: DetectorImage, completion: Completion) {
        let Some(tx) = &self.tx else {
            completion.fail(DetectorError::Unavailable("detector stopped".into()));
            return;
        };
        if self.worker.is_none() {
            completion.fail(DetectorError::Unavailable("worker thread not running".into()));
            return;
        }
        if let Err(err) = tx.send(Job { image, completion }) {
            err.0
                .completion
                .fail(DetectorError::Unavailable("worker thread exited".into()));
        }
    }
}

impl Drop for ScriptedDetector {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{Label, PixelFormat, Rect, Rotation};
    use crate::detection::DetectionOutcome;
    use std::sync::Arc;

    fn image() -> DetectorImage {
        DetectorImage {
            frame_id: 1,
            pixels: Arc::new(vec![0; 4]),
            width: 2,
            height: 2,
            rotation: Rotation::Deg0,
            format: PixelFormat::Luma8,
        }
    }

    fn submit_and_wait(detector: &ScriptedDetector) -> DetectionOutcome {
        let (tx, rx) = crossbeam_channel::bounded(1);
        detector.submit(
            image(),
            Completion::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn two_cats() -> Vec<Detection> {
        vec![
            Detection::new(Rect::new(0, 0, 1, 1), Some(1), vec![Label::new("cat", 0.9)]),
            Detection::new(Rect::new(1, 1, 2, 2), Some(2), vec![Label::new("cat", 0.8)]),
        ]
    }

    #[test]
    fn test_replays_cycles_and_fails_on_schedule() {
        let script = DetectionScript {
            latency_ms: 0,
            fail_every: Some(3),
            cycles: vec![two_cats(), Vec::new()],
        };
        let detector = ScriptedDetector::spawn(script, DetectorOptions::default());

        assert_eq!(submit_and_wait(&detector).unwrap().len(), 2);
        assert_eq!(submit_and_wait(&detector).unwrap().len(), 0);
        assert!(submit_and_wait(&detector).is_err());
        // 失败的提交同样占用一个脚本位置
        assert_eq!(submit_and_wait(&detector).unwrap().len(), 0);
        assert_eq!(submit_and_wait(&detector).unwrap().len(), 2);
    }

    #[test]
    fn test_options_shape_results() {
        let script = DetectionScript {
            cycles: vec![two_cats()],
            ..Default::default()
        };
        let options = DetectorOptions {
            multiple_objects: false,
            classification: false,
            ..Default::default()
        };
        let detector = ScriptedDetector::spawn(script, options);
        let detections = submit_and_wait(&detector).unwrap();
        assert_eq!(detections.len(), 1);
        assert!(detections[0].labels.is_empty());
    }

    #[test]
    fn test_script_from_json() {
        let script: DetectionScript = serde_json::from_str(
            r#"{"latency_ms": 15, "cycles": [[{"bounding_box":
                {"left":100,"top":100,"right":200,"bottom":200},
                "tracking_id":7,"labels":[{"text":"cat","confidence":0.9}]}]]}"#,
        )
        .unwrap();
        assert_eq!(script.latency_ms, 15);
        assert_eq!(script.fail_every, None);
        assert_eq!(script.cycles[0][0].display_id(), 7);
    }
}
