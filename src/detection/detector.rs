// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测器接口 (Detector)
//! 职责: 提交图像 → 异步返回检测结果或失败
//!
//! 检测器本身是外部能力,核心只依赖这里的 trait 与完成句柄。

use std::fmt;
use std::sync::Arc;

use image::{imageops, DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use super::types::{Detection, PixelFormat, Resolution, Rotation};
use crate::error::DetectorError;

/// 一次提交的结果: 成功(检测列表) 或 失败
pub type DetectionOutcome = Result<Vec<Detection>, DetectorError>;

// ========== 检测器配置 ==========

/// 检测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorMode {
    /// 视频流模式: 低延迟,支持跨帧跟踪ID
    #[default]
    Stream,
    /// 单图模式
    SingleImage,
}

/// 透传给检测器的能力开关 (核心不解释)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
    pub mode: DetectorMode,
    pub classification: bool,
    pub multiple_objects: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            mode: DetectorMode::Stream,
            classification: true,
            multiple_objects: true,
        }
    }
}

// ========== 提交图像 ==========

/// 提交给检测器的图像 (共享帧像素,不复制)
#[derive(Clone)]
pub struct DetectorImage {
    pub frame_id: u64,
    pub pixels: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub format: PixelFormat,
}

impl DetectorImage {
    /// 旋转校正后的尺寸,检测框按此坐标系返回
    pub fn upright_resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height).rotated(self.rotation)
    }

    /// 转换为正立的RGBA图像 (供需要像素的检测器实现使用)
    pub fn to_upright_rgba(&self) -> Option<RgbaImage> {
        let raw = self.pixels.as_ref().clone();
        let rgba = match self.format {
            PixelFormat::Rgba8 => RgbaImage::from_raw(self.width, self.height, raw)?,
            PixelFormat::Rgb8 => {
                DynamicImage::ImageRgb8(RgbImage::from_raw(self.width, self.height, raw)?)
                    .to_rgba8()
            }
            PixelFormat::Luma8 => {
                DynamicImage::ImageLuma8(GrayImage::from_raw(self.width, self.height, raw)?)
                    .to_rgba8()
            }
        };

        Some(match self.rotation {
            Rotation::Deg0 => rgba,
            Rotation::Deg90 => imageops::rotate90(&rgba),
            Rotation::Deg180 => imageops::rotate180(&rgba),
            Rotation::Deg270 => imageops::rotate270(&rgba),
        })
    }
}

impl fmt::Debug for DetectorImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorImage")
            .field("frame_id", &self.frame_id)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("rotation", &self.rotation.degrees())
            .field("format", &self.format)
            .finish()
    }
}

// ========== 完成句柄 ==========

/// 一次提交的完成句柄
///
/// `succeed`/`fail`/`complete` 消耗句柄,因此最多完成一次;
/// 检测器若未完成就丢弃句柄,drop 时以 `DetectorError::Abandoned` 完成。
pub struct Completion {
    callback: Option<Box<dyn FnOnce(DetectionOutcome) + Send>>,
}

impl Completion {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(DetectionOutcome) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn succeed(self, detections: Vec<Detection>) {
        self.complete(Ok(detections));
    }

    pub fn fail(self, error: DetectorError) {
        self.complete(Err(error));
    }

    pub fn complete(mut self, outcome: DetectionOutcome) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(DetectorError::Abandoned));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

// ========== 检测器接口 ==========

/// 异步目标检测能力
///
/// `submit` 必须立即返回;结果可以在任意线程通过 `completion` 回复。
pub trait Detector: Send + Sync {
    fn submit(&self, image: DetectorImage, completion: Completion);
}

impl<D: Detector + ?Sized> Detector for Arc<D> {
    fn submit(&self, image: DetectorImage, completion: Completion) {
        (**self).submit(image, completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (Arc<Mutex<Vec<DetectionOutcome>>>, Completion) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let completion = Completion::new(move |outcome| sink.lock().unwrap().push(outcome));
        (seen, completion)
    }

    #[test]
    fn test_completion_fires_once() {
        let (seen, completion) = recording();
        completion.succeed(Vec::new());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_ok());
    }

    #[test]
    fn test_dropped_completion_reports_abandoned() {
        let (seen, completion) = recording();
        drop(completion);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], Err(DetectorError::Abandoned));
    }

    #[test]
    fn test_options_default_matches_stream_setup() {
        let opts = DetectorOptions::default();
        assert_eq!(opts.mode, DetectorMode::Stream);
        assert!(opts.classification);
        assert!(opts.multiple_objects);
    }

    #[test]
    fn test_to_upright_rgba_rotates() {
        // 2x1 灰度图,旋转90°后为 1x2
        let image = DetectorImage {
            frame_id: 0,
            pixels: Arc::new(vec![10, 200]),
            width: 2,
            height: 1,
            rotation: Rotation::Deg90,
            format: PixelFormat::Luma8,
        };
        let rgba = image.to_upright_rgba().unwrap();
        assert_eq!(rgba.dimensions(), (1, 2));
        assert_eq!(rgba.get_pixel(0, 0).0, [10, 10, 10, 255]);
        assert_eq!(rgba.get_pixel(0, 1).0, [200, 200, 200, 255]);
        assert_eq!(image.upright_resolution(), Resolution::new(1, 2));
    }
}
