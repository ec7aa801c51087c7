// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测系统数据结构定义
//! Data structures for the detection overlay pipeline
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

// ========== 分辨率与旋转 ==========

/// 像素尺寸 (分析分辨率 / 显示分辨率共用)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 任一维度为0即为退化尺寸
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// 按旋转角度交换宽高 (90/270 时交换)
    pub fn rotated(&self, rotation: Rotation) -> Self {
        if rotation.swaps_axes() {
            Self::new(self.height, self.width)
        } else {
            *self
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 帧旋转角度 (相机传感器方向 → 正立画面)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        match degrees.rem_euclid(360) {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            _ => Err(PipelineError::InvalidRotation(degrees)),
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Rgb8,
    /// 单通道亮度 (相机 Y 平面)
    Luma8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Luma8 => 1,
        }
    }
}

// ========== 帧 ==========

/// 帧归还回调 (消费者 → 帧源)
///
/// 帧源在收到 `release` 之前不会在同一通道上投递下一帧。
pub trait FrameRelease: Send + Sync {
    fn release(&self, frame_id: u64);
}

impl<F> FrameRelease for F
where
    F: Fn(u64) + Send + Sync,
{
    fn release(&self, frame_id: u64) {
        self(frame_id)
    }
}

/// 相机帧 (帧源 → 调度器)
///
/// 持有帧即持有归还义务: `release` 消耗帧并通知帧源;
/// 未显式归还的帧在 drop 时自动归还,归还句柄只会被取出一次。
pub struct Frame {
    id: u64,
    pixels: Arc<Vec<u8>>, // 使用Arc共享数据,避免复制
    width: u32,
    height: u32,
    rotation: Rotation,
    format: PixelFormat,
    releaser: Option<Arc<dyn FrameRelease>>,
}

impl Frame {
    pub fn new(id: u64, pixels: Arc<Vec<u8>>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            id,
            pixels,
            width,
            height,
            rotation: Rotation::Deg0,
            format,
            releaser: None,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_releaser(mut self, releaser: Arc<dyn FrameRelease>) -> Self {
        self.releaser = Some(releaser);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pixels(&self) -> &Arc<Vec<u8>> {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// 传感器原始尺寸
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// 旋转校正后的尺寸,即检测器测量检测框所用的坐标空间
    pub fn upright_resolution(&self) -> Resolution {
        self.resolution().rotated(self.rotation)
    }

    /// 检查尺寸与像素缓冲区是否一致
    pub fn validate(&self) -> Result<()> {
        if self.resolution().is_degenerate() {
            return Err(PipelineError::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        if self.pixels.len() < expected {
            return Err(PipelineError::PixelBuffer {
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }

    /// 归还帧给帧源
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(releaser) = self.releaser.take() {
            releaser.release(self.id);
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("rotation", &self.rotation.degrees())
            .field("format", &self.format)
            .field("bytes", &self.pixels.len())
            .field("pending_release", &self.releaser.is_some())
            .finish()
    }
}

// ========== 检测结果 ==========

/// 整数像素矩形 (left, top, right, bottom)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// 分类标签
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub text: String,
    pub confidence: f32,
    /// 检测器内部类别索引
    #[serde(default)]
    pub index: i32,
}

impl Label {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            index: 0,
        }
    }
}

/// 单个检测目标 (分析分辨率坐标系)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bounding_box: Rect,
    #[serde(default)]
    pub tracking_id: Option<i32>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl Detection {
    pub fn new(bounding_box: Rect, tracking_id: Option<i32>, labels: Vec<Label>) -> Self {
        Self {
            bounding_box,
            tracking_id,
            labels,
        }
    }

    /// 显示用ID: 无跟踪ID时为0
    pub fn display_id(&self) -> i32 {
        self.tracking_id.unwrap_or(0)
    }
}

/// 一次检测周期的结果 (调度器 → 合成器)
///
/// 检测框与分析分辨率在同一值里传递,合成时不会混用不同周期的数据。
#[derive(Debug, Clone)]
pub struct DetectionCycle {
    pub cycle: u64,
    pub frame_id: u64,
    pub resolution: Resolution,
    pub detections: Vec<Detection>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_frame(counter: &Arc<AtomicUsize>) -> Frame {
        let c = counter.clone();
        Frame::new(1, Arc::new(vec![0; 16]), 2, 2, PixelFormat::Rgba8).with_releaser(Arc::new(
            move |_id: u64| {
                c.fetch_add(1, Ordering::SeqCst);
            },
        ))
    }

    #[test]
    fn test_rotation_parse() {
        assert_eq!(Rotation::from_degrees(0).unwrap(), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(270).unwrap(), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(-90).unwrap(), Rotation::Deg270);
        assert!(Rotation::from_degrees(45).is_err());
    }

    #[test]
    fn test_upright_resolution_swaps_for_portrait() {
        let frame = Frame::new(0, Arc::new(vec![0; 640 * 480]), 640, 480, PixelFormat::Luma8)
            .with_rotation(Rotation::Deg90);
        assert_eq!(frame.upright_resolution(), Resolution::new(480, 640));
        assert_eq!(frame.resolution(), Resolution::new(640, 480));
    }

    #[test]
    fn test_release_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        counting_frame(&counter).release();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // 未显式归还的帧在drop时归还
        drop(counting_frame(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_validate() {
        let ok = Frame::new(0, Arc::new(vec![0; 12]), 2, 2, PixelFormat::Rgb8);
        assert!(ok.validate().is_ok());

        let empty = Frame::new(0, Arc::new(Vec::new()), 0, 480, PixelFormat::Rgb8);
        assert!(matches!(
            empty.validate(),
            Err(PipelineError::InvalidResolution { width: 0, height: 480 })
        ));

        let short = Frame::new(0, Arc::new(vec![0; 3]), 2, 2, PixelFormat::Rgb8);
        assert!(matches!(
            short.validate(),
            Err(PipelineError::PixelBuffer { expected: 12, actual: 3 })
        ));
    }

    #[test]
    fn test_display_id_defaults_to_zero() {
        let det = Detection::new(Rect::new(0, 0, 1, 1), None, vec![Label::new("cup", 0.5)]);
        assert_eq!(det.display_id(), 0);
    }

    #[test]
    fn test_detection_from_json() {
        let det: Detection = serde_json::from_str(
            r#"{"bounding_box":{"left":1,"top":2,"right":3,"bottom":4},"tracking_id":7,
                "labels":[{"text":"cat","confidence":0.9}]}"#,
        )
        .unwrap();
        assert_eq!(det.bounding_box, Rect::new(1, 2, 3, 4));
        assert_eq!(det.tracking_id, Some(7));
        assert_eq!(det.labels[0].index, 0);
    }

    #[test]
    fn test_rect_extent_saturates() {
        let wide = Rect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!(wide.width(), i32::MAX);
        assert_eq!(wide.height(), i32::MAX);
        assert!(!wide.is_empty());
        assert!(Rect::new(i32::MAX, 0, i32::MIN, 10).is_empty());
    }
}
