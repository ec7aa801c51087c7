// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 图片序列帧源 - 用静态图片模拟摄像头
//!
//! 启动前解码全部图片并缩放到分析尺寸,之后按固定间隔循环推送。
//! 未归还的帧达到上限时跳过本次推送 (相机只保留最新帧的行为)。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use fast_image_resize as fr;
use image::RgbaImage;
use log::{debug, info};

use super::{FrameSink, FrameSource};
use crate::detection::types::{Frame, FrameRelease, PixelFormat, Resolution, Rotation};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone)]
pub struct SequenceSettings {
    /// 推送尺寸 (None: 使用第一张图片的尺寸)
    pub analysis_size: Option<Resolution>,
    /// 附加在每帧上的旋转标记
    pub rotation: Rotation,
    pub interval: Duration,
    /// 播放遍数 (None: 无限循环)
    pub passes: Option<u32>,
    /// 最多同时未归还的帧
    pub max_in_flight: usize,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            analysis_size: None,
            rotation: Rotation::Deg0,
            interval: Duration::from_millis(33),
            passes: Some(1),
            max_in_flight: 1,
        }
    }
}

/// 推送与归还计数
#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    delivered: AtomicU64,
    released: AtomicU64,
    skipped: AtomicU64,
}

impl FrameRelease for Counters {
    fn release(&self, frame_id: u64) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.released.fetch_add(1, Ordering::Release);
        debug!("帧 {} 已归还", frame_id);
    }
}

/// 帧源计数的共享句柄,帧源移交给分析线程后仍可读取
#[derive(Clone)]
pub struct SequenceProgress {
    counters: Arc<Counters>,
}

impl SequenceProgress {
    /// 已推送的帧数
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Acquire)
    }

    /// 已归还的帧数
    pub fn released(&self) -> u64 {
        self.counters.released.load(Ordering::Acquire)
    }

    /// 因未归还帧过多而跳过的次数
    pub fn skipped(&self) -> u64 {
        self.counters.skipped.load(Ordering::Relaxed)
    }

    /// 尚未归还的帧数
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Acquire)
    }
}

pub struct ImageSequenceSource {
    stills: Vec<Arc<Vec<u8>>>,
    size: Resolution,
    settings: SequenceSettings,
    counters: Arc<Counters>,
    next_id: u64,
}

impl ImageSequenceSource {
    /// 读取目录下的全部图片 (按文件名排序)
    pub fn from_dir(dir: impl AsRef<Path>, settings: SequenceSettings) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("无法读取目录: {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect();
        paths.sort();
        if paths.is_empty() {
            bail!("目录中没有图片: {}", dir.display());
        }
        Self::from_paths(&paths, settings)
    }

    pub fn from_paths(paths: &[PathBuf], settings: SequenceSettings) -> Result<Self> {
        let images = paths
            .iter()
            .map(|path| {
                image::open(path)
                    .map(|img| img.to_rgba8())
                    .with_context(|| format!("图片解码失败: {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_images(images, settings)
    }

    pub fn from_images(images: Vec<RgbaImage>, settings: SequenceSettings) -> Result<Self> {
        let Some(first) = images.first() else {
            bail!("图片序列为空");
        };
        let size = settings
            .analysis_size
            .unwrap_or_else(|| Resolution::new(first.width(), first.height()));
        if size.is_degenerate() {
            bail!("无效的分析尺寸: {}", size);
        }
        if settings.max_in_flight == 0 {
            bail!("max_in_flight 至少为 1");
        }

        let start = Instant::now();
        let stills = images
            .into_iter()
            .map(|img| resize_rgba(img, size).map(|img| Arc::new(img.into_raw())))
            .collect::<Result<Vec<_>>>()?;
        info!(
            "📁 图片序列: {} 张, 尺寸 {}, 旋转 {}°, 间隔 {}ms ({:.1}ms)",
            stills.len(),
            size,
            settings.rotation.degrees(),
            settings.interval.as_millis(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Self {
            stills,
            size,
            settings,
            counters: Arc::new(Counters::default()),
            next_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.stills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stills.is_empty()
    }

    /// 每帧的像素尺寸 (旋转前)
    pub fn size(&self) -> Resolution {
        self.size
    }

    pub fn progress(&self) -> SequenceProgress {
        SequenceProgress {
            counters: self.counters.clone(),
        }
    }

    /// 已推送的帧数
    pub fn delivered(&self) -> u64 {
        self.progress().delivered()
    }

    /// 已归还的帧数
    pub fn released(&self) -> u64 {
        self.progress().released()
    }

    /// 因未归还帧过多而跳过的次数
    pub fn skipped(&self) -> u64 {
        self.progress().skipped()
    }

    fn make_frame(&mut self, pixels: Arc<Vec<u8>>) -> Frame {
        let id = self.next_id;
        self.next_id += 1;
        self.counters.in_flight.fetch_add(1, Ordering::AcqRel);
        self.counters.delivered.fetch_add(1, Ordering::Release);
        Frame::new(id, pixels, self.size.width, self.size.height, PixelFormat::Rgba8)
            .with_rotation(self.settings.rotation)
            .with_releaser(self.counters.clone())
    }
}

impl FrameSource for ImageSequenceSource {
    fn run(&mut self, sink: &mut FrameSink<'_>) -> Result<()> {
        let mut pass = 0u32;
        'outer: while self.settings.passes.map_or(true, |n| pass < n) {
            for index in 0..self.stills.len() {
                if !sink.is_running() {
                    break 'outer;
                }
                let in_flight = self.counters.in_flight.load(Ordering::Acquire);
                if in_flight >= self.settings.max_in_flight {
                    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!("未归还帧已满,跳过第 {} 张", index);
                } else {
                    let pixels = self.stills[index].clone();
                    let frame = self.make_frame(pixels);
                    if !sink.deliver(frame) {
                        break 'outer;
                    }
                }
                if !self.settings.interval.is_zero() {
                    std::thread::sleep(self.settings.interval);
                }
            }
            pass += 1;
        }

        info!(
            "📁 图片序列结束: 推送 {} 帧, 跳过 {} 次, 已归还 {}",
            self.delivered(),
            self.skipped(),
            self.released()
        );
        Ok(())
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// RGBA 缩放 (fast_image_resize, Nearest 插值)
fn resize_rgba(img: RgbaImage, size: Resolution) -> Result<RgbaImage> {
    let (width, height) = img.dimensions();
    if (width, height) == (size.width, size.height) {
        return Ok(img);
    }

    let src = fr::images::Image::from_vec_u8(width, height, img.into_raw(), fr::PixelType::U8x4)
        .context("创建源图像失败")?;
    let mut dst = fr::images::Image::new(size.width, size.height, fr::PixelType::U8x4);
    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Nearest),
        )
        .context("图片缩放失败")?;

    RgbaImage::from_raw(size.width, size.height, dst.buffer().to_vec())
        .context("缩放结果尺寸不匹配")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::atomic::AtomicBool;

    fn solid(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    fn fast() -> SequenceSettings {
        SequenceSettings {
            interval: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_stills_resized_to_analysis_size() {
        let settings = SequenceSettings {
            analysis_size: Some(Resolution::new(32, 24)),
            ..fast()
        };
        let source =
            ImageSequenceSource::from_images(vec![solid(64, 48, 10), solid(16, 16, 20)], settings)
                .unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.size(), Resolution::new(32, 24));
        assert!(source.stills.iter().all(|p| p.len() == 32 * 24 * 4));
        assert_eq!(source.stills[1][0], 20);
    }

    #[test]
    fn test_run_delivers_tagged_frames_and_counts_releases() {
        let settings = SequenceSettings {
            rotation: Rotation::Deg90,
            passes: Some(2),
            ..fast()
        };
        let mut source =
            ImageSequenceSource::from_images(vec![solid(8, 6, 1), solid(8, 6, 2)], settings)
                .unwrap();

        let running = AtomicBool::new(true);
        let mut seen = Vec::new();
        let mut deliver = |frame: Frame| {
            seen.push((frame.id(), frame.upright_resolution()));
            frame.release();
            true
        };
        let mut sink = FrameSink::new(&mut deliver, &running);
        source.run(&mut sink).unwrap();

        assert_eq!(seen.len(), 4);
        assert_eq!(seen[3], (3, Resolution::new(6, 8)));
        assert_eq!(source.delivered(), 4);
        assert_eq!(source.released(), 4);
        assert_eq!(source.skipped(), 0);
    }

    #[test]
    fn test_skips_when_frames_not_returned() {
        let settings = SequenceSettings {
            passes: Some(3),
            max_in_flight: 1,
            ..fast()
        };
        let mut source = ImageSequenceSource::from_images(vec![solid(4, 4, 0)], settings).unwrap();

        let running = AtomicBool::new(true);
        let mut held = Vec::new();
        let mut deliver = |frame: Frame| {
            held.push(frame);
            true
        };
        let mut sink = FrameSink::new(&mut deliver, &running);
        source.run(&mut sink).unwrap();

        assert_eq!(held.len(), 1);
        assert_eq!(source.skipped(), 2);
        drop(held);
        assert_eq!(source.released(), 1);
    }

    #[test]
    fn test_default_waits_for_release() {
        let settings = SequenceSettings {
            passes: Some(4),
            ..fast()
        };
        let mut source = ImageSequenceSource::from_images(vec![solid(4, 4, 0)], settings).unwrap();
        let progress = source.progress();

        let running = AtomicBool::new(true);
        let mut held = Vec::new();
        let mut deliver = |frame: Frame| {
            held.push(frame);
            true
        };
        let mut sink = FrameSink::new(&mut deliver, &running);
        source.run(&mut sink).unwrap();

        // 第 0 帧一直未归还,后续推送全部跳过
        assert_eq!(progress.delivered(), 1);
        assert_eq!(progress.skipped(), 3);
        assert_eq!(progress.in_flight(), 1);
        drop(held);
        assert_eq!(progress.in_flight(), 0);
        assert_eq!(progress.released(), 1);
    }

    #[test]
    fn test_deliver_false_stops_source() {
        let settings = SequenceSettings {
            passes: None,
            ..fast()
        };
        let mut source = ImageSequenceSource::from_images(vec![solid(4, 4, 0)], settings).unwrap();

        let running = AtomicBool::new(true);
        let mut count = 0;
        let mut deliver = |_frame: Frame| {
            count += 1;
            count < 5
        };
        let mut sink = FrameSink::new(&mut deliver, &running);
        source.run(&mut sink).unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_empty_sequence_rejected() {
        assert!(ImageSequenceSource::from_images(Vec::new(), fast()).is_err());
        assert!(ImageSequenceSource::from_dir("/nonexistent/frames", fast()).is_err());
    }

    #[test]
    fn test_from_dir_reads_sorted_images() {
        let dir = tempfile::tempdir().unwrap();
        solid(4, 4, 200).save(dir.path().join("b.png")).unwrap();
        solid(4, 4, 100).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let source = ImageSequenceSource::from_dir(dir.path(), fast()).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.stills[0][0], 100);
    }
}
