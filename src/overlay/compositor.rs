// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 叠加层合成器 (OverlayCompositor)
//! 职责: DetectionCycle + 显示分辨率 → 全新透明图层 → 发布 → 投递呈现

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use log::{debug, info};

use super::mapping::{scale_factors, scale_rect};
use super::style::{load_font, OverlayStyle};
use crate::detection::types::{DetectionCycle, Rect, Resolution};
use crate::error::{PipelineError, Result};
use crate::presentation::{DisplaySink, Presenter};

// ========== 叠加层 ==========

/// 一行标签文字 (锚点为文字基线左端)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelLine {
    pub text: String,
    pub anchor: (i32, i32),
}

/// 一个已绘制的目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// 显示坐标系下的检测框
    pub rect: Rect,
    pub tracking_id: i32,
    pub lines: Vec<LabelLine>,
}

/// 渲染完成的叠加层,与显示表面同尺寸,未绘制处全透明
pub struct Overlay {
    generation: u64,
    cycle: u64,
    analysis: Resolution,
    image: RgbaImage,
    annotations: Vec<Annotation>,
}

impl Overlay {
    /// 发布序号,每次发布递增
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 产生该图层的检测周期
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn analysis_resolution(&self) -> Resolution {
        self.analysis
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

impl fmt::Debug for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay")
            .field("generation", &self.generation)
            .field("cycle", &self.cycle)
            .field("size", &self.resolution())
            .field("annotations", &self.annotations)
            .finish()
    }
}

/// 当前叠加层 (同一时刻只有一个)
#[derive(Default)]
pub struct OverlayStore {
    current: Mutex<Option<Arc<Overlay>>>,
}

impl OverlayStore {
    /// 整体替换当前叠加层,返回被替换的旧图层
    pub fn publish(&self, overlay: Arc<Overlay>) -> Option<Arc<Overlay>> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.replace(overlay)
    }

    pub fn current(&self) -> Option<Arc<Overlay>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ========== 合成器 ==========

pub struct OverlayCompositor {
    style: OverlayStyle,
    font: Option<FontVec>,
    store: Arc<OverlayStore>,
    generation: AtomicU64,
}

impl OverlayCompositor {
    /// 按样式创建合成器,配置了字体路径时加载字体
    pub fn new(style: OverlayStyle) -> Result<Self> {
        style.validate()?;
        let font = match &style.font_path {
            Some(path) => {
                let font = load_font(path)?;
                info!("✅ 标签字体加载成功: {}", path.display());
                Some(font)
            }
            None => None,
        };
        Ok(Self {
            style,
            font,
            store: Arc::new(OverlayStore::default()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn store(&self) -> Arc<OverlayStore> {
        self.store.clone()
    }

    pub fn current(&self) -> Option<Arc<Overlay>> {
        self.store.current()
    }

    /// 合成新的叠加层 (不发布)
    ///
    /// 任一分辨率退化时直接返回错误,不会产生半成品图层。
    pub fn compose(&self, cycle: &DetectionCycle, display: Resolution) -> Result<Overlay> {
        if display.is_degenerate() {
            return Err(PipelineError::InvalidSurface {
                width: display.width,
                height: display.height,
            });
        }
        let (scale_x, scale_y) = scale_factors(cycle.resolution, display)?;

        let start = Instant::now();
        let mut image = RgbaImage::new(display.width, display.height);
        let mut annotations = Vec::with_capacity(cycle.detections.len());

        // 按检测器返回顺序绘制,后画的覆盖先画的
        for detection in &cycle.detections {
            let rect = scale_rect(detection.bounding_box, scale_x, scale_y);
            draw_box(&mut image, rect, self.style.box_rgba(), self.style.stroke_width);

            let id = detection.display_id();
            let lines: Vec<LabelLine> = detection
                .labels
                .iter()
                .enumerate()
                .map(|(i, label)| LabelLine {
                    text: format!("{} {}", id, label.text),
                    anchor: self.style.label_anchor(rect.left, rect.top, i),
                })
                .collect();

            if let Some(font) = &self.font {
                for line in &lines {
                    self.draw_label(&mut image, font, line);
                }
            }

            annotations.push(Annotation {
                rect,
                tracking_id: id,
                lines,
            });
        }

        debug!(
            "🖌️ 周期 #{}: {} 个目标 {} → {} ({:.1}ms)",
            cycle.cycle,
            annotations.len(),
            cycle.resolution,
            display,
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Overlay {
            generation: 0,
            cycle: cycle.cycle,
            analysis: cycle.resolution,
            image,
            annotations,
        })
    }

    /// 发布为当前叠加层
    pub fn publish(&self, mut overlay: Overlay) -> Arc<Overlay> {
        overlay.generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let overlay = Arc::new(overlay);
        self.store.publish(overlay.clone());
        overlay
    }

    /// 合成 → 发布 → 投递到呈现线程 (不等待呈现完成)
    ///
    /// 失败时当前叠加层保持不变。
    pub fn render(
        &self,
        cycle: &DetectionCycle,
        sink: &Arc<dyn DisplaySink>,
        presenter: &Presenter,
    ) -> Result<Arc<Overlay>> {
        let overlay = self.compose(cycle, sink.surface_size())?;
        let overlay = self.publish(overlay);

        let sink = sink.clone();
        let shown = overlay.clone();
        if !presenter.post(move || sink.present(shown)) {
            debug!("呈现线程已停止,图层 #{} 未显示", overlay.generation);
        }
        Ok(overlay)
    }

    fn draw_label(&self, image: &mut RgbaImage, font: &FontVec, line: &LabelLine) {
        let scale = PxScale::from(self.style.text_size);
        let ascent = font.as_scaled(scale).ascent().ceil() as i64;
        let (x, baseline) = (line.anchor.0 as i64, line.anchor.1 as i64);
        let top = baseline - ascent;

        // 起点离表面太远的文字不可见,不交给 imageproc
        let reach = LABEL_REACH + self.style.text_size.ceil() as i64;
        let (width, height) = (image.width() as i64, image.height() as i64);
        if x >= width || top >= height || x < -reach || top < -reach {
            return;
        }
        draw_text_mut(
            image,
            self.style.text_rgba(),
            x as i32,
            top as i32,
            scale,
            font,
            &line.text,
        );
    }
}

/// 表面左/上方仍可能露出文字的最远起点距离
const LABEL_REACH: i64 = 4096;

/// 以边线为中心绘制指定粗细的矩形框
///
/// 坐标先裁剪到表面外一圈线宽的范围内,表面上的像素与不裁剪时一致。
fn draw_box(image: &mut RgbaImage, rect: Rect, color: Rgba<u8>, stroke: u32) {
    let (left, top, right, bottom) = (
        rect.left as i64,
        rect.top as i64,
        rect.right as i64,
        rect.bottom as i64,
    );
    if right < left || bottom < top || stroke == 0 {
        return;
    }
    let margin = stroke as i64 + 1;
    let (width, height) = (image.width() as i64, image.height() as i64);
    let clip_x = |v: i64| v.clamp(-margin, width + margin);
    let clip_y = |v: i64| v.clamp(-margin, height + margin);
    let (left, right) = (clip_x(left), clip_x(right));
    let (top, bottom) = (clip_y(top), clip_y(bottom));

    let half = (stroke / 2) as i64;
    for d in -half..(stroke as i64 - half) {
        let w = right - left + 1 + 2 * d;
        let h = bottom - top + 1 + 2 * d;
        if w <= 0 || h <= 0 {
            continue;
        }
        let outline = imageproc::rect::Rect::at((left - d) as i32, (top - d) as i32)
            .of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, outline, color);
    }
}
