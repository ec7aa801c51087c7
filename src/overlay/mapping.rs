// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 坐标映射: 分析分辨率 → 显示分辨率
//!
//! 两个轴独立线性缩放,不保持宽高比,不加黑边。
//! 宽高比不同时叠加层会相对真实画面拉伸,这是预期行为。

use crate::detection::types::{Rect, Resolution};
use crate::error::{PipelineError, Result};

/// 计算 (scale_x, scale_y)
pub fn scale_factors(analysis: Resolution, display: Resolution) -> Result<(f64, f64)> {
    if analysis.is_degenerate() {
        return Err(PipelineError::InvalidResolution {
            width: analysis.width,
            height: analysis.height,
        });
    }
    if display.is_degenerate() {
        return Err(PipelineError::InvalidSurface {
            width: display.width,
            height: display.height,
        });
    }
    Ok((
        display.width as f64 / analysis.width as f64,
        display.height as f64 / analysis.height as f64,
    ))
}

/// 把检测框映射到显示坐标 (各边向下取整)
pub fn map_rect(rect: Rect, analysis: Resolution, display: Resolution) -> Result<Rect> {
    let (scale_x, scale_y) = scale_factors(analysis, display)?;
    Ok(scale_rect(rect, scale_x, scale_y))
}

pub(crate) fn scale_rect(rect: Rect, scale_x: f64, scale_y: f64) -> Rect {
    let sx = |v: i32| (v as f64 * scale_x).floor() as i32;
    let sy = |v: i32| (v as f64 * scale_y).floor() as i32;
    Rect::new(sx(rect.left), sy(rect.top), sx(rect.right), sy(rect.bottom))
}
