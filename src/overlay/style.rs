// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 叠加层绘制样式

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::FontVec;
use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// 检测框线宽上限 (像素)
pub const MAX_STROKE_WIDTH: u32 = 1024;
/// 标签字号上限 (像素)
pub const MAX_TEXT_SIZE: f32 = 1024.0;

/// 同一目标多个标签的排布方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelLayout {
    /// 所有标签画在同一锚点 (会重叠)
    #[default]
    Overlap,
    /// 每个后续标签下移一行
    Stacked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub box_color: [u8; 4],
    pub stroke_width: u32,
    pub text_color: [u8; 4],
    pub text_size: f32,
    /// 文字基线锚点相对检测框左上角的偏移
    pub label_offset: [i32; 2],
    pub label_layout: LabelLayout,
    /// TTF/OTF 字体路径;为空时只记录标签不绘制文字
    pub font_path: Option<PathBuf>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            box_color: [255, 0, 0, 255],
            stroke_width: 5,
            text_color: [0, 0, 0, 255],
            text_size: 30.0,
            label_offset: [7, 42],
            label_layout: LabelLayout::Overlap,
            font_path: None,
        }
    }
}

impl OverlayStyle {
    pub fn box_rgba(&self) -> Rgba<u8> {
        Rgba(self.box_color)
    }

    pub fn text_rgba(&self) -> Rgba<u8> {
        Rgba(self.text_color)
    }

    /// 检查线宽与字号是否在可绘制范围内
    pub fn validate(&self) -> Result<()> {
        if self.stroke_width > MAX_STROKE_WIDTH {
            return Err(PipelineError::Config(format!(
                "stroke_width must be at most {}, got {}",
                MAX_STROKE_WIDTH, self.stroke_width
            )));
        }
        let size = self.text_size;
        if !size.is_finite() || size <= 0.0 || size > MAX_TEXT_SIZE {
            return Err(PipelineError::Config(format!(
                "text_size must be in (0, {}], got {}",
                MAX_TEXT_SIZE, size
            )));
        }
        Ok(())
    }

    /// 第 `index` 个标签的基线锚点 (溢出时饱和到 i32 边界)
    pub fn label_anchor(&self, left: i32, top: i32, index: usize) -> (i32, i32) {
        let line = match self.label_layout {
            LabelLayout::Overlap => 0,
            LabelLayout::Stacked => i32::try_from(index)
                .unwrap_or(i32::MAX)
                .saturating_mul(self.text_size.ceil() as i32),
        };
        (
            left.saturating_add(self.label_offset[0]),
            top.saturating_add(self.label_offset[1]).saturating_add(line),
        )
    }
}

/// 加载字体文件
pub fn load_font(path: impl AsRef<Path>) -> Result<FontVec> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .map_err(|e| PipelineError::Font(format!("{}: {}", path.display(), e)))?;
    FontVec::try_from_vec(bytes)
        .map_err(|e| PipelineError::Font(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_shares_anchor() {
        let style = OverlayStyle::default();
        assert_eq!(style.label_anchor(200, 200, 0), (207, 242));
        assert_eq!(style.label_anchor(200, 200, 3), (207, 242));
    }

    #[test]
    fn test_stacked_moves_down_one_line() {
        let style = OverlayStyle {
            label_layout: LabelLayout::Stacked,
            ..Default::default()
        };
        assert_eq!(style.label_anchor(0, 0, 0), (7, 42));
        assert_eq!(style.label_anchor(0, 0, 2), (7, 102));
    }

    #[test]
    fn test_anchor_saturates_at_edges() {
        let style = OverlayStyle {
            label_layout: LabelLayout::Stacked,
            ..Default::default()
        };
        assert_eq!(style.label_anchor(i32::MAX, i32::MAX, 5), (i32::MAX, i32::MAX));
        assert_eq!(style.label_anchor(i32::MIN, 0, usize::MAX), (i32::MIN + 7, i32::MAX));
    }

    #[test]
    fn test_validate_limits() {
        assert!(OverlayStyle::default().validate().is_ok());
        for text_size in [f32::INFINITY, f32::NAN, 0.0, -3.0, MAX_TEXT_SIZE * 2.0] {
            let style = OverlayStyle {
                text_size,
                ..Default::default()
            };
            assert!(matches!(style.validate(), Err(PipelineError::Config(_))));
        }
        let style = OverlayStyle {
            stroke_width: MAX_STROKE_WIDTH + 1,
            ..Default::default()
        };
        assert!(matches!(style.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_missing_font_is_reported() {
        let err = load_font("/nonexistent/font.ttf").unwrap_err();
        assert!(matches!(err, PipelineError::Font(_)));
    }

    #[test]
    fn test_style_partial_json() {
        let style: OverlayStyle =
            serde_json::from_str(r#"{"stroke_width": 3, "label_layout": "stacked"}"#).unwrap();
        assert_eq!(style.stroke_width, 3);
        assert_eq!(style.label_layout, LabelLayout::Stacked);
        assert_eq!(style.label_offset, [7, 42]);
    }
}
