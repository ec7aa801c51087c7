// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 叠加层 (Overlay)
//!
//! 检测周期结果 → 显示坐标 → 透明图层:
//! - Mapping:    分析分辨率到显示分辨率的逐轴缩放
//! - Compositor: 绘制检测框与标签,发布当前图层
//! - Style:      颜色/线宽/字体/标签排布
pub mod compositor;
pub mod mapping;
pub mod style;

pub use compositor::{Annotation, LabelLine, Overlay, OverlayCompositor, OverlayStore};
pub use mapping::{map_rect, scale_factors};
pub use style::{load_font, LabelLayout, OverlayStyle};
