// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 管线配置参数
pub mod detection; // 检测调度系统
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod overlay; // 叠加层合成
pub mod pipeline; // 流水线装配
pub mod presentation; // 呈现线程

pub use crate::config::PipelineConfig;
pub use crate::detection::{
    Completion, Detection, DetectionCycle, DetectionDispatcher, Detector, DetectorImage,
    DetectorOptions, Frame, Label, PixelFormat, Rect, Resolution, Rotation,
};
pub use crate::error::{DetectorError, PipelineError};
pub use crate::input::{FrameSink, FrameSource};
pub use crate::overlay::{Overlay, OverlayCompositor, OverlayStyle};
pub use crate::pipeline::{Pipeline, PipelineStats};
pub use crate::presentation::{DisplaySink, PresentationContext, Presenter};

/// 当前本地时间字符串,各字段以 `delimiter` 分隔 (用于输出文件名)
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = ["%Y", "%m", "%d", "%H", "%M", "%S", "%3f"].join(delimiter);
    chrono::Local::now().format(&fmt).to_string()
}
