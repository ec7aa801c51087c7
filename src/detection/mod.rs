// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测系统 (Detection System)
//!
//! 帧进入分析线程后由调度器单飞提交给检测器:
//! - Dispatcher: 单飞调度 + 帧归还
//! - Detector:   外部检测能力接口
//! - Scripted:   脚本回放检测器 (演示/测试)
pub mod detector;
pub mod dispatcher;
pub mod scripted;
pub mod types;

pub use detector::{
    Completion, DetectionOutcome, Detector, DetectorImage, DetectorMode, DetectorOptions,
};
pub use dispatcher::{
    ChannelListener, DetectionDispatcher, DispatchSnapshot, FrameDisposition, ResultListener,
};
pub use scripted::{DetectionScript, ScriptedDetector};
pub use types::{
    Detection, DetectionCycle, Frame, FrameRelease, Label, PixelFormat, Rect, Resolution,
    Rotation,
};
