// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 错误类型 (Error types)
//!
//! 核心层的错误全部在本地记录日志,不会中断帧输入循环。

use thiserror::Error;

/// 检测器报告的失败 (SubmissionFailure 的原因)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectorError {
    /// 检测器处理该帧时出错
    #[error("detector failed: {0}")]
    Failed(String),

    /// 检测器在未回复的情况下丢弃了完成句柄
    #[error("detector dropped the request without completing it")]
    Abandoned,

    /// 检测器当前不可用
    #[error("detector unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid analysis resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error("invalid display surface {width}x{height}")]
    InvalidSurface { width: u32, height: u32 },

    #[error("invalid rotation {0}°, expected 0/90/180/270")]
    InvalidRotation(i32),

    #[error("pixel buffer too short: expected {expected} bytes, got {actual}")]
    PixelBuffer { expected: usize, actual: usize },

    #[error("submission failed: {0}")]
    Submission(#[from] DetectorError),

    #[error("font error: {0}")]
    Font(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
