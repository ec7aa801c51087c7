// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 管线配置 (JSON)

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::detection::DetectorOptions;
use crate::error::{PipelineError, Result};
use crate::overlay::OverlayStyle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 传给检测器的选项,核心不解释
    pub detector: DetectorOptions,
    pub overlay: OverlayStyle,
    /// 未完成请求的超时 (毫秒),为空时永远等待检测器
    pub pending_timeout_ms: Option<u64>,
    /// 待合成周期队列长度,满时丢弃新结果
    pub compose_queue: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorOptions::default(),
            overlay: OverlayStyle::default(),
            pending_timeout_ms: None,
            compose_queue: 2,
        }
    }
}

impl PipelineConfig {
    /// 从文件加载,文件不存在或解析失败时使用默认值
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load_strict(path) {
            Ok(config) => {
                info!("✅ 配置已从 {} 加载", path.display());
                config
            }
            Err(e) => {
                warn!("⚠️ {}, 使用默认配置", e);
                Self::default()
            }
        }
    }

    pub fn load_strict(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("读取 {} 失败: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| PipelineError::Config(format!("解析 {} 失败: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        fs::write(path, json)
            .map_err(|e| PipelineError::Config(format!("写入 {} 失败: {}", path.display(), e)))?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.compose_queue == 0 {
            return Err(PipelineError::Config("compose_queue must be at least 1".into()));
        }
        self.overlay.validate()
    }

    pub fn pending_timeout(&self) -> Option<Duration> {
        self.pending_timeout_ms.map(Duration::from_millis)
    }

    pub fn print_summary(&self) {
        info!("🎛️ 当前管线配置:");
        info!(
            "  检测器: {:?}, 分类: {}, 多目标: {}",
            self.detector.mode, self.detector.classification, self.detector.multiple_objects
        );
        info!(
            "  检测框: 颜色 {:?}, 线宽 {}; 标签: 字号 {}, 排布 {:?}",
            self.overlay.box_color,
            self.overlay.stroke_width,
            self.overlay.text_size,
            self.overlay.label_layout
        );
        match self.pending_timeout_ms {
            Some(ms) => info!("  请求超时: {}ms", ms),
            None => info!("  请求超时: 无"),
        }
    }
}
