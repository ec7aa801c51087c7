// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 离线叠加层演示 - 图片序列 + 脚本检测器 + PNG 输出
//!
//! 主程序入口 - 直接运行: cargo run --bin overlay_demo -- -i frames/ -s detections.json
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use live_overlay::detection::{DetectionScript, ScriptedDetector};
use live_overlay::input::{ImageSequenceSource, SequenceSettings};
use live_overlay::overlay::LabelLayout;
use live_overlay::{
    gen_time_string, DisplaySink, Overlay, Pipeline, PipelineConfig, Resolution, Rotation,
};
use log::{error, info};

/// 检测叠加演示程序
#[derive(Parser, Debug)]
#[command(author, version, about = "检测结果叠加层离线演示", long_about = None)]
struct Args {
    /// 输入图片目录 (按文件名排序作为帧序列)
    #[arg(short, long)]
    input: PathBuf,

    /// 检测脚本 (JSON)
    #[arg(short, long)]
    script: PathBuf,

    /// 管线配置文件 (JSON, 缺失时使用默认值)
    #[arg(short, long, default_value = "pipeline.json")]
    config: PathBuf,

    /// 叠加层输出目录
    #[arg(short, long, default_value = "overlays")]
    output: PathBuf,

    /// 显示表面宽度
    #[arg(long, default_value_t = 1280)]
    display_width: u32,

    /// 显示表面高度
    #[arg(long, default_value_t = 960)]
    display_height: u32,

    /// 分析尺寸宽度 (默认使用第一张图片的尺寸)
    #[arg(long)]
    analysis_width: Option<u32>,

    /// 分析尺寸高度
    #[arg(long)]
    analysis_height: Option<u32>,

    /// 帧旋转角度 (0/90/180/270)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    rotation: i32,

    /// 帧间隔 (毫秒)
    #[arg(long, default_value_t = 33)]
    interval_ms: u64,

    /// 播放遍数
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    font: Option<PathBuf>,

    /// 多标签逐行排布
    #[arg(long)]
    stacked_labels: bool,

    /// 未完成请求超时 (毫秒)
    #[arg(long)]
    pending_timeout_ms: Option<u64>,
}

/// 把每个呈现的叠加层保存为 PNG
struct PngSink {
    dir: PathBuf,
    size: Resolution,
    saved: AtomicU64,
}

impl DisplaySink for PngSink {
    fn surface_size(&self) -> Resolution {
        self.size
    }

    fn present(&self, overlay: Arc<Overlay>) {
        let name = format!(
            "overlay_{}_{:04}.png",
            gen_time_string("-"),
            overlay.generation()
        );
        let path = self.dir.join(name);
        match overlay.image().save(&path) {
            Ok(()) => {
                self.saved.fetch_add(1, Ordering::Relaxed);
                info!(
                    "💾 图层 #{} (周期 #{}, {} 个目标) → {}",
                    overlay.generation(),
                    overlay.cycle(),
                    overlay.annotations().len(),
                    path.display()
                );
            }
            Err(e) => error!("❌ 保存图层失败 {}: {}", path.display(), e),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // 配置文件 + 命令行覆盖
    let mut config = PipelineConfig::load(&args.config);
    if let Some(font) = args.font {
        config.overlay.font_path = Some(font);
    }
    if args.stacked_labels {
        config.overlay.label_layout = LabelLayout::Stacked;
    }
    if args.pending_timeout_ms.is_some() {
        config.pending_timeout_ms = args.pending_timeout_ms;
    }
    config.print_summary();

    let rotation = Rotation::from_degrees(args.rotation)?;
    let analysis_size = match (args.analysis_width, args.analysis_height) {
        (Some(w), Some(h)) => Some(Resolution::new(w, h)),
        (None, None) => None,
        _ => anyhow::bail!("--analysis-width 与 --analysis-height 需同时指定"),
    };
    let source = ImageSequenceSource::from_dir(
        &args.input,
        SequenceSettings {
            analysis_size,
            rotation,
            interval: Duration::from_millis(args.interval_ms),
            passes: Some(args.repeat),
            ..Default::default()
        },
    )?;

    let script = DetectionScript::load(&args.script)?;
    let detector = Arc::new(ScriptedDetector::spawn(script, config.detector));

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("无法创建输出目录: {}", args.output.display()))?;
    let sink = Arc::new(PngSink {
        dir: args.output.clone(),
        size: Resolution::new(args.display_width, args.display_height),
        saved: AtomicU64::new(0),
    });

    println!(
        "✅ 三线程架构 | 显示 {}x{} | 帧源 {} 张 {} | 旋转 {}°",
        args.display_width,
        args.display_height,
        source.len(),
        source.size(),
        rotation.degrees()
    );

    let mut pipeline = Pipeline::new(&config, detector, sink.clone())?;
    pipeline.start(source)?;
    pipeline.wait_source();
    if !pipeline.wait_idle(Duration::from_secs(10)) {
        error!("❌ 等待检测器完成超时");
    }

    let stats = pipeline.shutdown();
    info!(
        "📊 完成: 提交{} | 丢帧{} | 成功{} | 失败{} | 图层{} | 已保存{}",
        stats.dispatch.submitted,
        stats.dispatch.dropped,
        stats.dispatch.succeeded,
        stats.dispatch.failed,
        stats.composed,
        sink.saved.load(Ordering::Relaxed)
    );
    Ok(())
}
