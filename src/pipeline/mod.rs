// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测叠加流水线 (Detection Overlay Pipeline)
//!
//! 三线程架构,通过通道交接:
//! - Analysis:     运行帧源,把帧交给调度器 (独立线程)
//! - Compositor:   接收检测周期,合成并发布叠加层 (独立线程)
//! - Presentation: 按顺序调用显示端 (独立线程)
//!
//! 检测器的完成回调可能在任意线程上执行。
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::detection::{
    ChannelListener, DetectionCycle, DetectionDispatcher, Detector, DispatchSnapshot, Frame,
    FrameDisposition,
};
use crate::input::{FrameSink, FrameSource};
use crate::overlay::{Overlay, OverlayCompositor};
use crate::presentation::{DisplaySink, PresentationContext, Presenter};

/// 每合成多少个周期打印一次统计
const COMPOSE_LOG_INTERVAL: u64 = 60;

// ========== 统计 ==========

/// 流水线统计快照
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PipelineStats {
    pub dispatch: DispatchSnapshot,
    /// 成功发布的叠加层数
    pub composed: u64,
    /// 合成失败 (保留上一图层) 的周期数
    pub compose_failed: u64,
    /// 合成队列满而丢弃的周期数
    pub discarded: u64,
    /// 当前叠加层的发布序号
    pub generation: Option<u64>,
}

#[derive(Default)]
struct ComposeCounters {
    composed: AtomicU64,
    failed: AtomicU64,
    /// 已处理 (成功或失败) 的周期数
    handled: AtomicU64,
}

// ========== 合成线程 ==========

struct ComposeWorker {
    rx: Receiver<DetectionCycle>,
    stop_rx: Receiver<()>,
    compositor: Arc<OverlayCompositor>,
    sink: Arc<dyn DisplaySink>,
    presenter: Presenter,
    counters: Arc<ComposeCounters>,
}

impl ComposeWorker {
    fn run(self) {
        info!("🖌️ 合成线程启动");
        loop {
            select! {
                recv(self.rx) -> msg => match msg {
                    Ok(cycle) => self.compose(cycle),
                    Err(_) => break,
                },
                recv(self.stop_rx) -> _ => break,
            }
        }
        info!(
            "🖌️ 合成线程退出: 发布 {} 个图层, 失败 {}",
            self.counters.composed.load(Ordering::Relaxed),
            self.counters.failed.load(Ordering::Relaxed)
        );
    }

    fn compose(&self, cycle: DetectionCycle) {
        match self.compositor.render(&cycle, &self.sink, &self.presenter) {
            Ok(overlay) => {
                let composed = self.counters.composed.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "✅ 周期 #{} → 图层 #{} ({} 个目标)",
                    cycle.cycle,
                    overlay.generation(),
                    overlay.annotations().len()
                );
                if composed % COMPOSE_LOG_INTERVAL == 0 {
                    info!(
                        "📊 合成统计: 已发布 {} | 失败 {}",
                        composed,
                        self.counters.failed.load(Ordering::Relaxed)
                    );
                }
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ 周期 #{} 合成失败,保留上一图层: {}", cycle.cycle, e);
            }
        }
        self.counters.handled.fetch_add(1, Ordering::Release);
    }
}

// ========== 流水线 ==========

pub struct Pipeline {
    dispatcher: Arc<DetectionDispatcher>,
    listener: Arc<ChannelListener>,
    compositor: Arc<OverlayCompositor>,
    counters: Arc<ComposeCounters>,
    presentation: PresentationContext,
    running: Arc<AtomicBool>,
    analysis: Option<JoinHandle<()>>,
    compose: Option<JoinHandle<()>>,
    stop_tx: Option<Sender<()>>,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        detector: Arc<dyn Detector>,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<Self> {
        config.validate()?;
        let compositor = Arc::new(OverlayCompositor::new(config.overlay.clone())?);
        let presentation = PresentationContext::spawn().context("呈现线程启动失败")?;

        let (cycle_tx, cycle_rx) = crossbeam_channel::bounded(config.compose_queue);
        let listener = Arc::new(ChannelListener::new(cycle_tx));
        let dispatcher = Arc::new(
            DetectionDispatcher::new(detector, listener.clone())
                .with_pending_timeout(config.pending_timeout()),
        );

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let counters = Arc::new(ComposeCounters::default());
        let worker = ComposeWorker {
            rx: cycle_rx,
            stop_rx,
            compositor: compositor.clone(),
            sink,
            presenter: presentation.presenter(),
            counters: counters.clone(),
        };
        let compose = std::thread::Builder::new()
            .name("compositor".into())
            .spawn(move || worker.run())
            .context("合成线程启动失败")?;

        Ok(Self {
            dispatcher,
            listener,
            compositor,
            counters,
            presentation,
            running: Arc::new(AtomicBool::new(true)),
            analysis: None,
            compose: Some(compose),
            stop_tx: Some(stop_tx),
        })
    }

    /// 在独立分析线程上运行帧源
    pub fn start<S>(&mut self, mut source: S) -> Result<()>
    where
        S: FrameSource + 'static,
    {
        if self.analysis.is_some() {
            bail!("帧源已在运行");
        }
        if !self.running.load(Ordering::Acquire) {
            bail!("流水线已停止");
        }

        let dispatcher = self.dispatcher.clone();
        let running = self.running.clone();
        let handle = std::thread::Builder::new()
            .name("analysis".into())
            .spawn(move || {
                info!("🚀 分析线程启动");
                let mut deliver = |frame: Frame| {
                    dispatcher.on_frame(frame);
                    true
                };
                let mut sink = FrameSink::new(&mut deliver, &running);
                if let Err(e) = source.run(&mut sink) {
                    error!("❌ 帧源错误: {:#}", e);
                }
                info!("🛑 分析线程退出");
            })
            .context("分析线程启动失败")?;
        self.analysis = Some(handle);
        Ok(())
    }

    /// 直接送入一帧 (调用方自己驱动帧源时使用)
    pub fn on_frame(&self, frame: Frame) -> FrameDisposition {
        self.dispatcher.on_frame(frame)
    }

    /// 等待帧源自然结束
    pub fn wait_source(&mut self) {
        if let Some(handle) = self.analysis.take() {
            if handle.join().is_err() {
                error!("❌ 分析线程异常退出");
            }
        }
    }

    /// 等待未完成的检测请求与已交付的周期全部处理完;超时返回 false
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn is_idle(&self) -> bool {
        // 监听器先于回到空闲执行,空闲时 sent 已是最终值
        !self.dispatcher.is_pending()
            && self.counters.handled.load(Ordering::Acquire) >= self.listener.sent()
    }

    pub fn current_overlay(&self) -> Option<Arc<Overlay>> {
        self.compositor.current()
    }

    pub fn presenter(&self) -> Presenter {
        self.presentation.presenter()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            dispatch: self.dispatcher.stats(),
            composed: self.counters.composed.load(Ordering::Relaxed),
            compose_failed: self.counters.failed.load(Ordering::Relaxed),
            discarded: self.listener.discarded(),
            generation: self.current_overlay().map(|o| o.generation()),
        }
    }

    /// 停止帧源与各线程,已投递的呈现任务执行完后返回最终统计
    pub fn shutdown(mut self) -> PipelineStats {
        self.stop();
        self.stats()
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.wait_source();

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.compose.take() {
            if handle.join().is_err() {
                error!("❌ 合成线程异常退出");
            }
        }
        self.presentation.shutdown();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Completion, DetectorImage, PixelFormat, Resolution};
    use std::sync::Mutex;

    struct NullSink;

    impl DisplaySink for NullSink {
        fn surface_size(&self) -> Resolution {
            Resolution::new(64, 48)
        }

        fn present(&self, _overlay: Arc<Overlay>) {}
    }

    /// 立即返回空结果
    struct EmptyDetector;

    impl Detector for EmptyDetector {
        fn submit(&self, _image: DetectorImage, completion: Completion) {
            completion.succeed(Vec::new());
        }
    }

    /// 保留完成句柄,不回复
    #[derive(Default)]
    struct SilentDetector {
        held: Mutex<Vec<Completion>>,
    }

    impl Detector for SilentDetector {
        fn submit(&self, _image: DetectorImage, completion: Completion) {
            self.held.lock().unwrap().push(completion);
        }
    }

    fn frame(id: u64) -> Frame {
        Frame::new(id, Arc::new(vec![0; 16]), 4, 4, PixelFormat::Luma8)
    }

    #[test]
    fn test_on_frame_publishes_overlay() {
        let pipeline = Pipeline::new(
            &PipelineConfig::default(),
            Arc::new(EmptyDetector),
            Arc::new(NullSink),
        )
        .unwrap();

        assert_eq!(pipeline.on_frame(frame(0)), FrameDisposition::Submitted(1));
        assert!(pipeline.wait_idle(Duration::from_secs(5)));

        let overlay = pipeline.current_overlay().unwrap();
        assert_eq!(overlay.resolution(), Resolution::new(64, 48));
        assert_eq!(overlay.cycle(), 1);

        let stats = pipeline.shutdown();
        assert_eq!(stats.composed, 1);
        assert_eq!(stats.generation, Some(1));
    }

    #[test]
    fn test_wait_idle_times_out_while_pending() {
        let detector = Arc::new(SilentDetector::default());
        let pipeline =
            Pipeline::new(&PipelineConfig::default(), detector.clone(), Arc::new(NullSink))
                .unwrap();

        pipeline.on_frame(frame(0));
        assert!(!pipeline.wait_idle(Duration::from_millis(20)));

        detector.held.lock().unwrap().clear();
        assert!(pipeline.wait_idle(Duration::from_secs(5)));
        assert!(pipeline.current_overlay().is_none());
        assert_eq!(pipeline.stats().dispatch.failed, 1);
    }

    #[test]
    fn test_start_twice_rejected() {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let mut pipeline = Pipeline::new(
            &PipelineConfig::default(),
            Arc::new(EmptyDetector),
            Arc::new(NullSink),
        )
        .unwrap();
        pipeline
            .start(crate::input::ChannelSource::new(rx.clone()))
            .unwrap();
        assert!(pipeline.start(crate::input::ChannelSource::new(rx)).is_err());
        pipeline.shutdown();
    }
}
