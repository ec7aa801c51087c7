// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测调度器 (DetectionDispatcher)
//! 职责: 接收帧 → 单飞提交给检测器 → 回调结果 → 归还帧
//!
//! 同一时刻最多一个未完成的检测请求;请求未完成期间到达的帧直接归还(丢弃),
//! 不排队、不重试。检测器的真实延迟决定实际分析帧率。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use log::{debug, error, info, warn};

use super::detector::{Completion, DetectionOutcome, Detector, DetectorImage};
use super::types::{DetectionCycle, Frame, Resolution};
use crate::error::PipelineError;

/// 每完成多少个周期打印一次统计
const STATS_LOG_INTERVAL: u64 = 60;

// ========== 结果监听 ==========

/// 检测结果监听器 (调度器 → 合成器)
///
/// 在检测器的完成线程上调用,实现应尽快返回或把工作转交出去。
pub trait ResultListener: Send + Sync {
    fn on_result(&self, cycle: DetectionCycle);
}

impl<F> ResultListener for F
where
    F: Fn(DetectionCycle) + Send + Sync,
{
    fn on_result(&self, cycle: DetectionCycle) {
        self(cycle)
    }
}

/// 通过有界通道把结果转交给合成线程
pub struct ChannelListener {
    tx: Sender<DetectionCycle>,
    sent: AtomicU64,
    discarded: AtomicU64,
}

impl ChannelListener {
    pub fn new(tx: Sender<DetectionCycle>) -> Self {
        Self {
            tx,
            sent: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// 成功转交的周期数
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }

    /// 队列满而丢弃的周期数
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl ResultListener for ChannelListener {
    fn on_result(&self, cycle: DetectionCycle) {
        match self.tx.try_send(cycle) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Release);
            }
            Err(TrySendError::Full(cycle)) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ 合成队列已满,丢弃周期 #{} 的结果", cycle.cycle);
            }
            Err(TrySendError::Disconnected(cycle)) => {
                debug!("合成线程已退出,忽略周期 #{}", cycle.cycle);
            }
        }
    }
}

// ========== 调度状态 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Idle,
    Pending { cycle: u64, since: Instant },
    /// 完成回调已认领该周期,正在交付结果;超时不能取代
    Completing { cycle: u64 },
}

/// `on_frame` 对一帧的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// 已提交给检测器,携带周期号
    Submitted(u64),
    /// 有请求未完成,帧被直接归还
    Dropped,
    /// 帧尺寸或像素无效,已归还
    Rejected,
}

/// 调度统计快照
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DispatchSnapshot {
    pub submitted: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// 被超时强制取代后才返回的结果
    pub stale: u64,
    /// 超时强制回到空闲的次数
    pub forced_idle: u64,
    pub analysis_fps: f64,
}

struct FpsCounter {
    count: u64,
    last: Instant,
    current_fps: f64,
}

#[derive(Default)]
struct DispatchStats {
    submitted: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    stale: AtomicU64,
    forced_idle: AtomicU64,
}

struct Shared {
    state: Mutex<DispatchState>,
    listener: Arc<dyn ResultListener>,
    stats: DispatchStats,
    fps: Mutex<FpsCounter>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// 完成回调: 可能在任意线程执行,每个提交的帧恰好一次
    fn finish(&self, cycle: u64, resolution: Resolution, frame: Frame, outcome: DetectionOutcome) {
        if !self.claim(cycle) {
            // 已被超时强制取代: 只归还帧,不触碰状态,不交付结果
            self.stats.stale.fetch_add(1, Ordering::Relaxed);
            warn!("⚠️ 周期 #{} 在超时后才完成,结果已丢弃", cycle);
            frame.release();
            return;
        }

        match outcome {
            Ok(detections) => {
                debug!(
                    "🎯 周期 #{}: {} 个目标 (分析分辨率 {})",
                    cycle,
                    detections.len(),
                    resolution
                );
                self.listener.on_result(DetectionCycle {
                    cycle,
                    frame_id: frame.id(),
                    resolution,
                    detections,
                });
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let err = PipelineError::from(e);
                error!("❌ 周期 #{} 检测失败 (帧 {}): {}", cycle, frame.id(), err);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        // 先回到空闲再归还帧: 帧源可能在 release 内同步投递下一帧
        self.set_idle(cycle);
        frame.release();
        self.tick();
    }

    /// 仍是当前周期时原子地转入 Completing,之后超时不会再取代它
    fn claim(&self, cycle: u64) -> bool {
        let mut state = lock(&self.state);
        match *state {
            DispatchState::Pending { cycle: c, .. } if c == cycle => {
                *state = DispatchState::Completing { cycle };
                true
            }
            _ => false,
        }
    }

    fn set_idle(&self, cycle: u64) {
        let mut state = lock(&self.state);
        if matches!(*state, DispatchState::Completing { cycle: c } if c == cycle) {
            *state = DispatchState::Idle;
        }
    }

    fn tick(&self) {
        let mut fps = lock(&self.fps);
        fps.count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(fps.last);
        if elapsed.as_secs() >= 1 {
            fps.current_fps = fps.count as f64 / elapsed.as_secs_f64();
            fps.count = 0;
            fps.last = now;
        }

        let done = self.stats.succeeded.load(Ordering::Relaxed)
            + self.stats.failed.load(Ordering::Relaxed);
        if done % STATS_LOG_INTERVAL == 0 {
            info!(
                "📊 检测统计: 提交{} | 丢帧{} | 成功{} | 失败{} | {:.1}fps",
                self.stats.submitted.load(Ordering::Relaxed),
                self.stats.dropped.load(Ordering::Relaxed),
                self.stats.succeeded.load(Ordering::Relaxed),
                self.stats.failed.load(Ordering::Relaxed),
                fps.current_fps
            );
        }
    }
}

// ========== 调度器 ==========

pub struct DetectionDispatcher {
    detector: Arc<dyn Detector>,
    shared: Arc<Shared>,
    next_cycle: AtomicU64,
    pending_timeout: Option<Duration>,
}

impl DetectionDispatcher {
    pub fn new(detector: Arc<dyn Detector>, listener: Arc<dyn ResultListener>) -> Self {
        Self {
            detector,
            shared: Arc::new(Shared {
                state: Mutex::new(DispatchState::Idle),
                listener,
                stats: DispatchStats::default(),
                fps: Mutex::new(FpsCounter {
                    count: 0,
                    last: Instant::now(),
                    current_fps: 0.0,
                }),
            }),
            next_cycle: AtomicU64::new(1),
            pending_timeout: None,
        }
    }

    /// 未完成请求的超时 (None: 永远等待检测器)
    ///
    /// 超时后到达的下一帧会强制回到空闲并提交;迟到的结果被丢弃。
    pub fn with_pending_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pending_timeout = timeout;
        self
    }

    /// 处理一帧 (分析线程调用,从不阻塞等待检测器)
    pub fn on_frame(&self, frame: Frame) -> FrameDisposition {
        if let Err(e) = frame.validate() {
            warn!("⚠️ 帧 {} 无效,直接归还: {}", frame.id(), e);
            self.shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
            frame.release();
            return FrameDisposition::Rejected;
        }

        let cycle = {
            let mut state = lock(&self.shared.state);
            let busy = match *state {
                DispatchState::Idle => false,
                DispatchState::Completing { .. } => true,
                DispatchState::Pending { cycle, since } => {
                    let expired = self
                        .pending_timeout
                        .is_some_and(|timeout| since.elapsed() >= timeout);
                    if expired {
                        warn!(
                            "⚠️ 周期 #{} 已等待 {:.0}ms 未完成,强制回到空闲",
                            cycle,
                            since.elapsed().as_secs_f64() * 1000.0
                        );
                        self.shared.stats.forced_idle.fetch_add(1, Ordering::Relaxed);
                    }
                    !expired
                }
            };
            if busy {
                drop(state);
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                frame.release();
                return FrameDisposition::Dropped;
            }

            let cycle = self.next_cycle.fetch_add(1, Ordering::Relaxed);
            *state = DispatchState::Pending {
                cycle,
                since: Instant::now(),
            };
            cycle
        };

        // 分析分辨率与本帧同时捕获
        let resolution = frame.upright_resolution();
        let image = DetectorImage {
            frame_id: frame.id(),
            pixels: frame.pixels().clone(),
            width: frame.width(),
            height: frame.height(),
            rotation: frame.rotation(),
            format: frame.format(),
        };

        let shared = self.shared.clone();
        let completion = Completion::new(move |outcome| {
            shared.finish(cycle, resolution, frame, outcome);
        });

        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.detector.submit(image, completion);
        FrameDisposition::Submitted(cycle)
    }

    /// 是否有未完成的检测请求
    pub fn is_pending(&self) -> bool {
        !matches!(*lock(&self.shared.state), DispatchState::Idle)
    }

    pub fn stats(&self) -> DispatchSnapshot {
        let s = &self.shared.stats;
        DispatchSnapshot {
            submitted: s.submitted.load(Ordering::Relaxed),
            dropped: s.dropped.load(Ordering::Relaxed),
            rejected: s.rejected.load(Ordering::Relaxed),
            succeeded: s.succeeded.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            stale: s.stale.load(Ordering::Relaxed),
            forced_idle: s.forced_idle.load(Ordering::Relaxed),
            analysis_fps: lock(&self.shared.fps).current_fps,
        }
    }
}
