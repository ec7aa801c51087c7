// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 视频输入系统 (Video Input System)
//!
//! 帧源在分析线程上运行,按自身节奏推送帧:
//! - FrameSource:         帧源接口 (摄像头等外部实现)
//! - ChannelSource:       从通道接收外部线程送来的帧
//! - ImageSequenceSource: 静态图片序列模拟摄像头
pub mod image_sequence;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::debug;

use crate::detection::types::Frame;

pub use image_sequence::{ImageSequenceSource, SequenceProgress, SequenceSettings};

/// 帧的投递口,由管线提供给帧源
pub struct FrameSink<'a> {
    deliver: &'a mut dyn FnMut(Frame) -> bool,
    running: &'a AtomicBool,
}

impl<'a> FrameSink<'a> {
    pub fn new(deliver: &'a mut dyn FnMut(Frame) -> bool, running: &'a AtomicBool) -> Self {
        Self { deliver, running }
    }

    /// 投递一帧;返回 false 表示帧源应停止
    pub fn deliver(&mut self, frame: Frame) -> bool {
        (self.deliver)(frame) && self.is_running()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// 帧源 (外部协作者)
///
/// 帧的所有权随投递转移;帧归还时通过 `FrameRelease` 通知帧源。
pub trait FrameSource: Send {
    /// 推送帧直到来源结束或 `sink` 要求停止
    fn run(&mut self, sink: &mut FrameSink<'_>) -> anyhow::Result<()>;
}

/// 从通道接收帧的帧源 (发送端全部断开时结束)
pub struct ChannelSource {
    rx: Receiver<Frame>,
    poll: Duration,
}

impl ChannelSource {
    pub fn new(rx: Receiver<Frame>) -> Self {
        Self {
            rx,
            poll: Duration::from_millis(50),
        }
    }
}

impl FrameSource for ChannelSource {
    fn run(&mut self, sink: &mut FrameSink<'_>) -> anyhow::Result<()> {
        while sink.is_running() {
            match self.rx.recv_timeout(self.poll) {
                Ok(frame) => {
                    if !sink.deliver(frame) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("帧通道已关闭");
                    break;
                }
            }
        }
        Ok(())
    }
}
