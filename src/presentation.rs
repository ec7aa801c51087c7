// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 呈现上下文 (Presentation Context)
//!
//! 单一专用线程按投递顺序执行任务;显示端 `present` 只在该线程上调用。

use std::io;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

use crate::detection::types::Resolution;
use crate::overlay::Overlay;

/// 显示端 (外部协作者)
pub trait DisplaySink: Send + Sync {
    /// 当前显示表面尺寸,每个合成周期读取一次
    fn surface_size(&self) -> Resolution;

    /// 显示新的叠加层 (只在呈现线程上调用,不得阻塞过久)
    fn present(&self, overlay: Arc<Overlay>);
}

type Task = Box<dyn FnOnce() + Send>;

enum Message {
    Run(Task),
    Shutdown,
}

/// 投递句柄,可克隆到任意线程
#[derive(Clone)]
pub struct Presenter {
    tx: Sender<Message>,
    thread_id: ThreadId,
}

impl Presenter {
    /// 投递任务到呈现线程,不等待执行;呈现线程已退出时返回 false
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Message::Run(Box::new(task))).is_ok()
    }

    /// 当前线程是否为呈现线程
    pub fn on_context(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }
}

pub struct PresentationContext {
    presenter: Presenter,
    worker: Option<JoinHandle<()>>,
}

impl PresentationContext {
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("presentation".into())
            .spawn(move || run_tasks(rx))?;
        let thread_id = worker.thread().id();
        info!("🖼️ 呈现线程启动");
        Ok(Self {
            presenter: Presenter { tx, thread_id },
            worker: Some(worker),
        })
    }

    pub fn presenter(&self) -> Presenter {
        self.presenter.clone()
    }

    /// 执行完已投递的任务后停止线程
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.presenter.tx.send(Message::Shutdown);
        if worker.join().is_err() {
            warn!("⚠️ 呈现线程异常退出");
        }
    }
}

impl Drop for PresentationContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_tasks(rx: Receiver<Message>) {
    let mut count = 0u64;
    while let Ok(message) = rx.recv() {
        match message {
            Message::Run(task) => {
                task();
                count += 1;
            }
            Message::Shutdown => break,
        }
    }
    debug!("呈现线程退出,共执行 {} 个任务", count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_tasks_run_in_order_on_context() {
        let mut ctx = PresentationContext::spawn().unwrap();
        let presenter = ctx.presenter();
        let seen = Arc::new(Mutex::new(Vec::new()));

        assert!(!presenter.on_context());
        for i in 0..5 {
            let seen = seen.clone();
            let p = presenter.clone();
            assert!(presenter.post(move || seen.lock().unwrap().push((i, p.on_context()))));
        }
        ctx.shutdown();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        for (i, (n, on_ctx)) in seen.iter().enumerate() {
            assert_eq!(*n, i);
            assert!(on_ctx);
        }
    }

    #[test]
    fn test_post_after_shutdown_fails() {
        let mut ctx = PresentationContext::spawn().unwrap();
        let presenter = ctx.presenter();
        ctx.shutdown();
        drop(ctx);
        assert!(!presenter.post(|| {}));
    }
}
