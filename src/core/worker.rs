//! 后台任务池
//!
//! 目录拉取、元数据写入等耗时操作放到后台执行，完成后通过 oneshot 通知调用方。
//! 每个任务持有池的子取消令牌，`cancel_all` 后正在等待许可或执行中的任务都会以
//! `Cancelled` 结束，被中断的目录拉取不会在缓存中留下条目。

use crate::error::{Result, TransferError};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 默认并发任务数
pub const DEFAULT_WORKERS: usize = 4;

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    active: Arc<AtomicUsize>,
    max_concurrent: usize,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            token: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 正在执行的任务数（不含等待许可的任务）
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 子令牌，池取消时随之取消
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 提交任务，结果通过返回的接收端送达
    pub fn spawn<F, Fut, T>(&self, name: impl Into<String>, task: F) -> oneshot::Receiver<Result<T>>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let name = name.into();
        let semaphore = self.semaphore.clone();
        let active = self.active.clone();
        let token = self.token.child_token();

        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                debug!("任务未开始即取消: {}", name);
                let _ = tx.send(Err(TransferError::cancelled()));
                return;
            };

            active.fetch_add(1, Ordering::SeqCst);
            let _guard = scopeguard::guard((), |_| {
                active.fetch_sub(1, Ordering::SeqCst);
            });
            debug!("任务开始: {}", name);
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("任务已取消: {}", name);
                    Err(TransferError::cancelled())
                }
                result = task(token.clone()) => result,
            };
            drop(permit);

            if let Err(e) = &result {
                if !matches!(e.kind(), crate::error::ErrorKind::Cancelled) {
                    warn!("任务失败 {}: {}", name, e);
                }
            }
            if tx.send(result).is_err() {
                debug!("任务结果无人接收: {}", name);
            }
        });
        rx
    }

    /// 取消全部任务，之后提交的任务也会立即取消
    pub fn cancel_all(&self) {
        debug!("取消全部后台任务");
        self.token.cancel();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

/// 等待任务结果，发送端被丢弃时视为取消
pub async fn join<T>(receiver: oneshot::Receiver<Result<T>>) -> Result<T> {
    receiver.await.unwrap_or_else(|_| Err(TransferError::cancelled()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{Path, PathType};
    use crate::storage::testing::MockBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_returns_result() {
        let pool = WorkerPool::new(2);
        let rx = pool.spawn("answer", |_| async { Ok(42) });
        assert_eq!(join(rx).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let receivers: Vec<_> = (0..6)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                pool.spawn(format!("task-{}", i), move |_| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        for rx in receivers {
            join(rx).await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_leaves_cache_empty() {
        let backend = MockBackend::new();
        backend.add_file("/docs/a.txt", 1);
        backend.set_list_delay(Duration::from_secs(10));
        let session = Arc::new(backend.session());
        let pool = WorkerPool::new(1);

        let task_session = session.clone();
        let rx = pool.spawn("list /docs", move |_| async move {
            let docs = Path::from_absolute("/docs", PathType::Directory);
            task_session.list(&docs).await.map(|l| l.len())
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.cache().in_flight_count(), 1);

        pool.cancel_all();
        let err = join(rx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(session.cache().in_flight_count(), 0);
        assert!(session.cache().is_empty());

        let late = pool.spawn("late", |_| async { Ok(()) });
        assert_eq!(join(late).await.unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
