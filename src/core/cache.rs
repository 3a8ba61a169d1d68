//! 目录列表缓存
//!
//! 按 `Reference` 缓存目录快照，容量有限，超出时淘汰最久未访问的条目。
//! `get` 未命中只返回 `None`，由调用方决定何时拉取；`get_or_fetch` 保证同一目录
//! 同时只有一次后端拉取，其余调用方等待同一个结果。

use crate::error::Result;
use crate::model::{AttributedList, Path, Reference, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use scopeguard::ScopeGuard;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// 默认缓存目录数
pub const DEFAULT_CACHE_SIZE: usize = 1000;

const EVENT_CAPACITY: usize = 256;

type FlightResult = Result<Arc<AttributedList>>;

/// 缓存变化通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// 目录快照已写入
    Populated { reference: Reference, count: usize },
    Invalidated { reference: Reference },
    /// 因容量不足被淘汰
    Evicted { reference: Reference },
}

/// 命中与拉取计数
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// 实际发起的后端拉取
    pub fetches: AtomicU64,
    /// 合并到已有拉取上的请求
    pub coalesced: AtomicU64,
}

impl CacheStats {
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// 进行中的拉取
struct Flight {
    sender: broadcast::Sender<FlightResult>,
    /// 拉取期间目录被失效，结果只分发不入缓存
    stale: Arc<AtomicBool>,
}

enum Attach {
    Hit(Arc<AttributedList>),
    Leader(Arc<AtomicBool>),
    Waiter(broadcast::Receiver<FlightResult>),
}

/// 单个会话的目录列表缓存
pub struct ListingCache {
    session: SessionId,
    entries: Mutex<LruCache<Reference, Arc<AttributedList>>>,
    in_flight: DashMap<Reference, Flight>,
    events: broadcast::Sender<CacheEvent>,
    stats: CacheStats,
}

impl ListingCache {
    pub fn new(session: SessionId, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session,
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: DashMap::new(),
            events,
            stats: CacheStats::default(),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn reference(&self, directory: &Path) -> Reference {
        directory.reference(self.session)
    }

    /// 读取快照并刷新访问顺序，未命中返回 `None`
    pub fn get(&self, reference: &Reference) -> Option<Arc<AttributedList>> {
        let found = self.entries.lock().get(reference).cloned();
        if found.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn lookup(&self, directory: &Path) -> Option<Arc<AttributedList>> {
        self.get(&self.reference(directory))
    }

    pub fn put(&self, reference: Reference, list: AttributedList) -> Arc<AttributedList> {
        let list = Arc::new(list);
        self.store(reference, list.clone());
        list
    }

    /// 移除快照；若该目录正在拉取，则标记结果作废
    ///
    /// 作废标记在持有 `entries` 锁时设置，与拉取方的入缓存判断互斥。
    pub fn invalidate(&self, reference: &Reference) -> bool {
        let flight = self.in_flight.get(reference).map(|f| f.stale.clone());
        let touched = {
            let mut entries = self.entries.lock();
            if let Some(stale) = &flight {
                stale.store(true, Ordering::Release);
            }
            entries.pop(reference).is_some() || flight.is_some()
        };
        if touched {
            debug!("缓存失效: {}", reference);
            let _ = self.events.send(CacheEvent::Invalidated {
                reference: reference.clone(),
            });
        }
        touched
    }

    /// 失效 `root` 及其下所有层级的快照和进行中的拉取，返回受影响的目录数
    pub fn invalidate_tree(&self, root: &Reference) -> usize {
        let flights: Vec<(Reference, Arc<AtomicBool>)> = self
            .in_flight
            .iter()
            .filter(|f| in_tree(f.key(), root))
            .map(|f| (f.key().clone(), f.stale.clone()))
            .collect();
        let mut touched: Vec<Reference> = {
            let mut entries = self.entries.lock();
            for (_, stale) in &flights {
                stale.store(true, Ordering::Release);
            }
            let cached: Vec<Reference> = entries
                .iter()
                .map(|(reference, _)| reference)
                .filter(|reference| in_tree(reference, root))
                .cloned()
                .collect();
            for reference in &cached {
                entries.pop(reference);
            }
            cached
        };
        for (reference, _) in flights {
            if !touched.contains(&reference) {
                touched.push(reference);
            }
        }
        if !touched.is_empty() {
            debug!("缓存失效: {} 及其子目录，共 {} 个", root, touched.len());
        }
        for reference in &touched {
            let _ = self.events.send(CacheEvent::Invalidated {
                reference: reference.clone(),
            });
        }
        touched.len()
    }

    /// 不影响访问顺序
    pub fn is_cached(&self, reference: &Reference) -> bool {
        self.entries.lock().contains(reference)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// 清空缓存，进行中的拉取全部作废
    pub fn clear(&self) {
        let flights: Vec<Arc<AtomicBool>> = self.in_flight.iter().map(|f| f.stale.clone()).collect();
        let mut entries = self.entries.lock();
        for stale in &flights {
            stale.store(true, Ordering::Release);
        }
        let count = entries.len();
        entries.clear();
        debug!("清空目录缓存: {} 个条目", count);
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// 命中直接返回，否则拉取并写入缓存
    ///
    /// 同一目录并发调用只会执行一次 `fetch`。执行拉取的任务被取消时不留下任何条目，
    /// 等待者会重新竞争拉取。失败结果不缓存，但会分发给所有等待者。
    pub async fn get_or_fetch<F, Fut>(
        &self,
        reference: &Reference,
        fetch: F,
    ) -> Result<Arc<AttributedList>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AttributedList>>,
    {
        let stale = loop {
            match self.attach(reference) {
                Attach::Hit(list) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(list);
                }
                Attach::Waiter(mut receiver) => {
                    self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                    match receiver.recv().await {
                        Ok(result) => return result,
                        // 拉取方被取消，重新竞争
                        Err(_) => continue,
                    }
                }
                Attach::Leader(stale) => break stale,
            }
        };

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        debug!("拉取目录列表: {}", reference);

        let guard = scopeguard::guard((), |_| {
            debug!("目录拉取被取消: {}", reference);
            self.in_flight.remove(reference);
        });
        let result: FlightResult = fetch().await.map(Arc::new);
        ScopeGuard::into_inner(guard);

        if let Ok(list) = &result {
            if !self.store_fresh(reference, list.clone(), &stale) {
                debug!("拉取期间目录已失效，结果不入缓存: {}", reference);
            }
        }

        if let Some((_, flight)) = self.in_flight.remove(reference) {
            let _ = flight.sender.send(result.clone());
        }
        result
    }

    fn attach(&self, reference: &Reference) -> Attach {
        match self.in_flight.entry(reference.clone()) {
            Entry::Occupied(occupied) => Attach::Waiter(occupied.get().sender.subscribe()),
            Entry::Vacant(vacant) => {
                // 持有分片锁时复查，避免与刚完成的拉取错过
                if let Some(list) = self.entries.lock().get(reference).cloned() {
                    return Attach::Hit(list);
                }
                let (sender, _) = broadcast::channel(1);
                let stale = Arc::new(AtomicBool::new(false));
                vacant.insert(Flight {
                    sender,
                    stale: stale.clone(),
                });
                Attach::Leader(stale)
            }
        }
    }

    fn store(&self, reference: Reference, list: Arc<AttributedList>) {
        let count = list.len();
        let evicted = self.entries.lock().push(reference.clone(), list);
        self.announce(reference, count, evicted);
    }

    /// 未被作废时写入；判断与写入在同一次加锁内完成
    fn store_fresh(&self, reference: &Reference, list: Arc<AttributedList>, stale: &AtomicBool) -> bool {
        let count = list.len();
        let evicted = {
            let mut entries = self.entries.lock();
            if stale.load(Ordering::Acquire) {
                return false;
            }
            entries.push(reference.clone(), list)
        };
        self.announce(reference.clone(), count, evicted);
        true
    }

    fn announce(
        &self,
        reference: Reference,
        count: usize,
        evicted: Option<(Reference, Arc<AttributedList>)>,
    ) {
        if let Some((old, _)) = evicted {
            if old != reference {
                debug!("缓存已满，淘汰: {}", old);
                let _ = self.events.send(CacheEvent::Evicted { reference: old });
            }
        }
        let _ = self.events.send(CacheEvent::Populated { reference, count });
    }
}

/// `reference` 等于 `root` 或位于其下
fn in_tree(reference: &Reference, root: &Reference) -> bool {
    if reference.session() != root.session() {
        return false;
    }
    let root = root.absolute();
    if root == "/" {
        return true;
    }
    reference
        .absolute()
        .strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

impl std::fmt::Debug for ListingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingCache")
            .field("session", &self.session)
            .field("len", &self.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransferError};
    use crate::model::PathType;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn dir(path: &str) -> Path {
        Path::from_absolute(path, PathType::Directory)
    }

    fn listing(parent: &Path, names: &[&str]) -> AttributedList {
        names
            .iter()
            .map(|n| Path::child(parent, n, PathType::File))
            .collect()
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = ListingCache::new(SessionId::new(), 10);
        let docs = dir("/docs");
        let reference = cache.reference(&docs);

        assert!(cache.get(&reference).is_none());
        let stored = cache.put(reference.clone(), listing(&docs, &["a", "b"]));

        let got = cache.get(&reference).unwrap();
        assert!(Arc::ptr_eq(&stored, &got));
        assert!(cache.is_cached(&reference));

        assert!(cache.invalidate(&reference));
        assert!(cache.get(&reference).is_none());
        assert!(!cache.is_cached(&reference));
        assert!(!cache.invalidate(&reference));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ListingCache::new(SessionId::new(), 2);
        let a = cache.reference(&dir("/a"));
        let b = cache.reference(&dir("/b"));
        let c = cache.reference(&dir("/c"));
        let mut events = cache.subscribe();

        cache.put(a.clone(), AttributedList::default());
        cache.put(b.clone(), AttributedList::default());
        // 访问 a 后，b 成为最久未使用
        assert!(cache.get(&a).is_some());
        cache.put(c.clone(), AttributedList::default());

        assert_eq!(cache.len(), 2);
        assert!(cache.is_cached(&a));
        assert!(!cache.is_cached(&b));
        assert!(cache.is_cached(&c));

        let mut evicted = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CacheEvent::Evicted { reference } = event {
                evicted.push(reference);
            }
        }
        assert_eq!(evicted, vec![b]);
    }

    #[test]
    fn test_is_cached_does_not_promote() {
        let cache = ListingCache::new(SessionId::new(), 2);
        let a = cache.reference(&dir("/a"));
        let b = cache.reference(&dir("/b"));
        cache.put(a.clone(), AttributedList::default());
        cache.put(b.clone(), AttributedList::default());

        assert!(cache.is_cached(&a));
        cache.put(cache.reference(&dir("/c")), AttributedList::default());
        assert!(!cache.is_cached(&a));
        assert!(cache.is_cached(&b));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache = ListingCache::new(SessionId::new(), 0);
        assert_eq!(cache.capacity(), 1);
    }

    #[tokio::test]
    async fn test_single_flight_one_fetch() {
        let cache = Arc::new(ListingCache::new(SessionId::new(), 10));
        let docs = dir("/docs");
        let reference = cache.reference(&docs);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let reference = reference.clone();
            let calls = calls.clone();
            let docs = docs.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&reference, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(listing(&docs, &["x"]))
                    })
                    .await
            }));
        }
        for handle in handles {
            let list = handle.await.unwrap().unwrap();
            assert_eq!(list.names(), vec!["x"]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().fetches(), 1);
        assert_eq!(cache.in_flight_count(), 0);
        assert!(cache.is_cached(&reference));
    }

    #[tokio::test]
    async fn test_failed_fetch_not_cached() {
        let cache = ListingCache::new(SessionId::new(), 10);
        let reference = cache.reference(&dir("/missing"));

        let err = cache
            .get_or_fetch(&reference, || async {
                Err(TransferError::not_found("File not found"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!cache.is_cached(&reference));
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_leader_leaves_nothing() {
        let cache = Arc::new(ListingCache::new(SessionId::new(), 10));
        let docs = dir("/docs");
        let reference = cache.reference(&docs);

        let leader = {
            let cache = cache.clone();
            let reference = reference.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&reference, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(AttributedList::default())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.in_flight_count(), 1);

        let waiter = {
            let cache = cache.clone();
            let reference = reference.clone();
            let docs = docs.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&reference, || async move { Ok(listing(&docs, &["retry"])) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        let list = waiter.await.unwrap().unwrap();
        assert_eq!(list.names(), vec!["retry"]);
        assert_eq!(cache.in_flight_count(), 0);
        assert_eq!(cache.get(&reference).unwrap().names(), vec!["retry"]);
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_discards_result() {
        let cache = Arc::new(ListingCache::new(SessionId::new(), 10));
        let docs = dir("/docs");
        let reference = cache.reference(&docs);

        let fetching = {
            let cache = cache.clone();
            let reference = reference.clone();
            let docs = docs.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&reference, || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(listing(&docs, &["old"]))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.invalidate(&reference));

        let list = fetching.await.unwrap().unwrap();
        assert_eq!(list.names(), vec!["old"]);
        assert!(!cache.is_cached(&reference));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalidate_racing_leader_never_leaves_stale_entry() {
        let docs = dir("/docs");
        for round in 0..2000u32 {
            let cache = Arc::new(ListingCache::new(SessionId::new(), 10));
            let reference = cache.reference(&docs);
            let fetching = Arc::new(AtomicBool::new(false));

            let invalidator = {
                let cache = cache.clone();
                let reference = reference.clone();
                let fetching = fetching.clone();
                std::thread::spawn(move || {
                    while !fetching.load(Ordering::Acquire) {
                        std::hint::spin_loop();
                    }
                    for _ in 0..(round % 97) * 8 {
                        std::hint::spin_loop();
                    }
                    cache.invalidate(&reference)
                })
            };

            let flag = fetching.clone();
            let parent = docs.clone();
            let list = cache
                .get_or_fetch(&reference, || async move {
                    flag.store(true, Ordering::Release);
                    tokio::task::yield_now().await;
                    Ok(listing(&parent, &["old"]))
                })
                .await
                .unwrap();
            assert_eq!(list.names(), vec!["old"]);

            assert!(invalidator.join().unwrap());
            assert!(!cache.is_cached(&reference), "round {}", round);
        }
    }

    #[tokio::test]
    async fn test_invalidate_tree_drops_descendants() {
        let cache = Arc::new(ListingCache::new(SessionId::new(), 10));
        for path in ["/a", "/a/sub", "/a/sub/deep", "/ab", "/b"] {
            cache.put(cache.reference(&dir(path)), AttributedList::default());
        }

        let pending = {
            let cache = cache.clone();
            let reference = cache.reference(&dir("/a/other"));
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&reference, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(AttributedList::default())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.invalidate_tree(&cache.reference(&dir("/a"))), 4);
        pending.await.unwrap().unwrap();

        for gone in ["/a", "/a/sub", "/a/sub/deep", "/a/other"] {
            assert!(!cache.is_cached(&cache.reference(&dir(gone))), "{}", gone);
        }
        assert!(cache.is_cached(&cache.reference(&dir("/ab"))));
        assert!(cache.is_cached(&cache.reference(&dir("/b"))));
    }
}
