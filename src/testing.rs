//! Doubles and fixtures shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeZone;

use crate::api::App;
use crate::blob::LocalBlobStore;
use crate::cache::{self, Cache, CacheError, KeyValueCache, MemoryCache};
use crate::counter::{self, CounterError, CounterStore, MemoryCounters, Seeded};
use crate::database::{self, MemoryStore, RelationalStore};
use crate::model::{
    Comment, CommentId, CommentView, Counter, CounterSnapshot, HistoryEntry, User, UserId, Video,
    VideoDetail, VideoId, VideoSummary, ViewOutcome,
};
use crate::service::{
    Reconciler, ReconcilerTask, Timeouts, VideoDetailService, VideoService,
    ViewAggregationService,
};
use crate::time::{ManualClock, Timestamp};

pub(crate) fn start() -> Timestamp {
    chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub(crate) fn timeouts() -> Timeouts {
    Timeouts::new(Duration::from_secs(1), Duration::from_millis(200))
}

const CACHE_TIMEOUT: Duration = Duration::from_millis(200);

/// Creates user `u1` (fubuki) and their video `v1`.
pub(crate) async fn seed(store: &MemoryStore) -> (User, Video) {
    let user = User::new(
        UserId::parse("u1").unwrap(),
        "fubuki".into(),
        "Shirakami Fubuki".into(),
    );
    let video = Video::new(
        VideoId::parse("v1").unwrap(),
        user.id.clone(),
        "Friend Zone".into(),
        "a cover".into(),
        "videos/fubuki/1".into(),
        start(),
    );

    store.insert_user(user.clone());
    store.create_video(&video).await.unwrap();

    (user, video)
}

/// Writes a ledger record directly, bypassing the services.
pub(crate) async fn view(store: &MemoryStore, user: &str, video: &VideoId) {
    let user = UserId::parse(user).unwrap();
    store
        .upsert_view(&user, video, start(), Duration::from_secs(3600))
        .await
        .unwrap();
}

/// In-process wiring of every service around one seeded video.
pub(crate) struct Fixture {
    pub clock: ManualClock,
    pub store: MemoryStore,
    pub cache_backend: MemoryCache,
    pub cache: Cache,
    pub counters: MemoryCounters,
    pub video: Video,
    pub reconciler: Reconciler,
    pub blob_dir: tempfile::TempDir,
    _reconciler_task: ReconcilerTask,
}

impl Fixture {
    pub async fn new() -> Self {
        let clock = ManualClock::new(start());
        let store = MemoryStore::new();
        let cache_backend = MemoryCache::new(Arc::new(clock.clone()));
        let cache = Cache::new(Arc::new(cache_backend.clone()), CACHE_TIMEOUT);
        let counters = MemoryCounters::new();
        let (_, video) = seed(&store).await;

        let (reconciler, task) = Reconciler::spawn(
            Arc::new(store.clone()),
            Arc::new(counters.clone()),
            timeouts(),
            16,
        );

        Self {
            clock,
            store,
            cache_backend,
            cache,
            counters,
            video,
            reconciler,
            blob_dir: tempfile::tempdir().unwrap(),
            _reconciler_task: task,
        }
    }

    pub async fn user(&self, id: &str, username: &str) -> User {
        let user = User::new(UserId::parse(id).unwrap(), username.into(), username.into());
        self.store.insert_user(user)
    }

    /// Waits for the background reconciler to write counters for `video`.
    pub async fn reconciled(&self, video: &VideoId) -> Option<CounterSnapshot> {
        for _ in 0..100 {
            if let Some(snapshot) = self.counters.get_counters(video).await.unwrap() {
                return Some(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        None
    }

    pub fn blob_exists(&self, key: &str) -> bool {
        self.blob_dir.path().join(key).exists()
    }

    pub fn detail(&self) -> VideoDetailService {
        VideoDetailService::new(
            Arc::new(self.store.clone()),
            self.cache.clone(),
            crate::service::DEFAULT_TTL,
            timeouts().database,
        )
    }

    pub fn detail_with_failing_cache(&self) -> VideoDetailService {
        VideoDetailService::new(
            Arc::new(self.store.clone()),
            Cache::new(Arc::new(FailingCache), CACHE_TIMEOUT),
            crate::service::DEFAULT_TTL,
            timeouts().database,
        )
    }

    pub fn views(&self) -> ViewAggregationService {
        self.build_views(Arc::new(self.store.clone()), Arc::new(self.counters.clone()))
    }

    pub fn views_with_store(&self, store: Arc<dyn RelationalStore>) -> ViewAggregationService {
        self.build_views(store, Arc::new(self.counters.clone()))
    }

    pub fn views_with_failing_counters(&self) -> ViewAggregationService {
        self.build_views(Arc::new(self.store.clone()), Arc::new(FailingCounters))
    }

    fn build_views(
        &self, store: Arc<dyn RelationalStore>, counters: Arc<dyn CounterStore>,
    ) -> ViewAggregationService {
        ViewAggregationService::new(
            store,
            counters,
            self.cache.clone(),
            Arc::new(self.clock.clone()),
            self.reconciler.clone(),
            crate::service::DEFAULT_REARM_WINDOW,
            timeouts(),
        )
    }

    pub fn app(&self) -> App {
        App::new(self.detail(), self.views(), self.videos())
    }

    pub fn videos(&self) -> VideoService {
        self.videos_with_store(Arc::new(self.store.clone()))
    }

    pub fn videos_with_store(&self, store: Arc<dyn RelationalStore>) -> VideoService {
        VideoService::new(
            store,
            Arc::new(self.counters.clone()),
            Arc::new(LocalBlobStore::new(self.blob_dir.path())),
            self.cache.clone(),
            Arc::new(self.clock.clone()),
            self.reconciler.clone(),
            timeouts(),
        )
    }
}

/// A cache whose backend is down.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FailingCache;

fn cache_down() -> CacheError {
    cache::UnreachableSnafu {
        reason: "connection refused",
    }
    .build()
}

#[async_trait]
impl KeyValueCache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(cache_down())
    }

    async fn set(&self, _key: &str, _payload: String, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Err(cache_down())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(cache_down())
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        Err(cache_down())
    }
}

/// A cache that answers after the given delay.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlowCache(pub Duration);

#[async_trait]
impl KeyValueCache for SlowCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        tokio::time::sleep(self.0).await;
        Ok(None)
    }

    async fn set(&self, _key: &str, _payload: String, _ttl: Option<Duration>) -> Result<(), CacheError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

/// A counter store that is down.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FailingCounters;

fn counters_down() -> CounterError {
    counter::UnreachableSnafu {
        reason: "connection refused",
    }
    .build()
}

#[async_trait]
impl CounterStore for FailingCounters {
    async fn get_counters(&self, _video: &VideoId) -> Result<Option<CounterSnapshot>, CounterError> {
        Err(counters_down())
    }

    async fn adjust(
        &self, _video: &VideoId, _counter: Counter, _delta: i64,
    ) -> Result<Option<CounterSnapshot>, CounterError> {
        Err(counters_down())
    }

    async fn initialize_if_absent(
        &self, _video: &VideoId, _seed: CounterSnapshot,
    ) -> Result<Seeded, CounterError> {
        Err(counters_down())
    }

    async fn overwrite(&self, _video: &VideoId, _snapshot: CounterSnapshot) -> Result<(), CounterError> {
        Err(counters_down())
    }

    async fn remove(&self, _video: &VideoId) -> Result<(), CounterError> {
        Err(counters_down())
    }
}

/// A [MemoryStore] whose view ledger can be switched off or slowed down.
///
/// Every committed ledger write yields to the scheduler before answering, so concurrent callers
/// interleave between the write and whatever they do next.
#[derive(Debug, Clone)]
pub(crate) struct UnreliableStore {
    inner: MemoryStore,
    fail_views: Arc<AtomicBool>,
    fail_updates: Arc<AtomicBool>,
    stall_views: Arc<Mutex<Option<Duration>>>,
}

impl UnreliableStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_views: Arc::default(),
            fail_updates: Arc::default(),
            stall_views: Arc::default(),
        }
    }

    pub fn fail_views(&self, fail: bool) {
        self.fail_views.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Commits ledger writes but answers only after `stall`.
    pub fn stall_views(&self, stall: Option<Duration>) {
        *self.stall_views.lock().unwrap() = stall;
    }
}

#[async_trait]
impl RelationalStore for UnreliableStore {
    async fn user(&self, id: &UserId) -> database::Result<Option<User>> {
        self.inner.user(id).await
    }

    async fn video(&self, id: &VideoId) -> database::Result<Option<Video>> {
        self.inner.video(id).await
    }

    async fn videos(&self) -> database::Result<Vec<VideoSummary>> {
        self.inner.videos().await
    }

    async fn video_detail(&self, id: &VideoId) -> database::Result<Option<VideoDetail>> {
        self.inner.video_detail(id).await
    }

    async fn create_video(&self, video: &Video) -> database::Result<Video> {
        self.inner.create_video(video).await
    }

    async fn update_video(&self, video: &Video) -> database::Result<Option<Video>> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return database::UnavailableSnafu {
                reason: "update rejected",
            }
            .fail();
        }

        self.inner.update_video(video).await
    }

    async fn delete_video(&self, id: &VideoId) -> database::Result<Option<Video>> {
        self.inner.delete_video(id).await
    }

    async fn upsert_view(
        &self, user: &UserId, video: &VideoId, now: Timestamp, window: Duration,
    ) -> database::Result<ViewOutcome> {
        if self.fail_views.load(Ordering::SeqCst) {
            return database::UnavailableSnafu {
                reason: "ledger write rejected",
            }
            .fail();
        }

        let outcome = self.inner.upsert_view(user, video, now, window).await?;

        let stall = *self.stall_views.lock().unwrap();
        match stall {
            Some(stall) => tokio::time::sleep(stall).await,
            None => tokio::task::yield_now().await,
        }

        Ok(outcome)
    }

    async fn viewers(&self, video: &VideoId) -> database::Result<Vec<UserId>> {
        self.inner.viewers(video).await
    }

    async fn history(&self, user: &UserId) -> database::Result<Vec<HistoryEntry>> {
        self.inner.history(user).await
    }

    async fn aggregate(&self, video: &VideoId) -> database::Result<CounterSnapshot> {
        self.inner.aggregate(video).await
    }

    async fn comment(&self, id: &CommentId) -> database::Result<Option<Comment>> {
        self.inner.comment(id).await
    }

    async fn create_comment(&self, comment: &Comment) -> database::Result<Comment> {
        self.inner.create_comment(comment).await
    }

    async fn update_comment(&self, comment: &Comment) -> database::Result<Option<Comment>> {
        self.inner.update_comment(comment).await
    }

    async fn delete_comment(&self, id: &CommentId) -> database::Result<Option<Comment>> {
        self.inner.delete_comment(id).await
    }

    async fn comments(&self, video: &VideoId) -> database::Result<Vec<CommentView>> {
        self.inner.comments(video).await
    }

    async fn add_like(&self, user: &UserId, video: &VideoId, at: Timestamp) -> database::Result<bool> {
        self.inner.add_like(user, video, at).await
    }

    async fn remove_like(&self, user: &UserId, video: &VideoId) -> database::Result<bool> {
        self.inner.remove_like(user, video).await
    }

    async fn has_liked(&self, user: &UserId, video: &VideoId) -> database::Result<bool> {
        self.inner.has_liked(user, video).await
    }
}
