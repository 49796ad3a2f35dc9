//! 单集合同步 Worker
//!
//! 从检查点的下一页开始逐页前进：
//! 1. 拉取（失败发 Warning，按重试策略等待后重拉同一页，不推进页号）
//! 2. 只保留 remote_id > last_seen_id 的记录
//! 3. 有新记录则整批写库（失败即 Failed，检查点不动）
//! 4. 写检查点：满页记当前页，不满页记当前页 - 1（尾页下次还要再看）
//! 5. 没有下一页时结束，发 Successful

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::progress::{SyncProgress, SyncStatus};
use super::retry::RetryPolicy;
use super::{new_state_cell, WorkerState, WorkerStateCell};
use crate::collection::Collection;
use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::SigMirrorError;
use crate::remote::{RemotePage, SignatureSource};
use crate::storage::{Checkpoint, MirrorStore, SignatureRecord};

/// Worker 运行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub collection: Collection,
    pub status: SyncStatus,
    pub pages_fetched: u64,
    /// 通过 last_seen_id 过滤后提交写库的记录数
    pub records_submitted: u64,
    /// 实际新增的记录数（重复 (key, value) 不计）
    pub records_inserted: u64,
    pub warnings: u64,
    /// 最后一次成功写入的检查点
    pub checkpoint: Option<Checkpoint>,
}

impl WorkerReport {
    fn new(collection: Collection) -> Self {
        Self {
            collection,
            status: SyncStatus::Failed,
            pages_fetched: 0,
            records_submitted: 0,
            records_inserted: 0,
            warnings: 0,
            checkpoint: None,
        }
    }
}

/// 使 Worker 提前终止的原因
#[derive(Debug)]
enum WorkerAbort {
    Store {
        action: String,
        source: SigMirrorError,
    },
    RetriesExhausted {
        page: u64,
        attempts: u32,
        source: SigMirrorError,
    },
    Cancelled {
        page: u64,
    },
}

impl fmt::Display for WorkerAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerAbort::Store { action, source } => write!(f, "Failed to {}: {}", action, source),
            WorkerAbort::RetriesExhausted {
                page,
                attempts,
                source,
            } => write!(
                f,
                "Giving up on page {} after {} failed attempts: {}",
                page, attempts, source
            ),
            WorkerAbort::Cancelled { page } => write!(f, "Sync cancelled before page {}", page),
        }
    }
}

pub struct SyncWorker {
    collection: Collection,
    store: Arc<dyn MirrorStore>,
    source: Arc<dyn SignatureSource>,
    retry_policy: RetryPolicy,
    page_size: usize,
    state: WorkerStateCell,
    cancel: CancellationToken,
}

impl SyncWorker {
    pub fn new(
        collection: Collection,
        store: Arc<dyn MirrorStore>,
        source: Arc<dyn SignatureSource>,
    ) -> Self {
        Self {
            collection,
            store,
            source,
            retry_policy: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            state: new_state_cell(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_state_cell(mut self, state: WorkerStateCell) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// 运行到追平或致命错误；进度写入 `progress`，返回前保证已发出一条终态事件
    ///
    /// 接收端被丢弃不影响同步本身。
    pub async fn run(self, progress: mpsc::Sender<SyncProgress>) -> WorkerReport {
        let mut report = WorkerReport::new(self.collection);
        self.set_state(WorkerState::Idle);

        let outcome = match self.sync_pages(&progress, &mut report).await {
            Ok(()) => match self.store.count_records(self.collection).await {
                Ok(total) => Ok(format!(
                    "{}s are up to date with records: {}",
                    self.collection.noun(),
                    total
                )),
                Err(source) => Err(WorkerAbort::Store {
                    action: format!("count {} records", self.collection),
                    source,
                }),
            },
            Err(abort) => Err(abort),
        };

        let (status, message) = match outcome {
            Ok(message) => (SyncStatus::Successful, message),
            Err(abort) => (SyncStatus::Failed, abort.to_string()),
        };

        report.status = status;
        self.set_state(WorkerState::Done(status));
        info!(
            "🏁 {} 同步结束: status={:?}, pages={}, inserted={}",
            self.collection, status, report.pages_fetched, report.records_inserted
        );
        self.emit(&progress, status, message).await;
        report
    }

    async fn sync_pages(
        &self,
        progress: &mpsc::Sender<SyncProgress>,
        report: &mut WorkerReport,
    ) -> Result<(), WorkerAbort> {
        let checkpoint = self
            .store
            .get_checkpoint(self.collection)
            .await
            .map_err(|source| WorkerAbort::Store {
                action: format!("read {} checkpoint", self.collection),
                source,
            })?;

        let mut last_page = checkpoint.last_page;
        let mut last_seen_id = checkpoint.last_seen_id;
        let mut page = last_page + 1;
        debug!(
            "🔄 {} 从第 {} 页续传 (last_seen_id={})",
            self.collection, page, last_seen_id
        );

        loop {
            if self.cancel.is_cancelled() {
                return Err(WorkerAbort::Cancelled { page });
            }

            let remote = self.fetch_with_retry(page, progress, report).await?;
            report.pages_fetched += 1;

            self.set_state(WorkerState::Filtering);
            let fresh: Vec<SignatureRecord> = remote
                .entries
                .iter()
                .filter(|entry| entry.remote_id > last_seen_id)
                .map(|entry| entry.to_record())
                .collect();
            let fresh_count = fresh.len();

            if !fresh.is_empty() {
                self.set_state(WorkerState::Persisting);
                let inserted = self
                    .store
                    .upsert_records(self.collection, fresh)
                    .await
                    .map_err(|source| WorkerAbort::Store {
                        action: format!("upsert {} records", self.collection.noun().to_lowercase()),
                        source,
                    })?;
                report.records_submitted += fresh_count as u64;
                report.records_inserted += inserted as u64;
            }

            self.set_state(WorkerState::CheckpointUpdate);
            let next_last_seen = remote
                .max_remote_id()
                .map_or(last_seen_id, |max| max.max(last_seen_id));
            let next_page = if remote.entries.len() >= self.page_size {
                page
            } else {
                page - 1
            }
            .max(last_page);

            let saved = self
                .store
                .set_checkpoint(self.collection, next_page, next_last_seen)
                .await
                .map_err(|source| WorkerAbort::Store {
                    action: format!("update {} checkpoint", self.collection),
                    source,
                })?;
            last_page = saved.last_page;
            last_seen_id = saved.last_seen_id;
            report.checkpoint = Some(saved);

            if fresh_count > 0 {
                self.emit(
                    progress,
                    SyncStatus::Updating,
                    format!(
                        "{} records upserted, page: {}, records in page: {}, new records: {}",
                        self.collection.noun(),
                        page,
                        remote.entries.len(),
                        fresh_count
                    ),
                )
                .await;
            }

            if !remote.has_next() {
                return Ok(());
            }
            page += 1;
        }
    }

    /// 拉取同一页直到成功、重试耗尽或被取消
    async fn fetch_with_retry(
        &self,
        page: u64,
        progress: &mpsc::Sender<SyncProgress>,
        report: &mut WorkerReport,
    ) -> Result<RemotePage, WorkerAbort> {
        let mut attempt: u32 = 0;
        loop {
            self.set_state(WorkerState::Fetching);
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(WorkerAbort::Cancelled { page }),
                result = self.source.fetch_page(self.collection, page) => result,
            };

            let err = match result {
                Ok(remote) => return Ok(remote),
                Err(err) => err,
            };

            attempt = attempt.saturating_add(1);
            report.warnings += 1;
            self.set_state(WorkerState::Retrying);
            self.emit(
                progress,
                SyncStatus::Warning,
                format!(
                    "Failed to fetch {} signature list, page: {}: {}",
                    self.collection, page, err
                ),
            )
            .await;

            if !self.retry_policy.should_retry(attempt) {
                return Err(WorkerAbort::RetriesExhausted {
                    page,
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.retry_policy.delay_for(attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(WorkerAbort::Cancelled { page }),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.write() = state;
    }

    async fn emit(&self, progress: &mpsc::Sender<SyncProgress>, status: SyncStatus, message: String) {
        debug!("📣 [{}] {:?}: {}", self.collection, status, message);
        let _ = progress
            .send(SyncProgress::new(self.collection, status, message))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{FakeSource, FlakyStore};
    use crate::storage::SignatureStore;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SignatureStore {
        SignatureStore::open(dir.path().join("mirror.db")).await.unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1))
    }

    async fn run_worker(
        collection: Collection,
        store: Arc<dyn MirrorStore>,
        source: Arc<dyn SignatureSource>,
        policy: RetryPolicy,
    ) -> (WorkerReport, Vec<SyncProgress>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let report = SyncWorker::new(collection, store, source)
            .with_retry_policy(policy)
            .run(tx)
            .await;
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        (report, events)
    }

    #[tokio::test]
    async fn single_short_page_end_to_end() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let source = FakeSource::new().with_pages(Collection::Methods, vec![vec![1, 2, 3]]);

        let (report, events) =
            run_worker(Collection::Methods, Arc::new(store.clone()), Arc::new(source), fast_retry()).await;

        assert_eq!(report.status, SyncStatus::Successful);
        assert_eq!(store.count_records(Collection::Methods).await.unwrap(), 3);
        let cp = store.get_checkpoint(Collection::Methods).await.unwrap();
        assert_eq!((cp.last_page, cp.last_seen_id), (0, 3));

        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![SyncStatus::Updating, SyncStatus::Successful]);
        assert!(events[1].message.contains("records: 3"));
    }

    #[tokio::test]
    async fn full_page_advances_page_and_short_tail_does_not() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let source = FakeSource::new().with_sequential(Collection::Events, 250, 100);

        let (report, _) =
            run_worker(Collection::Events, Arc::new(store.clone()), Arc::new(source), fast_retry()).await;

        assert_eq!(report.pages_fetched, 3);
        let cp = store.get_checkpoint(Collection::Events).await.unwrap();
        assert_eq!(cp.last_page, 2);
        assert_eq!(cp.last_seen_id, 250);
        assert_eq!(store.count_records(Collection::Events).await.unwrap(), 250);
        // events 不影响 methods 的检查点
        assert_eq!(
            store.get_checkpoint(Collection::Methods).await.unwrap(),
            Checkpoint::default()
        );
    }

    #[tokio::test]
    async fn exactly_full_last_page_counts_as_consumed() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let source = FakeSource::new().with_sequential(Collection::Methods, 200, 100);

        run_worker(Collection::Methods, Arc::new(store.clone()), Arc::new(source), fast_retry()).await;

        let cp = store.get_checkpoint(Collection::Methods).await.unwrap();
        assert_eq!((cp.last_page, cp.last_seen_id), (2, 200));
    }

    #[tokio::test]
    async fn rerun_without_new_data_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let source = Arc::new(FakeSource::new().with_sequential(Collection::Methods, 150, 100));

        run_worker(Collection::Methods, Arc::new(store.clone()), source.clone(), fast_retry()).await;
        let first = store.get_checkpoint(Collection::Methods).await.unwrap();

        let (report, events) =
            run_worker(Collection::Methods, Arc::new(store.clone()), source.clone(), fast_retry()).await;
        let second = store.get_checkpoint(Collection::Methods).await.unwrap();

        assert_eq!((first.last_page, first.last_seen_id), (second.last_page, second.last_seen_id));
        assert_eq!(store.count_records(Collection::Methods).await.unwrap(), 150);
        assert_eq!(report.records_submitted, 0);
        // 第二次只重看尾页，且没有 Updating
        assert_eq!(source.calls(Collection::Methods), vec![1, 2, 2]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, SyncStatus::Successful);
    }

    #[tokio::test]
    async fn resumes_after_checkpointed_pages_without_refetching_them() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.set_checkpoint(Collection::Methods, 2, 200).await.unwrap();
        let source = Arc::new(FakeSource::new().with_sequential(Collection::Methods, 450, 100));

        run_worker(Collection::Methods, Arc::new(store.clone()), source.clone(), fast_retry()).await;

        assert_eq!(source.calls(Collection::Methods), vec![3, 4, 5]);
        assert_eq!(store.count_records(Collection::Methods).await.unwrap(), 250);
        let cp = store.get_checkpoint(Collection::Methods).await.unwrap();
        assert_eq!((cp.last_page, cp.last_seen_id), (4, 450));
    }

    #[tokio::test]
    async fn only_records_above_last_seen_id_are_written() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.set_checkpoint(Collection::Events, 0, 5).await.unwrap();
        let source = FakeSource::new().with_pages(Collection::Events, vec![vec![3, 4, 5, 6, 7]]);

        let (report, _) =
            run_worker(Collection::Events, Arc::new(store.clone()), Arc::new(source), fast_retry()).await;

        assert_eq!(report.records_submitted, 2);
        assert_eq!(store.count_records(Collection::Events).await.unwrap(), 2);
        assert!(store
            .lookup_by_key(Collection::Events, &FakeSource::key_for(Collection::Events, 4))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.get_checkpoint(Collection::Events).await.unwrap().last_seen_id, 7);
    }

    #[tokio::test]
    async fn last_seen_id_never_moves_backwards() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.set_checkpoint(Collection::Methods, 0, 50).await.unwrap();
        let source = FakeSource::new().with_pages(Collection::Methods, vec![vec![10, 11]]);

        run_worker(Collection::Methods, Arc::new(store.clone()), Arc::new(source), fast_retry()).await;

        let cp = store.get_checkpoint(Collection::Methods).await.unwrap();
        assert_eq!((cp.last_page, cp.last_seen_id), (0, 50));
        assert_eq!(store.count_records(Collection::Methods).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transient_fetch_failures_emit_warnings_then_recover() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let source = FakeSource::new()
            .with_pages(Collection::Methods, vec![vec![1, 2, 3]])
            .fail(Collection::Methods, 1, 2);

        let (report, events) =
            run_worker(Collection::Methods, Arc::new(store.clone()), Arc::new(source), fast_retry()).await;

        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                SyncStatus::Warning,
                SyncStatus::Warning,
                SyncStatus::Updating,
                SyncStatus::Successful
            ]
        );
        assert_eq!(report.warnings, 2);
        assert_eq!(store.count_records(Collection::Methods).await.unwrap(), 3);
        let cp = store.get_checkpoint(Collection::Methods).await.unwrap();
        assert_eq!((cp.last_page, cp.last_seen_id), (0, 3));
    }

    #[tokio::test]
    async fn capped_retries_turn_into_failure() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let source = FakeSource::new()
            .with_pages(Collection::Events, vec![vec![1]])
            .fail(Collection::Events, 1, 10);

        let (report, events) = run_worker(
            Collection::Events,
            Arc::new(store.clone()),
            Arc::new(source),
            fast_retry().with_max_retries(2),
        )
        .await;

        assert_eq!(report.status, SyncStatus::Failed);
        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                SyncStatus::Warning,
                SyncStatus::Warning,
                SyncStatus::Warning,
                SyncStatus::Failed
            ]
        );
        assert_eq!(
            store.get_checkpoint(Collection::Events).await.unwrap(),
            Checkpoint::default()
        );
    }

    #[tokio::test]
    async fn request_timeout_is_reported_as_warning() {
        use crate::config::{HttpClientConfig, RemoteConfig};
        use crate::remote::HttpSignatureSource;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let http = HttpClientConfig {
            connect_timeout_secs: Some(1),
            request_timeout_secs: Some(1),
            ..HttpClientConfig::default()
        };
        let remote = RemoteConfig {
            base_url: format!("http://{}", addr),
            ..RemoteConfig::default()
        };
        let source = HttpSignatureSource::new(&http, remote).unwrap();

        let (report, events) = run_worker(
            Collection::Events,
            Arc::new(store.clone()),
            Arc::new(source),
            fast_retry().with_max_retries(0),
        )
        .await;

        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![SyncStatus::Warning, SyncStatus::Failed]);
        assert!(events[0].message.contains("page: 1"));
        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(
            store.get_checkpoint(Collection::Events).await.unwrap(),
            Checkpoint::default()
        );
    }

    #[tokio::test]
    async fn store_failure_is_fatal_and_keeps_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.set_checkpoint(Collection::Methods, 1, 100).await.unwrap();
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        flaky.fail_upserts(true);
        let source = Arc::new(FakeSource::new().with_sequential(Collection::Methods, 300, 100));

        let (report, events) =
            run_worker(Collection::Methods, flaky.clone(), source.clone(), fast_retry()).await;

        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(events.last().unwrap().status, SyncStatus::Failed);
        assert!(events.last().unwrap().message.contains("upsert method records"));
        // 失败后不再尝试后续页
        assert_eq!(source.calls(Collection::Methods), vec![2]);
        let cp = store.get_checkpoint(Collection::Methods).await.unwrap();
        assert_eq!((cp.last_page, cp.last_seen_id), (1, 100));

        // 存储恢复后从同一页继续
        flaky.fail_upserts(false);
        let (report, _) = run_worker(Collection::Methods, flaky, source.clone(), fast_retry()).await;
        assert_eq!(report.status, SyncStatus::Successful);
        assert_eq!(source.calls(Collection::Methods), vec![2, 2, 3]);
        assert_eq!(store.count_records(Collection::Methods).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn checkpoint_failure_is_fatal_but_records_are_kept() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        flaky.fail_checkpoints(true);
        let source = FakeSource::new().with_pages(Collection::Events, vec![vec![1, 2]]);

        let (report, events) =
            run_worker(Collection::Events, flaky, Arc::new(source), fast_retry()).await;

        assert_eq!(report.status, SyncStatus::Failed);
        assert!(events.last().unwrap().message.contains("checkpoint"));
        assert_eq!(store.count_records(Collection::Events).await.unwrap(), 2);
        assert_eq!(
            store.get_checkpoint(Collection::Events).await.unwrap(),
            Checkpoint::default()
        );
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_worker() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let source = FakeSource::new()
            .with_pages(Collection::Methods, vec![vec![1]])
            .fail(Collection::Methods, 1, u32::MAX);
        let token = CancellationToken::new();
        let state = new_state_cell();

        let (tx, mut rx) = mpsc::channel(1024);
        let worker = SyncWorker::new(Collection::Methods, Arc::new(store.clone()), Arc::new(source))
            .with_retry_policy(RetryPolicy::fixed(Duration::from_secs(3600)))
            .with_cancellation(token.clone())
            .with_state_cell(state.clone());
        let handle = tokio::spawn(worker.run(tx));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, SyncStatus::Warning);
        token.cancel();

        let report = handle.await.unwrap();
        assert_eq!(report.status, SyncStatus::Failed);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.status, SyncStatus::Failed);
        assert!(last.message.contains("cancelled"));
        assert!(rx.recv().await.is_none());
        assert_eq!(*state.read(), WorkerState::Done(SyncStatus::Failed));
    }
}
