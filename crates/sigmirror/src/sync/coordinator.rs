//! 同步协调器
//!
//! 一次 campaign = methods / events 两个 Worker 并发运行。campaign 锁保证同一
//! 协调器上不会同时有两次 campaign；锁由监督任务持有，直到两个 Worker 都结束。

use std::sync::Arc;

use futures::stream::{self, Stream};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::progress::{ProgressSink, ProgressStream, SyncProgress, SyncStatus};
use super::retry::RetryPolicy;
use super::worker::SyncWorker;
use super::{new_state_cell, WorkerState, WorkerStateCell};
use crate::collection::Collection;
use crate::config::{MirrorConfig, DEFAULT_PAGE_SIZE};
use crate::remote::SignatureSource;
use crate::storage::MirrorStore;

/// Worker 运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub retry_policy: RetryPolicy,
    pub page_size: usize,
    /// 每条进度流的通道容量
    pub progress_buffer: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            progress_buffer: 256,
        }
    }
}

impl From<&MirrorConfig> for SyncSettings {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            retry_policy: config.retry_policy.clone(),
            page_size: config.page_size,
            progress_buffer: config.progress_buffer,
        }
    }
}

/// 一次 campaign 的两条进度流
#[derive(Debug)]
pub struct SyncStreams {
    pub methods: ProgressStream,
    pub events: ProgressStream,
}

impl SyncStreams {
    /// 合并为一条流（两边交替取，事件自带 collection）
    pub fn merged(self) -> impl Stream<Item = SyncProgress> + Send + Unpin {
        stream::select(self.methods, self.events)
    }
}

/// 单个集合在阻塞模式下的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionOutcome {
    /// 终态事件；流在终态前被截断时为 None
    pub terminal: Option<SyncProgress>,
    pub updates: usize,
    pub warnings: usize,
}

impl CollectionOutcome {
    pub fn status(&self) -> Option<SyncStatus> {
        self.terminal.as_ref().map(|p| p.status)
    }

    pub fn is_successful(&self) -> bool {
        self.status() == Some(SyncStatus::Successful)
    }
}

/// 阻塞模式 campaign 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignReport {
    pub methods: CollectionOutcome,
    pub events: CollectionOutcome,
}

impl CampaignReport {
    pub fn is_successful(&self) -> bool {
        self.methods.is_successful() && self.events.is_successful()
    }

    pub fn outcome(&self, collection: Collection) -> &CollectionOutcome {
        match collection {
            Collection::Methods => &self.methods,
            Collection::Events => &self.events,
        }
    }
}

#[derive(Clone)]
pub struct SyncCoordinator {
    store: Arc<dyn MirrorStore>,
    source: Arc<dyn SignatureSource>,
    settings: SyncSettings,
    campaign_lock: Arc<Mutex<()>>,
    methods_state: WorkerStateCell,
    events_state: WorkerStateCell,
    shutdown: CancellationToken,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        source: Arc<dyn SignatureSource>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            campaign_lock: Arc::new(Mutex::new(())),
            methods_state: new_state_cell(),
            events_state: new_state_cell(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// 是否有 campaign 正在运行
    pub fn is_syncing(&self) -> bool {
        self.campaign_lock.try_lock().is_err()
    }

    /// 最近一次（或当前）campaign 中该集合 Worker 的状态
    pub fn worker_state(&self, collection: Collection) -> WorkerState {
        *self.state_cell(collection).read()
    }

    /// 启动 campaign 并立即返回两条进度流；若已有 campaign 在跑则等待其结束
    pub async fn sync_stream(&self) -> SyncStreams {
        let guard = self.campaign_lock.clone().lock_owned().await;
        self.start_campaign(guard)
    }

    /// 已有 campaign 在跑时返回 None，不等待
    pub fn try_sync_stream(&self) -> Option<SyncStreams> {
        let guard = self.campaign_lock.clone().try_lock_owned().ok()?;
        Some(self.start_campaign(guard))
    }

    /// 阻塞模式：运行 campaign，把进度按级别转发给 `sink`，两条流都结束后返回
    pub async fn sync(&self, sink: &dyn ProgressSink) -> CampaignReport {
        let SyncStreams {
            mut methods,
            mut events,
        } = self.sync_stream().await;

        let (methods, events) = tokio::join!(drain(&mut methods, sink), drain(&mut events, sink));
        CampaignReport { methods, events }
    }

    /// 取消当前及以后的所有 campaign；Worker 以 Failed 结束
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("🛑 同步协调器关闭");
            self.shutdown.cancel();
        }
    }

    fn state_cell(&self, collection: Collection) -> &WorkerStateCell {
        match collection {
            Collection::Methods => &self.methods_state,
            Collection::Events => &self.events_state,
        }
    }

    fn start_campaign(&self, guard: OwnedMutexGuard<()>) -> SyncStreams {
        info!("🔄 开始同步 campaign");
        let token = self.shutdown.child_token();
        let buffer = self.settings.progress_buffer.max(1);

        let (methods_tx, methods_rx) = mpsc::channel(buffer);
        let (events_tx, events_rx) = mpsc::channel(buffer);

        let methods = tokio::spawn(self.worker(Collection::Methods, token.clone()).run(methods_tx));
        let events = tokio::spawn(self.worker(Collection::Events, token).run(events_tx));

        tokio::spawn(async move {
            let (methods, events) = tokio::join!(methods, events);
            for result in [methods, events] {
                match result {
                    Ok(report) if report.status == SyncStatus::Successful => {
                        info!(
                            "✅ {} 追平: 新增 {} 条, 拉取 {} 页",
                            report.collection, report.records_inserted, report.pages_fetched
                        );
                    }
                    Ok(report) => {
                        warn!("⚠️ {} 同步失败 (warnings={})", report.collection, report.warnings);
                    }
                    Err(e) => error!("❌ 同步 Worker 异常退出: {}", e),
                }
            }
            drop(guard);
            info!("🏁 同步 campaign 结束");
        });

        SyncStreams {
            methods: ProgressStream::new(Collection::Methods, methods_rx),
            events: ProgressStream::new(Collection::Events, events_rx),
        }
    }

    fn worker(&self, collection: Collection, token: CancellationToken) -> SyncWorker {
        let state = self.state_cell(collection).clone();
        *state.write() = WorkerState::Idle;
        SyncWorker::new(collection, self.store.clone(), self.source.clone())
            .with_retry_policy(self.settings.retry_policy.clone())
            .with_page_size(self.settings.page_size)
            .with_cancellation(token)
            .with_state_cell(state)
    }
}

async fn drain(stream: &mut ProgressStream, sink: &dyn ProgressSink) -> CollectionOutcome {
    let mut outcome = CollectionOutcome::default();
    while let Some(progress) = stream.recv().await {
        sink.emit(&progress);
        match progress.status {
            SyncStatus::Updating => outcome.updates += 1,
            SyncStatus::Warning => outcome.warnings += 1,
            SyncStatus::Successful | SyncStatus::Failed => outcome.terminal = Some(progress),
        }
    }
    outcome
}
