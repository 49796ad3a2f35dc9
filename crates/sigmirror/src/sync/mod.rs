//! 增量同步引擎
//!
//! 职责：
//! - 每个集合一个 `SyncWorker`：从检查点续传、过滤已见记录、写库、推进检查点
//! - `SyncCoordinator`：并发运行两个 Worker，同一时间只允许一个同步 campaign
//! - 进度通过两条独立的 `ProgressStream` 上报，或由阻塞模式转发给 `ProgressSink`
//!
//! 写库永远先于检查点：崩溃后最多重新拉取一页，由幂等写入吸收。

pub mod coordinator;
pub mod progress;
pub mod retry;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub use coordinator::{
    CampaignReport, CollectionOutcome, SyncCoordinator, SyncSettings, SyncStreams,
};
pub use progress::{ProgressSink, ProgressStream, SyncProgress, SyncStatus, TracingProgressSink};
pub use retry::RetryPolicy;
pub use worker::{SyncWorker, WorkerReport};

/// Worker 状态机
///
/// `Idle → Fetching ⇄ Retrying → Filtering → Persisting → CheckpointUpdate → (loop | Done)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Idle,
    Fetching,
    Retrying,
    Filtering,
    Persisting,
    CheckpointUpdate,
    /// 终态：Successful 或 Failed
    Done(SyncStatus),
}

impl WorkerState {
    pub fn is_done(self) -> bool {
        matches!(self, WorkerState::Done(_))
    }
}

/// 单个 Worker 的状态单元（只由该 Worker 写入）
pub type WorkerStateCell = Arc<RwLock<WorkerState>>;

pub(crate) fn new_state_cell() -> WorkerStateCell {
    Arc::new(RwLock::new(WorkerState::Idle))
}
