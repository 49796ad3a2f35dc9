//! 同步进度事件与输出
//!
//! 每个集合一条有限、一次性的进度流；终态事件（Successful / Failed）送达后流关闭。

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::collection::Collection;

/// 进度级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// 写入了一页新记录
    Updating,
    /// 集合已追平（终态）
    Successful,
    /// 拉取失败，稍后重试
    Warning,
    /// 致命错误，Worker 已停止（终态）
    Failed,
}

impl SyncStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStatus::Successful | SyncStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub collection: Collection,
    pub status: SyncStatus,
    pub message: String,
}

impl SyncProgress {
    pub fn new<S: Into<String>>(collection: Collection, status: SyncStatus, message: S) -> Self {
        Self {
            collection,
            status,
            message: message.into(),
        }
    }
}

/// 调用方提供的进度输出（四个级别各一个入口）
pub trait ProgressSink: Send + Sync {
    fn info(&self, collection: Collection, message: &str);
    fn success(&self, collection: Collection, message: &str);
    fn warning(&self, collection: Collection, message: &str);
    fn error(&self, collection: Collection, message: &str);

    /// 按级别分发
    fn emit(&self, progress: &SyncProgress) {
        match progress.status {
            SyncStatus::Updating => self.info(progress.collection, &progress.message),
            SyncStatus::Successful => self.success(progress.collection, &progress.message),
            SyncStatus::Warning => self.warning(progress.collection, &progress.message),
            SyncStatus::Failed => self.error(progress.collection, &progress.message),
        }
    }
}

/// 把进度写进 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn info(&self, collection: Collection, message: &str) {
        info!(collection = %collection, "{}", message);
    }

    fn success(&self, collection: Collection, message: &str) {
        info!(collection = %collection, "✅ {}", message);
    }

    fn warning(&self, collection: Collection, message: &str) {
        warn!(collection = %collection, "⚠️ {}", message);
    }

    fn error(&self, collection: Collection, message: &str) {
        error!(collection = %collection, "❌ {}", message);
    }
}

/// 单个集合的进度流
#[derive(Debug)]
pub struct ProgressStream {
    collection: Collection,
    receiver: mpsc::Receiver<SyncProgress>,
}

impl ProgressStream {
    pub(crate) fn new(collection: Collection, receiver: mpsc::Receiver<SyncProgress>) -> Self {
        Self {
            collection,
            receiver,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// 下一条进度；Worker 结束且事件取尽后返回 None
    pub async fn recv(&mut self) -> Option<SyncProgress> {
        self.receiver.recv().await
    }
}

impl Stream for ProgressStream {
    type Item = SyncProgress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
