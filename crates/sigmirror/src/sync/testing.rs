//! 同步引擎测试用的数据源与存储替身

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::collection::Collection;
use crate::error::{Result, SigMirrorError};
use crate::remote::{RemoteEntry, RemotePage, SignatureSource};
use crate::storage::{Checkpoint, MirrorStore, SignatureRecord, SignatureStore};

/// 脚本化的分页数据源
#[derive(Default)]
pub(crate) struct FakeSource {
    pages: Mutex<HashMap<Collection, Vec<Vec<u64>>>>,
    failures: Mutex<HashMap<(Collection, u64), u32>>,
    calls: Mutex<Vec<(Collection, u64)>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn key_for(collection: Collection, id: u64) -> String {
        match collection {
            Collection::Methods => format!("0x{:08x}", id),
            Collection::Events => format!("0x{:064x}", id),
        }
    }

    pub(crate) fn value_for(collection: Collection, id: u64) -> String {
        match collection {
            Collection::Methods => format!("method_{}(uint256)", id),
            Collection::Events => format!("Event{}(address)", id),
        }
    }

    /// 每个内层 Vec 是一页的远端 id
    pub(crate) fn with_pages(self, collection: Collection, pages: Vec<Vec<u64>>) -> Self {
        self.pages.lock().insert(collection, pages);
        self
    }

    /// id 1..=total，按 page_size 切页
    pub(crate) fn with_sequential(self, collection: Collection, total: u64, page_size: usize) -> Self {
        let ids: Vec<u64> = (1..=total).collect();
        let pages = ids.chunks(page_size).map(|c| c.to_vec()).collect();
        self.with_pages(collection, pages)
    }

    /// 第 `page` 页的前 `times` 次拉取失败
    pub(crate) fn fail(self, collection: Collection, page: u64, times: u32) -> Self {
        self.failures.lock().insert((collection, page), times);
        self
    }

    /// 每次拉取前先拿一个许可；许可发放前所有拉取都会挂起
    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn calls(&self, collection: Collection) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter(|(c, _)| *c == collection)
            .map(|(_, p)| *p)
            .collect()
    }
}

#[async_trait]
impl SignatureSource for FakeSource {
    async fn fetch_page(&self, collection: Collection, page: u64) -> Result<RemotePage> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| SigMirrorError::Other("gate closed".into()))?;
            permit.forget();
        }
        self.calls.lock().push((collection, page));

        if let Some(remaining) = self.failures.lock().get_mut(&(collection, page)) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SigMirrorError::Transport(format!(
                    "scripted failure for {} page {}",
                    collection, page
                )));
            }
        }

        let pages = self.pages.lock();
        let all = pages.get(&collection).cloned().unwrap_or_default();
        let index = page.saturating_sub(1) as usize;
        let Some(ids) = all.get(index) else {
            return Ok(RemotePage::default());
        };

        Ok(RemotePage {
            entries: ids
                .iter()
                .map(|&id| RemoteEntry {
                    remote_id: id,
                    key: Self::key_for(collection, id),
                    value: Self::value_for(collection, id),
                })
                .collect(),
            next: (index + 1 < all.len()).then(|| format!("page={}", page + 1)),
        })
    }
}

/// 可按开关注入写失败的存储
pub(crate) struct FlakyStore {
    inner: SignatureStore,
    fail_upserts: AtomicBool,
    fail_checkpoints: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new(inner: SignatureStore) -> Self {
        Self {
            inner,
            fail_upserts: AtomicBool::new(false),
            fail_checkpoints: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_upserts(&self, on: bool) {
        self.fail_upserts.store(on, Ordering::SeqCst);
    }

    pub(crate) fn fail_checkpoints(&self, on: bool) {
        self.fail_checkpoints.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl MirrorStore for FlakyStore {
    async fn get_checkpoint(&self, collection: Collection) -> Result<Checkpoint> {
        self.inner.get_checkpoint(collection).await
    }

    async fn set_checkpoint(
        &self,
        collection: Collection,
        page: u64,
        last_seen_id: u64,
    ) -> Result<Checkpoint> {
        if self.fail_checkpoints.load(Ordering::SeqCst) {
            return Err(SigMirrorError::Database("disk I/O error".into()));
        }
        self.inner.set_checkpoint(collection, page, last_seen_id).await
    }

    async fn upsert_records(
        &self,
        collection: Collection,
        records: Vec<SignatureRecord>,
    ) -> Result<usize> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(SigMirrorError::Database("database is locked".into()));
        }
        self.inner.upsert_records(collection, records).await
    }

    async fn count_records(&self, collection: Collection) -> Result<u64> {
        self.inner.count_records(collection).await
    }
}
