//! 存储模块 - 检查点与签名记录
//!
//! - `MirrorStore`：同步引擎依赖的最小存储能力（检查点读写 + 批量写入 + 计数）
//! - `SignatureStore`：基于 SQLite（DB Actor 单线程访问）的实现，额外提供查询接口

pub mod dao;
pub mod db_actor;
pub mod entities;
pub mod migrate;

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::collection::Collection;
use crate::error::Result;
use db_actor::DbActorHandle;
pub use entities::{Checkpoint, SignatureRecord};

/// 同步引擎所需的存储能力
///
/// 实现必须保证：不同集合的并发调用互不干扰；`upsert_records` 整批原子。
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// 读取检查点，从未同步过返回零值
    async fn get_checkpoint(&self, collection: Collection) -> Result<Checkpoint>;

    /// 原子覆盖检查点，同时写入当前时间
    async fn set_checkpoint(
        &self,
        collection: Collection,
        page: u64,
        last_seen_id: u64,
    ) -> Result<Checkpoint>;

    /// 批量插入，已存在的 (key, value) 静默跳过，返回新增条数
    async fn upsert_records(
        &self,
        collection: Collection,
        records: Vec<SignatureRecord>,
    ) -> Result<usize>;

    async fn count_records(&self, collection: Collection) -> Result<u64>;
}

/// SQLite 签名库
#[derive(Debug, Clone)]
pub struct SignatureStore {
    db: DbActorHandle,
}

impl SignatureStore {
    /// 打开（或创建）数据库，执行迁移
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = DbActorHandle::spawn()?;
        if let Err(e) = db.open(path.clone()).await {
            db.shutdown();
            return Err(e);
        }
        info!("✅ 签名库已打开: {}", path.display());
        Ok(Self { db })
    }

    /// 按 key 查所有 value（插入顺序，可能为空）
    pub async fn lookup_by_key(&self, collection: Collection, key: &str) -> Result<Vec<String>> {
        self.db.values_by_key(collection, key.to_string()).await
    }

    /// 按 value 反查第一个 key；无匹配返回 None
    pub async fn lookup_by_value(&self, collection: Collection, value: &str) -> Result<Option<String>> {
        self.db.first_key_by_value(collection, value.to_string()).await
    }

    /// 按 value 反查全部 key（远端并不保证这个方向唯一）
    pub async fn keys_by_value(&self, collection: Collection, value: &str) -> Result<Vec<String>> {
        self.db.keys_by_value(collection, value.to_string()).await
    }

    /// 两个集合的检查点 (methods, events)
    pub async fn checkpoints(&self) -> Result<(Checkpoint, Checkpoint)> {
        let methods = self.db.get_checkpoint(Collection::Methods).await?;
        let events = self.db.get_checkpoint(Collection::Events).await?;
        Ok((methods, events))
    }

    pub async fn journal_mode(&self) -> Result<String> {
        self.db.journal_mode().await
    }

    /// 关闭 DB Actor；之后的调用均返回 ActorStopped
    pub fn close(&self) {
        self.db.shutdown();
    }
}

#[async_trait]
impl MirrorStore for SignatureStore {
    async fn get_checkpoint(&self, collection: Collection) -> Result<Checkpoint> {
        self.db.get_checkpoint(collection).await
    }

    async fn set_checkpoint(
        &self,
        collection: Collection,
        page: u64,
        last_seen_id: u64,
    ) -> Result<Checkpoint> {
        self.db.set_checkpoint(collection, page, last_seen_id).await
    }

    async fn upsert_records(
        &self,
        collection: Collection,
        records: Vec<SignatureRecord>,
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.db.upsert_records(collection, records).await
    }

    async fn count_records(&self, collection: Collection) -> Result<u64> {
        self.db.count_records(collection).await
    }
}
