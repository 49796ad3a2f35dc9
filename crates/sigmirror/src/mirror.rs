//! 对外门面：打开本地库、查询、触发同步

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::collection::Collection;
use crate::config::MirrorConfig;
use crate::error::Result;
use crate::remote::{HttpSignatureSource, SignatureSource};
use crate::storage::{Checkpoint, MirrorStore, SignatureStore};
use crate::sync::{
    CampaignReport, ProgressSink, SyncCoordinator, SyncSettings, SyncStreams, WorkerState,
};
use crate::version;

/// 单个集合的本地状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStatus {
    pub collection: Collection,
    pub checkpoint: Checkpoint,
    pub records: u64,
    pub worker: WorkerState,
}

/// `SignatureMirror::status` 的快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorStatus {
    pub db_path: PathBuf,
    pub db_version: i64,
    pub sdk_version: String,
    pub syncing: bool,
    pub methods: CollectionStatus,
    pub events: CollectionStatus,
}

/// 签名镜像
///
/// ```no_run
/// # async fn demo() -> sigmirror::Result<()> {
/// use sigmirror::{MirrorConfig, SignatureMirror, TracingProgressSink};
///
/// let mirror = SignatureMirror::open(MirrorConfig::default()).await?;
/// mirror.sync(&TracingProgressSink).await;
/// let methods = mirror.methods_by_selector("0x0178fe3f").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SignatureMirror {
    config: MirrorConfig,
    store: SignatureStore,
    coordinator: SyncCoordinator,
}

impl SignatureMirror {
    /// 校验配置、打开数据库并创建 HTTP 数据源
    pub async fn open(config: MirrorConfig) -> Result<Self> {
        config.validate()?;
        let source = HttpSignatureSource::new(&config.http_client_config, config.remote.clone())?;
        Self::with_source(config, Arc::new(source)).await
    }

    /// 使用自定义数据源（镜像站、测试替身等）
    pub async fn with_source(config: MirrorConfig, source: Arc<dyn SignatureSource>) -> Result<Self> {
        config.validate()?;
        let store = SignatureStore::open(&config.db_path).await?;
        let coordinator = SyncCoordinator::new(
            Arc::new(store.clone()),
            source,
            SyncSettings::from(&config),
        );
        info!("✅ SignatureMirror 已就绪: {}", config.db_path.display());
        Ok(Self {
            config,
            store,
            coordinator,
        })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn store(&self) -> &SignatureStore {
        &self.store
    }

    pub async fn status(&self) -> Result<MirrorStatus> {
        Ok(MirrorStatus {
            db_path: self.config.db_path.clone(),
            db_version: version::DB_VERSION,
            sdk_version: version::SDK_VERSION.to_string(),
            syncing: self.coordinator.is_syncing(),
            methods: self.collection_status(Collection::Methods).await?,
            events: self.collection_status(Collection::Events).await?,
        })
    }

    async fn collection_status(&self, collection: Collection) -> Result<CollectionStatus> {
        Ok(CollectionStatus {
            collection,
            checkpoint: self.store.get_checkpoint(collection).await?,
            records: self.store.count_records(collection).await?,
            worker: self.coordinator.worker_state(collection),
        })
    }

    /// selector（如 `0x0178fe3f`）对应的全部方法签名
    pub async fn methods_by_selector(&self, selector: &str) -> Result<Vec<String>> {
        self.store.lookup_by_key(Collection::Methods, selector).await
    }

    pub async fn selector_by_method(&self, method: &str) -> Result<Option<String>> {
        self.store.lookup_by_value(Collection::Methods, method).await
    }

    /// 事件 topic0 对应的全部事件签名
    pub async fn events_by_signature(&self, signature: &str) -> Result<Vec<String>> {
        self.store.lookup_by_key(Collection::Events, signature).await
    }

    pub async fn signature_by_event(&self, event: &str) -> Result<Option<String>> {
        self.store.lookup_by_value(Collection::Events, event).await
    }

    pub async fn journal_mode(&self) -> Result<String> {
        self.store.journal_mode().await
    }

    pub fn is_syncing(&self) -> bool {
        self.coordinator.is_syncing()
    }

    /// 阻塞模式同步，见 [`SyncCoordinator::sync`]
    pub async fn sync(&self, sink: &dyn ProgressSink) -> CampaignReport {
        self.coordinator.sync(sink).await
    }

    /// 流模式同步，见 [`SyncCoordinator::sync_stream`]
    pub async fn sync_stream(&self) -> SyncStreams {
        self.coordinator.sync_stream().await
    }

    /// 取消同步并关闭数据库
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        self.store.close();
        info!("🛑 SignatureMirror 已关闭");
    }
}
