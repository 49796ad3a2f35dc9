//! SigMirror - 4-byte 函数选择器 / 事件签名的本地增量镜像
//!
//! 本 crate 提供：
//! - 🗄️ SQLite 本地库：methods (selector → method) 与 events (topic0 → event) 两个集合
//! - 🔄 增量同步：按集合断点续传，满页推进页号，尾页下次重看
//! - 📡 分页 HTTP 拉取：失败重试不推进，写库失败立即停止
//! - 🔍 双向查询：selector → 签名，签名 → selector
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use sigmirror::{MirrorConfig, SignatureMirror, TracingProgressSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MirrorConfig::builder()
//!         .db_path("/path/to/sigmirror.db")
//!         .build();
//!
//!     let mirror = SignatureMirror::open(config).await?;
//!
//!     // 阻塞直到两个集合都追平（或失败）
//!     let report = mirror.sync(&TracingProgressSink).await;
//!     println!("successful: {}", report.is_successful());
//!
//!     for method in mirror.methods_by_selector("0x0178fe3f").await? {
//!         println!("{}", method);
//!     }
//!
//!     mirror.shutdown();
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod config;
pub mod error;
pub mod mirror;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod version;

pub use collection::Collection;
pub use config::{ConfigError, HttpClientConfig, MirrorConfig, MirrorConfigBuilder, RemoteConfig};
pub use error::{ErrorKind, Result, SigMirrorError};
pub use mirror::{CollectionStatus, MirrorStatus, SignatureMirror};
pub use remote::{HttpSignatureSource, RemoteEntry, RemotePage, SignatureSource};
pub use storage::{Checkpoint, MirrorStore, SignatureRecord, SignatureStore};
pub use sync::{
    CampaignReport, CollectionOutcome, ProgressSink, ProgressStream, RetryPolicy, SyncCoordinator,
    SyncProgress, SyncSettings, SyncStatus, SyncStreams, SyncWorker, TracingProgressSink,
    WorkerReport, WorkerState,
};
pub use version::{BUILD_TIME, DB_VERSION, SDK_VERSION};
