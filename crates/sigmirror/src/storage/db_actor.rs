//! 数据库 Actor - 单线程数据库访问模型
//!
//! 核心设计：
//! - SQLite Connection 永远只在一个专用线程中
//! - 所有数据库操作通过 channel 发送命令，结果经 oneshot 返回
//! - 两个同步 Worker 的并发读写在这里自然串行化

use crossbeam_channel::{unbounded, Receiver, Sender};
use rusqlite::Connection;
use std::path::PathBuf;
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::collection::Collection;
use crate::error::{Result, SigMirrorError};
use crate::storage::dao::DaoFactory;
use crate::storage::entities::{Checkpoint, SignatureRecord};

/// 数据库命令
pub enum DbCommand {
    /// 打开（或创建）数据库并执行迁移
    Open {
        db_path: PathBuf,
        respond_to: oneshot::Sender<Result<()>>,
    },

    GetCheckpoint {
        collection: Collection,
        respond_to: oneshot::Sender<Result<Checkpoint>>,
    },

    SetCheckpoint {
        collection: Collection,
        page: u64,
        last_seen_id: u64,
        respond_to: oneshot::Sender<Result<Checkpoint>>,
    },

    CountRecords {
        collection: Collection,
        respond_to: oneshot::Sender<Result<u64>>,
    },

    /// 批量写入签名（单事务）
    UpsertRecords {
        collection: Collection,
        records: Vec<SignatureRecord>,
        respond_to: oneshot::Sender<Result<usize>>,
    },

    ValuesByKey {
        collection: Collection,
        key: String,
        respond_to: oneshot::Sender<Result<Vec<String>>>,
    },

    KeysByValue {
        collection: Collection,
        value: String,
        respond_to: oneshot::Sender<Result<Vec<String>>>,
    },

    FirstKeyByValue {
        collection: Collection,
        value: String,
        respond_to: oneshot::Sender<Result<Option<String>>>,
    },

    /// 查询当前 journal_mode
    JournalMode {
        respond_to: oneshot::Sender<Result<String>>,
    },

    /// 停止 Actor
    Shutdown,
}

/// 数据库 Actor（运行在独立线程）
struct DbActor {
    conn: Option<Connection>,
    receiver: Receiver<DbCommand>,
    thread_id: thread::ThreadId,
}

impl DbActor {
    fn new(receiver: Receiver<DbCommand>) -> Self {
        let thread_id = thread::current().id();
        info!("🚀 [Thread {:?}] DbActor 已启动", thread_id);
        Self {
            conn: None,
            receiver,
            thread_id,
        }
    }

    /// 运行 Actor 主循环；所有句柄被丢弃或收到 Shutdown 时退出
    fn run(mut self) {
        while let Ok(command) = self.receiver.recv() {
            match command {
                DbCommand::Shutdown => {
                    info!("🛑 [Thread {:?}] DbActor 收到停止信号", self.thread_id);
                    break;
                }

                DbCommand::Open {
                    db_path,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.handle_open(db_path));
                }

                DbCommand::GetCheckpoint {
                    collection,
                    respond_to,
                } => {
                    let result = self
                        .conn()
                        .and_then(|conn| DaoFactory::checkpoint_dao(conn).get(collection));
                    let _ = respond_to.send(result);
                }

                DbCommand::SetCheckpoint {
                    collection,
                    page,
                    last_seen_id,
                    respond_to,
                } => {
                    debug!(
                        "📥 [DbActor] SetCheckpoint(collection={}, page={}, last_seen_id={})",
                        collection, page, last_seen_id
                    );
                    let result = self.conn().and_then(|conn| {
                        DaoFactory::checkpoint_dao(conn).set(collection, page, last_seen_id)
                    });
                    let _ = respond_to.send(result);
                }

                DbCommand::CountRecords {
                    collection,
                    respond_to,
                } => {
                    let result = self
                        .conn()
                        .and_then(|conn| DaoFactory::signature_dao(conn).count(collection));
                    let _ = respond_to.send(result);
                }

                DbCommand::UpsertRecords {
                    collection,
                    records,
                    respond_to,
                } => {
                    debug!(
                        "📥 [DbActor] UpsertRecords(collection={}, records={})",
                        collection,
                        records.len()
                    );
                    let result = self.conn().and_then(|conn| {
                        DaoFactory::signature_dao(conn).upsert_many(collection, &records)
                    });
                    if let Err(e) = &result {
                        error!("❌ [DbActor] 写入 {} 失败: {}", collection, e);
                    }
                    let _ = respond_to.send(result);
                }

                DbCommand::ValuesByKey {
                    collection,
                    key,
                    respond_to,
                } => {
                    let result = self.conn().and_then(|conn| {
                        DaoFactory::signature_dao(conn).values_by_key(collection, &key)
                    });
                    let _ = respond_to.send(result);
                }

                DbCommand::KeysByValue {
                    collection,
                    value,
                    respond_to,
                } => {
                    let result = self.conn().and_then(|conn| {
                        DaoFactory::signature_dao(conn).keys_by_value(collection, &value)
                    });
                    let _ = respond_to.send(result);
                }

                DbCommand::FirstKeyByValue {
                    collection,
                    value,
                    respond_to,
                } => {
                    let result = self.conn().and_then(|conn| {
                        DaoFactory::signature_dao(conn).first_key_by_value(collection, &value)
                    });
                    let _ = respond_to.send(result);
                }

                DbCommand::JournalMode { respond_to } => {
                    let result = self.conn().and_then(|conn| {
                        conn.query_row("PRAGMA journal_mode;", [], |row| row.get::<_, String>(0))
                            .map_err(SigMirrorError::from)
                    });
                    let _ = respond_to.send(result);
                }
            }
        }

        info!("✅ [Thread {:?}] DbActor 已停止", self.thread_id);
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| SigMirrorError::Database("数据库尚未打开".to_string()))
    }

    fn handle_open(&mut self, db_path: PathBuf) -> Result<()> {
        if self.conn.is_some() {
            info!("⚠️  [DbActor Thread {:?}] 数据库已打开，跳过", self.thread_id);
            return Ok(());
        }

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SigMirrorError::IO(format!("创建数据库目录失败: {}", e)))?;
        }

        let mut conn = Connection::open(&db_path).map_err(|e| {
            error!(
                "❌ [DbActor Thread {:?}] 打开数据库失败: path={}, error={}",
                self.thread_id,
                db_path.display(),
                e
            );
            SigMirrorError::Database(format!("打开数据库失败: {}", e))
        })?;

        let schema = crate::storage::migrate::init_db(&mut conn)?;

        info!(
            "✅ [DbActor Thread {:?}] 数据库初始化完成: {} (schema V{})",
            self.thread_id,
            db_path.display(),
            schema
        );
        self.conn = Some(conn);
        Ok(())
    }
}

/// 数据库 Actor 句柄（用于异步调用）
#[derive(Clone)]
pub struct DbActorHandle {
    sender: Sender<DbCommand>,
}

impl std::fmt::Debug for DbActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbActorHandle")
            .field("sender", &"<channel>")
            .finish()
    }
}

impl DbActorHandle {
    /// 启动 DB Actor 专用线程
    pub fn spawn() -> Result<Self> {
        let (sender, receiver) = unbounded();

        thread::Builder::new()
            .name("sigmirror-db".to_string())
            .spawn(move || {
                let actor = DbActor::new(receiver);
                actor.run();
            })
            .map_err(|e| SigMirrorError::ActorStopped(format!("无法启动 DB Actor 线程: {}", e)))?;

        Ok(Self { sender })
    }

    /// 发送命令并等待响应
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .map_err(|_| SigMirrorError::ActorStopped("DB Actor 已停止".to_string()))?;

        rx.await
            .map_err(|_| SigMirrorError::ActorStopped("DB Actor 响应失败".to_string()))?
    }

    pub async fn open(&self, db_path: PathBuf) -> Result<()> {
        self.request(|respond_to| DbCommand::Open {
            db_path,
            respond_to,
        })
        .await
    }

    pub async fn get_checkpoint(&self, collection: Collection) -> Result<Checkpoint> {
        self.request(|respond_to| DbCommand::GetCheckpoint {
            collection,
            respond_to,
        })
        .await
    }

    pub async fn set_checkpoint(
        &self,
        collection: Collection,
        page: u64,
        last_seen_id: u64,
    ) -> Result<Checkpoint> {
        self.request(|respond_to| DbCommand::SetCheckpoint {
            collection,
            page,
            last_seen_id,
            respond_to,
        })
        .await
    }

    pub async fn count_records(&self, collection: Collection) -> Result<u64> {
        self.request(|respond_to| DbCommand::CountRecords {
            collection,
            respond_to,
        })
        .await
    }

    pub async fn upsert_records(
        &self,
        collection: Collection,
        records: Vec<SignatureRecord>,
    ) -> Result<usize> {
        self.request(|respond_to| DbCommand::UpsertRecords {
            collection,
            records,
            respond_to,
        })
        .await
    }

    pub async fn values_by_key(&self, collection: Collection, key: String) -> Result<Vec<String>> {
        self.request(|respond_to| DbCommand::ValuesByKey {
            collection,
            key,
            respond_to,
        })
        .await
    }

    pub async fn keys_by_value(&self, collection: Collection, value: String) -> Result<Vec<String>> {
        self.request(|respond_to| DbCommand::KeysByValue {
            collection,
            value,
            respond_to,
        })
        .await
    }

    pub async fn first_key_by_value(
        &self,
        collection: Collection,
        value: String,
    ) -> Result<Option<String>> {
        self.request(|respond_to| DbCommand::FirstKeyByValue {
            collection,
            value,
            respond_to,
        })
        .await
    }

    pub async fn journal_mode(&self) -> Result<String> {
        self.request(|respond_to| DbCommand::JournalMode { respond_to })
            .await
    }

    /// 停止 DB Actor
    pub fn shutdown(&self) {
        let _ = self.sender.send(DbCommand::Shutdown);
    }
}
