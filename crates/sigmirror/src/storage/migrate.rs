//! 镜像库 schema 初始化
//!
//! 打开连接后依次：连接级 PRAGMA → 嵌入的 refinery migrations → schema 版本校验。
//! 本库只有两个写入方（methods / events Worker），且都经由同一个 DB Actor 线程；
//! 外部只读进程（例如另开一个 CLI 做 lookup）可能与同步同时访问文件。

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, SigMirrorError};
use crate::version::DB_VERSION;

const HISTORY_TABLE: &str = "refinery_schema_history";

/// 连接级设置
///
/// - `journal_mode=WAL`：外部读者不阻塞 Worker 写入（文件库有效，内存库保持 memory）
/// - `synchronous=NORMAL`：WAL 下崩溃只会丢最后一个事务，检查点落后于记录，重拉一页即可
/// - `busy_timeout`：外部进程持锁时等待而不是立刻 `SQLITE_BUSY`
const CONNECTION_PRAGMAS: &str = "
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA busy_timeout=5000;
";

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(CONNECTION_PRAGMAS.trim())
        .map_err(|e| SigMirrorError::Database(format!("failed to apply connection pragmas: {}", e)))
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| SigMirrorError::Migration(format!("schema migration failed: {}", e)))?;
    for applied in report.applied_migrations() {
        debug!("📦 已应用 migration V{} {}", applied.version(), applied.name());
    }
    Ok(())
}

/// 库中记录的 schema 版本；refinery 历史表不存在时为 None
fn schema_version(conn: &Connection) -> Result<Option<i64>> {
    let has_history: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [HISTORY_TABLE],
            |row| row.get(0),
        )
        .optional()?;
    if has_history.is_none() {
        return Ok(None);
    }

    let version: Option<i64> = conn.query_row(
        &format!("SELECT MAX(version) FROM {}", HISTORY_TABLE),
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// 由更新版本 sigmirror 写过的库拒绝打开：旧代码不认识新增的列或表
fn ensure_supported(version: Option<i64>) -> Result<()> {
    match version {
        Some(v) if v > DB_VERSION => Err(SigMirrorError::Migration(format!(
            "database schema V{} is newer than supported V{}",
            v, DB_VERSION
        ))),
        _ => Ok(()),
    }
}

/// 初始化连接并返回当前 schema 版本
pub fn init_db(conn: &mut Connection) -> Result<i64> {
    apply_pragmas(conn)?;
    ensure_supported(schema_version(conn)?)?;
    migrate(conn)?;
    let version = schema_version(conn)?.unwrap_or_default();
    ensure_supported(Some(version))?;
    Ok(version)
}
