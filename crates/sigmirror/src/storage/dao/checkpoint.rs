//! 检查点 DAO - sync_checkpoint 表（全库一行，两个集合各占三列）

use rusqlite::{params, Connection};

use crate::collection::Collection;
use crate::error::Result;
use crate::storage::entities::Checkpoint;

pub struct CheckpointDao<'a> {
    conn: &'a Connection,
}

impl<'a> CheckpointDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 读取检查点；行不存在时返回零值
    pub fn get(&self, collection: Collection) -> Result<Checkpoint> {
        let (page_col, id_col, at_col) = collection.checkpoint_columns();
        let sql = format!(
            "SELECT {}, {}, {} FROM sync_checkpoint LIMIT 1",
            page_col, id_col, at_col
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map([], row_to_checkpoint)?;
        Ok(rows.next().transpose()?.unwrap_or_default())
    }

    /// 原子覆盖检查点，并以当前时间写入 synced_at
    pub fn set(&self, collection: Collection, page: u64, last_seen_id: u64) -> Result<Checkpoint> {
        let now = chrono::Utc::now().timestamp();
        let (page_col, id_col, at_col) = collection.checkpoint_columns();
        let sql = format!(
            "UPDATE sync_checkpoint SET {} = ?1, {} = ?2, {} = ?3",
            page_col, id_col, at_col
        );
        let updated = self
            .conn
            .execute(&sql, params![page as i64, last_seen_id as i64, now])?;
        if updated == 0 {
            // 行被外部删除时补一行，其他集合保持零值
            let sql = format!(
                "INSERT INTO sync_checkpoint ({}, {}, {}) VALUES (?1, ?2, ?3)",
                page_col, id_col, at_col
            );
            self.conn
                .execute(&sql, params![page as i64, last_seen_id as i64, now])?;
        }
        Ok(Checkpoint {
            last_page: page,
            last_seen_id,
            last_synced_at: now,
        })
    }
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        last_page: row.get::<_, i64>(0)?.max(0) as u64,
        last_seen_id: row.get::<_, i64>(1)?.max(0) as u64,
        last_synced_at: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrate::init_db;

    fn open() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        init_db(&mut conn).unwrap();
        conn
    }

    #[test]
    fn fresh_database_has_zero_checkpoints() {
        let conn = open();
        let dao = CheckpointDao::new(&conn);
        assert_eq!(dao.get(Collection::Methods).unwrap(), Checkpoint::default());
        assert_eq!(dao.get(Collection::Events).unwrap(), Checkpoint::default());
    }

    #[test]
    fn set_only_touches_its_own_collection() {
        let conn = open();
        let dao = CheckpointDao::new(&conn);
        let written = dao.set(Collection::Methods, 7, 700).unwrap();

        let methods = dao.get(Collection::Methods).unwrap();
        assert_eq!(methods, written);
        assert_eq!(methods.last_page, 7);
        assert_eq!(methods.last_seen_id, 700);
        assert!(methods.is_initialized());
        assert_eq!(dao.get(Collection::Events).unwrap(), Checkpoint::default());
    }

    #[test]
    fn set_recreates_missing_row() {
        let conn = open();
        conn.execute("DELETE FROM sync_checkpoint", []).unwrap();
        let dao = CheckpointDao::new(&conn);
        assert_eq!(dao.get(Collection::Events).unwrap(), Checkpoint::default());

        dao.set(Collection::Events, 2, 250).unwrap();
        assert_eq!(dao.get(Collection::Events).unwrap().last_seen_id, 250);
        assert_eq!(dao.get(Collection::Methods).unwrap().last_page, 0);
    }
}
