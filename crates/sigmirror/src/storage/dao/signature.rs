//! 签名 DAO - methods / events 两张表，(key, value) 唯一

use rusqlite::{params, Connection, OptionalExtension};

use crate::collection::Collection;
use crate::error::Result;
use crate::storage::entities::SignatureRecord;

pub struct SignatureDao<'a> {
    conn: &'a Connection,
}

impl<'a> SignatureDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn count(&self, collection: Collection) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let n: i64 = self.conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// 批量插入，已存在的 (key, value) 静默跳过；整批在一个事务内，返回新增条数
    pub fn upsert_many(&self, collection: Collection, records: &[SignatureRecord]) -> Result<usize> {
        let (key_col, value_col) = collection.columns();
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?1, ?2) ON CONFLICT({}, {}) DO NOTHING",
            collection.table(),
            key_col,
            value_col,
            key_col,
            value_col
        );
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                inserted += stmt.execute(params![record.key, record.value])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// 按 key 查所有 value（按 id 即插入顺序）
    pub fn values_by_key(&self, collection: Collection, key: &str) -> Result<Vec<String>> {
        let (key_col, value_col) = collection.columns();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY id",
            value_col,
            collection.table(),
            key_col
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 按 value 反查所有 key（按 id 即插入顺序）
    pub fn keys_by_value(&self, collection: Collection, value: &str) -> Result<Vec<String>> {
        let (key_col, value_col) = collection.columns();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY id",
            key_col,
            collection.table(),
            value_col
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 按 value 反查最早插入的 key；无匹配返回 None
    pub fn first_key_by_value(&self, collection: Collection, value: &str) -> Result<Option<String>> {
        let (key_col, value_col) = collection.columns();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY id LIMIT 1",
            key_col,
            collection.table(),
            value_col
        );
        Ok(self
            .conn
            .query_row(&sql, params![value], |row| row.get::<_, String>(0))
            .optional()?)
    }
}
