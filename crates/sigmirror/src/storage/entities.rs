//! 存储实体

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 单个集合的同步检查点，是断点续传的唯一依据
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 最后一个完整处理的页号（0 = 尚未有完整页）
    pub last_page: u64,
    /// 已见过的最大远端 id
    pub last_seen_id: u64,
    /// 最后一次写检查点的时间（Unix 秒，0 = 从未同步）
    pub last_synced_at: i64,
}

impl Checkpoint {
    pub fn last_synced_at_utc(&self) -> Option<DateTime<Utc>> {
        if self.last_synced_at <= 0 {
            return None;
        }
        Utc.timestamp_opt(self.last_synced_at, 0).single()
    }

    pub fn is_initialized(&self) -> bool {
        self.last_synced_at > 0
    }
}

/// (key, value) 签名对；methods 为 (selector, method)，events 为 (signature, event)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub key: String,
    pub value: String,
}

impl SignatureRecord {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
