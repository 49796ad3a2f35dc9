//! 集合类型 - methods / events 两个并行的签名集合
//!
//! 决定远端 endpoint、本地表结构以及检查点所在的列。

use std::str::FromStr;

use crate::error::SigMirrorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// 4 字节函数选择器 -> 函数签名
    Methods,
    /// 32 字节事件签名 -> 事件签名
    Events,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Methods, Collection::Events];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Methods => "methods",
            Self::Events => "events",
        }
    }

    /// 本地表名
    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Methods => "methods",
            Self::Events => "events",
        }
    }

    /// (key 列, value 列)
    pub(crate) fn columns(self) -> (&'static str, &'static str) {
        match self {
            Self::Methods => ("selector", "method"),
            Self::Events => ("signature", "event"),
        }
    }

    /// sync_checkpoint 表中的 (page 列, last_id 列, synced_at 列)
    pub(crate) fn checkpoint_columns(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Methods => ("methods_page", "methods_last_id", "methods_synced_at"),
            Self::Events => ("events_page", "events_last_id", "events_synced_at"),
        }
    }

    /// 远端分页接口路径（相对 base_url）
    pub(crate) fn remote_path(self) -> &'static str {
        match self {
            Self::Methods => "/api/v1/signatures/",
            Self::Events => "/api/v1/event-signatures/",
        }
    }

    /// 进度日志里用的名词（单数）
    pub(crate) fn noun(self) -> &'static str {
        match self {
            Self::Methods => "Method",
            Self::Events => "Event",
        }
    }
}

impl FromStr for Collection {
    type Err = SigMirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "methods" | "method" => Ok(Self::Methods),
            "events" | "event" => Ok(Self::Events),
            other => Err(SigMirrorError::InvalidArgument(format!(
                "unknown collection: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
