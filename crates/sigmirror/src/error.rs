use std::fmt;
use rusqlite;

use crate::config::ConfigError;

/// 错误大类：决定同步流程如何处置该错误
///
/// - `Fetch`：网络/超时/非 2xx/响应格式错误，同步 Worker 内部重试，不致命
/// - `Store`：本地存储不可用或写入失败，对当前 Worker 致命
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fetch,
    Store,
    Config,
    Other,
}

#[derive(Debug)]
pub enum SigMirrorError {
    SqliteError(rusqlite::Error),
    Database(String),
    Migration(String),
    /// DB Actor 线程已退出或未响应
    ActorStopped(String),
    Transport(String),
    Timeout(String),
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    Serialization(String),
    IO(String),
    InvalidArgument(String),
    Config(ConfigError),
    Other(String),
}

impl fmt::Display for SigMirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigMirrorError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            SigMirrorError::Database(e) => write!(f, "Database error: {}", e),
            SigMirrorError::Migration(e) => write!(f, "Migration error: {}", e),
            SigMirrorError::ActorStopped(e) => write!(f, "DB actor unavailable: {}", e),
            SigMirrorError::Transport(e) => write!(f, "Transport error: {}", e),
            SigMirrorError::Timeout(e) => write!(f, "Timeout: {}", e),
            SigMirrorError::HttpStatus { status, url, body } => {
                write!(f, "HTTP status {} from {}: {}", status, url, body)
            }
            SigMirrorError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SigMirrorError::IO(e) => write!(f, "IO error: {}", e),
            SigMirrorError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            SigMirrorError::Config(e) => write!(f, "Config error: {}", e),
            SigMirrorError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl std::error::Error for SigMirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SigMirrorError::SqliteError(e) => Some(e),
            SigMirrorError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SigMirrorError {
    fn from(error: rusqlite::Error) -> Self {
        SigMirrorError::SqliteError(error)
    }
}

impl From<serde_json::Error> for SigMirrorError {
    fn from(error: serde_json::Error) -> Self {
        SigMirrorError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for SigMirrorError {
    fn from(error: std::io::Error) -> Self {
        SigMirrorError::IO(error.to_string())
    }
}

impl From<ConfigError> for SigMirrorError {
    fn from(error: ConfigError) -> Self {
        SigMirrorError::Config(error)
    }
}

impl From<reqwest::Error> for SigMirrorError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            SigMirrorError::Timeout(error.to_string())
        } else if error.is_decode() {
            SigMirrorError::Serialization(error.to_string())
        } else {
            SigMirrorError::Transport(error.to_string())
        }
    }
}

impl SigMirrorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SigMirrorError::Transport(_)
            | SigMirrorError::Timeout(_)
            | SigMirrorError::HttpStatus { .. }
            | SigMirrorError::Serialization(_) => ErrorKind::Fetch,
            SigMirrorError::SqliteError(_)
            | SigMirrorError::Database(_)
            | SigMirrorError::Migration(_)
            | SigMirrorError::ActorStopped(_)
            | SigMirrorError::IO(_) => ErrorKind::Store,
            SigMirrorError::Config(_) => ErrorKind::Config,
            SigMirrorError::InvalidArgument(_) | SigMirrorError::Other(_) => ErrorKind::Other,
        }
    }

    /// 是否可重试（只有拉取类错误可重试）
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Fetch
    }
}

pub type Result<T> = std::result::Result<T, SigMirrorError>;
