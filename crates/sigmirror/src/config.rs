//! 镜像配置
//!
//! 既可以用 `MirrorConfig::builder()` 在代码里组装，也可以从 TOML 文件加载；
//! 所有字段都有默认值，TOML 里只需写要覆盖的部分。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::sync::RetryPolicy;

/// 4byte.directory 官方地址
pub const DEFAULT_BASE_URL: &str = "https://www.4byte.directory";

/// 远端每页固定返回的最大条数
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid url for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒），必填；远端挂起时不会无限阻塞 Worker
    pub request_timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(5),
            request_timeout_secs: Some(5),
            user_agent: format!("sigmirror/{}", crate::version::SDK_VERSION),
        }
    }
}

/// 远端数据源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// 覆盖函数签名分页接口（完整 URL，不含 page 参数）
    pub methods_url: Option<String>,
    /// 覆盖事件签名分页接口（完整 URL，不含 page 参数）
    pub events_url: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            methods_url: None,
            events_url: None,
        }
    }
}

impl RemoteConfig {
    /// 某个集合的分页接口地址（调用方追加 `page=N`）
    pub fn endpoint(&self, collection: Collection) -> String {
        let custom = match collection {
            Collection::Methods => self.methods_url.as_deref(),
            Collection::Events => self.events_url.as_deref(),
        };
        match custom {
            Some(url) => url.to_string(),
            None => format!(
                "{}{}?format=json&ordering=created_at",
                self.base_url.trim_end_matches('/'),
                collection.remote_path()
            ),
        }
    }
}

/// 镜像配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// SQLite 数据库文件路径
    pub db_path: PathBuf,
    pub remote: RemoteConfig,
    pub http_client_config: HttpClientConfig,
    pub retry_policy: RetryPolicy,
    /// 远端满页的条数；不足此数的页视为集合尾页
    pub page_size: usize,
    /// 每个进度通道的缓冲容量
    pub progress_buffer: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            db_path: get_default_db_path(),
            remote: RemoteConfig::default(),
            http_client_config: HttpClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            progress_buffer: 256,
        }
    }
}

/// 获取默认数据库路径 ~/.sigmirror/sigmirror.db
fn get_default_db_path() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".sigmirror").join("sigmirror.db")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        home_dir.join(".sigmirror").join("sigmirror.db")
    } else {
        PathBuf::from("./sigmirror.db")
    }
}

impl MirrorConfig {
    pub fn builder() -> MirrorConfigBuilder {
        MirrorConfigBuilder::new()
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: MirrorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Zero("page_size"));
        }
        if self.progress_buffer == 0 {
            return Err(ConfigError::Zero("progress_buffer"));
        }
        match self.http_client_config.request_timeout_secs {
            None => return Err(ConfigError::Missing("http_client_config.request_timeout_secs")),
            Some(0) => return Err(ConfigError::Zero("request_timeout_secs")),
            Some(_) => {}
        }
        check_url("remote.base_url", &self.remote.base_url)?;
        if let Some(url) = &self.remote.methods_url {
            check_url("remote.methods_url", url)?;
        }
        if let Some(url) = &self.remote.events_url {
            check_url("remote.events_url", url)?;
        }
        Ok(())
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        })
    }
}

pub struct MirrorConfigBuilder {
    config: MirrorConfig,
}

impl Default for MirrorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MirrorConfig::default(),
        }
    }

    pub fn db_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.db_path = path.as_ref().to_path_buf();
        self
    }

    pub fn base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn endpoint<S: Into<String>>(mut self, collection: Collection, url: S) -> Self {
        match collection {
            Collection::Methods => self.config.remote.methods_url = Some(url.into()),
            Collection::Events => self.config.remote.events_url = Some(url.into()),
        }
        self
    }

    pub fn request_timeout(mut self, secs: u64) -> Self {
        self.config.http_client_config.request_timeout_secs = Some(secs);
        self
    }

    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.config.http_client_config.connect_timeout_secs = Some(secs);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn progress_buffer(mut self, capacity: usize) -> Self {
        self.config.progress_buffer = capacity;
        self
    }

    pub fn build(self) -> MirrorConfig {
        self.config
    }
}
