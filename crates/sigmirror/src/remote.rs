//! 远端数据源 - 分页拉取签名列表
//!
//! 本模块只负责「拉一页、解析一页」，不做任何重试；重试策略属于同步 Worker。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::collection::Collection;
use crate::config::{HttpClientConfig, RemoteConfig};
use crate::error::{Result, SigMirrorError};
use crate::storage::SignatureRecord;

const ACCEPT_JSON: &str = "application/json, text/plain, */*";
const BODY_PREVIEW_LIMIT: usize = 256;

/// 远端一条记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// 远端按创建顺序分配的 id（集合内递增）
    pub remote_id: u64,
    pub key: String,
    pub value: String,
}

impl RemoteEntry {
    pub fn to_record(&self) -> SignatureRecord {
        SignatureRecord::new(self.key.clone(), self.value.clone())
    }
}

/// 远端一页
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemotePage {
    pub entries: Vec<RemoteEntry>,
    /// 下一页游标；None 表示这是最后一页
    pub next: Option<String>,
}

impl RemotePage {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// 本页出现的最大远端 id
    pub fn max_remote_id(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.remote_id).max()
    }
}

/// 分页数据源
#[async_trait]
pub trait SignatureSource: Send + Sync {
    /// 拉取某个集合的第 `page` 页（从 1 开始）；网络错误、超时、非 2xx、格式错误均返回 Err
    async fn fetch_page(&self, collection: Collection, page: u64) -> Result<RemotePage>;
}

/// 远端响应格式
#[derive(Debug, Deserialize)]
struct SignatureListResponse {
    #[serde(default)]
    next: Option<String>,
    results: Vec<SignatureItem>,
}

#[derive(Debug, Deserialize)]
struct SignatureItem {
    id: u64,
    text_signature: String,
    hex_signature: String,
}

impl From<SignatureListResponse> for RemotePage {
    fn from(resp: SignatureListResponse) -> Self {
        RemotePage {
            entries: resp
                .results
                .into_iter()
                .map(|item| RemoteEntry {
                    remote_id: item.id,
                    key: item.hex_signature,
                    value: item.text_signature,
                })
                .collect(),
            next: resp.next.filter(|n| !n.is_empty()),
        }
    }
}

/// 基于 reqwest 的 HTTP 数据源
#[derive(Debug, Clone)]
pub struct HttpSignatureSource {
    client: Client,
    remote: RemoteConfig,
    user_agent: String,
}

impl HttpSignatureSource {
    pub fn new(config: &HttpClientConfig, remote: RemoteConfig) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| SigMirrorError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;

        debug!("✅ HTTP 客户端已创建 (base_url: {})", remote.base_url);

        Ok(Self {
            client,
            remote,
            user_agent: config.user_agent.clone(),
        })
    }

    fn page_url(&self, collection: Collection, page: u64) -> String {
        let endpoint = self.remote.endpoint(collection);
        let sep = if endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}page={}", endpoint, sep, page)
    }
}

#[async_trait]
impl SignatureSource for HttpSignatureSource {
    async fn fetch_page(&self, collection: Collection, page: u64) -> Result<RemotePage> {
        let url = self.page_url(collection, page);
        debug!("🔗 拉取 {} 第 {} 页: {}", collection, page, url);

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, ACCEPT_JSON)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("❌ 拉取失败，HTTP 状态码: {}, url: {}", status, url);
            return Err(SigMirrorError::HttpStatus {
                status: status.as_u16(),
                url,
                body: preview_body(&body),
            });
        }

        let parsed: SignatureListResponse = serde_json::from_str(&body).map_err(|e| {
            SigMirrorError::Serialization(format!(
                "解析签名列表失败: {} (body: {})",
                e,
                preview_body(&body)
            ))
        })?;

        Ok(parsed.into())
    }
}

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    if trimmed.len() <= BODY_PREVIEW_LIMIT {
        return trimmed.to_string();
    }
    let mut end = BODY_PREVIEW_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
