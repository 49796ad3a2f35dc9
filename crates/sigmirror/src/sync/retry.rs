use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 拉取失败的重试策略
///
/// 默认：无限重试、固定 100ms 间隔（远端偶发抖动时尽快恢复）。
/// 设置 `max_retries` 后，同一页连续失败超过该次数即判定 Worker 失败。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大重试次数；None 表示不限
    pub max_retries: Option<u32>,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子；1.0 即固定间隔
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_factor: 1.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// 固定间隔、不限次数
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay_ms: delay.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// 第 `attempt` 次失败（从 1 开始）后是否还应继续重试
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.max_retries {
            None => true,
            Some(max) => attempt <= max,
        }
    }

    /// 第 `attempt` 次失败（从 1 开始）后的等待时长
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as f64;
        let base = self.base_delay_ms as f64 * self.backoff_factor.max(1.0).powf(exponent);
        let capped = base.min(self.max_delay_ms.max(self.base_delay_ms) as f64);

        let jitter = if self.jitter_factor > 0.0 {
            capped * self.jitter_factor.min(1.0) * (rand::random::<f64>() - 0.5)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}
