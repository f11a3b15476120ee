//! 探测工具配置文件.
//!
//! ```json
//! {
//!   "logging": { "level": "debug", "directory": "logs" },
//!   "reader": { "retry_times": 50, "retry_interval_ms": 20 },
//!   "wav_seek_policy": "legacy"
//! }
//! ```
//! 所有字段都可省略, 命令行参数优先于文件中的值.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use hiflow::logging::LoggingConfig;
use hiflow_demux::ReaderConfig;
use hiflow_demux::demuxers::wav::WavSeekPolicy;
use serde::{Deserialize, Serialize};

/// 读取器重试参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReaderSection {
    pub retry_times: u32,
    pub retry_interval_ms: u64,
}

impl Default for ReaderSection {
    fn default() -> Self {
        let config = ReaderConfig::default();
        Self {
            retry_times: config.retry_times,
            retry_interval_ms: config.retry_interval.as_millis() as u64,
        }
    }
}

impl From<ReaderSection> for ReaderConfig {
    fn from(section: ReaderSection) -> Self {
        Self {
            retry_times: section.retry_times,
            retry_interval: Duration::from_millis(section.retry_interval_ms),
        }
    }
}

/// WAV seek 算法名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekPolicyName {
    #[default]
    ByteRate,
    Legacy,
}

impl From<SeekPolicyName> for WavSeekPolicy {
    fn from(name: SeekPolicyName) -> Self {
        match name {
            SeekPolicyName::ByteRate => WavSeekPolicy::ByteRate,
            SeekPolicyName::Legacy => WavSeekPolicy::Legacy,
        }
    }
}

/// 探测工具配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub logging: LoggingConfig,
    pub reader: ReaderSection,
    pub wav_seek_policy: SeekPolicyName,
}

impl ProbeConfig {
    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
        Self::parse(&text).with_context(|| format!("解析配置文件失败, path={}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
