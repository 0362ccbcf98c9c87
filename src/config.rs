use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use urlarchive_storage::ArchiveConfig;

/// 默认配置文件名
pub const CONFIG_FILE: &str = "urlarchive.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sled 数据库路径
    #[serde(default = "StorageConfig::default_db_path")]
    pub db_path: PathBuf,
    /// 链段允许的差异数
    #[serde(default = "StorageConfig::default_max_diffs")]
    pub max_diffs: usize,
    /// 压缩与差异接受的最小收益比例
    #[serde(default = "StorageConfig::default_min_gain")]
    pub min_gain: f64,
    /// Zstd 压缩等级
    #[serde(default = "StorageConfig::default_compression_level")]
    pub compression_level: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_db_path(),
            max_diffs: Self::default_max_diffs(),
            min_gain: Self::default_min_gain(),
            compression_level: Self::default_compression_level(),
        }
    }
}

impl StorageConfig {
    fn default_db_path() -> PathBuf {
        PathBuf::from("./data/urlarchive.db")
    }
    fn default_max_diffs() -> usize {
        20
    }
    fn default_min_gain() -> f64 {
        0.80
    }
    fn default_compression_level() -> i32 {
        19
    }

    /// 转换为存储层配置
    pub fn archive_config(&self) -> ArchiveConfig {
        ArchiveConfig {
            max_diffs: self.max_diffs,
            min_gain: self.min_gain,
            compression_level: self.compression_level,
        }
    }
}

/// 抓取配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// 同时进行的抓取数上限
    #[serde(default = "FetchConfig::default_concurrency")]
    pub concurrency: usize,
    /// 连接超时（秒）
    #[serde(default = "FetchConfig::default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// 单次请求超时（秒），不设置则不限制
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// 请求使用的 User-Agent
    #[serde(default = "FetchConfig::default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: Self::default_concurrency(),
            connect_timeout_secs: Self::default_connect_timeout(),
            request_timeout_secs: None,
            user_agent: Self::default_user_agent(),
        }
    }
}

impl FetchConfig {
    fn default_concurrency() -> usize {
        20
    }
    fn default_connect_timeout() -> u64 {
        10
    }
    fn default_user_agent() -> String {
        concat!("urlarchive/", env!("CARGO_PKG_VERSION")).to_string()
    }
}

/// 抓取入库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// 完整抓取时允许入库的最大页面大小（字节）
    #[serde(default = "IngestConfig::default_max_store_size")]
    pub max_store_size: usize,
    /// 是否同时抓取页面引用的图片与样式表
    #[serde(default)]
    pub full_capture: bool,
    /// 改写后资源引用的路径前缀
    #[serde(default = "IngestConfig::default_resource_prefix")]
    pub resource_prefix: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_store_size: Self::default_max_store_size(),
            full_capture: false,
            resource_prefix: Self::default_resource_prefix(),
        }
    }
}

impl IngestConfig {
    fn default_max_store_size() -> usize {
        500 * 1024
    }
    fn default_resource_prefix() -> String {
        "/additional".to_string()
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ArchiveError::Config(format!("无法读取配置文件: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ArchiveError::Config(format!("配置文件解析失败: {}", e)))?;
        Ok(config)
    }

    pub fn load() -> Self {
        let mut config = Self::from_file(CONFIG_FILE).unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    /// 应用环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        // 存储配置
        if let Ok(path) = std::env::var("URLARCHIVE_DB") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Ok(v) = std::env::var("URLARCHIVE_MAX_DIFFS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.storage.max_diffs = n;
        }
        if let Ok(v) = std::env::var("URLARCHIVE_MIN_GAIN")
            && let Ok(n) = v.parse::<f64>()
        {
            self.storage.min_gain = n.clamp(0.0, 1.0);
        }

        // 抓取配置
        if let Ok(v) = std::env::var("URLARCHIVE_FETCH_CONCURRENCY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.fetch.concurrency = n.max(1);
        }
        if let Ok(v) = std::env::var("URLARCHIVE_FETCH_TIMEOUT")
            && let Ok(n) = v.parse::<u64>()
        {
            self.fetch.request_timeout_secs = Some(n);
        }

        // 入库配置
        if let Ok(v) = std::env::var("URLARCHIVE_MAX_STORE_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.ingest.max_store_size = n;
        }
        if let Ok(full) = std::env::var("URLARCHIVE_FULL_CAPTURE") {
            self.ingest.full_capture = full.to_lowercase() == "true" || full == "1";
        }
        if let Ok(prefix) = std::env::var("URLARCHIVE_RESOURCE_PREFIX") {
            self.ingest.resource_prefix = prefix;
        }
    }
}
