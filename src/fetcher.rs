// 有界并发资源抓取模块
// 负责并行抓取页面引用的资源并写入内容寻址存储

use crate::config::FetchConfig;
use crate::error::{ArchiveError, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::{Client, StatusCode, header};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use urlarchive_core::BlobBackend;
use urlarchive_storage::{ContentStore, StorageError};

/// 未声明内容类型时使用的默认值
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// 一次成功抓取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// 资源来源
///
/// 只有 HTTP 200 视为成功，其余状态返回 `ArchiveError::HttpStatus`
#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedResource>;
}

/// 基于 reqwest 的 HTTP 来源
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone());
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let client = builder
            .build()
            .map_err(|e| ArchiveError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ResourceSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<FetchedResource> {
        let resp = self.client.get(url).send().await?;

        if resp.status() != StatusCode::OK {
            return Err(ArchiveError::HttpStatus {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let body = resp.bytes().await?.to_vec();

        debug!("抓取完成: url={}, type={}, size={}", url, content_type, body.len());
        Ok(FetchedResource {
            url: url.to_string(),
            content_type,
            body,
        })
    }
}

/// 批量抓取结果
#[derive(Debug, Default)]
pub struct FetchReport {
    /// 成功的资源：原始 URL → content_id
    pub mapping: HashMap<String, String>,
    /// 失败的资源：(URL, 原因)
    pub failures: Vec<(String, String)>,
}

impl FetchReport {
    pub fn succeeded(&self) -> usize {
        self.mapping.len()
    }
}

/// 有界并发抓取器
///
/// 同时进行的抓取数不超过信号量容量；单个失败只记录日志，不影响其他抓取
pub struct Fetcher<S, B> {
    source: Arc<S>,
    store: ContentStore<B>,
    semaphore: Arc<Semaphore>,
}

impl<S, B> Fetcher<S, B>
where
    S: ResourceSource + 'static,
    B: BlobBackend<Error = StorageError> + 'static,
{
    pub fn new(source: Arc<S>, store: ContentStore<B>, concurrency: usize) -> Self {
        Self {
            source,
            store,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// 抓取一组资源，等待全部完成后返回
    ///
    /// 重复的 URL 只抓取一次
    pub async fn fetch_all<I>(&self, urls: I) -> Result<FetchReport>
    where
        I: IntoIterator<Item = String>,
    {
        let urls: BTreeSet<String> = urls.into_iter().collect();
        let total = urls.len();
        let mut handles = Vec::with_capacity(total);

        for url in urls {
            // 先取得许可再启动任务，保证同时运行的任务数有上限
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ArchiveError::Other(format!("抓取信号量已关闭: {}", e)))?;

            let source = self.source.clone();
            let store = self.store.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = fetch_one(source.as_ref(), &store, &url).await;
                (url, result)
            }));
        }

        let mut report = FetchReport::default();
        let mut storage_error = None;
        for joined in join_all(handles).await {
            match joined {
                Ok((url, Ok(content_id))) => {
                    report.mapping.insert(url, content_id);
                }
                Ok((url, Err(UnitFailure::Fetch(e)))) => {
                    warn!("抓取资源失败: url={}, error={}", url, e);
                    report.failures.push((url, e.to_string()));
                }
                Ok((url, Err(UnitFailure::Storage(e)))) => {
                    error!("保存资源失败: url={}, error={}", url, e);
                    storage_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!("抓取任务异常退出: {}", e);
                }
            }
        }

        // 写入失败不能降级为单个资源失败，等全部任务结束后返回给调用方
        if let Some(e) = storage_error {
            return Err(ArchiveError::Storage(e));
        }

        info!(
            "资源抓取完成: 成功={}, 失败={}, 总数={}",
            report.succeeded(),
            report.failures.len(),
            total
        );
        Ok(report)
    }
}

/// 单个抓取任务的失败原因
enum UnitFailure {
    /// 网络错误或非 200 响应，只影响当前资源
    Fetch(ArchiveError),
    /// 后端写入失败
    Storage(StorageError),
}

async fn fetch_one<S, B>(
    source: &S,
    store: &ContentStore<B>,
    url: &str,
) -> std::result::Result<String, UnitFailure>
where
    S: ResourceSource + ?Sized,
    B: BlobBackend<Error = StorageError>,
{
    let fetched = source.fetch(url).await.map_err(UnitFailure::Fetch)?;
    let stored = store
        .put(url, &fetched.content_type, fetched.body)
        .await
        .map_err(UnitFailure::Storage)?;
    Ok(stored.content_id)
}
