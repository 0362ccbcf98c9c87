// 抓取入库模块
// 负责抓取页面、可选地抓取页面资源并改写引用，然后写入修订链

use crate::archive::{Archive, ArchiveBackend};
use crate::config::IngestConfig;
use crate::error::{ArchiveError, Result};
use crate::fetcher::{Fetcher, ResourceSource};
use crate::resources::{discover_resources, rewrite_references};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};
use urlarchive_core::{ContentRecord, DocumentId};
use urlarchive_storage::AppendMode;

/// 输入行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestLine {
    /// `*<url>`：重要页面，每次都保存修订
    Important(String),
    /// `<ts>,<url>`：普通页面，只保存第一次抓取
    Once { url: String, last_visit: i64 },
}

/// 解析一行输入，空行返回 `None`
pub fn parse_line(line: &str) -> Result<Option<IngestLine>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(url) = line.strip_prefix('*') {
        return Ok(Some(IngestLine::Important(url.trim().to_string())));
    }

    let Some((ts, url)) = line.split_once(',') else {
        return Err(ArchiveError::Other(format!("无法解析的输入行: <{}>", line)));
    };
    // 时间戳无法解析时按 0 处理
    let last_visit = ts.trim().parse::<i64>().unwrap_or(0);
    Ok(Some(IngestLine::Once {
        url: url.trim().to_string(),
        last_visit,
    }))
}

/// 单次抓取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// 已保存新修订
    Stored {
        document_id: DocumentId,
        record: ContentRecord,
    },
    /// 文档已存在，无需抓取
    Skipped { document_id: DocumentId },
}

/// 批量入库统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Ingestor<S, B> {
    archive: Archive<B>,
    source: Arc<S>,
    fetcher: Fetcher<S, B>,
    config: IngestConfig,
}

impl<S, B> Ingestor<S, B>
where
    S: ResourceSource + 'static,
    B: ArchiveBackend,
{
    pub fn new(
        archive: Archive<B>,
        source: Arc<S>,
        fetch_concurrency: usize,
        config: IngestConfig,
    ) -> Self {
        let fetcher = Fetcher::new(source.clone(), archive.blobs().clone(), fetch_concurrency);
        Self {
            archive,
            source,
            fetcher,
            config,
        }
    }

    pub fn archive(&self) -> &Archive<B> {
        &self.archive
    }

    /// 抓取重要页面并以当前时间追加修订
    pub async fn capture_important(&self, url: &str) -> Result<CaptureOutcome> {
        self.capture_important_at(url, now()).await
    }

    /// 抓取重要页面并以指定时间追加修订
    pub async fn capture_important_at(&self, url: &str, timestamp: i64) -> Result<CaptureOutcome> {
        info!("抓取重要页面: {}", url);
        let page = self.source.fetch(url).await?;
        let content = self.process(url, page.body).await?;

        if content.len() > self.config.max_store_size {
            warn!(
                "页面过大，跳过保存: url={}, size={}, limit={}",
                url,
                content.len(),
                self.config.max_store_size
            );
            return Err(ArchiveError::TooLarge {
                url: url.to_string(),
                size: content.len(),
                limit: self.config.max_store_size,
            });
        }

        let (entry, _) = self.archive.register(url, true, -1).await?;
        let record = self
            .archive
            .capture(entry.id, &content, timestamp, AppendMode::Append)
            .await?;

        Ok(CaptureOutcome::Stored {
            document_id: entry.id,
            record,
        })
    }

    /// 普通页面只保存第一次抓取
    pub async fn capture_once(&self, url: &str, last_visit: i64) -> Result<CaptureOutcome> {
        let (entry, is_new) = self.archive.register(url, false, last_visit).await?;
        if !is_new {
            debug!("页面已归档，跳过: {}", url);
            return Ok(CaptureOutcome::Skipped {
                document_id: entry.id,
            });
        }

        info!("抓取普通页面: {}", url);
        match self.fetch_and_capture(url, entry.id).await {
            Ok(record) => Ok(CaptureOutcome::Stored {
                document_id: entry.id,
                record,
            }),
            Err(e) => {
                // 没有保存任何修订时撤销登记，后续输入可以重新抓取
                if let Err(cleanup) = self.archive.remove_document(entry.id).await {
                    warn!("撤销文档登记失败: id={}, error={}", entry.id, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn fetch_and_capture(&self, url: &str, document_id: DocumentId) -> Result<ContentRecord> {
        let page = self.source.fetch(url).await?;
        let content = self.process(url, page.body).await?;
        self.archive
            .capture(document_id, &content, now(), AppendMode::Append)
            .await
    }

    /// 处理一行输入
    pub async fn handle_line(&self, line: &str) -> Result<Option<CaptureOutcome>> {
        match parse_line(line)? {
            None => Ok(None),
            Some(IngestLine::Important(url)) => self.capture_important(&url).await.map(Some),
            Some(IngestLine::Once { url, last_visit }) => {
                self.capture_once(&url, last_visit).await.map(Some)
            }
        }
    }

    /// 逐行读取输入并入库，单行失败只记录日志
    pub async fn ingest_lines<R>(&self, reader: R) -> Result<IngestSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = IngestSummary::default();
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            match self.handle_line(&line).await {
                Ok(Some(CaptureOutcome::Stored { .. })) => summary.stored += 1,
                Ok(Some(CaptureOutcome::Skipped { .. })) => summary.skipped += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!("处理输入失败: line={}, error={}", line.trim(), e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "入库完成: 保存={}, 跳过={}, 失败={}",
            summary.stored, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    /// 完整抓取时下载页面资源并改写引用
    async fn process(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        if !self.config.full_capture {
            return Ok(body);
        }
        let Ok(markup) = std::str::from_utf8(&body) else {
            warn!("页面不是 UTF-8 文本，跳过资源抓取: {}", url);
            return Ok(body);
        };

        let resources = discover_resources(url, markup);
        if resources.is_empty() {
            return Ok(body);
        }
        debug!("发现页面资源: url={}, count={}", url, resources.len());

        let report = self.fetcher.fetch_all(resources.urls().to_vec()).await?;
        let rewritten = rewrite_references(
            markup,
            &resources,
            &report.mapping,
            &self.config.resource_prefix,
        );
        Ok(rewritten.into_bytes())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
