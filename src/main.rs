use std::io::Write;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use urlarchive::models::{AsOf, DocumentId};
use urlarchive::{Archive, ArchiveError, Config, HttpSource, Ingestor, Result};

fn usage() {
    eprintln!("用法: urlarchive <命令> [参数]");
    eprintln!();
    eprintln!("命令:");
    eprintln!("  update                  从标准输入读取 URL 并抓取（*<url> 或 <ts>,<url>）");
    eprintln!("  list                    列出已归档的文档");
    eprintln!("  revisions <id>          列出文档的全部修订");
    eprintln!("  show <id> [timestamp]   输出文档在指定时刻的内容");
    eprintln!("  resource <content_id>   输出附加资源内容");
    eprintln!("  remove <id>             删除文档及其全部修订");
}

fn parse_id(arg: Option<&String>) -> Result<DocumentId> {
    arg.and_then(|s| s.parse().ok())
        .ok_or_else(|| ArchiveError::Other("缺少或无效的文档 ID".to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志（输出到 stderr，stdout 留给文档内容）
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        usage();
        return Ok(());
    };

    let config = Config::load();
    let archive = Archive::open(&config)?;

    let result = run(command, &args[1..], &config, &archive).await;
    archive.flush().await?;

    if let Err(e) = &result {
        error!("命令执行失败: {}", e);
    }
    result
}

async fn run(
    command: &str,
    args: &[String],
    config: &Config,
    archive: &Archive<urlarchive::urlarchive_storage::SledBackend>,
) -> Result<()> {
    let mut stdout = std::io::stdout().lock();

    match command {
        "update" => {
            let source = Arc::new(HttpSource::new(&config.fetch)?);
            let ingestor = Ingestor::new(
                archive.clone(),
                source,
                config.fetch.concurrency,
                config.ingest.clone(),
            );
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let summary = ingestor.ingest_lines(stdin).await?;
            info!(
                "更新结束: 保存={}, 跳过={}, 失败={}",
                summary.stored, summary.skipped, summary.failed
            );
        }
        "list" => {
            for doc in archive.documents().await? {
                writeln!(
                    stdout,
                    "{}\t{}\t{}\t{}",
                    doc.id,
                    if doc.important { "*" } else { "-" },
                    doc.last_visit,
                    doc.url
                )?;
            }
        }
        "revisions" => {
            let id = parse_id(args.first())?;
            for rev in archive.revisions_of(id).await? {
                writeln!(
                    stdout,
                    "{}\t{}\t{}\t{}",
                    rev.timestamp,
                    if rev.is_diff { "diff" } else { "snapshot" },
                    if rev.is_compressed { "zstd" } else { "raw" },
                    rev.stored_size
                )?;
            }
        }
        "show" => {
            let id = parse_id(args.first())?;
            let as_of = match args.get(1) {
                Some(ts) => AsOf::At(
                    ts.parse()
                        .map_err(|_| ArchiveError::Other(format!("无效的时间戳: {}", ts)))?,
                ),
                None => AsOf::Latest,
            };
            let content = archive.render_as_of(id, as_of).await?;
            stdout.write_all(&content)?;
        }
        "resource" => {
            let content_id = args
                .first()
                .ok_or_else(|| ArchiveError::Other("缺少资源 ID".to_string()))?;
            match archive.resource(content_id).await? {
                Some(blob) => stdout.write_all(&blob.payload)?,
                None => return Err(ArchiveError::Other(format!("资源不存在: {}", content_id))),
            }
        }
        "remove" => {
            let id = parse_id(args.first())?;
            if !archive.remove_document(id).await? {
                return Err(ArchiveError::Other(format!("文档不存在: {}", id)));
            }
            info!("已删除文档: {}", id);
        }
        _ => {
            usage();
            return Err(ArchiveError::Other(format!("未知命令: {}", command)));
        }
    }

    stdout.flush()?;
    Ok(())
}
