// urlarchive 库接口
// 用于二进制入口、测试和外部集成

pub mod archive;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod resources;

pub use archive::{Archive, ArchiveBackend};
pub use config::Config;
pub use error::{ArchiveError, Result};
pub use fetcher::{FetchReport, FetchedResource, Fetcher, HttpSource, ResourceSource};
pub use ingest::{CaptureOutcome, IngestLine, IngestSummary, Ingestor, parse_line};
pub use resources::{ResourceKind, ResourceRef, ResourceSet, discover_resources, rewrite_references};

// Re-export core types and storage
pub use urlarchive_core as models;
pub use urlarchive_storage;
