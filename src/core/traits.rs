use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use serde_json::Value;
use crate::cms::Transaction;
use crate::media::{ImageInfo, VideoInfo};
use super::types::{DocumentRef, UploadItem};
use super::errors::Result;

/// 字节级进度回调，参数为已发送字节数
pub type BytesCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// 百分比进度上报
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<dyn Fn(u8) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, percent: u8) {
        (self.inner)(percent.min(100));
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// 单个条目的上传处理：对象存储写入 + 文档创建
#[async_trait]
pub trait UploadHandler: Send + Sync {
    async fn upload(&self, item: &UploadItem, progress: ProgressReporter) -> Result<DocumentRef>;
}

/// S3 兼容对象存储
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// 获取预签名 PUT 地址
    async fn presigned_upload_url(&self, key: &str, content_type: &str) -> Result<String>;

    /// 通过预签名地址上传本地文件
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        on_bytes: Option<BytesCallback>,
    ) -> Result<()>;

    async fn delete_object(&self, key: &str) -> Result<()>;

    /// 对象的公开访问地址
    fn public_url(&self, key: &str) -> String;
}

/// 内容库文档存储
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(&self, document: Value) -> Result<DocumentRef>;

    async fn patch_set(&self, id: &str, fields: Value) -> Result<()>;

    /// 按 ID 批量读取，不存在的 ID 不出现在结果中
    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Value>>;

    /// 原子提交一个事务
    async fn commit(&self, transaction: Transaction) -> Result<()>;
}

/// 媒体元数据提取
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe_image(&self, path: &Path) -> Result<ImageInfo>;

    async fn probe_video(&self, path: &Path) -> Result<VideoInfo>;

    /// 抽取一帧 JPEG 缩略图，返回临时文件路径
    ///
    /// `duration_secs` 来自 `probe_video`，用于决定取帧位置。
    async fn extract_thumbnail(&self, path: &Path, duration_secs: f64) -> Result<PathBuf>;
}
