use std::path::{Path, PathBuf};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::errors::{MediaError, Result};

/// 同时上传的最大数量
pub const MAX_CONCURRENT_UPLOADS: usize = 3;

/// 全部完成后清理已完成条目的延迟
pub const AUTO_CLEAR_DELAY: Duration = Duration::from_secs(2);

/// 上传条目唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(pub Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 媒体类型，决定走哪条上传路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// 根据扩展名判断类型，未知扩展名返回 None
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "avif" | "bmp" | "tif" | "tiff" => {
                Some(Self::Image)
            }
            "mp4" | "m4v" | "mov" | "webm" | "mkv" | "avi" | "ogv" => Some(Self::Video),
            _ => None,
        }
    }
}

/// 根据扩展名推断 MIME 类型
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "ogv" => "video/ogg",
        _ => "application/octet-stream",
    }
}

/// 上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// 等待中（在队列中）
    Pending,
    /// 上传中
    Uploading,
    /// 已完成
    Completed,
    /// 失败
    Error,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// 用户填写的附加字段，最终写入文档
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AssetMetadata {
    pub title: Option<String>,
    pub alt: Option<String>,
    pub caption: Option<String>,
    pub description: Option<String>,
    /// 标签文档 ID
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 已创建文档的引用
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DocumentRef {
    pub id: String,
    pub doc_type: String,
}

/// 上传条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadItem {
    /// 条目 ID
    pub id: UploadId,
    /// 文件路径
    pub file: PathBuf,
    /// 原始文件名
    pub file_name: String,
    /// 文件大小
    pub size: u64,
    /// MIME 类型
    pub content_type: String,
    pub kind: MediaKind,
    /// 当前状态
    pub status: UploadStatus,
    /// 百分比 0-100
    pub progress: u8,
    /// 错误信息，仅在 Error 状态下存在
    pub error: Option<String>,
    pub metadata: AssetMetadata,
    /// 上传成功后创建的文档
    pub document: Option<DocumentRef>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadItem {
    pub fn new(file: impl Into<PathBuf>, size: u64, kind: MediaKind, metadata: AssetMetadata) -> Self {
        let file = file.into();
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let content_type = content_type_for(&file).to_string();

        Self {
            id: UploadId::new(),
            file,
            file_name,
            size,
            content_type,
            kind,
            status: UploadStatus::Pending,
            progress: 0,
            error: None,
            metadata,
            document: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 暂存本地文件：读取大小并按扩展名判断类型
    pub async fn stage(path: impl AsRef<Path>, metadata: AssetMetadata) -> Result<Self> {
        let path = path.as_ref();
        let kind = MediaKind::from_path(path).ok_or_else(|| {
            MediaError::Config(format!("unsupported media type: {}", path.display()))
        })?;
        let size = tokio::fs::metadata(path).await?.len();
        Ok(Self::new(path, size, kind, metadata))
    }
}

/// 调度器配置
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 最大并发上传数
    pub max_concurrent: usize,
    /// 批次完成后清理已完成条目的延迟
    pub auto_clear_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT_UPLOADS,
            auto_clear_delay: AUTO_CLEAR_DELAY,
        }
    }
}

/// 调度器对外广播的事件
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// 状态变更
    StatusChanged {
        id: UploadId,
        from: UploadStatus,
        to: UploadStatus,
        reason: Option<String>,
    },
    /// 进度更新
    Progress {
        id: UploadId,
        percent: u8,
    },
    /// 批次全部进入终态
    BatchDrained {
        drain: u64,
        completed: usize,
        failed: usize,
    },
    /// 条目被移出队列
    Removed {
        ids: Vec<UploadId>,
    },
}

// 静态断言确保类型是 Send 的
const _: fn() = || {
    fn assert_send<T: Send>() {}
    assert_send::<UploadItem>();
    assert_send::<SchedulerEvent>();
};
