pub mod core;
pub mod cms;
pub mod config;
pub mod delete;
pub mod media;
pub mod storage;
pub mod uploaders;
pub mod utils;

// 重新导出核心类型
pub use core::{
    AssetMetadata,
    DocumentRef,
    MediaError,
    MediaKind,
    Result,
    SchedulerConfig,
    SchedulerEvent,
    SchedulerHandle,
    UploadHandler,
    UploadId,
    UploadItem,
    UploadScheduler,
    UploadStatus,
};
pub use config::Config;
pub use delete::{bulk_delete, BulkDeleteReport};
pub use uploaders::MediaUploadHandler;
