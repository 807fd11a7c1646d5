mod types;
mod errors;
mod traits;
mod queue;
mod scheduler;

pub use types::{
    AssetMetadata,
    DocumentRef,
    MediaKind,
    SchedulerConfig,
    SchedulerEvent,
    UploadId,
    UploadItem,
    UploadStatus,
    content_type_for,
    AUTO_CLEAR_DELAY,
    MAX_CONCURRENT_UPLOADS,
};
pub use traits::{
    BytesCallback,
    DocumentStore,
    MediaProbe,
    ObjectStorage,
    ProgressReporter,
    UploadHandler,
};
pub use queue::{QueueEffect, QueueEvent, UploadQueue};
pub use scheduler::{DrainCallback, SchedulerHandle, UploadScheduler};
pub use errors::{MediaError, Result};
