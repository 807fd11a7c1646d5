use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info};
use super::errors::{MediaError, Result};
use super::queue::{QueueEffect, QueueEvent, UploadQueue};
use super::traits::{ProgressReporter, UploadHandler};
use super::types::{SchedulerConfig, SchedulerEvent, UploadId, UploadItem};

/// 批次完成回调，参数为 (已完成数, 失败数)
pub type DrainCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

enum SchedulerCommand {
    Enqueue {
        items: Vec<UploadItem>,
        reply: oneshot::Sender<Vec<UploadId>>,
    },
    Remove {
        id: UploadId,
    },
    ClearErrors,
    Snapshot {
        reply: oneshot::Sender<Vec<UploadItem>>,
    },
    Shutdown,
}

struct SchedulerWorker {
    queue: UploadQueue,
    handler: Arc<dyn UploadHandler>,
    on_drain: Option<DrainCallback>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    internal_tx: mpsc::UnboundedSender<QueueEvent>,
    /// 正在执行的上传任务，关闭时中止
    running: HashMap<UploadId, AbortHandle>,
}

impl SchedulerWorker {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        mut internal_rx: mpsc::UnboundedReceiver<QueueEvent>,
    ) {
        // 主事件循环：外部命令与内部上传事件都经过同一个 reducer
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    // 所有句柄都被释放时等同于关闭
                    let Some(command) = command else { break };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Some(event) = internal_rx.recv() => {
                    self.dispatch(event);
                }
            }
        }

        for (_, handle) in self.running.drain() {
            handle.abort();
        }
        debug!("upload scheduler stopped");
    }

    fn handle_command(&mut self, command: SchedulerCommand) -> bool {
        match command {
            SchedulerCommand::Enqueue { items, reply } => {
                // 与队列去重规则一致：已存在或本批内重复的 ID 不会被接受
                let mut known: HashSet<UploadId> =
                    self.queue.items().iter().map(|item| item.id).collect();
                let ids = items
                    .iter()
                    .map(|item| item.id)
                    .filter(|id| known.insert(*id))
                    .collect();
                self.dispatch(QueueEvent::Enqueue(items));
                let _ = reply.send(ids);
            }
            SchedulerCommand::Remove { id } => self.dispatch(QueueEvent::Remove(id)),
            SchedulerCommand::ClearErrors => self.dispatch(QueueEvent::ClearErrors),
            SchedulerCommand::Snapshot { reply } => {
                let _ = reply.send(self.queue.items().to_vec());
            }
            SchedulerCommand::Shutdown => return false,
        }
        true
    }

    fn dispatch(&mut self, event: QueueEvent) {
        if let QueueEvent::ItemSettled { id, .. } = &event {
            self.running.remove(id);
        }

        for effect in self.queue.apply(event) {
            match effect {
                QueueEffect::StartUpload(item) => self.start_upload(item),
                QueueEffect::ScheduleAutoClear { drain, ids, after } => {
                    let tx = self.internal_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = tx.send(QueueEvent::AutoClear { drain, ids });
                    });
                }
                QueueEffect::Notify(event) => {
                    if let SchedulerEvent::BatchDrained { completed, failed, .. } = &event {
                        if let Some(callback) = &self.on_drain {
                            callback(*completed, *failed);
                        }
                    }
                    // 没有订阅者时发送失败是正常的
                    let _ = self.event_tx.send(event);
                }
            }
        }
    }

    fn start_upload(&mut self, item: UploadItem) {
        let id = item.id;
        let handler = self.handler.clone();
        let settle_tx = self.internal_tx.clone();
        let progress_tx = self.internal_tx.clone();
        let progress = ProgressReporter::new(move |percent| {
            let _ = progress_tx.send(QueueEvent::ItemProgress { id, percent });
        });

        info!(%id, file = %item.file_name, kind = ?item.kind, "starting upload");
        let upload = tokio::spawn(async move { handler.upload(&item, progress).await });
        self.running.insert(id, upload.abort_handle());
        tokio::spawn(async move {
            let outcome = match upload.await {
                Ok(Ok(document)) => Ok(document),
                Ok(Err(err)) => Err(err.to_string()),
                Err(join_err) if join_err.is_cancelled() => {
                    debug!(%id, "upload cancelled by shutdown");
                    return;
                }
                Err(join_err) => {
                    error!(%id, error = %join_err, "upload task aborted");
                    Err(format!("upload task aborted: {join_err}"))
                }
            };
            let _ = settle_tx.send(QueueEvent::ItemSettled { id, outcome });
        });
    }
}

/// 调度器句柄，可在多个任务间克隆
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    event_tx: broadcast::Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    /// 追加条目，返回被接受的 ID（与已有 ID 重复的条目会被忽略）
    pub async fn enqueue(&self, items: Vec<UploadItem>) -> Result<Vec<UploadId>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SchedulerCommand::Enqueue { items, reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| MediaError::ManagerShutdown)
    }

    /// 移除尚未开始的条目
    pub async fn remove(&self, id: UploadId) -> Result<()> {
        self.send(SchedulerCommand::Remove { id }).await
    }

    pub async fn clear_errors(&self) -> Result<()> {
        self.send(SchedulerCommand::ClearErrors).await
    }

    pub async fn snapshot(&self) -> Result<Vec<UploadItem>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SchedulerCommand::Snapshot { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| MediaError::ManagerShutdown)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SchedulerCommand::Shutdown).await
    }

    async fn send(&self, command: SchedulerCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| MediaError::ManagerShutdown)
    }
}

/// 上传调度器构建器
#[derive(Default)]
pub struct UploadScheduler {
    config: SchedulerConfig,
    on_drain: Option<DrainCallback>,
}

impl UploadScheduler {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_drain<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.on_drain = Some(Arc::new(callback));
        self
    }

    /// 启动调度循环
    pub fn spawn(self, handler: Arc<dyn UploadHandler>) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);

        let worker = SchedulerWorker {
            queue: UploadQueue::new(self.config),
            handler,
            on_drain: self.on_drain,
            event_tx: event_tx.clone(),
            internal_tx,
            running: HashMap::new(),
        };
        let join_handle = tokio::spawn(worker.run(command_rx, internal_rx));

        (SchedulerHandle { command_tx, event_tx }, join_handle)
    }
}
