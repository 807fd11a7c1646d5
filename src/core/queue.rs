use std::collections::HashSet;
use std::time::Duration;
use chrono::Utc;
use tracing::{debug, info, warn};
use super::types::{
    DocumentRef,
    SchedulerConfig,
    SchedulerEvent,
    UploadId,
    UploadItem,
    UploadStatus,
};

/// 输入队列的事件
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// 追加暂存条目
    Enqueue(Vec<UploadItem>),
    /// 上传进度
    ItemProgress {
        id: UploadId,
        percent: u8,
    },
    /// 上传处理结束
    ItemSettled {
        id: UploadId,
        outcome: std::result::Result<DocumentRef, String>,
    },
    /// 用户移除等待中的条目
    Remove(UploadId),
    /// 清除所有失败条目
    ClearErrors,
    /// 延迟清理：移除该批次中已完成的条目
    AutoClear {
        drain: u64,
        ids: Vec<UploadId>,
    },
}

/// 事件处理后需要调度器执行的动作
#[derive(Debug, Clone)]
pub enum QueueEffect {
    /// 为该条目启动上传
    StartUpload(UploadItem),
    /// 在 `after` 之后回送 `QueueEvent::AutoClear`
    ScheduleAutoClear {
        drain: u64,
        ids: Vec<UploadId>,
        after: Duration,
    },
    /// 对外通知
    Notify(SchedulerEvent),
}

/// 上传队列状态，只能通过 `apply` 修改
#[derive(Debug, Clone)]
pub struct UploadQueue {
    items: Vec<UploadItem>,
    config: SchedulerConfig,
    drain_seq: u64,
    drained: bool,
}

impl UploadQueue {
    /// 并发数至少为 1，否则队列永远无法排空
    pub fn new(mut config: SchedulerConfig) -> Self {
        if config.max_concurrent == 0 {
            warn!("max_concurrent is 0, using 1");
            config.max_concurrent = 1;
        }
        Self {
            items: Vec::new(),
            config,
            drain_seq: 0,
            drained: true,
        }
    }

    pub fn items(&self) -> &[UploadItem] {
        &self.items
    }

    pub fn get(&self, id: &UploadId) -> Option<&UploadItem> {
        self.items.iter().find(|item| item.id == *id)
    }

    pub fn count(&self, status: UploadStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    pub fn is_drained(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|item| item.status.is_terminal())
    }

    /// 处理一个事件，返回需要执行的动作
    pub fn apply(&mut self, event: QueueEvent) -> Vec<QueueEffect> {
        let mut effects = Vec::new();

        match event {
            QueueEvent::Enqueue(items) => self.enqueue(items),
            QueueEvent::ItemProgress { id, percent } => self.progress(id, percent, &mut effects),
            QueueEvent::ItemSettled { id, outcome } => self.settle(id, outcome, &mut effects),
            QueueEvent::Remove(id) => self.remove_pending(id, &mut effects),
            QueueEvent::ClearErrors => {
                let ids = self.remove_where(|item| item.status == UploadStatus::Error);
                if !ids.is_empty() {
                    info!(count = ids.len(), "cleared failed uploads");
                    effects.push(QueueEffect::Notify(SchedulerEvent::Removed { ids }));
                }
            }
            QueueEvent::AutoClear { drain, ids } => {
                let targets: HashSet<UploadId> = ids.into_iter().collect();
                let removed = self.remove_where(|item| {
                    item.status == UploadStatus::Completed && targets.contains(&item.id)
                });
                if !removed.is_empty() {
                    info!(drain, count = removed.len(), "auto-cleared completed uploads");
                    effects.push(QueueEffect::Notify(SchedulerEvent::Removed { ids: removed }));
                }
            }
        }

        self.admit(&mut effects);
        self.detect_drain(&mut effects);
        effects
    }

    fn enqueue(&mut self, items: Vec<UploadItem>) {
        let mut known: HashSet<UploadId> = self.items.iter().map(|item| item.id).collect();
        for mut item in items {
            if !known.insert(item.id) {
                warn!(id = %item.id, "ignoring duplicate upload id");
                continue;
            }
            item.status = UploadStatus::Pending;
            item.progress = 0;
            item.error = None;
            debug!(id = %item.id, file = %item.file_name, "enqueued");
            self.items.push(item);
            self.drained = false;
        }
    }

    fn progress(&mut self, id: UploadId, percent: u8, effects: &mut Vec<QueueEffect>) {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            return;
        };
        if item.status != UploadStatus::Uploading {
            return;
        }
        let percent = percent.min(100);
        if percent <= item.progress {
            return;
        }
        item.progress = percent;
        effects.push(QueueEffect::Notify(SchedulerEvent::Progress { id, percent }));
    }

    fn settle(
        &mut self,
        id: UploadId,
        outcome: std::result::Result<DocumentRef, String>,
        effects: &mut Vec<QueueEffect>,
    ) {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            warn!(%id, "settled upload is no longer queued");
            return;
        };
        if item.status != UploadStatus::Uploading {
            warn!(%id, status = ?item.status, "ignoring settle for upload that is not in flight");
            return;
        }

        item.completed_at = Some(Utc::now());
        let reason = match outcome {
            Ok(document) => {
                info!(%id, document = %document.id, "upload completed");
                item.status = UploadStatus::Completed;
                item.progress = 100;
                item.document = Some(document);
                None
            }
            Err(message) => {
                warn!(%id, error = %message, "upload failed");
                item.status = UploadStatus::Error;
                item.error = Some(message.clone());
                Some(message)
            }
        };

        effects.push(QueueEffect::Notify(SchedulerEvent::StatusChanged {
            id,
            from: UploadStatus::Uploading,
            to: item.status,
            reason,
        }));
    }

    fn remove_pending(&mut self, id: UploadId, effects: &mut Vec<QueueEffect>) {
        match self.get(&id).map(|item| item.status) {
            Some(UploadStatus::Pending) => {
                self.items.retain(|item| item.id != id);
                debug!(%id, "removed pending upload");
                effects.push(QueueEffect::Notify(SchedulerEvent::Removed { ids: vec![id] }));
            }
            Some(status) => warn!(%id, ?status, "only pending uploads can be removed"),
            None => {}
        }
    }

    fn remove_where<F>(&mut self, predicate: F) -> Vec<UploadId>
    where
        F: Fn(&UploadItem) -> bool,
    {
        let removed: Vec<UploadId> = self
            .items
            .iter()
            .filter(|item| predicate(*item))
            .map(|item| item.id)
            .collect();
        self.items.retain(|item| !predicate(item));
        removed
    }

    /// 按入队顺序填满空闲槽位
    fn admit(&mut self, effects: &mut Vec<QueueEffect>) {
        let uploading = self.count(UploadStatus::Uploading);
        let available = self.config.max_concurrent.saturating_sub(uploading);
        if available == 0 {
            return;
        }

        let now = Utc::now();
        for item in self
            .items
            .iter_mut()
            .filter(|item| item.status == UploadStatus::Pending)
            .take(available)
        {
            item.status = UploadStatus::Uploading;
            item.progress = 0;
            item.started_at = Some(now);
            debug!(id = %item.id, file = %item.file_name, "admitted");
            effects.push(QueueEffect::Notify(SchedulerEvent::StatusChanged {
                id: item.id,
                from: UploadStatus::Pending,
                to: UploadStatus::Uploading,
                reason: None,
            }));
            effects.push(QueueEffect::StartUpload(item.clone()));
        }
    }

    fn detect_drain(&mut self, effects: &mut Vec<QueueEffect>) {
        if self.drained || !self.is_drained() {
            return;
        }
        self.drained = true;
        self.drain_seq += 1;

        let completed: Vec<UploadId> = self
            .items
            .iter()
            .filter(|item| item.status == UploadStatus::Completed)
            .map(|item| item.id)
            .collect();
        let failed = self.count(UploadStatus::Error);
        info!(drain = self.drain_seq, completed = completed.len(), failed, "upload batch drained");

        effects.push(QueueEffect::Notify(SchedulerEvent::BatchDrained {
            drain: self.drain_seq,
            completed: completed.len(),
            failed,
        }));
        if !completed.is_empty() {
            effects.push(QueueEffect::ScheduleAutoClear {
                drain: self.drain_seq,
                ids: completed,
                after: self.config.auto_clear_delay,
            });
        }
    }
}

impl Default for UploadQueue {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
