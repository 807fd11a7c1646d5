//! 批量删除：先清理对象存储，再用一个事务删除所有文档
//!
//! 存储删除失败只记录不阻塞，孤儿对象好过指向不存在对象的文档。

use std::collections::HashSet;
use futures::future::join_all;
use serde_json::Value;
use tracing::{error, info, warn};
use crate::cms::{Transaction, VIDEO_ASSET_TYPE};
use crate::core::{DocumentStore, ObjectStorage, Result};
use crate::storage::preview_key;

/// 单个对象删除失败
#[derive(Debug, Clone, PartialEq)]
pub struct StorageFailure {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BulkDeleteReport {
    /// 事务中删除的文档（含视频缩略图文档）
    pub deleted_documents: Vec<String>,
    /// 请求中不存在的文档
    pub missing: Vec<String>,
    pub storage_failures: Vec<StorageFailure>,
}

fn storage_key(document: &Value) -> Option<&str> {
    document.get("storageKey").and_then(Value::as_str)
}

fn document_id(document: &Value) -> Option<&str> {
    document.get("_id").and_then(Value::as_str)
}

fn thumbnail_ref(document: &Value) -> Option<&str> {
    if document.get("_type").and_then(Value::as_str) != Some(VIDEO_ASSET_TYPE) {
        return None;
    }
    document
        .get("thumbnail")
        .and_then(|t| t.get("_ref"))
        .and_then(Value::as_str)
}

/// 删除一个文档关联的对象：原始对象与预览衍生文件
async fn delete_objects(storage: &dyn ObjectStorage, key: &str) -> Vec<StorageFailure> {
    let mut failures = Vec::new();

    if let Err(err) = storage.delete_object(key).await {
        warn!(key, error = %err, "can't delete stored object");
        failures.push(StorageFailure { key: key.to_string(), error: err.to_string() });
    }

    let preview = preview_key(key);
    match storage.delete_object(&preview).await {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {}
        Err(err) => {
            error!(key = %preview, error = %err, "can't delete preview derivative");
            failures.push(StorageFailure { key: preview, error: err.to_string() });
        }
    }
    failures
}

/// 删除选中的媒体文档
pub async fn bulk_delete(
    storage: &dyn ObjectStorage,
    documents: &dyn DocumentStore,
    ids: &[String],
) -> Result<BulkDeleteReport> {
    let mut report = BulkDeleteReport::default();
    if ids.is_empty() {
        return Ok(report);
    }

    let selected = documents.get_documents(ids).await?;
    let found: HashSet<&str> = selected.iter().filter_map(document_id).collect();
    report.missing = ids
        .iter()
        .filter(|id| !found.contains(id.as_str()))
        .cloned()
        .collect();

    let thumbnail_ids: Vec<String> = selected
        .iter()
        .filter_map(thumbnail_ref)
        .map(str::to_string)
        .collect();
    let thumbnails = if thumbnail_ids.is_empty() {
        Vec::new()
    } else {
        documents.get_documents(&thumbnail_ids).await?
    };

    let keys: Vec<&str> = selected
        .iter()
        .chain(thumbnails.iter())
        .filter_map(storage_key)
        .collect();
    let failures = join_all(keys.iter().map(|key| delete_objects(storage, key))).await;
    report.storage_failures = failures.into_iter().flatten().collect();

    let mut transaction = Transaction::new();
    let mut seen = HashSet::new();
    for id in selected
        .iter()
        .filter_map(document_id)
        .chain(thumbnail_ids.iter().map(String::as_str))
    {
        if seen.insert(id.to_string()) {
            transaction = transaction.delete(id);
            report.deleted_documents.push(id.to_string());
        }
    }

    documents.commit(transaction).await?;
    info!(
        documents = report.deleted_documents.len(),
        storage_failures = report.storage_failures.len(),
        "bulk delete committed"
    );
    Ok(report)
}
