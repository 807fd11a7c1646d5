#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use async_trait::async_trait;
use serde_json::Value;
use media_upload::cms::{ensure_document_id, Mutation, Transaction};
use media_upload::core::{BytesCallback, DocumentStore, MediaProbe, ObjectStorage};
use media_upload::media::{ImageInfo, VideoInfo};
use media_upload::{DocumentRef, MediaError, Result};

/// 模拟对象存储
#[derive(Default)]
pub struct MockStorage {
    pub puts: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
    /// 键包含该片段时上传失败
    pub fail_put_containing: Option<String>,
    /// 删除某个键时返回的错误 (status, message)
    pub delete_errors: HashMap<String, (Option<u16>, String)>,
}

#[async_trait]
impl ObjectStorage for MockStorage {
    async fn presigned_upload_url(&self, key: &str, _content_type: &str) -> Result<String> {
        Ok(format!("https://storage.test/{key}?signature=abc"))
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        _content_type: &str,
        on_bytes: Option<BytesCallback>,
    ) -> Result<()> {
        if let Some(fragment) = &self.fail_put_containing {
            if key.contains(fragment.as_str()) {
                return Err(MediaError::storage_error(None, "network error"));
            }
        }
        let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        if let Some(callback) = on_bytes {
            callback(size / 2);
            callback(size);
        }
        self.puts.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.deletes.lock().unwrap().push(key.to_string());
        match self.delete_errors.get(key) {
            Some((status, message)) => Err(MediaError::storage_error(*status, message.clone())),
            None => Ok(()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://cdn.test/{key}")
    }
}

type DocumentFilter = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// 模拟文档存储
#[derive(Default)]
pub struct MockDocuments {
    pub documents: Mutex<HashMap<String, Value>>,
    pub created: Mutex<Vec<Value>>,
    pub commits: Mutex<Vec<Transaction>>,
    pub fail_create_when: Option<DocumentFilter>,
    pub fail_commit: bool,
}

impl MockDocuments {
    pub fn with_documents(documents: Vec<Value>) -> Self {
        let map = documents
            .into_iter()
            .map(|doc| (doc["_id"].as_str().unwrap().to_string(), doc))
            .collect();
        Self {
            documents: Mutex::new(map),
            ..Self::default()
        }
    }

    pub fn created_types(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|doc| doc["_type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MockDocuments {
    async fn create(&self, mut document: Value) -> Result<DocumentRef> {
        if let Some(filter) = &self.fail_create_when {
            if filter(&document) {
                return Err(MediaError::document_error("create rejected"));
            }
        }
        let reference = ensure_document_id(&mut document)?;
        self.created.lock().unwrap().push(document.clone());
        self.documents.lock().unwrap().insert(reference.id.clone(), document);
        Ok(reference)
    }

    async fn patch_set(&self, id: &str, fields: Value) -> Result<()> {
        let mut documents = self.documents.lock().unwrap();
        let document = documents
            .get_mut(id)
            .ok_or_else(|| MediaError::document_error(format!("no document {id}")))?;
        if let (Some(target), Some(fields)) = (document.as_object_mut(), fields.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Value>> {
        let documents = self.documents.lock().unwrap();
        Ok(ids.iter().filter_map(|id| documents.get(id).cloned()).collect())
    }

    async fn commit(&self, transaction: Transaction) -> Result<()> {
        if self.fail_commit {
            return Err(MediaError::document_error("transaction rejected"));
        }
        let mut documents = self.documents.lock().unwrap();
        for mutation in transaction.mutations() {
            if let Mutation::Delete { id } = mutation {
                documents.remove(id);
            }
        }
        drop(documents);
        self.commits.lock().unwrap().push(transaction);
        Ok(())
    }
}

/// 模拟元数据提取，缩略图写到给定目录
pub struct MockProbe {
    pub thumbnail_dir: PathBuf,
    pub thumbnails: Mutex<Vec<PathBuf>>,
    pub video_probes: AtomicUsize,
    /// 每次抽帧收到的视频时长
    pub thumbnail_durations: Mutex<Vec<f64>>,
}

impl MockProbe {
    pub fn new(thumbnail_dir: impl Into<PathBuf>) -> Self {
        Self {
            thumbnail_dir: thumbnail_dir.into(),
            thumbnails: Mutex::new(Vec::new()),
            video_probes: AtomicUsize::new(0),
            thumbnail_durations: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MediaProbe for MockProbe {
    async fn probe_image(&self, _path: &Path) -> Result<ImageInfo> {
        Ok(ImageInfo {
            width: 640,
            height: 480,
            has_alpha: false,
            lqip: Some("data:image/jpeg;base64,AAAA".to_string()),
        })
    }

    async fn probe_video(&self, _path: &Path) -> Result<VideoInfo> {
        self.video_probes.fetch_add(1, Ordering::SeqCst);
        Ok(VideoInfo {
            duration_secs: 12.5,
            width: 1920,
            height: 1080,
            has_audio: true,
        })
    }

    async fn extract_thumbnail(&self, _path: &Path, duration_secs: f64) -> Result<PathBuf> {
        self.thumbnail_durations.lock().unwrap().push(duration_secs);
        let index = self.thumbnails.lock().unwrap().len();
        let path = self.thumbnail_dir.join(format!("thumb-{index}.jpg"));
        tokio::fs::write(&path, vec![0xFFu8; 256]).await?;
        self.thumbnails.lock().unwrap().push(path.clone());
        Ok(path)
    }
}

/// 在目录中写入指定大小的文件
pub async fn write_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    tokio::fs::write(&path, vec![1u8; size]).await.unwrap();
    path
}
