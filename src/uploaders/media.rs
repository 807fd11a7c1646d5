use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use crate::cms::{IMAGE_ASSET_TYPE, VIDEO_ASSET_TYPE};
use crate::core::{
    AssetMetadata,
    DocumentRef,
    DocumentStore,
    MediaKind,
    MediaProbe,
    ObjectStorage,
    ProgressReporter,
    Result,
    UploadHandler,
    UploadItem,
};
use crate::storage::{object_key, thumbnail_key};
use crate::utils::percent_callback;

/// 一次图片上传的输入
struct ImageSource<'a> {
    path: &'a Path,
    key: String,
    file_name: String,
    content_type: &'a str,
    size: u64,
}

/// 图片 / 视频上传：先写对象存储，再创建文档
///
/// 任一步骤失败直接返回错误，不做回滚，已写入的对象可能成为孤儿。
pub struct MediaUploadHandler {
    storage: Arc<dyn ObjectStorage>,
    documents: Arc<dyn DocumentStore>,
    probe: Arc<dyn MediaProbe>,
    key_prefix: String,
}

impl MediaUploadHandler {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        documents: Arc<dyn DocumentStore>,
        probe: Arc<dyn MediaProbe>,
    ) -> Self {
        Self {
            storage,
            documents,
            probe,
            key_prefix: "media".to_string(),
        }
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    async fn upload_image(
        &self,
        source: ImageSource<'_>,
        metadata: &AssetMetadata,
        progress: Option<ProgressReporter>,
    ) -> Result<DocumentRef> {
        let info = self.probe.probe_image(source.path).await?;

        let on_bytes = progress.map(|reporter| percent_callback(source.size, reporter));
        self.storage
            .put_file(&source.key, source.path, source.content_type, on_bytes)
            .await?;

        let mut document = base_document(
            IMAGE_ASSET_TYPE,
            &source.key,
            self.storage.public_url(&source.key),
            source.content_type,
            source.size,
            &source.file_name,
            metadata,
        );
        document.insert(
            "metadata".to_string(),
            json!({
                "dimensions": {
                    "width": info.width,
                    "height": info.height,
                    "aspectRatio": info.aspect_ratio(),
                },
                "hasAlpha": info.has_alpha,
                "lqip": info.lqip,
            }),
        );

        self.documents
            .create(Value::Object(document))
            .await
            .inspect_err(|err| {
                warn!(key = %source.key, error = %err, "image document create failed, stored object is orphaned");
            })
    }

    async fn upload_video(&self, item: &UploadItem, progress: ProgressReporter) -> Result<DocumentRef> {
        let info = self.probe.probe_video(&item.file).await?;
        let thumbnail = self.probe.extract_thumbnail(&item.file, info.duration_secs).await?;

        let result = self.upload_video_with_thumbnail(item, &info, &thumbnail, progress).await;
        if let Err(err) = tokio::fs::remove_file(&thumbnail).await {
            debug!(path = %thumbnail.display(), error = %err, "can't remove thumbnail frame");
        }
        result
    }

    async fn upload_video_with_thumbnail(
        &self,
        item: &UploadItem,
        info: &crate::media::VideoInfo,
        thumbnail: &Path,
        progress: ProgressReporter,
    ) -> Result<DocumentRef> {
        let key = object_key(&self.key_prefix, &item.file_name);
        let on_bytes = percent_callback(item.size, progress);
        self.storage
            .put_file(&key, &item.file, &item.content_type, Some(on_bytes))
            .await?;

        // 缩略图走图片路径，不占用外层并发槽位
        let thumbnail_size = tokio::fs::metadata(thumbnail).await?.len();
        let thumbnail_metadata = AssetMetadata {
            title: item.metadata.title.clone(),
            alt: item.metadata.title.clone(),
            ..AssetMetadata::default()
        };
        let thumbnail_doc = self
            .upload_image(
                ImageSource {
                    path: thumbnail,
                    key: thumbnail_key(&self.key_prefix),
                    file_name: format!("{}-thumbnail.jpg", file_stem(&item.file_name)),
                    content_type: "image/jpeg",
                    size: thumbnail_size,
                },
                &thumbnail_metadata,
                None,
            )
            .await
            .inspect_err(|err| {
                warn!(id = %item.id, key = %key, error = %err, "thumbnail upload failed, video object is orphaned");
            })?;

        let mut document = base_document(
            VIDEO_ASSET_TYPE,
            &key,
            self.storage.public_url(&key),
            &item.content_type,
            item.size,
            &item.file_name,
            &item.metadata,
        );
        document.insert("duration".to_string(), json!(info.duration_secs));
        document.insert("hasAudio".to_string(), json!(info.has_audio));
        document.insert(
            "metadata".to_string(),
            json!({
                "dimensions": {
                    "width": info.width,
                    "height": info.height,
                    "aspectRatio": if info.height == 0 { 0.0 } else { info.width as f64 / info.height as f64 },
                },
            }),
        );
        document.insert(
            "thumbnail".to_string(),
            json!({ "_type": "reference", "_ref": thumbnail_doc.id }),
        );

        self.documents
            .create(Value::Object(document))
            .await
            .inspect_err(|err| {
                warn!(
                    id = %item.id,
                    key = %key,
                    thumbnail = %thumbnail_doc.id,
                    error = %err,
                    "video document create failed, object and thumbnail are orphaned"
                );
            })
    }
}

#[async_trait]
impl UploadHandler for MediaUploadHandler {
    async fn upload(&self, item: &UploadItem, progress: ProgressReporter) -> Result<DocumentRef> {
        let document = match item.kind {
            MediaKind::Image => {
                let source = ImageSource {
                    path: &item.file,
                    key: object_key(&self.key_prefix, &item.file_name),
                    file_name: item.file_name.clone(),
                    content_type: &item.content_type,
                    size: item.size,
                };
                self.upload_image(source, &item.metadata, Some(progress)).await?
            }
            MediaKind::Video => self.upload_video(item, progress).await?,
        };
        info!(id = %item.id, document = %document.id, kind = ?item.kind, "media document created");
        Ok(document)
    }
}

fn file_stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

fn base_document(
    doc_type: &str,
    key: &str,
    url: String,
    content_type: &str,
    size: u64,
    file_name: &str,
    metadata: &AssetMetadata,
) -> Map<String, Value> {
    let mut document = Map::new();
    document.insert("_type".to_string(), json!(doc_type));
    document.insert("storageKey".to_string(), json!(key));
    document.insert("url".to_string(), json!(url));
    document.insert("mimeType".to_string(), json!(content_type));
    document.insert("size".to_string(), json!(size));
    document.insert("originalFilename".to_string(), json!(file_name));

    let fields = [
        ("title", &metadata.title),
        ("alt", &metadata.alt),
        ("caption", &metadata.caption),
        ("description", &metadata.description),
    ];
    for (name, value) in fields {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            document.insert(name.to_string(), json!(value));
        }
    }

    if !metadata.tags.is_empty() {
        let tags: Vec<Value> = metadata
            .tags
            .iter()
            .map(|tag| json!({ "_type": "reference", "_ref": tag, "_key": tag, "_weak": true }))
            .collect();
        document.insert("tags".to_string(), Value::Array(tags));
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_document_skips_empty_metadata() {
        let metadata = AssetMetadata {
            title: Some("Sunset".to_string()),
            alt: Some(String::new()),
            tags: vec!["tag-1".to_string()],
            ..AssetMetadata::default()
        };
        let doc = base_document(
            IMAGE_ASSET_TYPE,
            "media/a.png",
            "https://cdn/media/a.png".to_string(),
            "image/png",
            10,
            "a.png",
            &metadata,
        );
        assert_eq!(doc["_type"], "media.imageAsset");
        assert_eq!(doc["title"], "Sunset");
        assert!(!doc.contains_key("alt"));
        assert!(!doc.contains_key("caption"));
        assert_eq!(doc["tags"][0]["_ref"], "tag-1");
        assert_eq!(doc["tags"][0]["_weak"], true);
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("clip.final.mp4"), "clip.final");
        assert_eq!(file_stem("noext"), "noext");
    }
}
