//! S3 兼容对象存储：预签名上传、删除与公开地址推导

mod progress;

use std::path::Path;
use std::time::Duration;
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Body;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;
use crate::config::StorageCredentials;
use crate::core::{BytesCallback, MediaError, ObjectStorage, Result};

pub use progress::ProgressStream;

/// 预签名地址有效期（15 分钟）
const PRESIGNED_URL_EXPIRY: Duration = Duration::from_secs(900);

/// 连通性检测使用的占位键，不会真正写入
pub const CONNECTION_TEST_KEY: &str = "__connection-test__";

/// 文件名只保留小写字母、数字、`.`、`-`、`_`
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_') {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 原始文件的对象键：`{prefix}/{uuid}-{file-name}`
pub fn object_key(prefix: &str, file_name: &str) -> String {
    join_key(prefix, &format!("{}-{}", Uuid::new_v4(), sanitize_file_name(file_name)))
}

/// 视频缩略图的对象键
pub fn thumbnail_key(prefix: &str) -> String {
    join_key(prefix, &format!("thumbnails/{}.jpg", Uuid::new_v4()))
}

/// 对象对应的预览衍生文件键：与原对象同目录下的 `previews/`
pub fn preview_key(key: &str) -> String {
    match key.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/previews/{name}"),
        None => format!("previews/{key}"),
    }
}

fn join_key(prefix: &str, rest: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        rest.to_string()
    } else {
        format!("{prefix}/{rest}")
    }
}

/// 推导对象的公开访问地址
pub fn public_object_url(credentials: &StorageCredentials, key: &str) -> String {
    if let Some(base) = credentials.public_url.as_deref().filter(|b| !b.is_empty()) {
        return format!("{}/{}", base.trim_end_matches('/'), key);
    }

    let endpoint = credentials.endpoint.trim_end_matches('/');
    if credentials.force_path_style {
        return format!("{}/{}/{}", endpoint, credentials.bucket_name, key);
    }

    match Url::parse(endpoint) {
        Ok(url) if url.host_str().is_some() => {
            let host = url.host_str().unwrap_or_default();
            let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
            format!("{}://{}.{}{}/{}", url.scheme(), credentials.bucket_name, host, port, key)
        }
        _ => format!("{}/{}/{}", endpoint, credentials.bucket_name, key),
    }
}

fn sdk_error<E>(err: SdkError<E, HttpResponse>) -> MediaError
where
    E: std::error::Error + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    MediaError::storage_error(status, DisplayErrorContext(&err).to_string())
}

/// 基于 aws-sdk-s3 的对象存储
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    http: reqwest::Client,
    credentials: StorageCredentials,
}

impl S3Storage {
    pub fn new(credentials: &StorageCredentials) -> Self {
        let static_credentials = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            None,
            None,
            "media-upload",
        );
        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(credentials.region.clone()))
            .endpoint_url(credentials.endpoint.clone())
            .credentials_provider(static_credentials)
            .force_path_style(credentials.force_path_style)
            .build();

        Self {
            client: Client::from_conf(config),
            http: reqwest::Client::new(),
            credentials: credentials.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.credentials.bucket_name
    }

    /// 预签名占位键并访问存储桶
    pub async fn probe(&self) -> Result<()> {
        self.presigned_upload_url(CONNECTION_TEST_KEY, "text/plain").await?;
        self.client
            .head_bucket()
            .bucket(self.bucket())
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}

/// 检测凭证是否可用
pub async fn validate_credentials(credentials: &StorageCredentials) -> bool {
    match S3Storage::new(credentials).probe().await {
        Ok(()) => true,
        Err(err) => {
            warn!(bucket = %credentials.bucket_name, error = %err, "storage credentials check failed");
            false
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn presigned_upload_url(&self, key: &str, content_type: &str) -> Result<String> {
        let presigning = PresigningConfig::expires_in(PRESIGNED_URL_EXPIRY)
            .map_err(|e| MediaError::internal_error(format!("invalid presigning config: {e}")))?;

        let request = self
            .client
            .put_object()
            .bucket(self.bucket())
            .key(key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(sdk_error)?;

        Ok(request.uri().to_string())
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        on_bytes: Option<BytesCallback>,
    ) -> Result<()> {
        let url = self.presigned_upload_url(key, content_type).await?;
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let stream = ProgressStream::new(ReaderStream::new(file), on_bytes);

        debug!(key, size, "uploading object");
        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size)
            .body(Body::wrap_stream(stream))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::storage_error(
                Some(status.as_u16()),
                format!("upload of {key} failed with status {status}"),
            ));
        }
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(self.bucket())
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;
        debug!(key, "deleted object");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_object_url(&self.credentials, key)
    }
}
