use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use serde::Deserialize;
use crate::core::{MediaError, Result, SchedulerConfig, AUTO_CLEAR_DELAY, MAX_CONCURRENT_UPLOADS};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// S3 兼容存储凭证，上传期间只读
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct StorageCredentials {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// 公开访问的基础地址（CDN 等），为空时由 endpoint 推导
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "auto".to_string()
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CmsConfig {
    pub project_id: String,
    pub dataset: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub token: String,
    /// 覆盖默认的 API 地址
    #[serde(default)]
    pub api_host: Option<String>,
}

fn default_api_version() -> String {
    "2024-01-01".to_string()
}

impl CmsConfig {
    pub fn base_url(&self) -> String {
        match &self.api_host {
            Some(host) => host.trim_end_matches('/').to_string(),
            None => format!("https://{}.api.sanity.io", self.project_id),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UploadSettings {
    pub max_concurrent_uploads: usize,
    pub auto_clear_delay_ms: u64,
    /// 对象键前缀
    pub key_prefix: String,
    /// 无法判断视频是否有音轨时的默认值
    pub assume_audio_when_unknown: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: MAX_CONCURRENT_UPLOADS,
            auto_clear_delay_ms: AUTO_CLEAR_DELAY.as_millis() as u64,
            key_prefix: "media".to_string(),
            assume_audio_when_unknown: true,
        }
    }
}

impl UploadSettings {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent_uploads.max(1),
            auto_clear_delay: Duration::from_millis(self.auto_clear_delay_ms),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub storage: StorageCredentials,
    pub cms: CmsConfig,
    #[serde(default)]
    pub upload: UploadSettings,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|e| {
            MediaError::Config(format!("can't read {}: {}", path.display(), e))
        })?;
        config_str.parse()
    }
}

impl FromStr for Config {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        if config.storage.bucket_name.trim().is_empty() {
            return Err(MediaError::Config("storage.bucket_name is required".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [storage]
        endpoint = "https://s3.example.com"
        access_key_id = "AKIA"
        secret_access_key = "secret"
        bucket_name = "assets"

        [cms]
        project_id = "abc123"
        dataset = "production"
        token = "tok"
    "#;

    #[test]
    fn test_parse_with_defaults() {
        let config: Config = SAMPLE.parse().unwrap();
        assert_eq!(config.storage.region, "auto");
        assert!(!config.storage.force_path_style);
        assert_eq!(config.cms.api_version, "2024-01-01");
        assert_eq!(config.cms.base_url(), "https://abc123.api.sanity.io");
        assert_eq!(config.upload, UploadSettings::default());

        let scheduler = config.upload.scheduler_config();
        assert_eq!(scheduler.max_concurrent, 3);
        assert_eq!(scheduler.auto_clear_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_upload_overrides() {
        let text = format!("{SAMPLE}\n[upload]\nmax_concurrent_uploads = 0\nkey_prefix = \"library\"\n");
        let config: Config = text.parse().unwrap();
        assert_eq!(config.upload.key_prefix, "library");
        assert!(config.upload.assume_audio_when_unknown);
        // 并发数至少为 1
        assert_eq!(config.upload.scheduler_config().max_concurrent, 1);
    }

    #[test]
    fn test_missing_bucket_rejected() {
        let text = SAMPLE.replace("bucket_name = \"assets\"", "bucket_name = \"\"");
        assert!(matches!(text.parse::<Config>(), Err(MediaError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(Config::load("/definitely/not/here.toml").is_err());
    }
}
