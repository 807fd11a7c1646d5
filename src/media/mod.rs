//! 媒体元数据提取

use std::io::Cursor;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageOutputFormat};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;
use crate::core::{MediaError, MediaProbe, Result};

/// LQIP 占位图宽度
const LQIP_SIZE: u32 = 20;
const LQIP_QUALITY: u8 = 60;

/// 视频缩略图取帧位置（秒）
const THUMBNAIL_SEEK_SECS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    /// 低清占位图 data URL
    pub lqip: Option<String>,
}

impl ImageInfo {
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

/// 从内存中的图片数据提取尺寸、透明通道与 LQIP
pub fn image_info_from_bytes(data: &[u8]) -> Result<ImageInfo> {
    let img = image::load_from_memory(data)
        .map_err(|e| MediaError::probe_error(format!("can't decode image: {e}")))?;

    let lqip = encode_lqip(&img).ok();
    Ok(ImageInfo {
        width: img.width(),
        height: img.height(),
        has_alpha: img.color().has_alpha(),
        lqip,
    })
}

fn encode_lqip(img: &DynamicImage) -> Result<String> {
    let thumb = DynamicImage::ImageRgb8(img.thumbnail(LQIP_SIZE, LQIP_SIZE).to_rgb8());
    let mut buf = Vec::new();
    thumb
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(LQIP_QUALITY))
        .map_err(|e| MediaError::probe_error(format!("can't encode lqip: {e}")))?;
    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&buf)))
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// 解析 `ffprobe -print_format json` 的输出
///
/// 没有任何流信息时无法判断音轨，按 `assume_audio_when_unknown` 处理。
pub fn parse_ffprobe(json: &[u8], assume_audio_when_unknown: bool) -> Result<VideoInfo> {
    let output: FfprobeOutput = serde_json::from_slice(json)?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = if output.streams.is_empty() {
        assume_audio_when_unknown
    } else {
        output
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"))
    };

    let duration_secs = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| video.and_then(|v| v.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoInfo {
        duration_secs,
        width: video.and_then(|v| v.width).unwrap_or(0),
        height: video.and_then(|v| v.height).unwrap_or(0),
        has_audio,
    })
}

/// 缩略图取帧位置，短视频取首帧
pub fn thumbnail_seek(duration_secs: f64) -> f64 {
    if duration_secs > THUMBNAIL_SEEK_SECS {
        THUMBNAIL_SEEK_SECS
    } else {
        0.0
    }
}

/// 本地提取：图片用 `image` 解码，视频调用 ffprobe / ffmpeg
#[derive(Debug, Clone)]
pub struct LocalProbe {
    pub ffprobe: PathBuf,
    pub ffmpeg: PathBuf,
    pub assume_audio_when_unknown: bool,
}

impl Default for LocalProbe {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: PathBuf::from("ffmpeg"),
            assume_audio_when_unknown: true,
        }
    }
}

impl LocalProbe {
    pub fn new(assume_audio_when_unknown: bool) -> Self {
        Self {
            assume_audio_when_unknown,
            ..Self::default()
        }
    }
}

async fn run_tool(command: &mut Command, tool: &Path) -> Result<Vec<u8>> {
    let output = command
        .output()
        .await
        .map_err(|e| MediaError::probe_error(format!("can't run {}: {e}", tool.display())))?;
    if !output.status.success() {
        return Err(MediaError::probe_error(format!(
            "{} exited with {}: {}",
            tool.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

#[async_trait]
impl MediaProbe for LocalProbe {
    async fn probe_image(&self, path: &Path) -> Result<ImageInfo> {
        let data = tokio::fs::read(path).await?;
        tokio::task::spawn_blocking(move || image_info_from_bytes(&data))
            .await
            .map_err(|e| MediaError::internal_error(format!("image probe task failed: {e}")))?
    }

    async fn probe_video(&self, path: &Path) -> Result<VideoInfo> {
        let stdout = run_tool(
            Command::new(&self.ffprobe)
                .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
                .arg(path),
            &self.ffprobe,
        )
        .await?;
        parse_ffprobe(&stdout, self.assume_audio_when_unknown)
    }

    async fn extract_thumbnail(&self, path: &Path, duration_secs: f64) -> Result<PathBuf> {
        let seek = thumbnail_seek(duration_secs);
        let seek_arg = seek.to_string();
        let output = std::env::temp_dir().join(format!("media-thumb-{}.jpg", Uuid::new_v4()));

        debug!(video = %path.display(), seek, "extracting thumbnail");
        run_tool(
            Command::new(&self.ffmpeg)
                .args(["-y", "-v", "error", "-ss", seek_arg.as_str(), "-i"])
                .arg(path)
                .args(["-frames:v", "1", "-q:v", "3"])
                .arg(&output),
            &self.ffmpeg,
        )
        .await?;

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(MediaError::probe_error("ffmpeg produced no thumbnail frame"));
        }
        Ok(output)
    }
}
