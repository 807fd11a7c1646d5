use std::sync::Arc;
use std::time::Instant;
use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use media_upload::cms::HttpDocumentStore;
use media_upload::config::{Config, DEFAULT_CONFIG_PATH};
use media_upload::media::LocalProbe;
use media_upload::storage::{validate_credentials, S3Storage};
use media_upload::utils::{format_bytes, format_duration};
use media_upload::{
    bulk_delete,
    AssetMetadata,
    MediaUploadHandler,
    SchedulerEvent,
    UploadItem,
    UploadScheduler,
    UploadStatus,
};

const USAGE: &str = "usage: media-upload [--config <path>] <command>

commands:
  check                                  verify storage credentials
  upload [--tag <id>]... <file>...       upload images and videos
  delete <document-id>...                delete media documents and stored objects";

/// 取出 `--name value` 形式的参数，可重复出现
fn take_flag(args: &mut Vec<String>, name: &str) -> Vec<String> {
    let mut values = Vec::new();
    while let Some(pos) = args.iter().position(|a| a == name) {
        args.remove(pos);
        if pos < args.len() {
            values.push(args.remove(pos));
        }
    }
    values
}

async fn check(config: &Config) -> anyhow::Result<()> {
    if validate_credentials(&config.storage).await {
        println!("storage credentials are valid ({})", config.storage.bucket_name);
        Ok(())
    } else {
        bail!("storage credentials are invalid or the bucket is unreachable")
    }
}

async fn upload(config: &Config, mut args: Vec<String>) -> anyhow::Result<()> {
    let tags = take_flag(&mut args, "--tag");
    if args.is_empty() {
        bail!("no files given\n\n{USAGE}");
    }
    if !validate_credentials(&config.storage).await {
        bail!("storage credentials are invalid, nothing was uploaded");
    }

    let mut items = Vec::with_capacity(args.len());
    for path in &args {
        let metadata = AssetMetadata {
            tags: tags.clone(),
            ..AssetMetadata::default()
        };
        let item = UploadItem::stage(path, metadata)
            .await
            .with_context(|| format!("can't stage {path}"))?;
        println!("staged {} ({})", item.file_name, format_bytes(item.size));
        items.push(item);
    }

    let handler = MediaUploadHandler::new(
        Arc::new(S3Storage::new(&config.storage)),
        Arc::new(HttpDocumentStore::new(config.cms.clone())),
        Arc::new(LocalProbe::new(config.upload.assume_audio_when_unknown)),
    )
    .key_prefix(config.upload.key_prefix.clone());

    let (scheduler, join_handle) = UploadScheduler::builder()
        .config(config.upload.scheduler_config())
        .spawn(Arc::new(handler));
    let mut events = scheduler.subscribe();
    let started = Instant::now();
    scheduler.enqueue(items).await?;

    loop {
        match events.recv().await {
            Ok(SchedulerEvent::Progress { id, percent }) => println!("{id}: {percent}%"),
            Ok(SchedulerEvent::StatusChanged { id, to: UploadStatus::Error, reason, .. }) => {
                eprintln!("{id}: failed: {}", reason.unwrap_or_default());
            }
            Ok(SchedulerEvent::BatchDrained { .. }) => break,
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) => {
                // 可能错过了 drain 事件，直接检查队列
                let items = scheduler.snapshot().await?;
                if items.iter().all(|item| item.status.is_terminal()) {
                    break;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    let items = scheduler.snapshot().await?;
    scheduler.shutdown().await?;
    join_handle.await?;

    println!("batch finished in {}", format_duration(started.elapsed()));
    let mut failed = 0;
    for item in &items {
        match (&item.status, &item.document) {
            (UploadStatus::Completed, Some(document)) => {
                println!("{} -> {} ({})", item.file_name, document.id, document.doc_type);
            }
            _ => {
                failed += 1;
                println!("{} -> error: {}", item.file_name, item.error.as_deref().unwrap_or("unknown"));
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} uploads failed", items.len());
    }
    Ok(())
}

async fn delete(config: &Config, ids: Vec<String>) -> anyhow::Result<()> {
    if ids.is_empty() {
        bail!("no document ids given\n\n{USAGE}");
    }
    let storage = S3Storage::new(&config.storage);
    let documents = HttpDocumentStore::new(config.cms.clone());
    let report = bulk_delete(&storage, &documents, &ids).await?;

    println!("deleted {} documents", report.deleted_documents.len());
    for id in &report.missing {
        println!("not found: {id}");
    }
    for failure in &report.storage_failures {
        println!("storage cleanup failed for {}: {}", failure.key, failure.error);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_flag(&mut args, "--config")
        .pop()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    if args.is_empty() {
        println!("{USAGE}");
        return Ok(());
    }
    let command = args.remove(0);
    let config = Config::load(&config_path)?;

    match command.as_str() {
        "check" => check(&config).await,
        "upload" => upload(&config, args).await,
        "delete" => delete(&config, args).await,
        other => bail!("unknown command: {other}\n\n{USAGE}"),
    }
}
