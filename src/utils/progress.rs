use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use crate::core::{BytesCallback, ProgressReporter};

/// 已发送字节占总字节的百分比，结果在 0-100 之间
pub fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = (sent.min(total) as f64 / total as f64) * 100.0;
    ratio.floor() as u8
}

/// 把字节回调换算成百分比，只在百分比上升时上报
pub fn percent_callback(total: u64, reporter: ProgressReporter) -> BytesCallback {
    let last = Arc::new(AtomicU8::new(0));
    Arc::new(move |sent| {
        let value = percent(sent, total);
        if last.fetch_max(value, Ordering::Relaxed) < value {
            reporter.report(value);
        }
    })
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 格式化持续时间
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
