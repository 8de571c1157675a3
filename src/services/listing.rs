use crate::models::FileStatus;
use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;

const UNITS: [&str; 6] = ["B", "kB", "MB", "GB", "TB", "PB"];

/// Decimal, three significant digits, trailing zeros dropped: 1195211 -> "1.2 MB".
pub fn format_size(bytes: u64) -> String {
    if bytes < 1000 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    let integer_digits = (value.trunc() as u64).to_string().len();
    let decimals = 3usize.saturating_sub(integer_digits);
    let mut text = format!("{value:.decimals$}");
    if text.contains('.') {
        text = text.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{text} {}", UNITS[unit])
}

fn current_owner() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Regular files directly under `directory`, sorted by name.
/// A missing directory lists as empty.
pub async fn list_status(directory: &Path) -> io::Result<Vec<FileStatus>> {
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let owner = current_owner();
    let mut statuses = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        let timestamp = metadata.created().or_else(|_| metadata.modified())?;
        statuses.push(FileStatus {
            size: format_size(metadata.len()),
            last_modified: DateTime::<Utc>::from(timestamp),
            owner: owner.clone(),
            file: entry.file_name().to_string_lossy().into_owned(),
        });
    }

    statuses.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(statuses)
}
