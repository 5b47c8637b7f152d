//! Durable audit trail for WebSocket dispatch outcomes.
//!
//! Entries are appended as JSON lines to `websocket-audit.log` inside the
//! configured directory. The file rotates once it crosses the size limit
//! and only the newest rotated files are kept. Logging must never take an
//! operation down: every I/O failure is traced and swallowed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::error;

const LOG_FILE_NAME: &str = "websocket-audit.log";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Error,
    Forbidden,
    RateLimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

pub struct AuditLogger {
    log_file: PathBuf,
    max_file_bytes: u64,
    max_rotated_files: usize,
    // Serializes append+rotate so concurrent connections can't interleave
    // half-written lines.
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(log_dir: impl AsRef<Path>, max_file_bytes: u64, max_rotated_files: usize) -> Self {
        let log_dir = log_dir.as_ref();
        if let Err(err) = std::fs::create_dir_all(log_dir) {
            error!(?err, dir = %log_dir.display(), "failed to create audit log directory");
        }
        Self {
            log_file: log_dir.join(LOG_FILE_NAME),
            max_file_bytes,
            max_rotated_files,
            write_lock: Mutex::new(()),
        }
    }

    /// Append one entry, rotating first if the active file is over the
    /// size limit. Failures are traced, never returned.
    pub async fn log(&self, entry: AuditEntry) {
        let _guard = self.write_lock.lock().await;
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(err) => {
                error!(?err, "failed to serialize audit entry");
                return;
            }
        };

        if let Err(err) = self.rotate_if_needed().await {
            error!(?err, "failed to rotate audit log");
        }

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(err) = result {
            error!(?err, "failed to write audit log entry");
        }
    }

    async fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match tokio::fs::metadata(&self.log_file).await {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()), // no file yet
        };
        if size <= self.max_file_bytes {
            return Ok(());
        }

        let stamp = Utc::now()
            .to_rfc3339()
            .replace([':', '.'], "-");
        let rotated = self.log_file.with_file_name(format!("{LOG_FILE_NAME}.{stamp}"));
        tokio::fs::rename(&self.log_file, &rotated).await?;
        self.cleanup_rotated().await
    }

    async fn cleanup_rotated(&self) -> std::io::Result<()> {
        let dir = match self.log_file.parent() {
            Some(dir) => dir,
            None => return Ok(()),
        };
        let prefix = format!("{LOG_FILE_NAME}.");
        let mut rotated: Vec<PathBuf> = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                rotated.push(entry.path());
            }
        }
        if rotated.len() <= self.max_rotated_files {
            return Ok(());
        }
        // Timestamps sort lexicographically; drop the oldest surplus.
        rotated.sort();
        let surplus = rotated.len() - self.max_rotated_files;
        for path in rotated.into_iter().take(surplus) {
            let _ = tokio::fs::remove_file(path).await;
        }
        Ok(())
    }

    /// Last `limit` entries of the active file, oldest first. Unparsable
    /// lines are skipped.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let content = tokio::fs::read_to_string(&self.log_file)
            .await
            .unwrap_or_default();
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(limit);
        lines[start..]
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

/// Convenience constructor for dispatch-site call sites.
pub fn entry(action: &str, result: AuditResult) -> AuditEntry {
    AuditEntry {
        timestamp: Utc::now(),
        user_id: None,
        email: None,
        action: action.to_string(),
        payload: None,
        result,
        error_message: None,
        ip: None,
        user_agent: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(action: &str, result: AuditResult) -> AuditEntry {
        AuditEntry {
            user_id: Some("user-1".into()),
            ip: Some("127.0.0.1".into()),
            ..entry(action, result)
        }
    }

    #[tokio::test]
    async fn appends_json_lines() {
        let td = tempdir().unwrap();
        let logger = AuditLogger::new(td.path(), 10 * 1024 * 1024, 10);
        logger.log(sample("ping", AuditResult::Success)).await;
        logger.log(sample("BULK_ACTION_START", AuditResult::Forbidden)).await;

        let entries = logger.recent(10).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "ping");
        assert_eq!(entries[1].result, AuditResult::Forbidden);
    }

    #[tokio::test]
    async fn recent_respects_limit() {
        let td = tempdir().unwrap();
        let logger = AuditLogger::new(td.path(), 10 * 1024 * 1024, 10);
        for i in 0..5 {
            logger.log(sample(&format!("a{i}"), AuditResult::Success)).await;
        }
        let entries = logger.recent(2).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "a3");
        assert_eq!(entries[1].action, "a4");
    }

    #[tokio::test]
    async fn rotates_over_size_limit() {
        let td = tempdir().unwrap();
        // Tiny limit so the second write triggers a rotation.
        let logger = AuditLogger::new(td.path(), 64, 10);
        logger.log(sample("first", AuditResult::Success)).await;
        logger.log(sample("second", AuditResult::Success)).await;

        let rotated: Vec<_> = std::fs::read_dir(td.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("websocket-audit.log.")
            })
            .collect();
        assert_eq!(rotated.len(), 1);

        // The active file holds only the entry written after rotation.
        let entries = logger.recent(10).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "second");
    }

    #[tokio::test]
    async fn omits_absent_optional_fields() {
        let e = entry("ping", AuditResult::Success);
        let json = serde_json::to_string(&e).unwrap();
        assert!(!json.contains("user_id"));
        assert!(!json.contains("error_message"));
    }
}
