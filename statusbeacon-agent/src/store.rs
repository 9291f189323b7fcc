/**
 * STATE FILE - Durable last-known status record
 *
 * ROLE: Remembers what was last posted, when, and as which Discord message,
 * so a restart keeps editing the same message instead of posting a new one.
 *
 * FORMAT: pretty JSON, `{"state": {...}, "lastPostAt": <unix ms>, "messageId": "..."}`.
 * Every field is optional; a missing or unreadable file means "no prior state".
 *
 * WRITES: temp file + rename, only after the webhook confirmed the post.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::snapshot::ServerSnapshot;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid state file {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Last snapshot posted, when, and the message it lives in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastKnownRecord {
    #[serde(rename = "state", default)]
    pub snapshot: Option<ServerSnapshot>,
    #[serde(
        rename = "lastPostAt",
        default,
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_id: Option<String>,
}

impl LastKnownRecord {
    /// Message id worth editing (an empty id counts as none)
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the record; `Ok(None)` when the file does not exist yet
    pub async fn try_load(&self) -> Result<Option<LastKnownRecord>, StateError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() || content.trim() == "null" {
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StateError::Format {
                path: self.path.clone(),
                source,
            })
    }

    /// Reads the record, treating any failure as "no prior state"
    pub async fn load(&self) -> LastKnownRecord {
        match self.try_load().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!("no state file at {}, starting fresh", self.path.display());
                LastKnownRecord::default()
            }
            Err(e) => {
                warn!("ignoring unreadable state: {}", e);
                LastKnownRecord::default()
            }
        }
    }

    /// Atomically replaces the file with `record`
    pub async fn save(&self, record: &LastKnownRecord) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(record).map_err(|source| StateError::Format {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| self.io_error(source))?;

        if let Err(source) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error(source));
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> LastKnownRecord {
        LastKnownRecord {
            snapshot: Some(ServerSnapshot {
                reachable: true,
                player_count: 3,
                capacity: 20,
                display_name: "Convoy".to_string(),
            }),
            posted_at: Some(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()),
            message_id: Some("1234567890".to_string()),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("last_state.json"));
        assert!(file.try_load().await.unwrap().is_none());
        assert_eq!(file.load().await, LastKnownRecord::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested/last_state.json"));
        file.save(&record()).await.unwrap();

        assert_eq!(file.load().await, record());
        assert!(!dir.path().join("nested/last_state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let file = StateFile::new(&path);
        assert!(matches!(file.try_load().await, Err(StateError::Format { .. })));
        assert_eq!(file.load().await, LastKnownRecord::default());
    }

    #[tokio::test]
    async fn test_reads_existing_deployment_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_state.json");
        std::fs::write(
            &path,
            r#"{
  "state": { "online": true, "players": 3, "maxplayers": 20, "name": "Convoy" },
  "lastPostAt": 1700000000123,
  "messageId": "1234567890"
}"#,
        )
        .unwrap();

        assert_eq!(StateFile::new(&path).load().await, record());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        // parent "directory" is a regular file
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let file = StateFile::new(blocker.join("last_state.json"));
        assert!(matches!(file.save(&record()).await, Err(StateError::Io { .. })));
        assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "x");
    }

    #[test]
    fn test_blank_message_id_is_ignored() {
        let mut r = record();
        r.message_id = Some("  ".to_string());
        assert_eq!(r.message_id(), None);
    }
}
