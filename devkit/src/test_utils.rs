/*!
Test harness for the status agent

Bundles everything an end-to-end test needs:
- A mock Discord webhook
- A mock A2S game server
- A scratch directory for the state file
- The config keys pointing the agent at all three
*/

use crate::a2s_stub::{A2sServerInfo, MockA2sServer};
use crate::webhook_stub::MockWebhookServer;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;

pub const STATE_FILE_NAME: &str = "last_state.json";

/// Complete test environment for the agent
pub struct TestHarness {
    pub webhook: MockWebhookServer,
    pub game: MockA2sServer,
    state_dir: TempDir,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        Self::with_server(A2sServerInfo::default()).await
    }

    pub async fn with_server(info: A2sServerInfo) -> Result<Self> {
        env_logger::try_init().ok();

        let harness = Self {
            webhook: MockWebhookServer::start().await?,
            game: MockA2sServer::start(info).await?,
            state_dir: tempfile::tempdir().context("Failed to create state dir")?,
        };
        log::info!("🧪 Test harness ready ({})", harness.state_dir.path().display());
        Ok(harness)
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.path().join(STATE_FILE_NAME)
    }

    /// Agent config keys, as they would appear in the environment
    pub fn env(&self) -> HashMap<String, String> {
        [
            ("WEBHOOK_URL", self.webhook.url()),
            ("HOST", self.game.host()),
            ("PORT", self.game.port().to_string()),
            ("STATE_FILE", self.state_file().display().to_string()),
            ("SERVER_LABEL", "Devkit".to_string()),
            ("QUERY_TIMEOUT_MS", "250".to_string()),
            ("QUERY_ATTEMPTS", "1".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Raw state file bytes, `None` if the agent never wrote one
    pub fn state_bytes(&self) -> Option<Vec<u8>> {
        std::fs::read(self.state_file()).ok()
    }

    pub fn read_state(&self) -> Result<Option<Value>> {
        match self.state_bytes() {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Message id the agent persisted
    pub fn persisted_message_id(&self) -> Result<Option<String>> {
        Ok(self
            .read_state()?
            .and_then(|state| state["messageId"].as_str().map(str::to_string)))
    }

    /// Seeds the state file as if an earlier run had written it
    pub fn write_state(&self, state: &Value) -> Result<()> {
        std::fs::write(self.state_file(), serde_json::to_vec_pretty(state)?)?;
        Ok(())
    }
}
