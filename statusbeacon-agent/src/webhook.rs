//! Discord webhook client and the status message upsert
//!
//! Features:
//! - Create (`POST {url}?wait=true`) and edit (`PATCH {url}/messages/{id}`)
//! - Error classes the caller can branch on without looking at HTTP codes
//! - Upsert: edit the tracked message, recreate it only if Discord says it is gone

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::render::NotificationPayload;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("statusbeacon-agent/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum WebhookError {
    /// The targeted message no longer exists
    #[error("message not found")]
    NotFound,
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("webhook rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected webhook response: {0}")]
    InvalidResponse(String),
}

impl WebhookError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Create/edit operations on the status message
pub trait WebhookApi {
    fn edit_message(
        &self,
        message_id: &str,
        payload: &NotificationPayload,
    ) -> impl Future<Output = Result<(), WebhookError>> + Send;

    /// Returns the id of the created message
    fn create_message(
        &self,
        payload: &NotificationPayload,
    ) -> impl Future<Output = Result<String, WebhookError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub message_id: String,
    pub created: bool,
}

/// Edits `prior_message_id` when given; creates a new message when there is none
/// or when the edit target was deleted. Any other edit failure is returned as is
/// so an ambiguous error never produces a duplicate message.
pub async fn upsert<W: WebhookApi>(
    api: &W,
    payload: &NotificationPayload,
    prior_message_id: Option<&str>,
) -> Result<UpsertOutcome, WebhookError> {
    if let Some(message_id) = prior_message_id {
        match api.edit_message(message_id, payload).await {
            Ok(()) => {
                return Ok(UpsertOutcome {
                    message_id: message_id.to_string(),
                    created: false,
                })
            }
            Err(e) if e.is_not_found() => {
                warn!("status message {} was deleted, posting a new one", message_id);
            }
            Err(e) => return Err(e),
        }
    }

    let message_id = api.create_message(payload).await?;
    Ok(UpsertOutcome {
        message_id,
        created: true,
    })
}

// Discord wire format

#[derive(Debug, Serialize)]
struct WebhookMessage {
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    color: u32,
    title: String,
    description: String,
    fields: Vec<EmbedField>,
    footer: EmbedFooter,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct EmbedFooter {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct DiscordErrorBody {
    message: Option<String>,
    retry_after: Option<f64>,
}

impl From<&NotificationPayload> for WebhookMessage {
    fn from(payload: &NotificationPayload) -> Self {
        Self {
            embeds: vec![Embed {
                color: payload.color,
                title: payload.title.clone(),
                description: payload.status_line.clone(),
                fields: vec![EmbedField {
                    name: "Last check".to_string(),
                    value: payload.timestamp_field.clone(),
                    inline: true,
                }],
                footer: EmbedFooter {
                    text: payload.reason_footer.clone(),
                },
            }],
        }
    }
}

/// reqwest-backed webhook client
#[derive(Debug, Clone)]
pub struct DiscordWebhook {
    client: reqwest::Client,
    url: Url,
}

impl DiscordWebhook {
    pub fn new(url: Url) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, url })
    }

    fn message_url(&self, message_id: &str) -> Url {
        let mut url = self.url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("messages").push(message_id);
        }
        url
    }

    fn create_url(&self) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("wait", "true");
        url
    }
}

impl WebhookApi for DiscordWebhook {
    async fn edit_message(
        &self,
        message_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), WebhookError> {
        let response = self
            .client
            .patch(self.message_url(message_id))
            .json(&WebhookMessage::from(payload))
            .send()
            .await?;

        check_status(response).await?;
        debug!("edited message {}", message_id);
        Ok(())
    }

    async fn create_message(&self, payload: &NotificationPayload) -> Result<String, WebhookError> {
        let response = self
            .client
            .post(self.create_url())
            .json(&WebhookMessage::from(payload))
            .send()
            .await?;

        let response = check_status(response).await?;
        let created: CreatedMessage = response
            .json()
            .await
            .map_err(|e| WebhookError::InvalidResponse(format!("no message id in reply: {e}")))?;

        debug!("created message {}", created.id);
        Ok(created.id)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, WebhookError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(classify_failure(status, &text))
}

fn classify_failure(status: StatusCode, body: &str) -> WebhookError {
    let parsed: DiscordErrorBody = serde_json::from_str(body).unwrap_or_default();

    match status {
        StatusCode::NOT_FOUND => WebhookError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => WebhookError::RateLimited {
            retry_after: parsed
                .retry_after
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64),
        },
        _ => WebhookError::Rejected {
            status: status.as_u16(),
            message: parsed.message.unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    body.trim().to_string()
                }
            }),
        },
    }
}
