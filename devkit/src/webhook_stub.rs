/*!
Mock Discord webhook for development without Discord

Serves the two webhook routes the agent uses on an ephemeral localhost port:
- `POST /api/webhooks/{id}/{token}?wait=true` creates a message and returns it
- `PATCH /api/webhooks/{id}/{token}/messages/{message_id}` edits a known message

Every request is recorded. Messages can be deleted behind the agent's back
and a one-shot failure status can be injected.
*/

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{patch, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const WEBHOOK_ID: &str = "1100000000000000001";
const FIRST_MESSAGE_ID: u64 = 1_200_000_000_000_000_000;

/// One request received by the stub
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: Value,
}

impl RecordedRequest {
    fn embed_str(&self, pointer: &str) -> Option<&str> {
        self.body.pointer(&format!("/embeds/0{pointer}"))?.as_str()
    }

    pub fn embed_title(&self) -> Option<&str> {
        self.embed_str("/title")
    }

    pub fn embed_description(&self) -> Option<&str> {
        self.embed_str("/description")
    }

    pub fn embed_footer(&self) -> Option<&str> {
        self.embed_str("/footer/text")
    }

    pub fn embed_color(&self) -> Option<u64> {
        self.body.pointer("/embeds/0/color")?.as_u64()
    }

    /// Message id targeted by an edit
    pub fn message_id(&self) -> Option<&str> {
        self.path.rsplit_once("/messages/").map(|(_, id)| id)
    }
}

#[derive(Default)]
struct StubState {
    token: String,
    messages: HashMap<String, Value>,
    requests: Vec<RecordedRequest>,
    fail_next: Option<u16>,
    next_id: u64,
}

type Shared = Arc<Mutex<StubState>>;

/// Mock webhook server, stopped when dropped
pub struct MockWebhookServer {
    addr: SocketAddr,
    state: Shared,
    task: JoinHandle<()>,
}

impl MockWebhookServer {
    pub async fn start() -> Result<Self> {
        let state: Shared = Arc::new(Mutex::new(StubState {
            token: uuid::Uuid::new_v4().simple().to_string(),
            next_id: FIRST_MESSAGE_ID,
            ..StubState::default()
        }));

        let app = Router::new()
            .route("/api/webhooks/{id}/{token}", post(create_message))
            .route(
                "/api/webhooks/{id}/{token}/messages/{message_id}",
                patch(edit_message),
            )
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("[MOCK] webhook server stopped: {}", e);
            }
        });

        log::info!("🪝 [MOCK] webhook listening on http://{}", addr);
        Ok(Self { addr, state, task })
    }

    /// Webhook URL to hand to the agent
    pub fn url(&self) -> String {
        format!(
            "http://{}/api/webhooks/{}/{}",
            self.addr,
            WEBHOOK_ID,
            self.state.lock().token
        )
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.state.lock().requests.last().cloned()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Ids of messages that currently exist
    pub fn message_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().messages.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn message(&self, id: &str) -> Option<Value> {
        self.state.lock().messages.get(id).cloned()
    }

    /// Simulates someone deleting the message in Discord
    pub fn delete_message(&self, id: &str) -> bool {
        let removed = self.state.lock().messages.remove(id).is_some();
        log::info!("🗑️ [MOCK] deleted message {}: {}", id, removed);
        removed
    }

    /// Next request (create or edit) answers with this status
    pub fn fail_next(&self, status: u16) {
        self.state.lock().fail_next = Some(status);
    }
}

impl Drop for MockWebhookServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn record(state: &mut StubState, method: &str, uri: &Uri, body: &Value) {
    state.requests.push(RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        body: body.clone(),
    });
}

fn discord_error(status: StatusCode, message: &str, code: u32) -> Response {
    let mut body = json!({ "message": message, "code": code });
    if status == StatusCode::TOO_MANY_REQUESTS {
        body["retry_after"] = json!(1.5);
        body["global"] = json!(false);
    }
    (status, Json(body)).into_response()
}

/// Token check and injected failures, shared by both routes
fn precheck(state: &mut StubState, token: &str) -> Option<Response> {
    if token != state.token {
        return Some(discord_error(
            StatusCode::UNAUTHORIZED,
            "Invalid Webhook Token",
            50027,
        ));
    }
    let status = state.fail_next.take()?;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Some(discord_error(status, "Injected failure", 0))
}

async fn create_message(
    State(state): State<Shared>,
    Path((_webhook_id, token)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    uri: Uri,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock();
    record(&mut state, "POST", &uri, &body);
    if let Some(response) = precheck(&mut state, &token) {
        return response;
    }

    state.next_id += 1;
    let id = state.next_id.to_string();
    let mut message = body;
    message["id"] = json!(id);
    state.messages.insert(id.clone(), message.clone());
    log::info!("📤 [MOCK] created message {}", id);

    if params.get("wait").map(String::as_str) == Some("true") {
        (StatusCode::OK, Json(message)).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn edit_message(
    State(state): State<Shared>,
    Path((_webhook_id, token, message_id)): Path<(String, String, String)>,
    uri: Uri,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock();
    record(&mut state, "PATCH", &uri, &body);
    if let Some(response) = precheck(&mut state, &token) {
        return response;
    }

    let Some(existing) = state.messages.get_mut(&message_id) else {
        log::info!("❓ [MOCK] edit of unknown message {}", message_id);
        return discord_error(StatusCode::NOT_FOUND, "Unknown Message", 10008);
    };

    let mut message = body;
    message["id"] = json!(message_id);
    *existing = message.clone();
    log::info!("✏️ [MOCK] edited message {}", message_id);
    (StatusCode::OK, Json(message)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embed(title: &str) -> Value {
        json!({
            "embeds": [{
                "title": title,
                "description": "🟢 Online",
                "footer": { "text": "🔄 Status changed" }
            }]
        })
    }

    #[tokio::test]
    async fn test_create_edit_delete_cycle() {
        let server = MockWebhookServer::start().await.unwrap();
        let client = reqwest::Client::new();

        let created: Value = client
            .post(format!("{}?wait=true", server.url()))
            .json(&embed("first"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(server.message_ids(), vec![id.clone()]);

        let edit = client
            .patch(format!("{}/messages/{}", server.url(), id))
            .json(&embed("second"))
            .send()
            .await
            .unwrap();
        assert_eq!(edit.status(), 200);
        assert_eq!(server.message(&id).unwrap()["embeds"][0]["title"], "second");

        assert!(server.delete_message(&id));
        let gone = client
            .patch(format!("{}/messages/{}", server.url(), id))
            .json(&embed("third"))
            .send()
            .await
            .unwrap();
        assert_eq!(gone.status(), 404);

        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].query.as_deref(), Some("wait=true"));
        assert_eq!(requests[1].message_id(), Some(id.as_str()));
        assert_eq!(requests[1].embed_title(), Some("second"));
        assert_eq!(requests[2].embed_footer(), Some("🔄 Status changed"));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let server = MockWebhookServer::start().await.unwrap();
        let client = reqwest::Client::new();
        server.fail_next(429);

        let limited = client
            .post(format!("{}?wait=true", server.url()))
            .json(&embed("x"))
            .send()
            .await
            .unwrap();
        assert_eq!(limited.status(), 429);
        let body: Value = limited.json().await.unwrap();
        assert_eq!(body["retry_after"], 1.5);

        let ok = client
            .post(format!("{}?wait=true", server.url()))
            .json(&embed("x"))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(server.count("POST"), 2);
        assert_eq!(server.message_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_token_is_rejected() {
        let server = MockWebhookServer::start().await.unwrap();
        let url = server
            .url()
            .replace(&format!("/{WEBHOOK_ID}/"), &format!("/{WEBHOOK_ID}/x"));
        let response = reqwest::Client::new()
            .post(url)
            .json(&embed("x"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        assert!(server.message_ids().is_empty());
    }
}
