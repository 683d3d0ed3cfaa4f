//! REST endpoints for querying triage results and requesting drafts.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::error::{DraftError, QueryError};
use crate::pipeline::drafts::DraftOrchestrator;
use crate::pipeline::types::{ActionBucket, MessageView};
use crate::store::MessageStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MessageStore>,
    pub drafts: Arc<DraftOrchestrator>,
}

/// Build the Axum router with the query and draft routes.
pub fn triage_routes(drafts: Arc<DraftOrchestrator>) -> Router {
    let state = AppState {
        store: Arc::clone(drafts.store()),
        drafts,
    };

    Router::new()
        .route("/health", get(health))
        .route("/tags", get(list_tags))
        .route("/messages", get(list_messages))
        .route("/messages/{tag}", get(messages_by_tag))
        .route("/message/{message_id}", get(get_message))
        .route("/generate-response/{message_id}", post(generate_response))
        .route("/generate-response/{message_id}/retry", post(retry_response))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

/// JSON error body: `{"error": kind, "detail": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.kind, "detail": self.detail }));
        (self.status, body).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::UnknownTag { .. } => Self {
                status: StatusCode::NOT_FOUND,
                kind: "unknown_tag",
                detail: e.to_string(),
            },
        }
    }
}

impl From<DraftError> for ApiError {
    fn from(e: DraftError) -> Self {
        let (status, kind) = match &e {
            DraftError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            DraftError::Unclassified { .. } => (StatusCode::CONFLICT, "unclassified"),
            DraftError::NotActionable { .. } => (StatusCode::BAD_REQUEST, "not_actionable"),
            DraftError::ConcurrentGenerationInProgress { .. } => {
                (StatusCode::CONFLICT, "generation_in_progress")
            }
            DraftError::PreviouslyFailed { .. } => (StatusCode::CONFLICT, "generation_failed"),
            DraftError::Generation { .. } => (StatusCode::BAD_GATEWAY, "generation_error"),
            DraftError::Store(_) => (StatusCode::CONFLICT, "invalid_state_transition"),
        };
        Self {
            status,
            kind,
            detail: e.to_string(),
        }
    }
}

fn not_found(message_id: &str) -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        kind: "not_found",
        detail: format!("Message not found: {message_id}"),
    }
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "inbox-triage",
        "messages": state.store.counts(),
    }))
}

#[derive(Serialize)]
struct TagsResponse {
    tags: Vec<ActionBucket>,
    actionable: Vec<ActionBucket>,
}

async fn list_tags(State(state): State<AppState>) -> Json<TagsResponse> {
    Json(TagsResponse {
        tags: ActionBucket::ALL.to_vec(),
        actionable: state.store.actionable().iter().collect(),
    })
}

async fn list_messages(State(state): State<AppState>) -> Json<Map<String, Value>> {
    let actionable = state.store.actionable();
    let mut grouped = Map::new();
    for bucket in ActionBucket::ALL {
        let views: Vec<MessageView> = state
            .store
            .list_by_bucket(bucket)
            .iter()
            .map(|r| MessageView::from_record(r, actionable))
            .collect();
        grouped.insert(bucket.to_string(), json!(views));
    }
    Json(grouped)
}

#[derive(Serialize)]
struct TagMessagesResponse {
    tag: ActionBucket,
    count: usize,
    messages: Vec<MessageView>,
}

async fn messages_by_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<TagMessagesResponse>, ApiError> {
    let bucket: ActionBucket = tag.parse()?;
    let actionable = state.store.actionable();
    let messages: Vec<MessageView> = state
        .store
        .list_by_bucket(bucket)
        .iter()
        .map(|r| MessageView::from_record(r, actionable))
        .collect();
    Ok(Json(TagMessagesResponse {
        tag: bucket,
        count: messages.len(),
        messages,
    }))
}

async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<MessageView>, ApiError> {
    let record = state
        .store
        .get(&message_id)
        .map_err(|_| not_found(&message_id))?;
    Ok(Json(MessageView::from_record(&record, state.store.actionable())))
}

#[derive(Serialize)]
struct DraftResponse {
    message_id: String,
    tag: Option<ActionBucket>,
    draft_response: String,
}

async fn generate_response(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<DraftResponse>, ApiError> {
    run_draft(state, message_id, false).await
}

async fn retry_response(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<DraftResponse>, ApiError> {
    run_draft(state, message_id, true).await
}

/// Run the draft request on its own task so a client disconnect does not
/// cancel a generation that is already in flight.
async fn run_draft(
    state: AppState,
    message_id: String,
    retry: bool,
) -> Result<Json<DraftResponse>, ApiError> {
    let drafts = Arc::clone(&state.drafts);
    let id = message_id.clone();
    let task = tokio::spawn(async move {
        if retry {
            drafts.retry_draft(&id).await
        } else {
            drafts.request_draft(&id).await
        }
    });

    let draft = match task.await {
        Ok(Ok(draft)) => draft,
        Ok(Err(e)) => {
            warn!(message_id = %message_id, error = %e, "Draft request failed");
            return Err(e.into());
        }
        Err(e) => {
            error!(message_id = %message_id, error = %e, "Draft task panicked");
            return Err(ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                kind: "internal",
                detail: "draft task failed".to_string(),
            });
        }
    };

    info!(message_id = %message_id, retry, "Draft returned");
    let tag = state.store.get(&message_id).ok().and_then(|r| r.bucket());
    Ok(Json(DraftResponse {
        message_id,
        tag,
        draft_response: draft,
    }))
}
