use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::chat::ChatService;
use crate::error::{ChatError, ErrorCategory, ValidationError};
use crate::identity::{ConversationKey, ParticipantId};
use crate::model::{Conversation, DeleteOutcome, Message as ChatMessage};
use crate::session::Session;
use crate::sync::LiveFrame;

/// Header carrying the principal authenticated by the identity provider.
pub const PRINCIPAL_HEADER: &str = "x-pingme-principal";

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartRequest {
    pub counterpart: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendRequest {
    pub body: String,
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub category: ErrorCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationError>,
}

impl From<&ChatError> for ErrorBody {
    fn from(err: &ChatError) -> Self {
        Self {
            error: err.to_string(),
            category: err.category(),
            validation: match err {
                ChatError::Validation(v) => Some(v.clone()),
                _ => None,
            },
        }
    }
}

pub struct ApiError(ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.is_retryable() {
            warn!(error = %self.0, "request failed");
        } else {
            debug!(error = %self.0, "request rejected");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

pub fn router(chat: ChatService) -> Router {
    let state = AppState { chat };

    Router::new()
        .route("/", get(|| async { "PingMe Chat Server" }))
        .route("/health", get(|| async { Json("OK") }))
        .route(
            "/conversations",
            get(list_conversations).post(start_conversation),
        )
        .route(
            "/conversations/{key}",
            get(get_conversation).delete(delete_conversation),
        )
        .route(
            "/conversations/{key}/messages",
            get(history).post(send_message),
        )
        .route("/conversations/{key}/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, chat: ChatService) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "chat server listening");

    axum::serve(listener, router(chat)).await?;

    Ok(())
}

fn session_from(headers: &HeaderMap) -> Session {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| ParticipantId::new(raw).ok())
        .map(Session::signed_in)
        .unwrap_or_default()
}

/// Resolve the caller and check they belong to the conversation.
async fn require_member(
    state: &AppState,
    headers: &HeaderMap,
    key: &ConversationKey,
) -> Result<Conversation, ApiError> {
    let session = session_from(headers);
    Ok(state.chat.member_conversation(&session, key).await?)
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let session = session_from(&headers);
    Ok(Json(state.chat.conversations(&session).await?))
}

async fn start_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let session = session_from(&headers);
    let conversation = state
        .chat
        .start_conversation(&session, &request.counterpart)
        .await?;
    Ok(Json(conversation))
}

async fn get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<ConversationKey>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(require_member(&state, &headers, &key).await?))
}

async fn delete_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<ConversationKey>,
) -> Result<Json<DeleteOutcome>, ApiError> {
    require_member(&state, &headers, &key).await?;
    match state.chat.delete(&key).await? {
        DeleteOutcome::NotFound => Err(ChatError::NotFound(key).into()),
        deleted => Ok(Json(deleted)),
    }
}

async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<ConversationKey>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    require_member(&state, &headers, &key).await?;
    Ok(Json(state.chat.history(&key).await?))
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<ConversationKey>,
    Json(request): Json<SendRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let session = session_from(&headers);
    let message = state.chat.send(&session, &key, &request.body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<ConversationKey>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    require_member(&state, &headers, &key).await?;
    Ok(ws.on_upgrade(move |socket| handle_ws(state, key, socket)))
}

async fn handle_ws(state: AppState, key: ConversationKey, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<LiveFrame>();

    let subscription = state.chat.watch_messages(&key, move |event| {
        let _ = tx.send(LiveFrame::from(event));
    });

    let forward = async {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to encode live frame");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    };

    // Client frames are ignored; reading only detects the close.
    let drain = async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    tokio::select! {
        _ = forward => {}
        _ = drain => {}
    }

    subscription.cancel();
    debug!(%key, "live socket closed");
}
