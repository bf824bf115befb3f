//! Streaming query handler
//!
//! `POST /v1/query` answers as a server-sent event stream:
//! - `delta` events carry `{id, content}` with the text accumulated so far
//! - one `done` event carries the final message
//!
//! Dropping the connection closes the update channel, which aborts the
//! generation. Blank text is answered without document context.

use axum::{
    extract::State,
    http::HeaderValue,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use folio_common::{
    errors::{AppError, ErrorDetails, ErrorResponse, Result},
    llm::Message,
};
use folio_context::ChatRequest;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::error;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;

/// Response header echoing the registered session that served the query
pub const SESSION_HEADER: &str = "x-session-id";

/// Query request
#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 4000))]
    pub text: String,

    /// Selected documents; empty chats with the model alone
    #[serde(default)]
    #[validate(length(max = 20))]
    pub document_ids: Vec<String>,

    /// Prior turns, oldest first
    #[serde(default)]
    pub session_history: Vec<Message>,

    /// Reuse a session so a new query supersedes its running one
    pub session_id: Option<Uuid>,
}

#[derive(Serialize)]
struct Delta<'a> {
    id: &'a str,
    content: &'a str,
}

/// Stream an answer to a query
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Response> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let registered = request.session_id.is_some();
    let session = state.session(request.session_id).await;
    let session_id = session.id();
    let chat = ChatRequest::new(request.text)
        .with_documents(request.document_ids)
        .with_history(request.session_history);

    tracing::info!(
        session_id = %session_id,
        documents = chat.document_ids.len(),
        history = chat.history.len(),
        "Query received"
    );

    let (tx, mut rx) = mpsc::channel(64);
    let generation = tokio::spawn(async move { session.send_message(chat, tx).await });

    let events = async_stream::stream! {
        while let Some(update) = rx.recv().await {
            if !update.is_streaming {
                continue;
            }
            let delta = Delta { id: &update.id, content: &update.content };
            match serde_json::to_string(&delta) {
                Ok(json) => yield Ok::<Event, Infallible>(Event::default().event("delta").data(json)),
                Err(e) => error!(error = %e, "Failed to encode delta"),
            }
        }

        let payload = match generation.await {
            Ok(message) => serde_json::to_string(&message).map_err(AppError::from),
            Err(e) => Err(AppError::Internal {
                message: format!("Generation task failed: {}", e),
            }),
        };

        match payload {
            Ok(json) => yield Ok(Event::default().event("done").data(json)),
            Err(e) => {
                error!(error = %e, "Query stream failed");
                yield Ok(Event::default().event("error").data(error_payload(&e)));
            }
        }
    };

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    if registered {
        if let Ok(value) = HeaderValue::from_str(&session_id.to_string()) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    Ok(response)
}

fn error_payload(err: &AppError) -> String {
    let body = ErrorResponse {
        error: ErrorDetails {
            code: err.code(),
            message: err.to_string(),
            details: None,
            request_id: None,
        },
    };
    serde_json::to_string(&body)
        .unwrap_or_else(|_| r#"{"error":{"code":"INTERNAL_ERROR","message":"internal"}}"#.to_string())
}
