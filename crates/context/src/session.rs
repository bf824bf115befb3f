//! Chat sessions
//!
//! A session allows at most one active generation. Sending a new message
//! cancels the one in flight, which then finishes as `Aborted`.

use crate::cancel::CancelToken;
use crate::message::{ChatMessage, ChatRequest, MessageUpdate};
use crate::pipeline::RagPipeline;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// One conversation bound to the shared pipeline
pub struct ChatSession {
    id: Uuid,
    pipeline: Arc<RagPipeline>,
    active: Mutex<Option<CancelToken>>,
}

impl ChatSession {
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        Self::with_id(Uuid::new_v4(), pipeline)
    }

    pub fn with_id(id: Uuid, pipeline: Arc<RagPipeline>) -> Self {
        Self {
            id,
            pipeline,
            active: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether a generation is currently running
    pub fn is_generating(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the active generation, if any; returns whether one was running
    pub fn stop(&self) -> bool {
        let previous = self.active.lock().unwrap_or_else(PoisonError::into_inner).take();
        match previous {
            Some(token) => {
                info!(session_id = %self.id, "Generation stopped");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Send a message, superseding any generation still in flight
    pub async fn send_message(
        &self,
        request: ChatRequest,
        updates: mpsc::Sender<MessageUpdate>,
    ) -> ChatMessage {
        let token = CancelToken::new();
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            debug!(session_id = %self.id, "Superseding in-flight generation");
            previous.cancel();
        }

        let message = self.pipeline.run(&request, &token, &updates).await;

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|current| current.same_as(&token)) {
            *active = None;
        }
        message
    }
}
