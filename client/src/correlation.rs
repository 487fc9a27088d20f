//! Cookie correlation: routing terminal replies and out-of-band progress
//! to the request that asked for them.
//!
//! Register, dispatch and remove happen under one lock, so a reply and a
//! late progress message for the same cookie can never race. An entry is
//! removed exactly once, on the first `reply` or `error` bearing its
//! cookie; messages for unknown cookies are logged and dropped.

use std::collections::HashMap;

use rand::Rng;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, mpsc, oneshot};

use mortar_types::{
    DisplayMessageContent, ErrorEnvelope, ProgressUpdate, ReplyEnvelope, ServerError,
};

const COOKIE_LEN: usize = 24;

/// Generate a fresh correlation cookie: a high-entropy random token,
/// unique per outstanding request for the lifetime of one client.
pub(crate) fn generate_cookie() -> String {
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(COOKIE_LEN)
        .map(char::from)
        .collect()
}

pub(crate) type ReplyResult = Result<Map<String, Value>, ServerError>;

/// Optional sidebands for one request. Reply channels settle once; these
/// may fire any number of times before the terminal message.
#[derive(Debug, Default)]
pub struct RequestObservers {
    pub progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    pub messages: Option<mpsc::UnboundedSender<DisplayMessageContent>>,
}

impl RequestObservers {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

struct PendingRequest {
    reply: oneshot::Sender<ReplyResult>,
    observers: RequestObservers,
}

#[derive(Default)]
pub(crate) struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outstanding request and get its settle-once channel.
    pub async fn register(
        &self,
        cookie: String,
        observers: RequestObservers,
    ) -> oneshot::Receiver<ReplyResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            cookie,
            PendingRequest {
                reply: tx,
                observers,
            },
        );
        rx
    }

    /// Drop an entry without settling it (request never made it onto the
    /// wire).
    pub async fn remove(&self, cookie: &str) {
        self.pending.lock().await.remove(cookie);
    }

    /// Terminal `reply`: settle and remove the matching entry.
    pub async fn resolve(&self, reply: ReplyEnvelope) {
        let entry = self.pending.lock().await.remove(&reply.cookie);
        match entry {
            Some(pending) => {
                let _ = pending.reply.send(Ok(reply.content));
            }
            None => {
                tracing::debug!(cookie = %reply.cookie, "reply for unknown cookie, dropping");
            }
        }
    }

    /// Terminal `error`: settle with a typed server error and remove.
    pub async fn reject(&self, error: ErrorEnvelope) {
        let entry = self.pending.lock().await.remove(&error.cookie);
        match entry {
            Some(pending) => {
                let _ = pending.reply.send(Err(ServerError {
                    error_message: error.error_message,
                    cookie: error.cookie,
                    in_reply_to: error.in_reply_to,
                }));
            }
            None => {
                tracing::debug!(cookie = %error.cookie, "error for unknown cookie, dropping");
            }
        }
    }

    /// Non-terminal `progress`: notify without removing. A dropped
    /// observer is swallowed, never propagated to the dispatcher.
    pub async fn on_progress(&self, cookie: &str, update: ProgressUpdate) {
        let guard = self.pending.lock().await;
        match guard.get(cookie) {
            Some(PendingRequest {
                observers:
                    RequestObservers {
                        progress: Some(tx), ..
                    },
                ..
            }) => {
                if tx.send(update).is_err() {
                    tracing::trace!(cookie = %cookie, "progress observer gone");
                }
            }
            Some(_) => {}
            None => {
                tracing::debug!(cookie = %cookie, "progress for unknown cookie, dropping");
            }
        }
    }

    /// Non-terminal display `message`: notify without removing.
    pub async fn on_message(&self, message: DisplayMessageContent) {
        let guard = self.pending.lock().await;
        match guard.get(&message.cookie) {
            Some(PendingRequest {
                observers:
                    RequestObservers {
                        messages: Some(tx), ..
                    },
                ..
            }) => {
                if tx.send(message).is_err() {
                    tracing::trace!("message observer gone");
                }
            }
            Some(_) => {}
            None => {
                tracing::debug!(cookie = %message.cookie, "message for unknown cookie, dropping");
            }
        }
    }

    /// The transport ended: drop every pending entry so callers observe
    /// [`ClientError::Closed`](mortar_types::ClientError) instead of
    /// hanging.
    pub async fn close_all(&self) {
        let drained = std::mem::take(&mut *self.pending.lock().await);
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "dropping pending requests on close");
        }
    }
}
