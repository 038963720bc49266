//! Background task that owns a [`Conversation`] and runs turns one at a time.

use conduit_types::{ConduitError, Message};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::conversation::Conversation;

/// Progress of a submitted turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    TextDelta(String),
    Narration(String),
    /// The turn completed. `None` means the model produced nothing.
    Finished(Option<Message>),
    Failed(String),
}

enum Request {
    Turn {
        text: String,
        updates: mpsc::UnboundedSender<TurnUpdate>,
        cancel: CancellationToken,
    },
    Clear,
    Shutdown(oneshot::Sender<()>),
}

/// Updates for one submitted turn.
pub struct TurnHandle {
    updates: mpsc::UnboundedReceiver<TurnUpdate>,
    cancel: CancellationToken,
}

impl TurnHandle {
    /// Next update; `None` once the turn is over.
    pub async fn next(&mut self) -> Option<TurnUpdate> {
        self.updates.recv().await
    }

    /// Drain updates until the turn ends and return how it ended.
    pub async fn wait(mut self) -> TurnUpdate {
        while let Some(update) = self.updates.recv().await {
            if matches!(update, TurnUpdate::Finished(_) | TurnUpdate::Failed(_)) {
                return update;
            }
        }
        TurnUpdate::Failed("Chat service stopped".to_string())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Channel front end for a conversation running in its own task.
///
/// Submissions queue up and are answered strictly in order.
pub struct ChatService {
    requests: mpsc::Sender<Request>,
    final_message: watch::Receiver<Option<Message>>,
    task: JoinHandle<()>,
}

impl ChatService {
    pub fn spawn(conversation: Conversation) -> Self {
        let (requests, rx) = mpsc::channel(16);
        let (final_tx, final_message) = watch::channel(None);
        let task = tokio::spawn(serve(conversation, rx, final_tx));
        Self {
            requests,
            final_message,
            task,
        }
    }

    /// Queue a user message. Returns immediately; the turn's updates arrive
    /// through the handle.
    pub async fn submit_user_message(
        &self,
        text: impl Into<String>,
    ) -> Result<TurnHandle, ConduitError> {
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.requests
            .send(Request::Turn {
                text: text.into(),
                updates: updates_tx,
                cancel: cancel.clone(),
            })
            .await
            .map_err(|_| ConduitError::ServiceStopped)?;
        Ok(TurnHandle { updates, cancel })
    }

    /// The latest completed answer.
    pub fn final_message(&self) -> Option<Message> {
        self.final_message.borrow().clone()
    }

    pub async fn clear(&self) -> Result<(), ConduitError> {
        self.requests.send(Request::Clear).await.map_err(|_| ConduitError::ServiceStopped)
    }

    /// Finish queued turns, close every tool session and stop the task.
    pub async fn shutdown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.requests.send(Request::Shutdown(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
        if let Err(e) = self.task.await {
            tracing::warn!("Chat service task ended abnormally: {e}");
        }
    }
}

async fn serve(
    mut conversation: Conversation,
    mut requests: mpsc::Receiver<Request>,
    final_tx: watch::Sender<Option<Message>>,
) {
    while let Some(request) = requests.recv().await {
        match request {
            Request::Turn {
                text,
                updates,
                cancel,
            } => {
                let result = conversation
                    .send(
                        text,
                        |delta| {
                            let _ = updates.send(TurnUpdate::TextDelta(delta.to_string()));
                        },
                        |line| {
                            let _ = updates.send(TurnUpdate::Narration(line.to_string()));
                        },
                        &cancel,
                    )
                    .await;
                let update = match result {
                    Ok(answer) => {
                        if answer.is_some() {
                            final_tx.send_replace(answer.clone());
                        }
                        TurnUpdate::Finished(answer)
                    }
                    Err(e) => TurnUpdate::Failed(e.to_string()),
                };
                let _ = updates.send(update);
            }
            Request::Clear => conversation.clear(),
            Request::Shutdown(done) => {
                conversation.shutdown().await;
                let _ = done.send(());
                return;
            }
        }
    }
    conversation.shutdown().await;
}
