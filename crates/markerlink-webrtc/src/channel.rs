use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use markerlink_core::session::{DataChannel, HandlerFuture, MessageHandler};
use markerlink_core::SessionError;
use tokio::sync::watch;
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Connecting,
    Open,
    Closed,
}

/// Text messages parked until the channel's owner installs a handler.
const MAX_PENDING_MESSAGES: usize = 64;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct InboxState {
    handler: Option<MessageHandler>,
    pending: VecDeque<String>,
}

/// Hands inbound text to the registered handler.
///
/// The remote peer may write as soon as the channel opens, which can be
/// before the local side has called [`DataChannel::on_message`]. Those
/// messages wait here and are replayed in arrival order once a handler is set.
#[derive(Default)]
struct Inbox(Mutex<InboxState>);

impl Inbox {
    fn deliver(&self, label: &str, text: String) -> Option<HandlerFuture> {
        let handler = {
            let mut state = lock(&self.0);
            match state.handler.clone() {
                Some(handler) => handler,
                None => {
                    if state.pending.len() == MAX_PENDING_MESSAGES {
                        warn!(channel = %label, "No message handler yet, dropping oldest message");
                        state.pending.pop_front();
                    }
                    state.pending.push_back(text);
                    return None;
                }
            }
        };
        Some(handler(text))
    }

    /// Installs `handler` and returns the calls for messages it missed,
    /// oldest first.
    fn install(&self, handler: MessageHandler) -> Vec<HandlerFuture> {
        let backlog: Vec<String> = {
            let mut state = lock(&self.0);
            state.handler = Some(Arc::clone(&handler));
            state.pending.drain(..).collect()
        };
        backlog.into_iter().map(|text| handler(text)).collect()
    }
}

/// [`DataChannel`] over an `RTCDataChannel`, tracking its open/close events.
pub struct RtcDataChannel {
    inner: Arc<RTCDataChannel>,
    label: String,
    state: Arc<watch::Sender<Readiness>>,
    inbox: Arc<Inbox>,
}

impl RtcDataChannel {
    /// Must run before the channel's read loop starts (inside the
    /// `on_data_channel` callback for inbound channels) so no message is
    /// delivered without a listener.
    pub fn wrap(inner: Arc<RTCDataChannel>) -> Arc<Self> {
        let (state, _) = watch::channel(Readiness::Connecting);
        let state = Arc::new(state);

        let on_open = Arc::clone(&state);
        inner.on_open(Box::new(move || {
            on_open.send_replace(Readiness::Open);
            Box::pin(async {})
        }));
        let on_close = Arc::clone(&state);
        let label = inner.label().to_owned();
        let closed_label = label.clone();
        inner.on_close(Box::new(move || {
            debug!(channel = %closed_label, "Data channel closed");
            on_close.send_replace(Readiness::Closed);
            Box::pin(async {})
        }));

        // The open event may already have fired before the handler existed.
        if inner.ready_state() == RTCDataChannelState::Open {
            state.send_if_modified(|s| {
                let changed = *s == Readiness::Connecting;
                if changed {
                    *s = Readiness::Open;
                }
                changed
            });
        }

        let inbox = Arc::new(Inbox::default());
        let msg_inbox = Arc::clone(&inbox);
        let msg_label = label.clone();
        inner.on_message(Box::new(move |msg: DataChannelMessage| {
            let routed = match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => msg_inbox.deliver(&msg_label, text),
                Err(_) => {
                    warn!(channel = %msg_label, len = msg.data.len(), "Dropping non-UTF-8 message");
                    None
                }
            };
            routed.unwrap_or_else(|| -> HandlerFuture { Box::pin(async {}) })
        }));

        Arc::new(Self { inner, label, state, inbox })
    }

    /// Sends one binary message.
    pub async fn send_bytes(&self, payload: &Bytes) -> Result<(), SessionError> {
        self.inner
            .send(payload)
            .await
            .map(|_| ())
            .map_err(|e| self.failure(e))
    }

    fn failure(&self, e: impl std::fmt::Display) -> SessionError {
        SessionError::DataChannel { label: self.label.clone(), reason: e.to_string() }
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        *self.state.borrow() == Readiness::Open
    }

    async fn wait_open(&self) -> Result<(), SessionError> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| *s != Readiness::Connecting)
            .await
            .map_err(|_| SessionError::Closed)?;
        match state {
            Readiness::Open => Ok(()),
            _ => Err(self.failure("closed before opening")),
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        self.inner
            .send_text(text.to_owned())
            .await
            .map(|_| ())
            .map_err(|e| self.failure(e))
    }

    fn on_message(&self, handler: MessageHandler) {
        let backlog = self.inbox.install(handler);
        if !backlog.is_empty() {
            debug!(channel = %self.label, messages = backlog.len(), "Replaying early messages");
            tokio::spawn(async move {
                for call in backlog {
                    call.await;
                }
            });
        }
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.inner.close().await.map_err(|e| self.failure(e))
    }
}
