//! In-memory stand-ins for the session stack, used by negotiator tests.
//!
//! `FakeSession` records what the orchestration layer asks of it and lets a
//! test fire the inbound `on_track` / `on_data_channel` events by hand.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::errors::{SessionError, TrackError};
use crate::session::{
    DataChannel, DataChannelHandler, LocalTrack, MessageHandler, PeerSession, RemoteTrack,
    TrackHandler,
};
use crate::types::{Frame, SessionDescription};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── FakeSession ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSession {
    offers: AtomicU32,
    answers: AtomicU32,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Vec<SessionDescription>>,
    tracks: Mutex<Vec<Box<dyn LocalTrack>>>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    track_handler: Mutex<Option<TrackHandler>>,
    channel_handler: Mutex<Option<DataChannelHandler>>,
    channels_start_closed: AtomicBool,
    closed: AtomicBool,
}

impl FakeSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Channels created from now on start closed until
    /// [`FakeChannel::set_open`] is called.
    pub fn create_closed_channels(&self) {
        self.channels_start_closed.store(true, Ordering::SeqCst);
    }

    /// Remote descriptions in the order they were applied.
    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        lock(&self.remote).clone()
    }

    pub fn track_count(&self) -> usize {
        lock(&self.tracks).len()
    }

    /// Removes and returns every track added so far.
    pub fn take_tracks(&self) -> Vec<Box<dyn LocalTrack>> {
        std::mem::take(&mut *lock(&self.tracks))
    }

    pub fn channels(&self) -> Vec<Arc<FakeChannel>> {
        lock(&self.channels).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fires the registered `on_track` handler and waits for it.
    pub async fn emit_track(&self, track: Arc<dyn RemoteTrack>) {
        let handler = lock(&self.track_handler).clone();
        if let Some(handler) = handler {
            handler(track).await;
        }
    }

    /// Fires the registered `on_data_channel` handler and waits for it.
    pub async fn emit_data_channel(&self, channel: Arc<dyn DataChannel>) {
        let handler = lock(&self.channel_handler).clone();
        if let Some(handler) = handler {
            handler(channel).await;
        }
    }
}

#[async_trait]
impl PeerSession for FakeSession {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, SessionError> {
        let open = !self.channels_start_closed.load(Ordering::SeqCst);
        let channel = FakeChannel::new(label, open);
        lock(&self.channels).push(Arc::clone(&channel));
        Ok(channel)
    }

    async fn add_track(&self, track: Box<dyn LocalTrack>) -> Result<(), SessionError> {
        lock(&self.tracks).push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!("fake-offer-{n}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        if lock(&self.remote).is_empty() {
            return Err(SessionError::Negotiation { reason: "answer before remote offer".into() });
        }
        let n = self.answers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(format!("fake-answer-{n}")))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SessionError> {
        *lock(&self.local) = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.local).clone()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SessionError> {
        lock(&self.remote).push(desc);
        Ok(())
    }

    fn on_track(&self, handler: TrackHandler) {
        *lock(&self.track_handler) = Some(handler);
    }

    fn on_data_channel(&self, handler: DataChannelHandler) {
        *lock(&self.channel_handler) = Some(handler);
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ── FakeChannel ──────────────────────────────────────────────────────────────

pub struct FakeChannel {
    label: String,
    open: watch::Sender<bool>,
    sent: Mutex<Vec<String>>,
    handler: Mutex<Option<MessageHandler>>,
}

impl FakeChannel {
    pub fn new(label: &str, open: bool) -> Arc<Self> {
        let (open, _) = watch::channel(open);
        Arc::new(Self {
            label: label.to_owned(),
            open,
            sent: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.send_replace(open);
    }

    /// Every text sent through this channel, oldest first.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    /// Delivers `text` as if it arrived from the remote peer.
    pub async fn deliver(&self, text: &str) {
        let handler = lock(&self.handler).clone();
        if let Some(handler) = handler {
            handler(text.to_owned()).await;
        }
    }
}

#[async_trait]
impl DataChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    async fn wait_open(&self) -> Result<(), SessionError> {
        let mut rx = self.open.subscribe();
        rx.wait_for(|open| *open).await.map_err(|_| SessionError::Closed)?;
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::DataChannel {
                label: self.label.clone(),
                reason: "not open".into(),
            });
        }
        lock(&self.sent).push(text.to_owned());
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        *lock(&self.handler) = Some(handler);
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.open.send_replace(false);
        Ok(())
    }
}

// ── FakeRemoteTrack ──────────────────────────────────────────────────────────

/// Remote track that yields a fixed list of frames, then `Ended`.
pub struct FakeRemoteTrack {
    id: String,
    frames: Mutex<VecDeque<Frame>>,
}

impl FakeRemoteTrack {
    pub fn new(id: &str, frames: Vec<Frame>) -> Arc<Self> {
        Arc::new(Self { id: id.to_owned(), frames: Mutex::new(frames.into()) })
    }

    pub fn remaining(&self) -> usize {
        lock(&self.frames).len()
    }
}

#[async_trait]
impl RemoteTrack for FakeRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    async fn recv(&self) -> Result<Frame, TrackError> {
        lock(&self.frames).pop_front().ok_or(TrackError::Ended)
    }
}
