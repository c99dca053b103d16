//! # SyncChannel: keeping the GraphCache current from server pushes
//!
//! The channel is a small state machine:
//!
//! ```text
//!   Disconnected --connect()--> Syncing --ReplayComplete--> Synced
//!        ^                                                    |
//!        +------------------- disconnect() -------------------+
//! ```
//!
//! - **Disconnected**: graph messages are refused. [SyncChannel::connect] returns the
//!   [ReplayRequest] to send upstream: a full snapshot when nothing was ever applied, otherwise
//!   the changes after the last applied sequence.
//! - **Syncing**: incoming changes are buffered in arrival order and not applied.
//! - **Synced**: the buffer was applied as one atomic batch when the replay completed. Live changes
//!   now go straight to the cache.
//!
//! `OpenNote` messages never touch the cache. They go to the [NavigationSink] in every state.
//!
//! Records carry the server's emission sequence. Anything at or below the highest sequence
//! already applied or buffered is skipped, which absorbs overlap between a replay and the live
//! stream. Sequence `0` marks an unsequenced record and is always taken.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    error::NoteGraphError,
    event::{ChangeRecord, Event, ReplayRequest, SyncMessage},
    graphcache::{CacheUpdate, GraphCache},
    properties::NoteId,
    source::NoteSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncState {
    #[default]
    Disconnected,
    Syncing,
    Synced,
}

/// Receives "open note" requests pushed by the server.
pub trait NavigationSink: Send + Sync {
    fn open_note(&self, note_id: &NoteId);
}

impl<F> NavigationSink for F
where
    F: Fn(&NoteId) + Send + Sync,
{
    fn open_note(&self, note_id: &NoteId) {
        self(note_id)
    }
}

pub struct SyncChannel<S, N> {
    cache: Arc<GraphCache<S>>,
    navigation: N,
    state: SyncState,
    buffer: Vec<CacheUpdate>,
    /// Highest sequence applied to the cache.
    applied_sequence: Option<u64>,
    /// Highest sequence applied or waiting in the buffer.
    seen_sequence: Option<u64>,
}

impl<S: NoteSource + 'static, N: NavigationSink> SyncChannel<S, N> {
    pub fn new(cache: Arc<GraphCache<S>>, navigation: N) -> Self {
        SyncChannel {
            cache,
            navigation,
            state: SyncState::Disconnected,
            buffer: Vec::new(),
            applied_sequence: None,
            seen_sequence: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn cache(&self) -> &GraphCache<S> {
        &self.cache
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.applied_sequence
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Channel established. Moves to [SyncState::Syncing] and returns the replay to request.
    pub fn connect(&mut self) -> ReplayRequest {
        if self.state != SyncState::Disconnected {
            tracing::warn!(
                "[SyncChannel] connect while {:?}, restarting replay",
                self.state
            );
            self.drop_buffer();
        }
        self.transition(SyncState::Syncing);
        ReplayRequest {
            since: self.applied_sequence,
        }
    }

    /// Channel lost. Anything buffered is discarded: the next replay resends it.
    pub fn disconnect(&mut self) {
        if self.state == SyncState::Disconnected {
            return;
        }
        self.drop_buffer();
        self.transition(SyncState::Disconnected);
    }

    pub fn receive(&mut self, message: SyncMessage) -> Result<(), NoteGraphError> {
        tracing::debug!("[SyncChannel] {:?} <- {message}", self.state);
        if let SyncMessage::OpenNote { note_id } = &message {
            self.navigation.open_note(note_id);
            return Ok(());
        }
        match self.state {
            SyncState::Disconnected => Err(NoteGraphError::Channel(format!(
                "received {message} while disconnected"
            ))),
            SyncState::Syncing => {
                self.buffer_message(message);
                Ok(())
            }
            SyncState::Synced => {
                self.apply_live(message);
                Ok(())
            }
        }
    }

    /// Drain `rx` until the sending side goes away, then disconnect. Call [Self::connect] and
    /// forward its request upstream first.
    pub async fn run(&mut self, mut rx: UnboundedReceiver<SyncMessage>) {
        if self.state == SyncState::Disconnected {
            tracing::warn!("[SyncChannel::run] started while disconnected, connecting");
            self.connect();
        }
        while let Some(message) = rx.recv().await {
            if let Err(e) = self.receive(message) {
                tracing::warn!("[SyncChannel::run] {e}");
            }
        }
        tracing::info!("[SyncChannel::run] channel closed");
        self.disconnect();
    }

    fn transition(&mut self, next: SyncState) {
        if self.state == next {
            return;
        }
        tracing::debug!("[SyncChannel] {:?} -> {next:?}", self.state);
        self.state = next;
        self.cache.events().publish(Event::SyncStateChanged(next));
    }

    fn drop_buffer(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(
                "[SyncChannel] discarding {} buffered updates",
                self.buffer.len()
            );
        }
        self.buffer.clear();
        self.seen_sequence = self.applied_sequence;
    }

    /// Whether `sequence` is new, recording it as seen if so.
    fn admit(&mut self, sequence: u64) -> bool {
        if sequence == 0 {
            return true;
        }
        if self.seen_sequence.is_some_and(|seen| sequence <= seen) {
            tracing::debug!("[SyncChannel] skipping already seen #{sequence}");
            return false;
        }
        self.seen_sequence = Some(sequence);
        true
    }

    /// A snapshot always applies, but never moves the seen marker backwards: an older
    /// snapshot must not reopen changes that were already skipped or applied.
    fn admit_snapshot(&mut self, sequence: u64) {
        match self.seen_sequence {
            Some(seen) if sequence < seen => tracing::debug!(
                "[SyncChannel] snapshot #{sequence} predates #{seen}, keeping the seen marker"
            ),
            _ if sequence > 0 => self.seen_sequence = Some(sequence),
            _ => {}
        }
    }

    fn admit_changes(&mut self, changes: Vec<ChangeRecord>) -> Vec<CacheUpdate> {
        changes
            .into_iter()
            .filter(|change| self.admit(change.sequence))
            .map(CacheUpdate::Change)
            .collect()
    }

    fn buffer_message(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::Change(change) => {
                let mut updates = self.admit_changes(vec![change]);
                self.buffer.append(&mut updates);
            }
            SyncMessage::Batch { changes } => {
                let mut updates = self.admit_changes(changes);
                self.buffer.append(&mut updates);
            }
            SyncMessage::Snapshot { sequence, graph } => {
                self.admit_snapshot(sequence);
                self.buffer.push(CacheUpdate::Reset(graph));
            }
            SyncMessage::ReplayComplete { sequence } => {
                let updates = std::mem::take(&mut self.buffer);
                let count = updates.len();
                let applied = self.cache.apply_batch(updates);
                let high = self.seen_sequence.into_iter().chain([sequence]).max();
                self.applied_sequence = high.filter(|s| *s > 0).or(self.applied_sequence);
                self.seen_sequence = self.applied_sequence;
                tracing::info!(
                    "[SyncChannel] replay complete: {applied} of {count} buffered updates changed the cache"
                );
                self.transition(SyncState::Synced);
            }
            SyncMessage::OpenNote { .. } => {}
        }
    }

    fn apply_live(&mut self, message: SyncMessage) {
        let updates = match message {
            SyncMessage::Change(change) => self.admit_changes(vec![change]),
            SyncMessage::Batch { changes } => self.admit_changes(changes),
            SyncMessage::Snapshot { sequence, graph } => {
                self.admit_snapshot(sequence);
                vec![CacheUpdate::Reset(graph)]
            }
            SyncMessage::ReplayComplete { sequence } => {
                tracing::warn!("[SyncChannel] unexpected ReplayComplete(#{sequence}) while synced");
                return;
            }
            SyncMessage::OpenNote { .. } => return,
        };
        if updates.is_empty() {
            return;
        }
        self.cache.apply_batch(updates);
        self.applied_sequence = self.seen_sequence;
    }
}
