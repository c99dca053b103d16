use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{
    error::NoteGraphError,
    graphcache::NoteGraph,
    properties::{Branch, BranchId, Note, NoteId},
    sync::SyncState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeOperation {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Note,
    Branch,
}

/// Full snapshot of the entity a change record is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entityKind", rename_all = "camelCase")]
pub enum Entity {
    Note(Note),
    Branch(Branch),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Note(_) => EntityKind::Note,
            Entity::Branch(_) => EntityKind::Branch,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Note(note) => note.note_id.as_str(),
            Entity::Branch(branch) => branch.branch_id.as_str(),
        }
    }
}

/// One server-emitted change. `sequence` is the server's monotonically increasing emission
/// marker, used to request delta replays and to skip replay/live overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    #[serde(default)]
    pub sequence: u64,
    pub operation: ChangeOperation,
    pub entity: Entity,
}

impl ChangeRecord {
    pub fn new(sequence: u64, operation: ChangeOperation, entity: Entity) -> Self {
        ChangeRecord {
            sequence,
            operation,
            entity,
        }
    }

    pub fn note(sequence: u64, operation: ChangeOperation, note: Note) -> Self {
        ChangeRecord::new(sequence, operation, Entity::Note(note))
    }

    pub fn branch(sequence: u64, operation: ChangeOperation, branch: Branch) -> Self {
        ChangeRecord::new(sequence, operation, Entity::Branch(branch))
    }
}

impl Display for ChangeRecord {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "#{} {:?} {:?} {}",
            self.sequence,
            self.operation,
            self.entity.kind(),
            self.entity.id()
        )
    }
}

/// Messages arriving on the push channel from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncMessage {
    Change(ChangeRecord),
    /// Changes the server emitted together. Applied as one indivisible step.
    #[serde(rename_all = "camelCase")]
    Batch { changes: Vec<ChangeRecord> },
    /// Full replay: replaces the whole mirror.
    #[serde(rename_all = "camelCase")]
    Snapshot { sequence: u64, graph: NoteGraph },
    /// End of the replay requested on connect.
    #[serde(rename_all = "camelCase")]
    ReplayComplete { sequence: u64 },
    /// Not a graph change. Forwarded to the navigation sink untouched.
    #[serde(rename_all = "camelCase")]
    OpenNote { note_id: NoteId },
}

impl SyncMessage {
    pub fn from_json(text: &str) -> Result<SyncMessage, NoteGraphError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, NoteGraphError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Display for SyncMessage {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SyncMessage::Change(change) => write!(f, "Change({change})"),
            SyncMessage::Batch { changes } => write!(f, "Batch({} changes)", changes.len()),
            SyncMessage::Snapshot { sequence, .. } => write!(f, "Snapshot(#{sequence})"),
            SyncMessage::ReplayComplete { sequence } => write!(f, "ReplayComplete(#{sequence})"),
            SyncMessage::OpenNote { note_id } => write!(f, "OpenNote({note_id})"),
        }
    }
}

/// What the sync channel asks the server for when a connection is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
    /// `None` requests a full snapshot, otherwise every change after this sequence.
    pub since: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteChange {
    pub note_id: NoteId,
    pub is_deleted: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    #[default]
    Ping,
    /// A note, or one of its parent branches, changed.
    NoteChanged(NoteChange),
    BranchRemoved(BranchId),
    CacheReset {
        revision: u64,
    },
    SyncStateChanged(SyncState),
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Event::Ping => write!(f, "Ping"),
            Event::NoteChanged(change) => {
                write!(f, "NoteChanged({}, deleted={})", change.note_id, change.is_deleted)
            }
            Event::BranchRemoved(branch_id) => write!(f, "BranchRemoved({branch_id})"),
            Event::CacheReset { revision } => write!(f, "CacheReset(r{revision})"),
            Event::SyncStateChanged(state) => write!(f, "SyncStateChanged({state:?})"),
        }
    }
}

/// Synchronous fan-out of [Event]s to every live subscriber, in publish order.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<Event> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: Event) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.send(event.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Dropping closed event subscriber: {}", NoteGraphError::from(e));
                false
            }
        });
    }

    pub fn publish_all<I: IntoIterator<Item = Event>>(&self, events: I) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
