//! Tests for the sync channel state machine

use super::helpers::*;
use crate::{
    error::NoteGraphError,
    event::{ChangeOperation, ChangeRecord, Event, NoteChange, ReplayRequest, SyncMessage},
    graphcache::{GraphCache, NoteGraph},
    properties::{Branch, Note, NoteId},
    source::DetachedSource,
    sync::{SyncChannel, SyncState},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

fn scenario_cache() -> Arc<GraphCache<DetachedSource>> {
    init_logging();
    Arc::new(GraphCache::with_graph(DetachedSource, scenario_graph()))
}

fn ignore_navigation(_: &NoteId) {}

fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn parents_of(cache: &GraphCache<DetachedSource>, note_id: &str) -> Vec<String> {
    cache
        .get_parent_branches(note_id)
        .into_iter()
        .map(|b| b.parent_note_id.to_string())
        .collect()
}

#[test_log::test(tokio::test)]
async fn test_replay_is_buffered_then_applied_atomically() {
    let cache = scenario_cache();
    let mut channel = SyncChannel::new(cache.clone(), ignore_navigation);
    assert_eq!(channel.connect(), ReplayRequest { since: None });
    assert_eq!(channel.state(), SyncState::Syncing);

    let replay = vec![
        delete_branch(1, Branch::new("A_B", "A", "B", 0)),
        create_branch(2, Branch::new("C_B", "C", "B", 0)),
    ];
    for change in replay.iter() {
        channel
            .receive(SyncMessage::Change(change.clone()))
            .unwrap();
    }
    assert_eq!(channel.buffered(), 2);
    assert_eq!(cache.revision(), 0);
    assert_eq!(parents_of(&cache, "B"), vec!["A"]);

    channel
        .receive(SyncMessage::ReplayComplete { sequence: 2 })
        .unwrap();
    assert_eq!(channel.state(), SyncState::Synced);
    assert_eq!(channel.buffered(), 0);
    assert_eq!(channel.last_sequence(), Some(2));
    assert_eq!(cache.revision(), 2);
    assert_eq!(parents_of(&cache, "B"), vec!["C"]);

    // same end state as applying the replay one change at a time
    let reference = GraphCache::with_graph(DetachedSource, scenario_graph());
    for change in replay.iter() {
        reference.apply_change(change);
    }
    assert_eq!(cache.export(), reference.export());
}

#[test_log::test(tokio::test)]
async fn test_live_changes_apply_immediately_once_synced() {
    let cache = scenario_cache();
    let mut channel = SyncChannel::new(cache.clone(), ignore_navigation);
    channel.connect();
    channel
        .receive(SyncMessage::ReplayComplete { sequence: 0 })
        .unwrap();
    assert_eq!(channel.last_sequence(), None);

    channel
        .receive(SyncMessage::Batch {
            changes: vec![
                create_note(4, Note::new("D", "Delta")),
                create_branch(5, Branch::new("C_D", "C", "D", 0)),
            ],
        })
        .unwrap();
    assert_eq!(cache.revision(), 2);
    assert_eq!(parents_of(&cache, "D"), vec!["C"]);
    assert_eq!(channel.last_sequence(), Some(5));
}

#[test_log::test(tokio::test)]
async fn test_open_note_goes_to_navigation_in_every_state() {
    let cache = scenario_cache();
    let opened = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let opened = opened.clone();
        move |note_id: &NoteId| opened.lock().push(note_id.clone())
    };
    let mut channel = SyncChannel::new(cache.clone(), sink);

    let open = |id: &str| SyncMessage::OpenNote {
        note_id: NoteId::from(id),
    };
    channel.receive(open("A")).unwrap();
    channel.connect();
    channel.receive(open("B")).unwrap();
    channel
        .receive(SyncMessage::ReplayComplete { sequence: 0 })
        .unwrap();
    channel.receive(open("C")).unwrap();

    assert_eq!(*opened.lock(), ids(&["A", "B", "C"]));
    assert_eq!(channel.buffered(), 0);
    assert_eq!(cache.revision(), 0);
}

#[test_log::test(tokio::test)]
async fn test_disconnected_channel_refuses_graph_messages() {
    let cache = scenario_cache();
    let mut channel = SyncChannel::new(cache.clone(), ignore_navigation);
    let result = channel.receive(SyncMessage::Change(create_note(1, Note::new("D", "Delta"))));
    assert!(matches!(result, Err(NoteGraphError::Channel(_))));
    assert!(cache.cached_note("D").is_none());
}

#[test_log::test(tokio::test)]
async fn test_seen_sequences_are_skipped() {
    let cache = scenario_cache();
    let mut channel = SyncChannel::new(cache.clone(), ignore_navigation);
    channel.connect();
    channel
        .receive(SyncMessage::Change(create_note(5, Note::new("D", "Delta"))))
        .unwrap();
    // replay overlap: the live stream repeats #5 with newer content
    channel
        .receive(SyncMessage::Change(ChangeRecord::note(
            5,
            ChangeOperation::Updated,
            Note::new("D", "Delta v2"),
        )))
        .unwrap();
    assert_eq!(channel.buffered(), 1);
    channel
        .receive(SyncMessage::ReplayComplete { sequence: 5 })
        .unwrap();

    channel
        .receive(SyncMessage::Change(ChangeRecord::note(
            3,
            ChangeOperation::Updated,
            Note::new("D", "older"),
        )))
        .unwrap();
    assert_eq!(cache.cached_note("D").unwrap().title, "Delta");

    // unsequenced records are always taken
    channel
        .receive(SyncMessage::Change(ChangeRecord::note(
            0,
            ChangeOperation::Updated,
            Note::new("D", "Delta v3"),
        )))
        .unwrap();
    assert_eq!(cache.cached_note("D").unwrap().title, "Delta v3");
    assert_eq!(channel.last_sequence(), Some(5));
}

#[test_log::test(tokio::test)]
async fn test_reconnect_requests_delta_and_drops_buffer() {
    let cache = scenario_cache();
    let mut channel = SyncChannel::new(cache.clone(), ignore_navigation);
    channel.connect();
    channel
        .receive(SyncMessage::Change(create_note(1, Note::new("D", "Delta"))))
        .unwrap();
    channel
        .receive(SyncMessage::ReplayComplete { sequence: 1 })
        .unwrap();

    channel
        .receive(SyncMessage::Change(create_note(2, Note::new("E", "Epsilon"))))
        .unwrap();
    channel.disconnect();
    assert_eq!(channel.state(), SyncState::Disconnected);
    assert_eq!(channel.connect(), ReplayRequest { since: Some(2) });

    // a replay that was cut off leaves nothing behind
    channel
        .receive(SyncMessage::Change(create_note(3, Note::new("F", "Zeta"))))
        .unwrap();
    assert_eq!(channel.buffered(), 1);
    channel.disconnect();
    assert_eq!(channel.buffered(), 0);
    assert!(cache.cached_note("F").is_none());
    assert_eq!(channel.connect(), ReplayRequest { since: Some(2) });

    // and #3 is accepted when it is replayed again
    channel
        .receive(SyncMessage::Change(create_note(3, Note::new("F", "Zeta"))))
        .unwrap();
    assert_eq!(channel.buffered(), 1);
}

#[test_log::test(tokio::test)]
async fn test_snapshot_replaces_the_mirror() {
    let cache = scenario_cache();
    let mut events = cache.subscribe();
    let mut channel = SyncChannel::new(cache.clone(), ignore_navigation);
    channel.connect();

    let snapshot = NoteGraph::from_parts(
        [Note::root(), Note::new("Z", "Zed")],
        [Branch::new("root_Z", "root", "Z", 0)],
    );
    channel
        .receive(SyncMessage::Snapshot {
            sequence: 10,
            graph: snapshot.clone(),
        })
        .unwrap();
    channel
        .receive(SyncMessage::Change(create_note(9, Note::new("Y", "stale"))))
        .unwrap();
    channel
        .receive(SyncMessage::ReplayComplete { sequence: 10 })
        .unwrap();

    assert_eq!(cache.export(), snapshot);
    assert!(cache.cached_note("A").is_none());
    assert_eq!(channel.last_sequence(), Some(10));
    assert_eq!(
        drain(&mut events),
        vec![
            Event::SyncStateChanged(SyncState::Syncing),
            Event::CacheReset { revision: 1 },
            Event::SyncStateChanged(SyncState::Synced),
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_older_snapshot_keeps_the_seen_marker() {
    let cache = scenario_cache();
    let mut channel = SyncChannel::new(cache.clone(), ignore_navigation);
    channel.connect();
    channel
        .receive(SyncMessage::Change(create_note(5, Note::new("D", "Delta"))))
        .unwrap();
    channel
        .receive(SyncMessage::ReplayComplete { sequence: 5 })
        .unwrap();
    assert_eq!(channel.state(), SyncState::Synced);

    channel
        .receive(SyncMessage::Snapshot {
            sequence: 2,
            graph: scenario_graph(),
        })
        .unwrap();
    assert!(cache.cached_note("D").is_none());
    assert_eq!(channel.last_sequence(), Some(5));

    // #4 was already covered before the snapshot arrived
    channel
        .receive(SyncMessage::Change(create_note(4, Note::new("E", "Echo"))))
        .unwrap();
    assert!(cache.cached_note("E").is_none());
    assert_eq!(channel.last_sequence(), Some(5));
    channel.disconnect();
    assert_eq!(channel.connect(), ReplayRequest { since: Some(5) });
}

#[test_log::test(tokio::test)]
async fn test_run_drains_until_sender_closes() {
    let cache = scenario_cache();
    let mut events = cache.subscribe();
    let mut channel = SyncChannel::new(cache.clone(), ignore_navigation);
    channel.connect();

    let (tx, rx) = unbounded_channel();
    tx.send(SyncMessage::Change(create_note(1, Note::new("D", "Delta"))))
        .unwrap();
    tx.send(SyncMessage::Change(create_branch(
        2,
        Branch::new("root_D", "root", "D", 2),
    )))
    .unwrap();
    tx.send(SyncMessage::ReplayComplete { sequence: 2 }).unwrap();
    drop(tx);

    channel.run(rx).await;

    assert_eq!(channel.state(), SyncState::Disconnected);
    assert_eq!(channel.last_sequence(), Some(2));
    assert_eq!(parents_of(&cache, "D"), vec!["root"]);
    let d_changed = Event::NoteChanged(NoteChange {
        note_id: NoteId::from("D"),
        is_deleted: false,
    });
    assert_eq!(
        drain(&mut events),
        vec![
            Event::SyncStateChanged(SyncState::Syncing),
            d_changed.clone(),
            d_changed,
            Event::SyncStateChanged(SyncState::Synced),
            Event::SyncStateChanged(SyncState::Disconnected),
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_json_messages_drive_the_channel() {
    let cache = scenario_cache();
    let mut channel = SyncChannel::new(cache.clone(), ignore_navigation);
    channel.connect();

    let wire = [
        r#"{"type":"change","sequence":7,"operation":"deleted","entity":{"entityKind":"branch","branchId":"A_B","parentNoteId":"A","noteId":"B"}}"#,
        r#"{"type":"batch","changes":[{"sequence":8,"operation":"created","entity":{"entityKind":"branch","branchId":"C_B","parentNoteId":"C","noteId":"B","notePosition":3,"prefix":"Moved"}}]}"#,
        r#"{"type":"replayComplete","sequence":8}"#,
    ];
    for text in wire {
        channel.receive(SyncMessage::from_json(text).unwrap()).unwrap();
    }

    let branch = cache.get_branch("C_B").unwrap();
    assert_eq!(branch.note_position, 3);
    assert_eq!(branch.prefix.as_deref(), Some("Moved"));
    assert_eq!(parents_of(&cache, "B"), vec!["C"]);
    assert_eq!(channel.last_sequence(), Some(8));

    assert!(matches!(
        SyncMessage::from_json(r#"{"type":"teleport"}"#),
        Err(NoteGraphError::Serialization(_))
    ));
}
