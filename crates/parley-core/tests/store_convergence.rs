//! Replicated store convergence tests
//!
//! Replicas that receive the same writes in different orders, with
//! duplicates, must end in the same state. Storage faults may delay
//! convergence but never corrupt it.

use parley_core::{
    ChaoticStorage, MemoryStorage, ReplicatedStore, SyncAction, SyncSession, Table,
    storage::Storage,
};
use parley_proto::{CellRecord, CellValue, Stamp, SyncMessage};
use proptest::prelude::*;

fn arb_write() -> impl Strategy<Value = CellRecord> {
    (
        prop_oneof![Just("messages"), Just("pins")],
        prop_oneof![Just("r1"), Just("r2"), Just("r3")],
        prop_oneof![Just("text"), Just("sender"), Just("_deleted")],
        0u64..20,
        0u32..3,
        0u64..4,
        any::<bool>(),
    )
        .prop_map(|(table, row, column, millis, counter, node, flag)| CellRecord {
            table: table.to_string(),
            row: row.to_string(),
            column: column.to_string(),
            value: if column == "_deleted" { CellValue::Bool(flag) } else { CellValue::from(format!("v{millis}")) },
            stamp: Stamp { millis, counter, node },
        })
}

fn replica(node: u64) -> ReplicatedStore<MemoryStorage> {
    ReplicatedStore::create("general", node, MemoryStorage::new(), 0).unwrap()
}

proptest! {
    #[test]
    fn merge_order_does_not_matter(
        writes in prop::collection::vec(arb_write(), 0..40),
        seed in any::<u64>(),
    ) {
        let mut forward = replica(100);
        forward.merge_remote(&writes, 0).unwrap();

        // A deterministic shuffle with every write duplicated
        let mut shuffled: Vec<CellRecord> = writes.iter().chain(writes.iter()).cloned().collect();
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }

        let mut scrambled = replica(200);
        for chunk in shuffled.chunks(3) {
            scrambled.merge_remote(chunk, 0).unwrap();
        }

        prop_assert_eq!(forward.tables(), scrambled.tables());
    }

    #[test]
    fn applying_twice_equals_applying_once(writes in prop::collection::vec(arb_write(), 0..40)) {
        let mut once = replica(100);
        once.merge_remote(&writes, 0).unwrap();

        let mut twice = once.clone();
        prop_assert!(twice.merge_remote(&writes, 0).unwrap().is_empty());
        prop_assert_eq!(once.tables(), twice.tables());
    }

    #[test]
    fn chaotic_storage_never_applies_unpersisted_writes(
        writes in prop::collection::vec(arb_write(), 1..40),
        seed in any::<u64>(),
    ) {
        let storage = ChaoticStorage::with_seed(MemoryStorage::new(), 0.3, seed);
        let Ok(mut store) = ReplicatedStore::create("general", 1, storage.clone(), 0) else {
            return Ok(());
        };

        for chunk in writes.chunks(4) {
            let _ = store.merge_remote(chunk, 0);
        }

        // Whatever was applied must have been persisted
        let persisted = storage.inner().load_cells("local://store/general").unwrap();
        let mut restored = replica(1);
        restored.merge_remote(&persisted, 0).unwrap();
        prop_assert_eq!(restored.tables(), store.tables());
    }
}

/// Two clients and a relay; one client writes while offline.
#[test]
fn offline_writes_reach_peer_after_reconnect() {
    let mut alice = replica(1);
    let mut bob = replica(2);
    let mut relay = replica(99);
    let mut alice_sync = SyncSession::new();
    let mut bob_sync = SyncSession::new();

    // Bob is live
    bob_sync.connected(&bob);
    bob_sync.handle_message(SyncMessage::Snapshot { cells: relay.all_cells() }, &mut bob, 0).unwrap();

    // Alice writes offline, then connects
    alice.upsert(Table::Messages, "m1", [("text", "written offline")], 10).unwrap();
    alice_sync.connected(&alice);
    let actions =
        alice_sync.handle_message(SyncMessage::Snapshot { cells: relay.all_cells() }, &mut alice, 11).unwrap();

    let saved = actions
        .into_iter()
        .find_map(|a| match a {
            SyncAction::Send(SyncMessage::Save { cells }) => Some(cells),
            _ => None,
        })
        .unwrap();

    // The relay stores the save and fans it out to bob
    relay.merge_remote(&saved, 12).unwrap();
    bob_sync.handle_message(SyncMessage::Delta { cells: saved }, &mut bob, 12).unwrap();

    assert_eq!(bob.get_row(Table::Messages, "m1").unwrap()["text"], CellValue::from("written offline"));
    assert_eq!(alice.tables(), bob.tables());
    assert_eq!(relay.tables(), bob.tables());
}

/// Concurrent edits of the same cell resolve identically everywhere.
#[test]
fn concurrent_edit_tie_break_is_deterministic() {
    let mut alice = replica(1);
    let mut bob = replica(2);

    let a = alice.upsert(Table::Channels, "general", [("topic", "from alice")], 500).unwrap();
    let b = bob.upsert(Table::Channels, "general", [("topic", "from bob")], 500).unwrap();

    alice.merge_remote(&b, 500).unwrap();
    bob.merge_remote(&a, 500).unwrap();

    assert_eq!(alice.tables(), bob.tables());
    // Same millis and counter: the higher node id wins
    assert_eq!(alice.get_row(Table::Channels, "general").unwrap()["topic"], CellValue::from("from bob"));
}
