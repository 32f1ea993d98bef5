//! End-to-end convergence scenarios: managers on a gossip mesh.

use concord_core::{Crdt, CrdtType};
use concord_store::MemoryStore;
use concord_sync::{CrdtManager, GossipTransport, ManagerConfig, MemoryGossip, SyncKind};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

type Manager = CrdtManager<Arc<MemoryGossip>, MemoryStore>;

/// Let the inbound dispatch tasks drain their queues.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Manager over a shared transport handle, so tests can link transports
/// after construction.
fn manager(node: &str) -> (Manager, Arc<MemoryGossip>) {
    let transport = Arc::new(MemoryGossip::new(node));
    let m = CrdtManager::new(
        ManagerConfig::new(node),
        Arc::clone(&transport),
        MemoryStore::new(),
    );
    m.init().unwrap();
    (m, transport)
}

/// Two managers on a connected mesh.
fn connected_pair() -> (Manager, Manager) {
    let (ma, ta) = manager("a");
    let (mb, tb) = manager("b");
    ta.connect_to(&tb);
    (ma, mb)
}

/// Two managers whose transports are not linked.
fn partitioned_pair() -> (Manager, Manager) {
    let (ma, _) = manager("a");
    let (mb, _) = manager("b");
    (ma, mb)
}

fn data(fields: &[(&str, Value)]) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn register_on_both(a: &Manager, b: &Manager, crdt_type: CrdtType, id: &str) {
    a.register(Crdt::new(crdt_type, id)).await.unwrap();
    b.register(Crdt::new(crdt_type, id)).await.unwrap();
}

#[tokio::test]
async fn g_counter_replicas_converge() {
    let (a, b) = connected_pair();
    register_on_both(&a, &b, CrdtType::GCounter, "votes").await;

    a.perform_operation("votes", "increment", data(&[("amount", json!(3))]))
        .await
        .unwrap();
    b.perform_operation("votes", "increment", data(&[("amount", json!(4))]))
        .await
        .unwrap();
    settle().await;

    assert_eq!(a.get_by_id("votes").unwrap().value(), json!(7));
    assert_eq!(b.get_by_id("votes").unwrap().value(), json!(7));

    let snapshot = a.get_by_id("votes").unwrap().snapshot().unwrap();
    assert_eq!(snapshot["counters"], json!({"a": 3, "b": 4}));
}

#[tokio::test]
async fn pn_counter_replicas_converge() {
    let (a, b) = connected_pair();
    register_on_both(&a, &b, CrdtType::PNCounter, "balance").await;

    a.perform_operation("balance", "increment", data(&[("amount", json!(10))]))
        .await
        .unwrap();
    a.perform_operation("balance", "decrement", data(&[("amount", json!(2))]))
        .await
        .unwrap();
    b.perform_operation("balance", "increment", data(&[("amount", json!(5))]))
        .await
        .unwrap();
    b.perform_operation("balance", "decrement", data(&[("amount", json!(8))]))
        .await
        .unwrap();
    settle().await;

    for m in [&a, &b] {
        let crdt = m.get_by_id("balance").unwrap();
        assert_eq!(crdt.value(), json!(5));
        match crdt {
            Crdt::PNCounter(c) => {
                assert_eq!(c.total_increments(), 15);
                assert_eq!(c.total_decrements(), 10);
            }
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn or_set_concurrent_add_survives_remove() {
    // Partitioned: a and b add the same element without seeing each other,
    // then a removes it having observed only its own tag.
    let (a, b) = partitioned_pair();
    register_on_both(&a, &b, CrdtType::ORSet, "fruit").await;

    a.perform_operation("fruit", "add", data(&[("element", json!("apple"))]))
        .await
        .unwrap();
    b.perform_operation("fruit", "add", data(&[("element", json!("apple"))]))
        .await
        .unwrap();
    a.perform_operation("fruit", "remove", data(&[("element", json!("apple"))]))
        .await
        .unwrap();

    // Exchange snapshots directly, both directions.
    let mut from_a = a.get_by_id("fruit").unwrap();
    let mut from_b = b.get_by_id("fruit").unwrap();
    let snap_a = from_a.snapshot().unwrap();
    let snap_b = from_b.snapshot().unwrap();
    from_a.merge_snapshot(&snap_b).unwrap();
    from_b.merge_snapshot(&snap_a).unwrap();

    // b's concurrent add was never observed by the remove, so it wins.
    assert_eq!(from_a.value(), json!(["apple"]));
    assert_eq!(from_b.value(), json!(["apple"]));
}

#[tokio::test]
async fn lww_register_tie_breaks_on_node_id() {
    let (a, b) = connected_pair();
    register_on_both(&a, &b, CrdtType::LWWRegister, "title").await;

    a.perform_operation(
        "title",
        "set",
        data(&[("value", json!("first")), ("timestamp", json!(1_000))]),
    )
    .await
    .unwrap();
    b.perform_operation(
        "title",
        "set",
        data(&[("value", json!("second")), ("timestamp", json!(1_000))]),
    )
    .await
    .unwrap();
    settle().await;

    for m in [&a, &b] {
        let crdt = m.get_by_id("title").unwrap();
        assert_eq!(crdt.value(), json!("second"));
        match crdt {
            Crdt::LWWRegister(r) => assert_eq!(r.node_id(), "b"),
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn rga_concurrent_inserts_agree() {
    let (a, b) = connected_pair();
    register_on_both(&a, &b, CrdtType::RGAArray, "doc").await;

    a.perform_operation(
        "doc",
        "insert",
        data(&[("index", json!(0)), ("element", json!("X"))]),
    )
    .await
    .unwrap();
    b.perform_operation(
        "doc",
        "insert",
        data(&[("index", json!(0)), ("element", json!("Y"))]),
    )
    .await
    .unwrap();
    settle().await;

    let seq_a = a.get_by_id("doc").unwrap().value();
    let seq_b = b.get_by_id("doc").unwrap().value();
    assert_eq!(seq_a, seq_b);
    assert_eq!(seq_a.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn enable_wins_flag_survives_merge() {
    let (a, b) = partitioned_pair();
    register_on_both(&a, &b, CrdtType::EnableWinsFlag, "feature").await;

    a.perform_operation("feature", "enable", Map::new()).await.unwrap();
    b.perform_operation("feature", "disable", Map::new()).await.unwrap();

    let mut from_a = a.get_by_id("feature").unwrap();
    let mut from_b = b.get_by_id("feature").unwrap();
    let snap_a = from_a.snapshot().unwrap();
    let snap_b = from_b.snapshot().unwrap();
    from_a.merge_snapshot(&snap_b).unwrap();
    from_b.merge_snapshot(&snap_a).unwrap();

    assert_eq!(from_a.value(), json!(true));
    assert_eq!(from_b.value(), json!(true));
}

#[tokio::test]
async fn force_sync_reconciles_partitioned_replicas() {
    let (a, ta) = manager("a");
    let (b, tb) = manager("b");
    register_on_both(&a, &b, CrdtType::EnableWinsFlag, "feature").await;

    // Diverge while partitioned: the operation broadcasts go nowhere.
    a.perform_operation("feature", "enable", Map::new()).await.unwrap();
    b.perform_operation("feature", "disable", Map::new()).await.unwrap();
    settle().await;
    assert_eq!(a.get_by_id("feature").unwrap().value(), json!(true));
    assert_eq!(b.get_by_id("feature").unwrap().value(), json!(false));

    // Heal the partition and push state both ways; enable wins.
    ta.connect_to(&tb);
    a.force_sync().await.unwrap();
    b.force_sync().await.unwrap();
    settle().await;

    assert_eq!(a.get_by_id("feature").unwrap().value(), json!(true));
    assert_eq!(b.get_by_id("feature").unwrap().value(), json!(true));
}

#[tokio::test]
async fn sync_with_targets_a_single_peer() {
    let (a, ta) = manager("a");
    let (b, tb) = manager("b");
    let (c, tc) = manager("c");

    a.register(Crdt::new(CrdtType::GSet, "tags")).await.unwrap();
    b.register(Crdt::new(CrdtType::GSet, "tags")).await.unwrap();
    c.register(Crdt::new(CrdtType::GSet, "tags")).await.unwrap();

    // Populate a while partitioned, then heal the mesh.
    a.perform_operation("tags", "add", data(&[("element", json!("x"))]))
        .await
        .unwrap();
    ta.connect_to(&tb);
    ta.connect_to(&tc);

    let mut syncs_b = b.subscribe_syncs();
    let count = a.sync_with("b").await.unwrap();
    assert_eq!(count, 1);
    settle().await;

    let event = syncs_b.recv().await.unwrap();
    assert_eq!(event.kind, SyncKind::Received);
    assert_eq!(event.peer.as_deref(), Some("a"));

    // b merged the addressed sync; c saw the envelope and dropped it.
    assert_eq!(b.get_by_id("tags").unwrap().value(), json!(["x"]));
    assert_eq!(c.get_by_id("tags").unwrap().value(), json!([]));
}

#[tokio::test]
async fn unknown_ids_and_garbage_envelopes_are_dropped() {
    let (a, ta) = manager("a");
    let (b, tb) = manager("b");
    let rogue = MemoryGossip::new("rogue");
    ta.connect_to(&tb);
    rogue.connect_to(&tb);

    // Garbage payloads of assorted shapes.
    rogue.publish(json!("not-an-object")).await.unwrap();
    rogue.publish(json!({"type": "crdt_mystery"})).await.unwrap();
    rogue
        .publish(json!({"type": "crdt_operation", "operation": {"bogus": true}}))
        .await
        .unwrap();
    settle().await;

    // An operation for an id b never registered.
    a.register(Crdt::new(CrdtType::GCounter, "only-a")).await.unwrap();
    a.perform_operation("only-a", "increment", Map::new()).await.unwrap();
    settle().await;
    assert!(b.get_by_id("only-a").is_none());

    // The dispatch loop survived all of it.
    register_on_both(&a, &b, CrdtType::GCounter, "shared").await;
    a.perform_operation("shared", "increment", data(&[("amount", json!(2))]))
        .await
        .unwrap();
    settle().await;
    assert_eq!(b.get_by_id("shared").unwrap().value(), json!(2));
}

#[tokio::test]
async fn snapshots_survive_restart_via_file_store() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = concord_store::JsonFileStore::open(dir.path()).await.unwrap();
        let m = CrdtManager::new(ManagerConfig::new("a"), MemoryGossip::new("a"), store);
        m.init().unwrap();
        m.register(Crdt::new(CrdtType::GCounter, "persistent")).await.unwrap();
        m.perform_operation("persistent", "increment", data(&[("amount", json!(9))]))
            .await
            .unwrap();
        m.close().await.unwrap();
    }

    let store = concord_store::JsonFileStore::open(dir.path()).await.unwrap();
    let m = CrdtManager::new(ManagerConfig::new("a"), MemoryGossip::new("a"), store);
    m.init().unwrap();
    assert_eq!(m.restore_all().await.unwrap(), 1);
    assert_eq!(m.get_by_id("persistent").unwrap().value(), json!(9));
}

#[tokio::test]
async fn remote_ops_emit_remote_tagged_events() {
    let (a, b) = connected_pair();
    register_on_both(&a, &b, CrdtType::GCounter, "c").await;

    let mut ops_b = b.subscribe_operations();
    a.perform_operation("c", "increment", Map::new()).await.unwrap();
    settle().await;

    let event = ops_b.recv().await.unwrap();
    assert_eq!(event.source, concord_sync::OpSource::Remote);
    assert_eq!(event.operation.node_id, "a");
}

#[tokio::test]
async fn three_way_mesh_converges() {
    let (a, ta) = manager("a");
    let (b, tb) = manager("b");
    let (c, tc) = manager("c");
    ta.connect_to(&tb);
    ta.connect_to(&tc);
    tb.connect_to(&tc);

    for m in [&a, &b, &c] {
        m.register(Crdt::new(CrdtType::ORSet, "members")).await.unwrap();
    }

    a.perform_operation("members", "add", data(&[("element", json!("alice"))]))
        .await
        .unwrap();
    b.perform_operation("members", "add", data(&[("element", json!("bob"))]))
        .await
        .unwrap();
    c.perform_operation("members", "add", data(&[("element", json!("carol"))]))
        .await
        .unwrap();
    b.perform_operation("members", "remove", data(&[("element", json!("bob"))]))
        .await
        .unwrap();
    settle().await;

    let expect = json!(["alice", "carol"]);
    for m in [&a, &b, &c] {
        assert_eq!(m.get_by_id("members").unwrap().value(), expect);
    }
}
