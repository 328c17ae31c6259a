//! End-to-end replication: document mutations become squashed,
//! revisioned envelopes, and applying those envelopes reproduces the
//! producer's snapshot.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use weft_schema::{Port, Shelver, StructureRegistry, TypedValue};
use weft_state::{
    apply_patches, NoLocks, PatchOp, StateDocument, StateSchema, StateWorker,
};

struct Rig {
    document: Arc<StateDocument>,
    handle: weft_state::StateWorkerHandle,
    envelopes: mpsc::Receiver<weft_state::Envelope>,
}

async fn rig(interval: Duration) -> Rig {
    let schema = Arc::new(StateSchema::new(
        "tracker",
        vec![
            Port::int("counter"),
            Port::list("samples", Port::float("sample")),
        ],
    ));
    let mut root = BTreeMap::new();
    root.insert("counter".to_string(), TypedValue::Int(0));
    root.insert("samples".to_string(), TypedValue::List(vec![]));

    let (document, patch_rx) =
        StateDocument::new(schema, vec![], TypedValue::Dict(root)).unwrap();
    let (envelope_tx, envelopes) = mpsc::channel(16);
    let (worker, handle) = StateWorker::create(
        document.clone(),
        Arc::new(StructureRegistry::new()),
        Arc::new(Shelver::new()),
        interval,
        patch_rx,
        envelope_tx,
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();
    tokio::spawn(worker.run());

    Rig {
        document,
        handle,
        envelopes,
    }
}

#[tokio::test(start_paused = true)]
async fn burst_of_writes_squashes_to_one_patch() {
    let mut rig = rig(Duration::from_millis(100)).await;

    rig.document
        .set(&NoLocks, "/counter", TypedValue::Int(1))
        .unwrap();
    rig.document
        .set(&NoLocks, "/counter", TypedValue::Int(2))
        .unwrap();
    rig.document
        .set(&NoLocks, "/counter", TypedValue::Int(3))
        .unwrap();

    let envelope = rig.envelopes.recv().await.unwrap();
    assert_eq!(envelope.rev, 1);
    assert_eq!(envelope.base_rev, 0);
    assert_eq!(envelope.patches.len(), 1);
    assert_eq!(envelope.patches[0].op, PatchOp::Replace);
    assert_eq!(envelope.patches[0].path, "/counter");
    assert_eq!(envelope.patches[0].value, Some(json!(3)));
}

#[tokio::test(start_paused = true)]
async fn applying_envelopes_in_order_reproduces_the_snapshot() {
    let mut rig = rig(Duration::from_millis(50)).await;

    let baseline = rig.handle.get_revision().await;
    assert_eq!(baseline.revision, 0);
    assert_eq!(baseline.data, json!({"counter": 0, "samples": []}));

    rig.document
        .set(&NoLocks, "/counter", TypedValue::Int(7))
        .unwrap();
    let first = rig.envelopes.recv().await.unwrap();

    rig.document
        .append(&NoLocks, "/samples", TypedValue::Float(1.5))
        .unwrap();
    let second = rig.envelopes.recv().await.unwrap();

    rig.document
        .append(&NoLocks, "/samples", TypedValue::Float(2.5))
        .unwrap();
    rig.document
        .set(&NoLocks, "/counter", TypedValue::Int(9))
        .unwrap();
    let third = rig.envelopes.recv().await.unwrap();

    // Revisions chain: base_rev[i] == rev[i-1], strictly increasing.
    assert_eq!(first.rev, 1);
    assert_eq!(second.base_rev, first.rev);
    assert_eq!(third.base_rev, second.rev);
    assert!(third.rev > second.rev);

    let mut replica = baseline.data.clone();
    for envelope in [&first, &second, &third] {
        apply_patches(&mut replica, &envelope.patches).unwrap();
    }

    let producer = rig.handle.get_revision().await;
    assert_eq!(producer.revision, third.rev);
    assert_eq!(replica, producer.data);
    assert_eq!(replica, json!({"counter": 9, "samples": [1.5, 2.5]}));
}

#[tokio::test(start_paused = true)]
async fn forced_flush_publishes_without_waiting_for_the_window() {
    let mut rig = rig(Duration::from_secs(3600)).await;

    rig.document
        .set(&NoLocks, "/counter", TypedValue::Int(5))
        .unwrap();
    // The debounce window is an hour; the explicit flush must not wait
    // for it. A racing first-patch wakeup may already be sleeping, so
    // flush and the worker loop are exercised together.
    rig.handle.flush().await;

    let envelope = tokio::time::timeout(Duration::from_secs(10), rig.envelopes.recv())
        .await
        .expect("flush should publish promptly")
        .unwrap();
    assert_eq!(envelope.patches[0].value, Some(json!(5)));
}
