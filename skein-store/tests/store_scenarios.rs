//! End-to-end scenarios for the store subsystem: masters, clones, events,
//! expiry, and snapshot resync over the in-process fabric.

use skein_broker::Hub;
use skein_core::{ActorId, Data, EndpointId, EntityId, StoreConfig, Timespan, Topic};
use skein_store::{
    BackendOptions, BackendType, Command, CommandMessage, Expiry, Snapshot, StoreEndpoint,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

fn config() -> StoreConfig {
    StoreConfig {
        tick_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(5),
        command_buffer: 32,
        path: None,
    }
}

fn fabric() -> (Arc<Hub>, StoreEndpoint) {
    let hub = Hub::start_new();
    let endpoint = StoreEndpoint::new(Arc::clone(&hub), config());
    (hub, endpoint)
}

async fn next_event(
    events: &mut broadcast::Receiver<skein_broker::DataMessage>,
) -> Vec<Data> {
    let message = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed");
    match message.data {
        Data::Vector(xs) => xs,
        other => panic!("expected event vector, got {other}"),
    }
}

#[tokio::test]
async fn basic_put_get_with_insert_event() {
    let (hub, endpoint) = fabric();
    let mut events = hub.subscribe(&Topic::store_events("S").unwrap()).unwrap();

    let store = endpoint
        .attach_master("S", BackendType::Memory, &BackendOptions::new())
        .unwrap();
    store.put("a", 1i64, None);

    assert_eq!(store.get("a").await.unwrap(), Data::from(1i64));

    let xs = next_event(&mut events).await;
    assert_eq!(xs.len(), 7);
    assert_eq!(xs[0], Data::from("insert"));
    assert_eq!(xs[1], Data::from("S"));
    assert_eq!(xs[2], Data::from("a"));
    assert_eq!(xs[3], Data::from(1i64));
    assert_eq!(xs[4], Data::None);
    assert!(matches!(xs[5], Data::String(_)), "publisher endpoint slot");
    assert!(matches!(xs[6], Data::Count(_)), "publisher object slot");
}

#[tokio::test]
async fn overwrite_emits_update_with_old_and_new() {
    let (hub, endpoint) = fabric();
    let mut events = hub.subscribe(&Topic::store_events("S").unwrap()).unwrap();

    let store = endpoint
        .attach_master("S", BackendType::Memory, &BackendOptions::new())
        .unwrap();
    store.put("a", 1i64, None);
    store.put("a", 2i64, None);

    assert_eq!(store.get("a").await.unwrap(), Data::from(2i64));

    let insert = next_event(&mut events).await;
    assert_eq!(insert[0], Data::from("insert"));

    let update = next_event(&mut events).await;
    assert_eq!(update.len(), 8);
    assert_eq!(update[0], Data::from("update"));
    assert_eq!(update[1], Data::from("S"));
    assert_eq!(update[2], Data::from("a"));
    assert_eq!(update[3], Data::from(1i64), "old value");
    assert_eq!(update[4], Data::from(2i64), "new value");
    assert_eq!(update[5], Data::None, "expiry slot");
}

#[tokio::test]
async fn put_unique_race_admits_exactly_one_writer() {
    let (hub, endpoint) = fabric();
    let mut events = hub.subscribe(&Topic::store_events("S").unwrap()).unwrap();

    let store = endpoint
        .attach_master("S", BackendType::Memory, &BackendOptions::new())
        .unwrap();
    let other = store.clone();

    let (first, second) = tokio::join!(
        store.put_unique("k", "A", None),
        other.put_unique("k", "B", None),
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    let accepted = outcomes
        .iter()
        .filter(|answer| **answer == Data::Boolean(true))
        .count();
    assert_eq!(accepted, 1, "exactly one writer wins");

    let value = store.get("k").await.unwrap();
    assert!(value == Data::from("A") || value == Data::from("B"));

    // Exactly one insert event, for the accepted write.
    let xs = next_event(&mut events).await;
    assert_eq!(xs[0], Data::from("insert"));
    assert_eq!(xs[2], Data::from("k"));
    assert_eq!(xs[3], value);
    assert!(
        timeout(Duration::from_millis(200), events.recv()).await.is_err(),
        "no further events expected"
    );
}

#[tokio::test]
async fn expired_entries_are_erased_and_reported_once() {
    let (hub, endpoint) = fabric();
    let mut events = hub.subscribe(&Topic::store_events("S").unwrap()).unwrap();

    let store = endpoint
        .attach_master("S", BackendType::Memory, &BackendOptions::new())
        .unwrap();
    store.put("t", "x", Some(Timespan::from_millis(50)));

    sleep(Duration::from_millis(250)).await;

    let missing = store.get("t").await.unwrap_err();
    assert_eq!(missing.kind(), skein_core::ErrorKind::NoSuchKey);

    let insert = next_event(&mut events).await;
    assert_eq!(insert[0], Data::from("insert"));
    assert_eq!(insert[4], Data::Timespan(Timespan::from_millis(50)));

    let expire = next_event(&mut events).await;
    assert_eq!(expire[0], Data::from("expire"));
    assert_eq!(expire[1], Data::from("S"));
    assert_eq!(expire[2], Data::from("t"));

    assert!(
        timeout(Duration::from_millis(200), events.recv()).await.is_err(),
        "the expire event fires exactly once"
    );
}

async fn await_key(store: &skein_store::Store, key: &str) -> Data {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(value) = store.get(key).await {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {key}");
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn fresh_clone_syncs_snapshot_then_follows_commands() {
    let (_hub, endpoint) = fabric();

    let master = endpoint
        .attach_master("R", BackendType::Memory, &BackendOptions::new())
        .unwrap();
    for i in 0..100u64 {
        master.put(format!("key{i}"), i, None);
    }
    // Serialize behind the writes so the snapshot will contain them all.
    assert_eq!(master.get("key99").await.unwrap(), Data::Count(99));

    let clone = endpoint.attach_clone("R").unwrap();
    assert_eq!(await_key(&clone, "key99").await, Data::Count(99));

    // The next command applies without a gap.
    master.put("after-sync", 1i64, None);
    assert_eq!(await_key(&clone, "after-sync").await, Data::from(1i64));

    assert_eq!(clone.keys().await.unwrap(), master.keys().await.unwrap());
}

#[tokio::test]
async fn clone_forwards_writes_to_master() {
    let (_hub, endpoint) = fabric();

    let master = endpoint
        .attach_master("F", BackendType::Memory, &BackendOptions::new())
        .unwrap();
    let clone = endpoint.attach_clone("F").unwrap();

    // Wait out the attach handshake so the replay channel is live.
    master.put("seed", 0i64, None);
    await_key(&clone, "seed").await;

    clone.put("via-clone", 7i64, None);
    assert_eq!(await_key(&master, "via-clone").await, Data::from(7i64));
    // The clone itself learns the value only through the master's replay.
    assert_eq!(await_key(&clone, "via-clone").await, Data::from(7i64));

    clone.increment("hits", Data::Count(2), None);
    assert_eq!(await_key(&master, "hits").await, Data::Count(2));

    let unique = clone.put_unique("via-clone", 9i64, None).await.unwrap();
    assert_eq!(unique, Data::Boolean(false), "key exists on the master");
    let unique = clone.put_unique("fresh", 9i64, None).await.unwrap();
    assert_eq!(unique, Data::Boolean(true));
}

#[tokio::test]
async fn sequence_gap_triggers_snapshot_resync() {
    let (_hub, endpoint) = fabric();
    let commands = endpoint.commands();
    let topic = Topic::store_commands("G").unwrap();
    let mut bus = commands.subscribe(&topic);

    let master_id = EntityId::new(EndpointId::random(), ActorId::new(777));
    let clone = endpoint.attach_clone("G").unwrap();

    // Scripted master: answer the clone's attach request at seq 10.
    let clone_id = wait_for_snapshot_request(&mut bus).await;
    let snapshot = Snapshot {
        entries: vec![(Data::from("k0"), Data::from(0i64))],
        expiries: Vec::new(),
    };
    commands.publish(
        &topic,
        CommandMessage::new(master_id, 10, Command::AckClone { clone_id }),
    );
    commands.publish(
        &topic,
        CommandMessage::new(master_id, 10, Command::SnapshotReply { seq: 10, snapshot }),
    );
    assert_eq!(await_key(&clone, "k0").await, Data::from(0i64));

    // Jump from expected seq 11 straight to 13: the clone must resync.
    commands.publish(
        &topic,
        CommandMessage::new(master_id, 13, put("k13", 13)),
    );
    wait_for_snapshot_request(&mut bus).await;

    let caught_up = Snapshot {
        entries: vec![
            (Data::from("k0"), Data::from(0i64)),
            (Data::from("k11"), Data::from(11i64)),
            (Data::from("k12"), Data::from(12i64)),
            (Data::from("k13"), Data::from(13i64)),
        ],
        expiries: Vec::new(),
    };
    commands.publish(
        &topic,
        CommandMessage::new(
            master_id,
            13,
            Command::SnapshotReply { seq: 13, snapshot: caught_up },
        ),
    );
    assert_eq!(await_key(&clone, "k13").await, Data::from(13i64));

    // seq 14 now applies without any further gap.
    commands.publish(
        &topic,
        CommandMessage::new(master_id, 14, put("k14", 14)),
    );
    assert_eq!(await_key(&clone, "k14").await, Data::from(14i64));
    assert_eq!(await_key(&clone, "k11").await, Data::from(11i64));
}

fn put(key: &str, value: i64) -> Command {
    Command::Put {
        key: Data::from(key),
        value: Data::from(value),
        expiry: None,
        publisher: EntityId::nil(),
    }
}

async fn wait_for_snapshot_request(
    bus: &mut broadcast::Receiver<CommandMessage>,
) -> EntityId {
    let deadline = Duration::from_secs(5);
    loop {
        let message = timeout(deadline, bus.recv())
            .await
            .expect("timed out waiting for snapshot request")
            .expect("command channel closed");
        if let Command::SnapshotRequest { clone_id } = message.payload {
            return clone_id;
        }
    }
}

#[tokio::test]
async fn replicated_put_carries_absolute_expiry() {
    let (_hub, endpoint) = fabric();
    let commands = endpoint.commands();
    let topic = Topic::store_commands("E").unwrap();
    let mut bus = commands.subscribe(&topic);

    let master = endpoint
        .attach_master("E", BackendType::Memory, &BackendOptions::new())
        .unwrap();
    master.put("t", "x", Some(Timespan::from_secs(3600)));
    master.get("t").await.unwrap();

    let deadline = Duration::from_secs(5);
    loop {
        let message = timeout(deadline, bus.recv())
            .await
            .expect("timed out waiting for replicated put")
            .expect("command channel closed");
        if let Command::Put { key, expiry, .. } = message.payload {
            assert_eq!(key, Data::from("t"));
            assert_eq!(message.seq, 1);
            assert!(
                matches!(expiry, Some(Expiry::Absolute(_))),
                "committed commands carry the master's chosen instant"
            );
            break;
        }
    }
}

#[tokio::test]
async fn second_master_attach_is_rejected() {
    let (_hub, endpoint) = fabric();
    let store = endpoint
        .attach_master("dup", BackendType::Memory, &BackendOptions::new())
        .unwrap();
    let error = endpoint
        .attach_master("dup", BackendType::Memory, &BackendOptions::new())
        .unwrap_err();
    assert_eq!(error.kind(), skein_core::ErrorKind::MasterExists);

    // Detach frees the name again.
    store.detach();
    let deadline = Instant::now() + Duration::from_secs(5);
    while endpoint.has_master("dup") {
        assert!(Instant::now() < deadline, "master registration not released");
        sleep(Duration::from_millis(10)).await;
    }
    endpoint
        .attach_master("dup", BackendType::Memory, &BackendOptions::new())
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn proxy_collects_responses_in_arrival_order() {
    let (_hub, endpoint) = fabric();
    let store = endpoint
        .attach_master("P", BackendType::Memory, &BackendOptions::new())
        .unwrap();
    store.put("a", 1i64, None);

    let mut proxy = store.proxy().unwrap();
    let first = proxy.exists("a");
    let second = proxy.get("a");
    let third = proxy.get("missing");
    assert!(first < second && second < third, "request ids are monotonic");

    // Queries share the actor's request queue, so once a later query has
    // answered, the proxy responses are all buffered.
    store.get("a").await.unwrap();
    let mailbox = proxy.mailbox();
    assert_eq!(mailbox.buffer_size(), 3);
    assert!(mailbox.fd() >= 0);

    let responses = proxy.receive_n(3);
    assert_eq!(responses[0].id, first);
    assert_eq!(responses[0].answer, Ok(Data::Boolean(true)));
    assert_eq!(responses[1].id, second);
    assert_eq!(responses[1].answer, Ok(Data::from(1i64)));
    assert_eq!(responses[2].id, third);
    assert_eq!(
        responses[2].answer.as_ref().unwrap_err().kind(),
        skein_core::ErrorKind::NoSuchKey
    );
    assert!(mailbox.is_empty());
}

#[tokio::test]
async fn sqlite_master_persists_across_reattach() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.path = Some(dir.path().join("store.db"));

    let hub = Hub::start_new();
    let endpoint = StoreEndpoint::new(Arc::clone(&hub), cfg);

    let store = endpoint
        .attach_master("D", BackendType::Sqlite, &BackendOptions::new())
        .unwrap();
    store.put("persisted", 42i64, None);
    assert_eq!(store.get("persisted").await.unwrap(), Data::from(42i64));
    store.detach();

    let deadline = Instant::now() + Duration::from_secs(5);
    while endpoint.has_master("D") {
        assert!(Instant::now() < deadline, "master registration not released");
        sleep(Duration::from_millis(10)).await;
    }

    // The configured path names the same database, so the new master
    // resumes with the previous contents.
    let store = endpoint
        .attach_master("D", BackendType::Sqlite, &BackendOptions::new())
        .unwrap();
    assert_eq!(store.get("persisted").await.unwrap(), Data::from(42i64));
}

#[tokio::test]
async fn container_modifiers_reshape_values() {
    let (_hub, endpoint) = fabric();
    let store = endpoint
        .attach_master("C", BackendType::Memory, &BackendOptions::new())
        .unwrap();

    store.insert_into("set", 1i64, None);
    store.insert_into("set", 2i64, None);
    store.remove_from("set", 1i64, None);
    assert_eq!(
        store.get_index_from_value("set", 2i64).await.unwrap(),
        Data::Boolean(true)
    );
    assert_eq!(
        store.get_index_from_value("set", 1i64).await.unwrap(),
        Data::Boolean(false)
    );

    store.insert_into_table("table", "x", 10u64, None);
    assert_eq!(
        store.get_index_from_value("table", "x").await.unwrap(),
        Data::Count(10)
    );

    store.push("vec", "first", None);
    store.push("vec", "second", None);
    store.pop("vec", None);
    assert_eq!(
        store.get("vec").await.unwrap(),
        Data::Vector(vec![Data::from("first")])
    );

    store.append("s", "ab", None);
    store.append("s", "cd", None);
    assert_eq!(store.get("s").await.unwrap(), Data::from("abcd"));

    store.increment("n", Data::Count(5), None);
    store.decrement("n", Data::Count(2), None);
    assert_eq!(store.get("n").await.unwrap(), Data::Count(3));

    store.clear();
    assert_eq!(store.keys().await.unwrap(), Data::Set(Default::default()));
}
