use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use super::{Client, ClientKind, ConnectionState, Hub, Outbox, Payload};

fn hub(capacity: usize) -> Arc<Hub> {
    Arc::new(Hub::new("test", "new-regis", capacity))
}

/// One captured log event.
#[derive(Debug, Clone)]
struct Captured {
    level: tracing::Level,
    fields: Vec<String>,
    hub_locked: bool,
}

impl Captured {
    fn has(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

struct FieldList<'a>(&'a mut Vec<String>);

impl Visit for FieldList<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.push(format!("{}={:?}", field.name(), value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.push(format!("{}={}", field.name(), value));
    }
}

/// Records every event, and whether `hub`'s registry was locked while it
/// was emitted.
struct CaptureLayer {
    hub: Arc<Hub>,
    events: Arc<Mutex<Vec<Captured>>>,
}

impl<S: tracing::Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Vec::new();
        event.record(&mut FieldList(&mut fields));
        self.events.lock().unwrap().push(Captured {
            level: *event.metadata().level(),
            fields,
            hub_locked: self.hub.registry_locked(),
        });
    }
}

fn capture_logs<R>(hub: &Arc<Hub>, f: impl FnOnce() -> R) -> (R, Vec<Captured>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(CaptureLayer {
        hub: Arc::clone(hub),
        events: Arc::clone(&events),
    });
    let result = tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().unwrap().clone();
    (result, captured)
}

fn drain(outbox: &mut Outbox) -> Vec<String> {
    let mut received = Vec::new();
    while let Some(message) = outbox.try_recv() {
        received.push(message.payload.as_text().into_owned());
    }
    received
}

#[test]
fn test_hub_new() {
    let hub = hub(8);
    assert_eq!(hub.name(), "test");
    assert_eq!(hub.event(), "new-regis");
    assert_eq!(hub.queue_capacity(), 8);
    assert_eq!(hub.client_count(), 0);
}

#[test]
fn test_zero_capacity_is_clamped() {
    let hub = Hub::new("test", "message", 0);
    assert_eq!(hub.queue_capacity(), 1);
}

#[test]
fn test_register_and_unregister() {
    let hub = hub(8);
    let (client, _outbox) = Client::new(ClientKind::SendOnly, 8);
    let id = client.id().clone();

    hub.register(client);
    assert!(hub.contains(&id));
    assert_eq!(hub.client_count(), 1);

    assert!(hub.unregister(&id));
    assert!(!hub.contains(&id));
    assert_eq!(hub.client_count(), 0);
}

#[test]
fn test_unregister_twice_is_noop() {
    let hub = hub(8);
    let (client, _outbox) = Client::new(ClientKind::SendOnly, 8);
    let id = client.id().clone();
    hub.register(client);

    assert!(hub.unregister(&id));
    assert!(!hub.unregister(&id));
}

#[test]
fn test_unregister_unknown_client_is_noop() {
    let hub = hub(8);
    let (stranger, _outbox) = Client::new(ClientKind::SendReceive, 8);
    assert!(!hub.unregister(stranger.id()));
    assert_eq!(hub.client_count(), 0);
}

#[test]
fn test_broadcast_without_clients() {
    let hub = hub(8);
    let report = hub.broadcast("nobody listens");
    assert_eq!(report.delivered, 0);
    assert_eq!(report.dropped, 0);
    assert_eq!(hub.stats().broadcasts, 1);
}

#[test]
fn test_unregistered_client_receives_nothing_more() {
    let hub = hub(8);
    let (reg_a, mut outbox_a) = hub.attach(ClientKind::SendOnly);
    let (_reg_b, mut outbox_b) = hub.attach(ClientKind::SendOnly);

    hub.broadcast("m1");
    assert_eq!(drain(&mut outbox_a), vec!["m1"]);

    drop(reg_a);
    let report = hub.broadcast("m2");
    assert_eq!(report.delivered, 1);

    assert_eq!(drain(&mut outbox_b), vec!["m1", "m2"]);
    assert!(drain(&mut outbox_a).is_empty());
}

#[tokio::test]
async fn test_queue_closes_after_unregister() {
    let hub = hub(8);
    let (registration, mut outbox) = hub.attach(ClientKind::SendOnly);

    hub.broadcast("last");
    drop(registration);

    let last = outbox.recv().await.expect("queued message survives unregister");
    assert_eq!(last.payload, Payload::Text("last".to_string()));
    assert!(outbox.recv().await.is_none());
}

#[tokio::test]
async fn test_two_clients_scenario() {
    let hub = hub(8);
    let (reg_a, mut outbox_a) = hub.attach(ClientKind::SendOnly);
    let (_reg_b, mut outbox_b) = hub.attach(ClientKind::SendReceive);

    hub.broadcast("m1");
    assert_eq!(outbox_a.recv().await.unwrap().payload.as_text(), "m1");
    assert_eq!(outbox_b.recv().await.unwrap().payload.as_text(), "m1");

    drop(reg_a);
    hub.broadcast("m2");
    assert_eq!(outbox_b.recv().await.unwrap().payload.as_text(), "m2");
    assert!(outbox_a.recv().await.is_none());
}

#[test]
fn test_full_client_does_not_starve_others() {
    let hub = hub(2);
    let (_stalled_reg, mut stalled) = hub.attach(ClientKind::SendOnly);
    let (_healthy_reg, mut healthy) = hub.attach(ClientKind::SendOnly);

    let mut healthy_seen = Vec::new();
    for i in 0..5 {
        let report = hub.broadcast(format!("m{i}"));
        assert_eq!(report.delivered + report.dropped, 2);
        healthy_seen.extend(drain(&mut healthy));
    }

    assert_eq!(healthy_seen, vec!["m0", "m1", "m2", "m3", "m4"]);
    assert_eq!(drain(&mut stalled), vec!["m0", "m1"]);

    let stats = hub.stats();
    assert_eq!(stats.dropped, 3);
    assert_eq!(stats.broadcasts, 5);
}

#[test]
fn test_closed_outbox_is_skipped() {
    let hub = hub(4);
    let (_registration, outbox) = hub.attach(ClientKind::SendOnly);
    drop(outbox);

    let report = hub.broadcast("into the void");
    assert_eq!(report.delivered, 0);
    assert_eq!(report.closed, 1);
    assert_eq!(hub.client_count(), 1);
}

#[test]
fn test_delivery_ids_strictly_increase() {
    let hub = hub(64);
    let (_registration, mut outbox) = hub.attach(ClientKind::SendOnly);

    let reports: Vec<_> = (0..50).map(|i| hub.broadcast(format!("{i}"))).collect();
    for pair in reports.windows(2) {
        assert!(pair[0].id < pair[1].id);
    }

    let mut last = 0;
    while let Some(message) = outbox.try_recv() {
        assert!(message.id > last);
        assert_eq!(&*message.event, "new-regis");
        last = message.id;
    }
    assert_eq!(last, reports[49].id);
}

#[test]
fn test_registration_state_transitions() {
    let hub = hub(4);
    let (mut registration, _outbox) = hub.attach(ClientKind::SendReceive);
    assert_eq!(registration.state(), ConnectionState::Registered);
    assert_eq!(registration.kind(), ClientKind::SendReceive);
    assert!(hub.contains(registration.id()));

    registration.begin_streaming();
    assert_eq!(registration.state(), ConnectionState::Streaming);

    let id = registration.id().clone();
    drop(registration);
    assert!(!hub.contains(&id));
}

#[test]
fn test_connection_state_lifecycle() {
    use ConnectionState::*;
    assert!(Connecting.can_advance_to(Registered));
    assert!(Registered.can_advance_to(Streaming));
    assert!(Registered.can_advance_to(Unregistering));
    assert!(Streaming.can_advance_to(Unregistering));
    assert!(Unregistering.can_advance_to(Closed));

    assert!(!Connecting.can_advance_to(Streaming));
    assert!(!Streaming.can_advance_to(Registered));
    assert!(!Streaming.can_advance_to(Closed));
    assert!(!Closed.can_advance_to(Connecting));
    assert!(!Closed.can_advance_to(Unregistering));
}

#[test]
fn test_every_state_transition_is_logged() {
    let hub = hub(4);
    let ((), events) = capture_logs(&hub, || {
        let (mut registration, _outbox) = hub.attach(ClientKind::SendOnly);
        registration.begin_streaming();
        registration.begin_streaming();
    });

    let transitions: Vec<(String, String)> = events
        .iter()
        .filter(|e| e.has("message=connection state changed"))
        .map(|e| {
            let get = |name: &str| {
                e.fields
                    .iter()
                    .find_map(|f| f.strip_prefix(&format!("{name}=")).map(str::to_string))
                    .unwrap()
            };
            (get("from"), get("to"))
        })
        .collect();
    let expected = [
        ("Connecting", "Registered"),
        ("Registered", "Streaming"),
        ("Streaming", "Unregistering"),
        ("Unregistering", "Closed"),
    ];
    assert_eq!(
        transitions,
        expected
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect::<Vec<_>>()
    );
    assert_eq!(hub.client_count(), 0);
}

#[test]
fn test_unstreamed_registration_closes_through_unregistering() {
    let hub = hub(4);
    let ((), events) = capture_logs(&hub, || {
        let (registration, _outbox) = hub.attach(ClientKind::SendReceive);
        assert_eq!(registration.state(), ConnectionState::Registered);
    });
    assert!(events.iter().any(|e| e.has("from=Registered") && e.has("to=Unregistering")));
    assert!(events.iter().any(|e| e.has("from=Unregistering") && e.has("to=Closed")));
}

#[test]
fn test_queue_full_warning_logged_outside_hub_lock() {
    let hub = hub(1);
    let (_stalled, _stalled_outbox) = hub.attach(ClientKind::SendOnly);
    let (_reader, mut reader_outbox) = hub.attach(ClientKind::SendOnly);

    let (reports, events) = capture_logs(&hub, || {
        let first = hub.broadcast("m1");
        assert_eq!(drain(&mut reader_outbox), vec!["m1"]);
        let second = hub.broadcast("m2");
        (first, second)
    });

    assert_eq!(reports.0.dropped, 0);
    assert_eq!(reports.1.dropped, 1);
    assert_eq!(reports.1.delivered, 1);

    let warnings: Vec<&Captured> = events
        .iter()
        .filter(|e| e.level == tracing::Level::WARN)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].has("total_drops=1"));
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| !e.hub_locked));
}

#[tokio::test]
async fn test_registration_released_when_handler_panics() {
    let hub = hub(4);
    let task_hub = Arc::clone(&hub);
    let result = tokio::spawn(async move {
        let (_registration, _outbox) = task_hub.attach(ClientKind::SendOnly);
        panic!("handler blew up");
    })
    .await;

    assert!(result.is_err());
    assert_eq!(hub.client_count(), 0);
}

#[test]
fn test_stats_by_kind() {
    let hub = hub(4);
    let (_a, _oa) = hub.attach(ClientKind::SendOnly);
    let (_b, _ob) = hub.attach(ClientKind::SendOnly);
    let (_c, _oc) = hub.attach(ClientKind::SendReceive);

    let stats = hub.stats();
    assert_eq!(stats.name, "test");
    assert_eq!(stats.clients, 3);
    assert_eq!(stats.event_stream_clients, 2);
    assert_eq!(stats.socket_clients, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_see_contiguous_suffixes() {
    let hub = hub(4096);
    let producer_hub = Arc::clone(&hub);
    let producer = tokio::spawn(async move {
        for i in 0..2000u32 {
            producer_hub.broadcast(i.to_string());
            if i % 100 == 0 {
                tokio::task::yield_now().await;
            }
        }
    });

    let mut joiners = Vec::new();
    for n in 0..8u64 {
        let hub = Arc::clone(&hub);
        joiners.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_micros(n * 150)).await;
            let (registration, mut outbox) = hub.attach(ClientKind::SendOnly);
            tokio::time::sleep(Duration::from_millis(2)).await;
            drop(registration);

            let mut seen = Vec::new();
            while let Some(message) = outbox.recv().await {
                seen.push(message.payload.as_text().parse::<u32>().unwrap());
            }
            seen
        }));
    }

    producer.await.unwrap();
    for joiner in joiners {
        let seen = joiner.await.unwrap();
        for pair in seen.windows(2) {
            assert_eq!(pair[0] + 1, pair[1], "gap or reorder in {seen:?}");
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Register(usize),
    Unregister(usize),
    Broadcast,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize).prop_map(Op::Register),
        (0..4usize).prop_map(Op::Unregister),
        Just(Op::Broadcast),
        Just(Op::Broadcast),
    ]
}

proptest! {
    #[test]
    fn clients_receive_exactly_what_was_broadcast_while_registered(
        ops in proptest::collection::vec(op(), 0..60)
    ) {
        let hub = hub(128);
        let mut live: Vec<Option<(super::Registration, Outbox, Vec<String>)>> =
            (0..4).map(|_| None).collect();
        let mut finished = Vec::new();
        let mut counter = 0;

        for op in ops {
            match op {
                Op::Register(slot) => {
                    if live[slot].is_none() {
                        let (registration, outbox) = hub.attach(ClientKind::SendOnly);
                        live[slot] = Some((registration, outbox, Vec::new()));
                    }
                }
                Op::Unregister(slot) => {
                    if let Some((registration, outbox, expected)) = live[slot].take() {
                        drop(registration);
                        finished.push((outbox, expected));
                    }
                }
                Op::Broadcast => {
                    let payload = format!("m{counter}");
                    counter += 1;
                    hub.broadcast(payload.clone());
                    for (_, _, expected) in live.iter_mut().flatten() {
                        expected.push(payload.clone());
                    }
                }
            }
        }

        for (_, outbox, expected) in live.iter_mut().flatten() {
            prop_assert_eq!(drain(outbox), expected.clone());
        }
        for (mut outbox, expected) in finished {
            prop_assert_eq!(drain(&mut outbox), expected);
        }
    }
}
