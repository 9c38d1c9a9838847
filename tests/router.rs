use std::borrow::Cow;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::{Value, json};
use tagrelay::dispatch::{DiagnosticKind, EventRouter, Handler, HandlerError, MemorySink};
use tagrelay::message::{Message, ResultCode, Tag};

/// Closure handler that appends `label` to a shared log on every call.
fn recorder(
    log: &Arc<Mutex<Vec<String>>>,
    label: &str,
) -> impl Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static {
    let log = Arc::clone(log);
    let label = label.to_string();
    move |message| {
        log.lock().unwrap().push(format!("{label}:{}", message.tag()));
        Ok(())
    }
}

/// Struct handler used where tests need a nameable, shareable instance.
struct Counting {
    hits: Arc<AtomicU32>,
}

impl Handler for Counting {
    fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("counting")
    }
}

#[test]
fn handlers_fire_in_batch_order() {
    let router = EventRouter::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    router.subscribe_fn("profile", recorder(&log, "a"));
    router.subscribe_fn("rank", recorder(&log, "b"));
    router.subscribe_fn("bonus", recorder(&log, "c"));

    router.dispatch(&[
        Message::ok("rank", json!(1)),
        Message::ok("bonus", json!(2)),
        Message::ok("profile", json!(3)),
    ]);

    assert_eq!(
        *log.lock().unwrap(),
        vec!["b:rank", "c:bonus", "a:profile"]
    );
}

#[test]
fn fan_out_follows_registration_order() {
    let router = EventRouter::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    router.subscribe_fn("rank", recorder(&log, "first"));
    router.subscribe_fn("rank", recorder(&log, "second"));
    router.subscribe_fn("rank", recorder(&log, "third"));

    router.dispatch(&[Message::ok("rank", Value::Null)]);

    assert_eq!(
        *log.lock().unwrap(),
        vec!["first:rank", "second:rank", "third:rank"]
    );
}

#[test]
fn self_unsubscribe_keeps_current_batch() {
    let router = Arc::new(EventRouter::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let id_cell = Arc::new(OnceLock::new());

    let id = {
        let router = Arc::clone(&router);
        let log = Arc::clone(&log);
        let id_cell = Arc::clone(&id_cell);
        router.clone().subscribe_fn("rank", move |message| {
            log.lock()
                .unwrap()
                .push(message.payload().as_str().unwrap_or_default().to_string());
            let id = *id_cell.get().expect("id stored before dispatch");
            let _ = router.unsubscribe(id);
            Ok(())
        })
    };
    id_cell.set(id).unwrap();

    router.dispatch(&[
        Message::ok("rank", json!("m1")),
        Message::ok("rank", json!("m2")),
    ]);

    // Both messages of the in-flight batch were delivered.
    assert_eq!(*log.lock().unwrap(), vec!["m1", "m2"]);
    assert!(router.is_empty());

    router.dispatch(&[Message::ok("rank", json!("m3"))]);
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn subscribe_during_dispatch_waits_for_next_batch() {
    let router = Arc::new(EventRouter::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    {
        let router = Arc::clone(&router);
        let log = Arc::clone(&log);
        router.clone().subscribe_fn("rank", move |_| {
            let log = Arc::clone(&log);
            router.subscribe_fn("bonus", move |message| {
                log.lock().unwrap().push(message.tag().to_string());
                Ok(())
            });
            Ok(())
        });
    }

    router.dispatch(&[
        Message::ok("rank", Value::Null),
        Message::ok("bonus", Value::Null),
    ]);

    // The bonus handler was registered mid-batch and missed this batch.
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(router.subscriber_count(&Tag::new("bonus")), 1);

    router.dispatch(&[Message::ok("bonus", Value::Null)]);
    assert_eq!(*log.lock().unwrap(), vec!["bonus"]);
}

#[test]
fn duplicate_subscription_is_rejected() {
    let sink = MemorySink::new();
    let router = EventRouter::with_sink(sink.clone());

    let hits = Arc::new(AtomicU32::new(0));
    let handler = Arc::new(Counting {
        hits: Arc::clone(&hits),
    });

    assert!(router.subscribe("rank", handler.clone()).is_some());
    assert!(router.subscribe("rank", handler.clone()).is_none());
    assert_eq!(router.subscriber_count(&Tag::new("rank")), 1);

    // Same instance on a different tag is a distinct pair.
    assert!(router.subscribe("bonus", handler.clone()).is_some());

    router.dispatch(&[Message::ok("rank", Value::Null)]);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let diagnostics = sink.snapshot();
    assert_eq!(diagnostics.len(), 1);
    match &diagnostics[0].kind {
        DiagnosticKind::DuplicateSubscription { tag, handler } => {
            assert_eq!(tag.as_str(), "rank");
            assert_eq!(handler, "counting");
        }
        other => panic!("expected duplicate diagnostic, got {other:?}"),
    }
}

#[test]
fn failing_handler_does_not_block_siblings() {
    let sink = MemorySink::new();
    let router = EventRouter::with_sink(sink.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    router.subscribe_fn("rank", |_| Err(HandlerError::msg("rank cache poisoned")));
    router.subscribe_fn("rank", recorder(&log, "survivor"));

    router.dispatch(&[Message::ok("rank", Value::Null)]);

    assert_eq!(*log.lock().unwrap(), vec!["survivor:rank"]);

    let diagnostics = sink.snapshot();
    assert_eq!(diagnostics.len(), 1);
    match &diagnostics[0].kind {
        DiagnosticKind::HandlerFault { tag, error, .. } => {
            assert_eq!(tag.as_str(), "rank");
            assert_eq!(error, "rank cache poisoned");
        }
        other => panic!("expected fault diagnostic, got {other:?}"),
    }

    let metrics = router.metrics();
    assert_eq!(metrics.faults, 1);
    assert_eq!(metrics.deliveries, 1);
}

#[test]
fn panicking_handler_is_contained() {
    let sink = MemorySink::new();
    let router = EventRouter::with_sink(sink.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    router.subscribe_fn("bonus", |_| panic!("bonus table corrupt"));
    router.subscribe_fn("bonus", recorder(&log, "survivor"));

    router.dispatch(&[Message::ok("bonus", Value::Null)]);

    assert_eq!(*log.lock().unwrap(), vec!["survivor:bonus"]);
    let diagnostics = sink.snapshot();
    assert_eq!(diagnostics.len(), 1);
    match &diagnostics[0].kind {
        DiagnosticKind::HandlerFault { error, .. } => {
            assert!(error.contains("bonus table corrupt"), "got: {error}");
        }
        other => panic!("expected fault diagnostic, got {other:?}"),
    }
}

#[test]
fn unbound_tag_is_silently_dropped() {
    let sink = MemorySink::new();
    let router = EventRouter::with_sink(sink.clone());

    router.subscribe_fn("rank", |_| Ok(()));
    router.dispatch(&[Message::ok("season_pass", Value::Null)]);

    assert!(sink.snapshot().is_empty());

    let metrics = router.metrics();
    assert_eq!(metrics.deliveries, 0);
    assert_eq!(metrics.unrouted.get(&Tag::new("season_pass")), Some(&1));
}

#[test]
#[should_panic(expected = "re-entered while a batch is in flight")]
fn nested_dispatch_fails_fast() {
    let router = Arc::new(EventRouter::new());

    let inner = Arc::clone(&router);
    router.subscribe_fn("rank", move |_| {
        inner.dispatch(&[Message::ok("bonus", Value::Null)]);
        Ok(())
    });

    router.dispatch(&[Message::ok("rank", Value::Null)]);
}

#[test]
fn unsubscribe_of_pending_addition_cancels_it() {
    let router = Arc::new(EventRouter::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    {
        let router = Arc::clone(&router);
        let log = Arc::clone(&log);
        router.clone().subscribe_fn("ctl", move |_| {
            let id = router.subscribe_fn("rank", recorder(&log, "cancelled"));
            assert!(router.unsubscribe(id));
            Ok(())
        });
    }

    router.dispatch(&[Message::ok("ctl", Value::Null)]);

    // The addition never reached the active table.
    assert_eq!(router.subscriber_count(&Tag::new("rank")), 0);
    router.dispatch(&[Message::ok("rank", Value::Null)]);
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn resubscribe_while_removal_pending_is_rejected() {
    let router = Arc::new(EventRouter::new());

    let handler: Arc<dyn Handler> =
        Arc::new(|_message: &Message| -> Result<(), HandlerError> { Ok(()) });
    let id = router
        .subscribe("rank", handler.clone())
        .expect("first registration");

    {
        let router2 = Arc::clone(&router);
        let handler = handler.clone();
        router.subscribe_fn("ctl", move |_| {
            assert!(router2.unsubscribe(id));
            // Removal is only scheduled, so the pair still counts as live.
            assert!(router2.subscribe("rank", handler.clone()).is_none());
            Ok(())
        });
    }

    router.dispatch(&[Message::ok("ctl", Value::Null)]);

    // After reconciliation the pair is gone and may register again.
    assert_eq!(router.subscriber_count(&Tag::new("rank")), 0);
    assert!(router.subscribe("rank", handler).is_some());
}

#[test]
fn clear_during_dispatch_is_deferred() {
    let router = Arc::new(EventRouter::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    router.subscribe_fn("rank", recorder(&log, "observer"));
    {
        let router = Arc::clone(&router);
        router.clone().subscribe_fn("ctl", move |_| {
            router.clear();
            Ok(())
        });
    }

    router.dispatch(&[
        Message::ok("ctl", Value::Null),
        Message::ok("rank", Value::Null),
    ]);

    // The rank message arrived after clear() yet was still delivered.
    assert_eq!(*log.lock().unwrap(), vec!["observer:rank"]);
    assert!(router.is_empty());
}

#[test]
fn clear_when_idle_is_immediate() {
    let router = EventRouter::new();
    router.subscribe_fn("rank", |_| Ok(()));
    router.subscribe_fn("bonus", |_| Ok(()));
    assert_eq!(router.len(), 2);

    router.clear();
    assert!(router.is_empty());
}

#[test]
fn metrics_count_batches_messages_and_deliveries() {
    let router = EventRouter::new();
    router.subscribe_fn("rank", |_| Ok(()));

    router.dispatch(&[
        Message::ok("rank", Value::Null),
        Message::ok("rank", Value::Null),
    ]);
    router.dispatch(&[Message::ok("rank", Value::Null)]);

    let metrics = router.metrics();
    assert_eq!(metrics.batches, 2);
    assert_eq!(metrics.messages, 3);
    assert_eq!(metrics.deliveries, 3);
    assert_eq!(metrics.faults, 0);
}

#[test]
fn rank_and_bonus_session_scenario() {
    let router = EventRouter::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let awards = Arc::new(Mutex::new(Vec::new()));

    {
        let calls = Arc::clone(&calls);
        router.subscribe_fn("rank", move |message| {
            calls.lock().unwrap().push("A");
            assert!(message.code().is_success());
            Ok(())
        });
    }
    {
        let calls = Arc::clone(&calls);
        let awards = Arc::clone(&awards);
        router.subscribe_fn("bonus", move |message| {
            calls.lock().unwrap().push("B");
            if message.code().is_success() {
                awards.lock().unwrap().push(message.payload().clone());
            }
            Ok(())
        });
    }

    router.dispatch(&[
        Message::ok("rank", json!({"rank": 12})),
        Message::failed("bonus", ResultCode(5001)),
        Message::ok("rank", json!({"rank": 11})),
    ]);

    // A(m1), B(m2), A(m3) — and the failed bonus changed no state.
    assert_eq!(*calls.lock().unwrap(), vec!["A", "B", "A"]);
    assert!(awards.lock().unwrap().is_empty());
}
