use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::diagnostics::{DiagnosticKind, RouterDiagnostic};
use super::handler::{Handler, HandlerError, SubscriptionId};
use super::sink::{DiagnosticSink, TracingSink};
use crate::message::{Message, Tag};

/// Panic message for a nested dispatch. Stable so the fault-isolation
/// layer can recognise and re-raise it instead of logging it.
const REENTRANT_DISPATCH: &str = "EventRouter::dispatch re-entered while a batch is in flight";

/// One registration, active or pending.
#[derive(Clone)]
struct Entry {
    id: SubscriptionId,
    tag: Tag,
    handler: Arc<dyn Handler>,
}

/// Subscription table plus the deferred-mutation buffers.
///
/// While `dispatching` is set, `active` is structurally frozen: every
/// mutation lands in `pending_add`/`pending_remove` and is applied by
/// reconciliation after the batch loop.
#[derive(Default)]
struct Table {
    active: Vec<Entry>,
    pending_add: Vec<Entry>,
    pending_remove: Vec<SubscriptionId>,
    dispatching: bool,
    unrouted: FxHashMap<Tag, u64>,
}

impl Table {
    fn contains(&self, tag: &Tag, handler: &Arc<dyn Handler>) -> bool {
        self.active
            .iter()
            .chain(self.pending_add.iter())
            .any(|entry| {
                entry.tag == *tag
                    && ptr::addr_eq(Arc::as_ptr(&entry.handler), Arc::as_ptr(handler))
            })
    }
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    messages: AtomicU64,
    deliveries: AtomicU64,
    faults: AtomicU64,
}

/// Point-in-time counters describing a router's dispatch history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterMetrics {
    /// Batches passed to `dispatch`.
    pub batches: u64,
    /// Messages seen across all batches.
    pub messages: u64,
    /// Successful handler invocations.
    pub deliveries: u64,
    /// Handler invocations that failed or panicked.
    pub faults: u64,
    /// Messages whose tag had no subscriber, keyed by tag.
    pub unrouted: FxHashMap<Tag, u64>,
}

/// Routes batches of tagged server messages to registered handlers.
///
/// The router owns an ordered subscription table plus pending add/remove
/// buffers. While a batch is being dispatched the table is structurally
/// frozen: `subscribe`/`unsubscribe` calls made from inside a handler are
/// buffered and applied right after the batch loop, so an in-flight batch
/// always sees the table as it was when dispatch began.
///
/// All methods take `&self`; one instance is shared as `Arc<EventRouter>`
/// between the network-receive side and any number of feature modules.
/// Internal locks are never held across handler invocations, which is what
/// makes re-entrant `subscribe`/`unsubscribe` safe.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tagrelay::dispatch::EventRouter;
/// use tagrelay::message::Message;
///
/// let router = EventRouter::new();
/// let id = router.subscribe_fn("notice", |message| {
///     println!("notice: {}", message.payload());
///     Ok(())
/// });
///
/// router.dispatch(&[Message::ok("notice", json!({"text": "maintenance at 04:00"}))]);
/// router.unsubscribe(id);
/// ```
pub struct EventRouter {
    table: Mutex<Table>,
    sinks: Mutex<Vec<Box<dyn DiagnosticSink>>>,
    next_id: AtomicU64,
    occurrence: AtomicU64,
    counters: Counters,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    /// Create a router reporting diagnostics through `tracing`.
    pub fn new() -> Self {
        Self::with_sink(TracingSink)
    }

    /// Create a router with a single diagnostic sink.
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: DiagnosticSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    /// Create a router with multiple diagnostic sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn DiagnosticSink>>) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            sinks: Mutex::new(sinks),
            next_id: AtomicU64::new(1),
            occurrence: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Add a diagnostic sink (useful for per-session capture).
    pub fn add_sink<T: DiagnosticSink + 'static>(&self, sink: T) {
        self.sinks.lock().push(Box::new(sink));
    }

    /// Bind `handler` to `tag`, returning the handle used to unsubscribe.
    ///
    /// A `(tag, handler)` pair that is already registered — or queued for
    /// registration while a batch is in flight — is rejected: the call
    /// reports [`DiagnosticKind::DuplicateSubscription`] and returns
    /// `None`. Pairs are identified by `Arc` allocation, so one handler
    /// instance can serve several tags and one tag can fan out to several
    /// handlers.
    ///
    /// A subscription made while dispatching takes effect for the *next*
    /// batch, never the current one.
    pub fn subscribe(
        &self,
        tag: impl Into<Tag>,
        handler: Arc<dyn Handler>,
    ) -> Option<SubscriptionId> {
        let tag = tag.into();
        let mut table = self.table.lock();
        if table.contains(&tag, &handler) {
            let kind = DiagnosticKind::DuplicateSubscription {
                tag,
                handler: handler.name().into_owned(),
            };
            drop(table);
            self.report(kind);
            return None;
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Entry { id, tag, handler };
        if table.dispatching {
            table.pending_add.push(entry);
        } else {
            table.active.push(entry);
        }
        Some(id)
    }

    /// Bind a closure to `tag`.
    ///
    /// A fresh closure allocation can never collide with an existing
    /// registration, so this always yields a handle.
    pub fn subscribe_fn<F>(&self, tag: impl Into<Tag>, handler: F) -> SubscriptionId
    where
        F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(tag, Arc::new(handler))
            .expect("fresh handler allocation cannot be a duplicate")
    }

    /// Remove the registration behind `id`.
    ///
    /// When idle the entry is removed immediately. While dispatching the
    /// removal is buffered and applied after the current batch, so a
    /// handler that unsubscribes itself still sees the rest of the batch
    /// it was matched against. Unsubscribing a handle that was itself
    /// subscribed during the in-flight batch cancels the pending addition.
    ///
    /// Returns `false` and reports [`DiagnosticKind::UnknownSubscription`]
    /// when `id` has no live registration, including a second unsubscribe
    /// of an id whose removal is already scheduled.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.table.lock();
        if table.dispatching {
            if let Some(pos) = table.pending_add.iter().position(|e| e.id == id) {
                table.pending_add.remove(pos);
                return true;
            }
            if table.active.iter().any(|e| e.id == id) && !table.pending_remove.contains(&id) {
                table.pending_remove.push(id);
                return true;
            }
        } else if let Some(pos) = table.active.iter().position(|e| e.id == id) {
            table.active.remove(pos);
            return true;
        }
        drop(table);
        self.report(DiagnosticKind::UnknownSubscription { id });
        false
    }

    /// Remove every registration, e.g. when the owning scope shuts down.
    ///
    /// Follows the same deferral rules as [`unsubscribe`](Self::unsubscribe):
    /// during a dispatch the active table drains only after the batch
    /// completes, and queued additions are cancelled.
    pub fn clear(&self) {
        let mut table = self.table.lock();
        if table.dispatching {
            let ids: Vec<SubscriptionId> = table.active.iter().map(|e| e.id).collect();
            table.pending_add.clear();
            table.pending_remove = ids;
        } else {
            table.active.clear();
        }
    }

    /// Deliver one decoded batch, in order, to every matching handler.
    ///
    /// For each message the table snapshot is scanned in registration
    /// order and every entry whose tag matches is invoked. A handler fault
    /// (error return or panic) is reported as
    /// [`DiagnosticKind::HandlerFault`] and the batch continues: one broken
    /// feature handler never blocks delivery to unrelated ones. A message
    /// whose tag has no subscriber is dropped silently and only counted in
    /// [`metrics`](Self::metrics).
    ///
    /// # Panics
    ///
    /// Panics when called while another batch is already in flight on this
    /// router. A nested dispatch would corrupt the pending buffers, so it
    /// fails loudly instead of being isolated like an ordinary handler
    /// fault.
    pub fn dispatch(&self, batch: &[Message]) {
        let snapshot = self.begin_dispatch();

        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        for message in batch {
            self.counters.messages.fetch_add(1, Ordering::Relaxed);
            let mut matched = false;
            for entry in snapshot.iter().filter(|e| e.tag == *message.tag()) {
                matched = true;
                self.invoke(entry, message);
            }
            if !matched {
                let mut table = self.table.lock();
                *table.unrouted.entry(message.tag().clone()).or_insert(0) += 1;
            }
        }

        self.finish_dispatch();
    }

    /// Number of active registrations (pending additions excluded).
    pub fn len(&self) -> usize {
        self.table.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Active registrations bound to `tag`.
    pub fn subscriber_count(&self, tag: &Tag) -> usize {
        self.table
            .lock()
            .active
            .iter()
            .filter(|e| e.tag == *tag)
            .count()
    }

    /// Snapshot of the dispatch counters.
    pub fn metrics(&self) -> RouterMetrics {
        RouterMetrics {
            batches: self.counters.batches.load(Ordering::Relaxed),
            messages: self.counters.messages.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            faults: self.counters.faults.load(Ordering::Relaxed),
            unrouted: self.table.lock().unrouted.clone(),
        }
    }

    /// Freeze the table and snapshot the active entries.
    fn begin_dispatch(&self) -> Vec<Entry> {
        let mut table = self.table.lock();
        if table.dispatching {
            drop(table);
            panic!("{}", REENTRANT_DISPATCH);
        }
        table.dispatching = true;
        table.active.clone()
    }

    /// Apply buffered removals, then buffered additions, then unfreeze.
    fn finish_dispatch(&self) {
        let mut table = self.table.lock();
        let removals = mem::take(&mut table.pending_remove);
        if !removals.is_empty() {
            table.active.retain(|entry| !removals.contains(&entry.id));
        }
        let additions = mem::take(&mut table.pending_add);
        table.active.extend(additions);
        table.dispatching = false;
    }

    fn invoke(&self, entry: &Entry, message: &Message) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.handler.handle(message)));
        let error = match outcome {
            Ok(Ok(())) => {
                self.counters.deliveries.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(Err(err)) => err.to_string(),
            Err(payload) => {
                if is_reentrant_dispatch(payload.as_ref()) {
                    panic::resume_unwind(payload);
                }
                panic_message(payload.as_ref())
            }
        };

        self.counters.faults.fetch_add(1, Ordering::Relaxed);
        self.report(DiagnosticKind::HandlerFault {
            id: entry.id,
            tag: entry.tag.clone(),
            handler: entry.handler.name().into_owned(),
            error,
        });
    }

    fn report(&self, kind: DiagnosticKind) {
        let diagnostic = RouterDiagnostic {
            kind,
            when: Utc::now(),
            occurrence: self.occurrence.fetch_add(1, Ordering::Relaxed) + 1,
        };
        for sink in self.sinks.lock().iter_mut() {
            sink.report(&diagnostic);
        }
    }
}

fn is_reentrant_dispatch(payload: &(dyn Any + Send)) -> bool {
    payload
        .downcast_ref::<&'static str>()
        .is_some_and(|msg| *msg == REENTRANT_DISPATCH)
        || payload
            .downcast_ref::<String>()
            .is_some_and(|msg| msg == REENTRANT_DISPATCH)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
