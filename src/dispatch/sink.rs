use std::sync::Arc;

use parking_lot::Mutex;

use super::diagnostics::RouterDiagnostic;

/// Abstraction over an output target that consumes router diagnostics.
///
/// Sinks are invoked with router internals locked; a sink must not call
/// back into the router that owns it.
pub trait DiagnosticSink: Send + Sync {
    /// Consume one diagnostic. The sink decides how to record or forward it.
    fn report(&mut self, diagnostic: &RouterDiagnostic);
}

/// Default sink forwarding diagnostics to the `tracing` subscriber.
///
/// Registration noise logs at `warn`, handler faults at `error`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&mut self, diagnostic: &RouterDiagnostic) {
        let kind = &diagnostic.kind;
        if kind.is_fault() {
            tracing::error!(occurrence = diagnostic.occurrence, "{}", kind);
        } else {
            tracing::warn!(occurrence = diagnostic.occurrence, "{}", kind);
        }
    }
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<RouterDiagnostic>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of all captured diagnostics.
    pub fn snapshot(&self) -> Vec<RouterDiagnostic> {
        self.entries.lock().clone()
    }

    /// Clear all captured diagnostics.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&mut self, diagnostic: &RouterDiagnostic) {
        self.entries.lock().push(diagnostic.clone());
    }
}

/// Channel-based sink forwarding diagnostics to another consumer.
///
/// Sends never block; a diagnostic is dropped if the receiver is gone.
pub struct ChannelSink {
    tx: flume::Sender<RouterDiagnostic>,
}

impl ChannelSink {
    /// Create a new channel sink.
    ///
    /// # Example
    /// ```
    /// use tagrelay::dispatch::{ChannelSink, EventRouter};
    ///
    /// let (tx, rx) = flume::unbounded();
    /// let router = EventRouter::with_sink(ChannelSink::new(tx));
    ///
    /// let id = router.subscribe_fn("notice", |_| Ok(()));
    /// router.unsubscribe(id);
    /// router.unsubscribe(id); // already removed; reported as a diagnostic
    /// assert!(rx.try_recv().is_ok());
    /// ```
    pub fn new(tx: flume::Sender<RouterDiagnostic>) -> Self {
        Self { tx }
    }
}

impl DiagnosticSink for ChannelSink {
    fn report(&mut self, diagnostic: &RouterDiagnostic) {
        let _ = self.tx.send(diagnostic.clone());
    }
}
