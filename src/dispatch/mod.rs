//! Tag-keyed dispatch of server-pushed message batches.
//!
//! The module is organised around [`EventRouter`] — the subscription table
//! with its deferred-mutation discipline — plus the [`Handler`] contract it
//! invokes and the [`DiagnosticSink`]s it reports through.

pub mod diagnostics;
pub mod handler;
pub mod router;
pub mod sink;

pub use diagnostics::{DiagnosticKind, RouterDiagnostic};
pub use handler::{Handler, HandlerError, SubscriptionId};
pub use router::{EventRouter, RouterMetrics};
pub use sink::{ChannelSink, DiagnosticSink, MemorySink, TracingSink};
