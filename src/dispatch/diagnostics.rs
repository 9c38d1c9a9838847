use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::handler::SubscriptionId;
use crate::message::Tag;

/// A single diagnostic emitted for a recoverable router condition.
///
/// Diagnostics flow to the router's [`DiagnosticSink`](super::DiagnosticSink)s
/// and never back to the dispatch caller: a duplicate subscribe or a broken
/// handler is a caller bug worth reporting, not a reason to drop a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterDiagnostic {
    /// What happened.
    pub kind: DiagnosticKind,
    /// Timestamp for when the condition was observed.
    pub when: DateTime<Utc>,
    /// Monotonic occurrence counter across the owning router.
    pub occurrence: u64,
}

/// Recoverable conditions the router reports instead of raising.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A `(tag, handler)` pair was subscribed while already registered.
    DuplicateSubscription { tag: Tag, handler: String },
    /// An unsubscribe referenced a handle with no live registration.
    UnknownSubscription { id: SubscriptionId },
    /// A handler failed (error return or panic) while processing a message.
    HandlerFault {
        id: SubscriptionId,
        tag: Tag,
        handler: String,
        error: String,
    },
}

impl DiagnosticKind {
    /// True for handler faults, false for registration noise.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, DiagnosticKind::HandlerFault { .. })
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::DuplicateSubscription { tag, handler } => {
                write!(f, "{handler} is already subscribed to {tag}")
            }
            DiagnosticKind::UnknownSubscription { id } => {
                write!(f, "no subscription {id} to remove")
            }
            DiagnosticKind::HandlerFault {
                id,
                tag,
                handler,
                error,
            } => {
                write!(f, "{handler} ({id}) failed on {tag}: {error}")
            }
        }
    }
}
