use std::any::type_name;
use std::borrow::Cow;
use std::fmt;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;

/// Callback bound to a tag, invoked once per matching message.
///
/// Handlers are shared as `Arc<dyn Handler>`, so a single instance can
/// serve several tags, and invocation takes `&self`: a handler owns its
/// interior mutability. A returned error is reported through the router's
/// diagnostic sinks and isolated; it never aborts the batch.
///
/// Plain closures implement `Handler` through a blanket impl:
///
/// ```
/// use tagrelay::dispatch::EventRouter;
///
/// let router = EventRouter::new();
/// router.subscribe_fn("notice", |message| {
///     println!("notice: {}", message.payload());
///     Ok(())
/// });
/// ```
pub trait Handler: Send + Sync {
    /// Handle one matching message.
    fn handle(&self, message: &Message) -> Result<(), HandlerError>;

    /// Logical name used in diagnostics. Defaults to the type name.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Self>())
    }
}

impl<F> Handler for F
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self(message)
    }
}

/// Error a handler reports for one message without blocking the batch.
#[derive(Debug, Error, Diagnostic)]
pub enum HandlerError {
    /// Free-form failure description.
    #[error("{0}")]
    #[diagnostic(code(tagrelay::handler::failed))]
    Failed(String),

    /// Failure wrapping an underlying error.
    #[error(transparent)]
    #[diagnostic(code(tagrelay::handler::source))]
    Source(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Opaque handle identifying one `(tag, handler)` registration.
///
/// Returned by subscribe calls and consumed by unsubscribe; handles are
/// never reused within a router's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
