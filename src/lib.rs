//! # Tagrelay: Server-Push Message Routing
//!
//! Tagrelay fans batches of tagged server messages out to independently
//! owned handlers. A client that receives an ordered batch of decoded
//! messages per network tick hands the batch to an [`dispatch::EventRouter`];
//! each feature module registers handlers for the tags it cares about and
//! removes them when its scope ends.
//!
//! The router's contract, in short:
//!
//! - **Batch order, then registration order**: messages are delivered in
//!   batch order, and a tag with several handlers fires them in the order
//!   they subscribed.
//! - **Mutation-safe dispatch**: `subscribe`/`unsubscribe` may be called
//!   from inside a handler while a batch is in flight; the change is
//!   buffered and applied right after the batch, never mid-iteration.
//! - **Fault isolation**: a handler that errors or panics is reported
//!   through the diagnostics sinks and the rest of the batch is delivered
//!   untouched.
//! - **Fail-fast re-entrancy**: nested `dispatch` on the same router is a
//!   programming error and panics rather than corrupting the buffers.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use serde_json::json;
//! use tagrelay::dispatch::EventRouter;
//! use tagrelay::message::Message;
//!
//! let router = EventRouter::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let sink = Arc::clone(&seen);
//! let id = router.subscribe_fn("weekly_rank", move |message| {
//!     sink.lock().unwrap().push(message.payload().clone());
//!     Ok(())
//! });
//!
//! router.dispatch(&[
//!     Message::ok("weekly_rank", json!({"rank": 17})),
//!     Message::ok("daily_bonus", json!({"day": 3})), // nobody listens; dropped
//! ]);
//!
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! router.unsubscribe(id);
//! ```
//!
//! ## What stays outside
//!
//! Transport, message decoding, and feature business logic are the
//! caller's: the router consumes already-decoded [`message::Message`]
//! batches and produces handler invocations, nothing else. Result codes
//! ride on every message but are interpreted only by handlers.
//!
//! ## Module Guide
//!
//! - [`message`] - Tagged message, tag, and result-code types
//! - [`dispatch`] - The router, handler contract, and diagnostic sinks

pub mod dispatch;
pub mod message;
