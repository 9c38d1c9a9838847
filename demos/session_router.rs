//! Session wiring: a fixed set of feature handlers registered when the
//! session starts and unregistered through their handles at teardown.
//!
//! Run with `cargo run --example session_router`; set `RUST_LOG=debug` for
//! the full diagnostic stream.

use std::sync::Arc;

use serde_json::json;
use tagrelay::dispatch::{EventRouter, HandlerError, SubscriptionId};
use tagrelay::message::{Message, ResultCode};

/// Rank lookups answer with this code while the player is unranked; it is
/// expected traffic, not worth a warning.
const CODE_NO_RANK_YET: ResultCode = ResultCode(3003);

struct Session {
    router: Arc<EventRouter>,
    registrations: Vec<SubscriptionId>,
}

impl Session {
    fn start(router: Arc<EventRouter>) -> Self {
        let registrations = vec![
            router.subscribe_fn("profile", |message| {
                if !message.code().is_success() {
                    tracing::warn!(code = %message.code(), "profile refresh rejected");
                    return Ok(());
                }
                tracing::info!(payload = %message.payload(), "profile updated");
                Ok(())
            }),
            router.subscribe_fn("weekly_rank", |message| {
                if message.code() == CODE_NO_RANK_YET {
                    return Ok(());
                }
                if !message.code().is_success() {
                    return Err(HandlerError::msg(format!(
                        "rank lookup failed with code {}",
                        message.code()
                    )));
                }
                tracing::info!(payload = %message.payload(), "weekly rank refreshed");
                Ok(())
            }),
            router.subscribe_fn("daily_bonus", |message| {
                if !message.code().is_success() {
                    return Err(HandlerError::msg(format!(
                        "bonus grant failed with code {}",
                        message.code()
                    )));
                }
                let day = message.payload()["day"]
                    .as_u64()
                    .ok_or_else(|| HandlerError::msg("bonus payload missing day"))?;
                tracing::info!(day, reward = %message.payload()["reward"], "daily bonus granted");
                Ok(())
            }),
            router.subscribe_fn("notice", |message| {
                tracing::info!(text = %message.payload()["text"], "server notice");
                Ok(())
            }),
            router.subscribe_fn("shop", |message| {
                if !message.code().is_success() {
                    tracing::warn!(code = %message.code(), "shop refresh rejected");
                    return Ok(());
                }
                tracing::info!(payload = %message.payload(), "shop catalog updated");
                Ok(())
            }),
        ];
        Self {
            router,
            registrations,
        }
    }

    fn stop(self) {
        for id in self.registrations {
            self.router.unsubscribe(id);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let router = Arc::new(EventRouter::new());
    let session = Session::start(Arc::clone(&router));

    // First tick: the player is still unranked, and nobody listens for
    // season_pass yet, so that message is dropped.
    router.dispatch(&[
        Message::ok("profile", json!({"nickname": "ember", "level": 41})),
        Message::failed("weekly_rank", CODE_NO_RANK_YET),
        Message::ok("daily_bonus", json!({"day": 3, "reward": "gold:250"})),
        Message::ok("season_pass", json!({"tier": 7})),
    ]);

    // Second tick: a rank arrived, the shop push failed server-side.
    router.dispatch(&[
        Message::ok("weekly_rank", json!({"rank": 17, "score": 8420})),
        Message::failed("shop", ResultCode(1201)),
        Message::ok("notice", json!({"text": "maintenance at 04:00 UTC"})),
    ]);

    session.stop();
    tracing::info!(metrics = ?router.metrics(), "session closed");
}
