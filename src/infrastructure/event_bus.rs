//! Pub/sub bus the engine uses to announce lifecycle transitions.
//!
//! Grounded on the teacher's `RwLock<Vec<listener>>` event bus, generalized
//! from a flat listener list to named topics with subscription handles
//! (`unsubscribe`, `once`), and made fire-and-forget: `publish` hands each
//! listener call to its own task so a slow or panicking subscriber cannot
//! block the engine tick that raised the event.

use crate::domain::signal::Signal;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Signal,
    SignalLive,
    SignalBacktest,
    BreakevenAvailable,
    PartialProfitAvailable,
    PartialLossAvailable,
    SchedulePing,
    ActivePing,
    Risk,
    DoneBacktest,
    DoneLive,
    Error,
}

#[derive(Debug, Clone)]
pub enum Event {
    Signal(Signal),
    Ping { symbol: String, strategy_name: String, price: Decimal, at: DateTime<Utc> },
    Milestone { symbol: String, strategy_name: String, percent: u8 },
    RiskRejected { symbol: String, strategy_name: String, reason: String },
    Done { symbol: String, strategy_name: String },
    Error { message: String },
}

type Handler = dyn Fn(Event) + Send + Sync;
type Predicate = dyn Fn(&Event) -> bool + Send + Sync;

struct Subscription {
    id: u64,
    once: bool,
    predicate: Option<Arc<Predicate>>,
    handler: Arc<Handler>,
}

/// A handle returned by `on`/`once`, used only to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    subscriptions: Arc<RwLock<HashMap<Topic, Vec<Subscription>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.subscribe(topic, None, handler, false).await
    }

    /// Fires `handler` at most once, on the first published event for which
    /// `predicate` returns `true`. Events that don't match leave the
    /// subscription in place rather than consuming it.
    pub async fn once<P, F>(&self, topic: Topic, predicate: P, handler: F) -> SubscriptionId
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.subscribe(topic, Some(Arc::new(predicate) as Arc<Predicate>), handler, true)
            .await
    }

    async fn subscribe<F>(
        &self,
        topic: Topic,
        predicate: Option<Arc<Predicate>>,
        handler: F,
        once: bool,
    ) -> SubscriptionId
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut subs = self.subscriptions.write().await;
        subs.entry(topic).or_default().push(Subscription {
            id,
            once,
            predicate,
            handler: Arc::new(handler),
        });
        SubscriptionId(id)
    }

    pub async fn unsubscribe(&self, topic: Topic, id: SubscriptionId) {
        let mut subs = self.subscriptions.write().await;
        if let Some(list) = subs.get_mut(&topic) {
            list.retain(|s| s.id != id.0);
        }
    }

    /// Dispatches `event` to every subscriber of `topic` whose predicate (if
    /// any) matches it, each on its own task so one listener's latency or
    /// panic cannot affect another's, nor the publisher. A panicking
    /// listener is caught and re-announced on `Topic::Error` rather than
    /// killing its task silently. A `once` subscription that does not match
    /// stays registered for a future event; only a match consumes it.
    pub async fn publish(&self, topic: Topic, event: Event) {
        let fired: Vec<Arc<Handler>> = {
            let mut subs = self.subscriptions.write().await;
            let Some(list) = subs.get_mut(&topic) else {
                return;
            };

            let mut fired = Vec::new();
            let mut consumed_ids = Vec::new();
            for sub in list.iter() {
                let matches = sub.predicate.as_ref().map_or(true, |p| p(&event));
                if matches {
                    fired.push(Arc::clone(&sub.handler));
                    if sub.once {
                        consumed_ids.push(sub.id);
                    }
                }
            }
            list.retain(|s| !consumed_ids.contains(&s.id));
            fired
        };

        for handler in fired {
            let event = event.clone();
            let bus = self.clone_refs();
            tokio::spawn(async move {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
                if let Err(panic) = result {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "listener panicked".to_string());
                    error!(message, "event listener panicked");
                    bus.publish(Topic::Error, Event::Error { message }).await;
                }
            });
        }
    }

    fn clone_refs(&self) -> Self {
        Self {
            subscriptions: Arc::clone(&self.subscriptions),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        self.clone_refs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    async fn settle() {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_on_receives_every_publish() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);

        bus.on(Topic::SchedulePing, move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        bus.publish(Topic::SchedulePing, Event::Done { symbol: "BTCUSDT".into(), strategy_name: "s".into() }).await;
        bus.publish(Topic::SchedulePing, Event::Done { symbol: "BTCUSDT".into(), strategy_name: "s".into() }).await;
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_once_fires_only_a_single_time() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);

        bus.once(Topic::Risk, |_| true, move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        bus.publish(Topic::Risk, Event::RiskRejected { symbol: "BTCUSDT".into(), strategy_name: "s".into(), reason: "x".into() }).await;
        bus.publish(Topic::Risk, Event::RiskRejected { symbol: "BTCUSDT".into(), strategy_name: "s".into(), reason: "x".into() }).await;
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_predicate_ignores_non_matching_events() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);

        bus.once(
            Topic::Risk,
            |event| matches!(event, Event::RiskRejected { reason, .. } if reason == "stop"),
            move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        bus.publish(Topic::Risk, Event::RiskRejected { symbol: "BTCUSDT".into(), strategy_name: "s".into(), reason: "other".into() }).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.publish(Topic::Risk, Event::RiskRejected { symbol: "BTCUSDT".into(), strategy_name: "s".into(), reason: "stop".into() }).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Further matching events no longer fire — the subscription was consumed.
        bus.publish(Topic::Risk, Event::RiskRejected { symbol: "BTCUSDT".into(), strategy_name: "s".into(), reason: "stop".into() }).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);

        let id = bus
            .on(Topic::ActivePing, move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        bus.unsubscribe(Topic::ActivePing, id).await;
        bus.publish(Topic::ActivePing, Event::Done { symbol: "BTCUSDT".into(), strategy_name: "s".into() }).await;
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.publish(Topic::DoneLive, Event::Done { symbol: "BTCUSDT".into(), strategy_name: "s".into() }).await;
    }

    #[tokio::test]
    async fn test_panicking_listener_reroutes_to_error_topic() {
        let bus = EventBus::new();
        let error_count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&error_count);

        bus.on(Topic::Error, move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        bus.on(Topic::Signal, |_| panic!("boom")).await;

        bus.publish(Topic::Signal, Event::Done { symbol: "BTCUSDT".into(), strategy_name: "s".into() }).await;
        settle().await;

        assert_eq!(error_count.load(Ordering::SeqCst), 1);
    }
}
