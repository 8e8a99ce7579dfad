// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! In-process Event Bus (spec §4.6, C6). Publish is synchronous to the
//! registration-map lookup and asynchronous to handler dispatch; handlers
//! for one event run concurrently and are all awaited before `publish`
//! returns. The subscriber map is updated rarely and read on every publish,
//! so it is kept behind `arc-swap` for read-biased, copy-on-write access
//! (spec §5 "Shared-resource policy").

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use mudcore_common::event::DomainEvent;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type Handler = Arc<dyn Fn(Arc<DomainEvent>) -> HandlerFuture + Send + Sync>;

const WILDCARD: &str = "*";

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Handler,
    timeout: Option<Duration>,
}

pub struct EventBus {
    subscribers: ArcSwap<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: ArcSwap::from_pointee(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribes to `event_type`, or to every event type via `"*"`.
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Handler) -> SubscriptionId {
        self.subscribe_with_timeout(event_type, handler, None)
    }

    pub fn subscribe_with_timeout(
        &self,
        event_type: impl Into<String>,
        handler: Handler,
        timeout: Option<Duration>,
    ) -> SubscriptionId {
        let event_type = event_type.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.rcu(|current| {
            let mut next = (**current).clone();
            next.entry(event_type.clone())
                .or_default()
                .push(Subscription { id, handler: Arc::clone(&handler), timeout });
            next
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.rcu(|current| {
            let mut next = (**current).clone();
            for subs in next.values_mut() {
                subs.retain(|s| s.id != id);
            }
            next
        });
    }

    /// Dispatches `event` to every matching handler concurrently, awaiting
    /// all outcomes (success, panic, or timeout) before returning, so the
    /// publisher knows propagation completed (spec §8 invariant).
    pub async fn publish(&self, event: DomainEvent) {
        let event = Arc::new(event);
        let tag = event.kind.tag();
        let subs = self.subscribers.load();
        let mut matched: Vec<Subscription> = Vec::new();
        if let Some(v) = subs.get(tag) {
            matched.extend(v.iter().cloned());
        }
        if let Some(v) = subs.get(WILDCARD) {
            matched.extend(v.iter().cloned());
        }
        drop(subs);

        let tasks: Vec<_> = matched
            .into_iter()
            .map(|sub| {
                let event = Arc::clone(&event);
                tokio::spawn(async move {
                    let fut = (sub.handler)(Arc::clone(&event));
                    match sub.timeout {
                        Some(d) => tokio::time::timeout(d, fut).await.is_ok(),
                        None => {
                            fut.await;
                            true
                        }
                    }
                })
            })
            .collect();

        for (task, sub_tag) in tasks.into_iter().zip(std::iter::repeat(tag)) {
            match task.await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(event_type = sub_tag, "event bus handler timed out");
                }
                Err(e) => {
                    tracing::error!(event_type = sub_tag, error = %e, "event bus handler panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudcore_common::event::DomainEventKind;
    use mudcore_common::ids::SequenceNumber;
    use std::sync::atomic::AtomicUsize;

    fn event(kind: DomainEventKind) -> DomainEvent {
        DomainEvent::new(SequenceNumber::ZERO, kind)
    }

    #[tokio::test]
    async fn all_handlers_invoked_before_publish_returns() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            bus.subscribe(
                "heartbeat",
                Arc::new(move |_event| {
                    let counter = Arc::clone(&counter);
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            );
        }

        bus.publish(event(DomainEventKind::Heartbeat)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn wildcard_subscriber_sees_every_event_type() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        bus.subscribe(
            "*",
            Arc::new(move |_event| {
                let seen2 = Arc::clone(&seen2);
                Box::pin(async move {
                    seen2.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );
        bus.publish(event(DomainEventKind::Heartbeat)).await;
        bus.publish(event(DomainEventKind::GameTick { tick: 1 })).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_prevent_others() {
        let bus = EventBus::new();
        bus.subscribe(
            "heartbeat",
            Arc::new(|_event| Box::pin(async move { panic!("boom") })),
        );
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        bus.subscribe(
            "heartbeat",
            Arc::new(move |_event| {
                let ran2 = Arc::clone(&ran2);
                Box::pin(async move {
                    ran2.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );
        bus.publish(event(DomainEventKind::Heartbeat)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let id = bus.subscribe(
            "heartbeat",
            Arc::new(move |_event| {
                let count2 = Arc::clone(&count2);
                Box::pin(async move {
                    count2.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );
        bus.publish(event(DomainEventKind::Heartbeat)).await;
        bus.unsubscribe(id);
        bus.publish(event(DomainEventKind::Heartbeat)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
