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

//! Message Broker Client (spec §4.2, C2): connect/publish/subscribe to the
//! external ZeroMQ pub/sub broker, with health monitoring and reconnect.
//! Grounded on `rpc_async_client::pubsub_client` (subscribe-and-decode loop
//! over a `tmq::subscribe::Subscribe` stream) and the daemon's transport
//! module for the publish side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use mudcore_common::error::BrokerError;

use crate::breaker::CircuitBreaker;
use crate::retry::{run_with_retry, RetryPolicy, RetryableError};

impl RetryableError for BrokerError {
    fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::PublishFailed(_) | BrokerError::Timeout | BrokerError::NotConnected)
    }
}

/// Broker Client state machine (spec §4.2 "State machines").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BrokerClientState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Reconnecting,
    Closed,
}

/// `(topic, payload)` callback invoked on a single-threaded per-subscription
/// sequence — messages for one subscription are never reordered (spec §4.2).
pub type Handler = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

pub struct BrokerHandle {
    pub subject: String,
    cancel: CancellationToken,
}

impl BrokerHandle {
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;
    /// Returns only after local enqueue to the broker is confirmed; the
    /// broker-side flush happens asynchronously (spec §4.2 non-blocking
    /// contract).
    async fn publish(&self, subject: &str, bytes: Vec<u8>) -> Result<(), BrokerError>;
    async fn subscribe(&self, subject: &str, handler: Handler) -> Result<BrokerHandle, BrokerError>;
    fn is_healthy(&self) -> bool;
    fn state(&self) -> BrokerClientState;
    async fn close(&self) -> Result<(), BrokerError>;
}

struct HealthState {
    consecutive_failures: AtomicU32,
    last_activity_ms: AtomicU64,
}

impl HealthState {
    fn new() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            last_activity_ms: AtomicU64::new(now_ms()),
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.last_activity_ms.store(now_ms(), Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn is_healthy(&self, health_interval: Duration) -> bool {
        let stale = now_ms().saturating_sub(self.last_activity_ms.load(Ordering::SeqCst))
            > 2 * health_interval.as_millis() as u64;
        self.consecutive_failures.load(Ordering::SeqCst) < 3 && !stale
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub publish_addr: String,
    pub subscribe_addr: String,
    pub health_interval: Duration,
    pub health_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub breaker_failure_threshold: u32,
    pub breaker_open_duration: Duration,
}

/// ZeroMQ-backed broker client. The publish socket is a single PUB socket
/// shared behind a mutex (ZMQ sockets are not `Sync`); each `subscribe`
/// spawns its own task reading a dedicated SUB socket so one slow handler
/// cannot stall other subscriptions.
pub struct ZmqBrokerClient {
    ctx: tmq::Context,
    config: BrokerConfig,
    state: Arc<RwLock<BrokerClientState>>,
    publish_socket: Mutex<Option<tmq::publish::Publish>>,
    health: Arc<HealthState>,
    breaker: Arc<CircuitBreaker>,
    subscriptions: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl ZmqBrokerClient {
    pub fn new(config: BrokerConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_failure_threshold,
            config.breaker_open_duration,
            1,
        ));
        Self {
            ctx: tmq::Context::new(),
            config,
            state: Arc::new(RwLock::new(BrokerClientState::Disconnected)),
            publish_socket: Mutex::new(None),
            health: Arc::new(HealthState::new()),
            breaker,
            subscriptions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    async fn set_state(&self, new_state: BrokerClientState) {
        let mut guard = self.state.write().await;
        if *guard != new_state {
            tracing::info!(from = ?*guard, to = ?new_state, "broker client state transition");
            *guard = new_state;
        }
    }

    /// Must be called once after `connect()` succeeds, from an owner holding
    /// an `Arc<ZmqBrokerClient>` (before erasing to `Arc<dyn BrokerClient>`).
    pub fn spawn_health_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.health_interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        let healthy = this.health.is_healthy(this.config.health_interval);
                        let current = *this.state.read().await;
                        if healthy && current == BrokerClientState::Degraded {
                            this.set_state(BrokerClientState::Connected).await;
                        } else if !healthy && current == BrokerClientState::Connected {
                            this.set_state(BrokerClientState::Degraded).await;
                            tracing::warn!("broker client degraded, starting reconnect");
                            this.reconnect().await;
                        }
                    }
                }
            }
        });
    }

    async fn reconnect(self: &Arc<Self>) {
        self.set_state(BrokerClientState::Reconnecting).await;
        let this = Arc::clone(self);
        let policy = self.config.retry_policy;
        let result = run_with_retry(
            || {
                let this = Arc::clone(&this);
                async move { this.connect_once().await }
            },
            policy,
        )
        .await;
        match result {
            Ok(()) => {
                self.health.record_success();
                self.set_state(BrokerClientState::Connected).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "broker reconnect exhausted retries");
                self.set_state(BrokerClientState::Degraded).await;
            }
        }
    }

    async fn connect_once(&self) -> Result<(), BrokerError> {
        let publisher = tmq::publish(&self.ctx)
            .bind(&self.config.publish_addr)
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;
        *self.publish_socket.lock().await = Some(publisher);
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for ZmqBrokerClient {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.set_state(BrokerClientState::Connecting).await;
        self.connect_once().await?;
        self.health.record_success();
        self.set_state(BrokerClientState::Connected).await;
        Ok(())
    }

    async fn publish(&self, subject: &str, bytes: Vec<u8>) -> Result<(), BrokerError> {
        if !self.breaker.allow_call() {
            return Err(BrokerError::CircuitOpen);
        }
        let result = run_with_retry(
            || async {
                let mut guard = self.publish_socket.lock().await;
                let socket = guard.as_mut().ok_or(BrokerError::NotConnected)?;
                let multipart: tmq::Multipart =
                    vec![subject.as_bytes().to_vec().into(), bytes.clone().into()].into();
                socket
                    .send(multipart)
                    .await
                    .map_err(|e| BrokerError::PublishFailed(e.to_string()))
            },
            self.config.retry_policy,
        )
        .await;

        match &result {
            Ok(()) => {
                self.breaker.record_success();
                self.health.record_success();
            }
            Err(_) => {
                self.breaker.record_failure();
                self.health.record_failure();
            }
        }
        result
    }

    async fn subscribe(&self, subject: &str, handler: Handler) -> Result<BrokerHandle, BrokerError> {
        let cancel = CancellationToken::new();
        let mut sub_socket = tmq::subscribe(&self.ctx)
            .connect(&self.config.subscribe_addr)
            .map_err(|e| BrokerError::SubscribeFailed(e.to_string()))?
            .subscribe(subject.as_bytes())
            .map_err(|e| BrokerError::SubscribeFailed(e.to_string()))?;

        let task_cancel = cancel.clone();
        let subject_owned = subject.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    next = sub_socket.next() => {
                        match next {
                            Some(Ok(multipart)) => {
                                if multipart.len() != 2 {
                                    tracing::warn!(subject = %subject_owned, "malformed multipart frame, expected topic+payload");
                                    continue;
                                }
                                let topic = multipart[0].to_vec();
                                let payload = multipart[1].to_vec();
                                let topic_str = String::from_utf8_lossy(&topic).to_string();
                                handler(&topic_str, &payload);
                            }
                            Some(Err(e)) => {
                                tracing::error!(subject = %subject_owned, error = %e, "subscription receive error");
                            }
                            None => return,
                        }
                    }
                }
            }
        });

        self.subscriptions
            .lock()
            .await
            .insert(subject.to_string(), cancel.clone());

        Ok(BrokerHandle {
            subject: subject.to_string(),
            cancel,
        })
    }

    fn is_healthy(&self) -> bool {
        self.health.is_healthy(self.config.health_interval)
    }

    fn state(&self) -> BrokerClientState {
        self.state.try_read().map(|g| *g).unwrap_or(BrokerClientState::Degraded)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.shutdown.cancel();
        let mut subs = self.subscriptions.lock().await;
        for (_, cancel) in subs.drain() {
            cancel.cancel();
        }
        *self.publish_socket.lock().await = None;
        self.set_state(BrokerClientState::Closed).await;
        Ok(())
    }
}
