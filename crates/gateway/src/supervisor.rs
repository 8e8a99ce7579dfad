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

//! Supervisor: constructs every component in dependency order and owns the
//! graceful shutdown sequence (spec §5). Grounded on the teacher's
//! `daemon::main` construction order (database, then RPC transport, then
//! scheduler, then RPC server) and its `kill_switch`-driven shutdown, here
//! expressed with a shared `CancellationToken` and a `JoinSet` instead of
//! raw OS threads.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mudcore_broker::BrokerClient;
use mudcore_chat::{ChatRouter, MuteStore, RateLimitConfig, RateLimiter};
use mudcore_common::config::CoreConfig;
use mudcore_common::event::{DomainEvent, DomainEventKind};
use mudcore_common::ids::SequenceNumber;
use mudcore_common::ports::{Auth, Persistence};
use mudcore_delivery::{Broadcaster, PersonalSender};
use mudcore_eventbus::EventBus;
use mudcore_forwarder::{Forwarder, ForwarderConfig};
use mudcore_metrics::MudMetrics;
use mudcore_presence::{Cleaner, ConnectionRegistry, HealthMonitor, HealthMonitorConfig};
use mudcore_subjects::SubjectRegistry;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Seconds allowed for the `system shutdown` notice to drain before
/// per-connection tasks are cancelled (spec §5 step 3, "allow N seconds").
const SHUTDOWN_NOTICE_DRAIN: Duration = Duration::from_secs(2);

pub struct Supervisor {
    pub registry: Arc<ConnectionRegistry>,
    pub bus: Arc<EventBus>,
    pub broker: Arc<dyn BrokerClient>,
    pub subjects: Arc<SubjectRegistry>,
    pub chat_router: Arc<ChatRouter>,
    pub sender: Arc<PersonalSender>,
    pub broadcaster: Arc<Broadcaster>,
    pub mute_store: Arc<MuteStore>,
    pub metrics: Arc<MudMetrics>,
    pub dlq: Arc<mudcore_broker::DeadLetterQueue>,
    /// Used at WebSocket upgrade time to resolve the connecting token to a
    /// player before `registry.attach()` (spec §6 consumed `Auth` port).
    pub auth: Arc<dyn Auth>,
    pub config: CoreConfig,

    /// Cancels the health monitor and cleaner (spec §5 step 2).
    core_cancel: CancellationToken,
    /// Cancels the forwarder's broker subscriptions (spec §5 step 5). Kept
    /// separate from `core_cancel` so the forwarder keeps delivering chat
    /// traffic to connections during the notice-drain window in step 3.
    broker_cancel: CancellationToken,
    /// Signals per-connection read/write loops to stop (spec §5 step 4).
    connections_cancel: CancellationToken,

    core_background: tokio::sync::Mutex<JoinSet<()>>,
    forwarder_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    accepting: std::sync::atomic::AtomicBool,
}

impl Supervisor {
    pub async fn new(
        config: &CoreConfig,
        auth: Arc<dyn Auth>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Arc<Self>, eyre::Report> {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&bus),
            Duration::from_millis(config.connection.grace_period_ms),
        ));
        let subjects = Arc::new(SubjectRegistry::new());

        let broker_config = mudcore_broker::client::BrokerConfig {
            publish_addr: config.broker.url.clone(),
            subscribe_addr: config.broker.url.clone(),
            health_interval: Duration::from_millis(config.broker.health_interval_ms),
            health_timeout: Duration::from_millis(config.broker.health_timeout_ms),
            retry_policy: mudcore_broker::RetryPolicy {
                max_attempts: config.retry.max_attempts,
                base_delay: Duration::from_millis(config.retry.base_delay_ms),
                max_delay: Duration::from_millis(config.retry.max_delay_ms),
                jitter_ratio: config.retry.jitter_ratio,
            },
            breaker_failure_threshold: config.breaker.failure_threshold,
            breaker_open_duration: Duration::from_millis(config.breaker.open_duration_ms),
        };
        let broker = Arc::new(mudcore_broker::ZmqBrokerClient::new(broker_config));
        broker.connect().await?;
        broker.spawn_health_loop();
        let broker: Arc<dyn BrokerClient> = broker;

        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            window: Duration::from_millis(config.rate_limit.window_ms),
            max_events: config.rate_limit.max_events,
            burst: config.rate_limit.burst,
        }));
        let chat_router = Arc::new(ChatRouter::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&broker),
            Arc::clone(&subjects),
            rate_limiter,
        ));

        let mute_store = Arc::new(MuteStore::new(
            Arc::clone(&persistence),
            Duration::from_millis(config.mute_cache.ttl_ms),
        ));
        let sender = Arc::new(PersonalSender::new(Arc::clone(&registry)));
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&sender),
            config.broadcast.fanout_concurrency,
        ));

        let dlq = Arc::new(mudcore_broker::DeadLetterQueue::new(None));
        let forwarder = Arc::new(Forwarder::new(
            Arc::clone(&registry),
            Arc::clone(&mute_store),
            Arc::clone(&sender),
            Arc::clone(&broker),
            Arc::clone(&dlq),
            ForwarderConfig::default(),
        ));

        let metrics = Arc::new(MudMetrics::new());

        let health_monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&auth),
            HealthMonitorConfig {
                ping_interval: Duration::from_millis(config.health.ping_interval_ms),
                pong_timeout: Duration::from_millis(config.health.pong_timeout_ms),
                stale_strikes: config.health.stale_strikes,
                token_revalidation_interval: Duration::from_millis(
                    config.health.token_revalidation_interval_ms,
                ),
            },
        ));
        let cleaner = Arc::new(Cleaner::new(
            Arc::clone(&registry),
            Duration::from_millis(config.cleaner.interval_ms),
            Arc::clone(&dlq),
            Arc::clone(&broker),
            config.cleaner.dlq_replay_batch,
        ));

        let core_cancel = CancellationToken::new();
        let broker_cancel = CancellationToken::new();
        let connections_cancel = CancellationToken::new();
        let mut core_background = JoinSet::new();

        {
            let health_monitor = Arc::clone(&health_monitor);
            let cancel = core_cancel.clone();
            core_background.spawn(async move { health_monitor.run(cancel).await });
        }
        {
            let cleaner = Arc::clone(&cleaner);
            let cancel = core_cancel.clone();
            core_background.spawn(async move { cleaner.run(cancel).await });
        }

        // `Forwarder::run` owns its own subscribe/unsubscribe lifecycle and
        // blocks until `cancel` fires; it is kept alive past `core_cancel` so
        // chat traffic still reaches connections during the step-3 drain
        // window, and is only torn down at step 5.
        let forwarder_task = {
            let cancel = broker_cancel.clone();
            tokio::spawn(async move { forwarder.run(cancel).await })
        };

        Ok(Arc::new(Self {
            registry,
            bus,
            broker,
            subjects,
            chat_router,
            sender,
            broadcaster,
            mute_store,
            metrics,
            dlq,
            auth,
            config: config.clone(),
            core_cancel,
            broker_cancel,
            connections_cancel,
            core_background: tokio::sync::Mutex::new(core_background),
            forwarder_task: tokio::sync::Mutex::new(Some(forwarder_task)),
            accepting: std::sync::atomic::AtomicBool::new(true),
        }))
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Token per-connection read/write loops should select on alongside
    /// socket I/O; fires at shutdown step 4.
    pub fn connections_cancel_token(&self) -> CancellationToken {
        self.connections_cancel.clone()
    }

    /// Implements spec §5's six-step graceful shutdown sequence exactly.
    pub async fn shutdown(&self) {
        tracing::info!("shutdown sequence starting");

        // 1. Stop accepting new connections.
        self.accepting.store(false, std::sync::atomic::Ordering::SeqCst);

        // 2. Cancel health monitor and cleaner.
        self.core_cancel.cancel();
        {
            let mut core_background = self.core_background.lock().await;
            core_background.shutdown().await;
        }

        // 3. Broadcast `system shutdown` notice; allow N seconds for delivery.
        let notice = DomainEvent::new(
            SequenceNumber::ZERO,
            DomainEventKind::SystemNotice { message: "system shutdown".to_string() },
        );
        self.broadcaster.broadcast_global(&notice, None).await;
        tokio::time::sleep(SHUTDOWN_NOTICE_DRAIN).await;

        // 4. Cancel per-connection tasks; close transports.
        self.connections_cancel.cancel();
        for connection_id in self.registry.connection_ids_snapshot() {
            if let Some(record) = self.registry.connection(connection_id) {
                record.outbound.close();
            }
        }

        // 5. Unsubscribe from broker (the forwarder's own run() loop does
        // this in response to broker_cancel), then close() the broker client.
        self.broker_cancel.cancel();
        if let Some(task) = self.forwarder_task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "forwarder task join failed during shutdown");
            }
        }
        if let Err(e) = self.broker.close().await {
            tracing::warn!(error = %e, "broker close failed during shutdown");
        }

        // 6. Drain DLQ to disk.
        let drained = self.dlq.drain(|_| true, usize::MAX).await;
        tracing::info!(drained, "shutdown sequence complete");
    }
}

pub async fn bind_listener(addr: &str) -> Result<(tokio::net::TcpListener, SocketAddr), eyre::Report> {
    let socket_addr: SocketAddr = addr.parse()?;
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    Ok((listener, socket_addr))
}
