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

mod args;
mod metrics_route;
mod supervisor;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tracing::info;

use args::Args;
use mudcore_common::config::CoreConfig;
use mudcore_common::ports::fake::{FakeAuth, FakePersistence};
use supervisor::Supervisor;

fn mk_routes(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/ws/connect", get(ws::upgrade_handler))
        .route("/metrics", get(metrics_route::metrics_handler))
        .with_state(supervisor)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), eyre::Error> {
    color_eyre::install()?;
    let args = Args::parse();

    let mut config = CoreConfig::load(args.config.as_deref())?;
    if let Some(broker_url) = &args.broker_url {
        config.broker.url = broker_url.clone();
    }

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    mudcore_common::tracing_init::init_tracing(args.debug)?;

    // Concrete `Persistence`/`Auth` implementations live outside this
    // workspace (spec §6 "consumed external interfaces"); the in-memory
    // doubles are the only wiring available to this binary.
    let persistence = Arc::new(FakePersistence::default());
    let auth = Arc::new(FakeAuth::default());

    let supervisor = Supervisor::new(&config, auth, persistence).await?;

    let router = mk_routes(Arc::clone(&supervisor));
    let (listener, socket_addr) = supervisor::bind_listener(&args.listen_address).await?;
    info!(address = ?socket_addr, "gateway listening");

    let serve = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                tracing::error!(error = %e, "axum serve exited with an error");
            }
        }
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

/// Polls the same `signal_hook::flag`-backed `AtomicBool` the teacher's
/// daemon registers for SIGTERM/SIGINT, adapted to the gateway's async
/// runtime with a short interval rather than a blocking OS thread.
async fn wait_for_shutdown_signal() {
    let kill_switch = Arc::new(std::sync::atomic::AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&kill_switch)) {
        tracing::warn!(error = %e, "failed to register SIGTERM handler");
    }
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&kill_switch)) {
        tracing::warn!(error = %e, "failed to register SIGINT handler");
    }

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(200));
    loop {
        ticker.tick().await;
        if kill_switch.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
    }
}
