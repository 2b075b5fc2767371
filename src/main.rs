// ============================================================================
// mailsink - Receive-only SMTP ingestion service
// ============================================================================
//
// Startup order:
// 1. Configuration (missing store endpoints abort here)
// 2. Primary store client (lazy; first query connects)
// 3. Secondary store pool
// 4. Domain allow-list: initial load + change-event subscription
// 5. Background liveness probe
// 6. SMTP listener
//
// A termination signal stops accepting sessions and new DATA streams, then
// drains in-flight work before exit.
//
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mailsink::beacon::Beacon;
use mailsink::inboxes::{self, InboxStore};
use mailsink::ingest::{IngestHooks, IngestLimits, Router};
use mailsink::mailstore::Mailstore;
use mailsink::smtp;
use mailsink::whitelist::{self, DomainWhitelist};
use mailsink::{Config, StoreClient};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.rust_log)),
        )
        .init();
    info!("=== mailsink (receive only) ===");

    let store = Arc::new(StoreClient::new(&config.redis_url).context("invalid REDIS_URL")?);
    let mailstore = Arc::new(Mailstore::new(Arc::clone(&store)));

    let pool = inboxes::create_pool(&config.database_url).await?;
    let inbox_store = InboxStore::new(pool);
    info!("connected to secondary store");

    let whitelist = Arc::new(DomainWhitelist::new());
    if let Err(err) = whitelist.reload(&mailstore).await {
        // Fail closed: with an empty set nothing is admitted until the
        // subscription task manages a reload.
        warn!(error = %err, "initial domain allow-list load failed");
    }
    let _sync = whitelist::spawn_sync(Arc::clone(&whitelist), Arc::clone(&mailstore));
    let _probe = Arc::clone(&store).spawn_probe(Duration::from_secs(config.probe_interval_secs));

    let limits = Arc::new(IngestLimits::new(&config.limits));
    let beacon = Beacon::new(config.beacon_url.clone());
    let router = Arc::new(Router::new(
        Arc::clone(&whitelist),
        Arc::clone(&mailstore),
        inbox_store,
        beacon,
    ));
    let hooks = Arc::new(IngestHooks::new(
        Arc::clone(&whitelist),
        Arc::clone(&limits),
        router,
    ));

    let listen_addr = config.smtp.listen_addr();
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", listen_addr))?;
    info!(addr = %listen_addr, "smtp listener started");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server = tokio::spawn(smtp::serve(
        listener,
        hooks,
        shutdown_rx,
        config.smtp.max_message_bytes,
    ));

    tokio::select! {
        _ = wait_for_termination() => {
            info!(in_flight = limits.in_flight(), "termination signal received, draining");
            limits.close();
            let _ = shutdown_tx.send(true);
            if let Err(err) = server.await {
                warn!(error = %err, "smtp server task join failed");
            }
        }
        result = &mut server => {
            match result {
                Ok(Ok(())) => info!("smtp server exited"),
                Ok(Err(err)) => error!(error = %err, "smtp server failed"),
                Err(err) => error!(error = %err, "smtp server task panicked"),
            }
            limits.close();
        }
    }

    let drain = Duration::from_secs(config.shutdown_drain_secs);
    match tokio::time::timeout(drain, limits.drained()).await {
        Ok(()) => info!("in-flight work drained"),
        Err(_) => warn!(
            in_flight = limits.in_flight(),
            "drain timed out, exiting with work in flight"
        ),
    }

    Ok(())
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
