// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use harvester::api::{create_api_router, ApiState};
use harvester::chain::{run_head_watcher, ChainClient, LiteClient};
use harvester::config::Config;
use harvester::core::keys::{get_adnl_address, get_encryption_key};
use harvester::core::Account;
use harvester::indexer::{get_accounts_for_tracking, Indexer};
use harvester::notifier::{Notifier, Sender};
use harvester::store::Store;
use harvester::webhook::WebhookClient;
use harvester_pg_db::Db;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Startup-bound external calls get a longer deadline than steady-state ones.
const STARTUP_DEADLINE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.log_level,
        "running invoice processor"
    );

    let currencies = config.currencies()?;
    let prefixes = config.prefixes()?;

    let (adnl_address, encryption_key) = match config.key.as_deref() {
        Some(key) => {
            let adnl = get_adnl_address(key).context("calculating ADNL address")?;
            info!(address = %adnl, "derived payment-provider ADNL address");
            let encryption = get_encryption_key(key).context("deriving encryption key")?;
            (Some(adnl), Some(encryption))
        }
        None => (None, None),
    };

    let db = tokio::time::timeout(
        STARTUP_DEADLINE,
        Db::new(config.postgres_uri.clone(), config.db.clone()),
    )
    .await
    .context("database connection deadline")?
    .context("database connection")?;
    db.run_migrations(harvester_schema::MIGRATIONS)
        .await
        .context("database migrations")?;

    let store = Store::new(db, config.recipient);
    tokio::time::timeout(STARTUP_DEADLINE, store.save_currencies(&currencies))
        .await
        .context("save currencies deadline")?
        .context("save currencies")?;

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    let webhook: Option<Arc<dyn Sender>> = match &config.webhook_endpoint {
        Some(url) => Some(Arc::new(
            WebhookClient::new(url.clone()).context("webhook client")?,
        )),
        None => None,
    };

    let chain = Arc::new(LiteClient::new(&config.lite_servers).context("chain client")?);
    let (watcher, head_ready) = run_head_watcher(chain.clone(), store.clone(), cancel.clone());
    handles.push(watcher);
    info!("waiting for the first proven masterchain head, this can take a few minutes");
    head_ready
        .await
        .context("head watcher exited before initialization")?;

    let storage = Arc::new(store.clone());
    let (indexer, accounts_tx) =
        Indexer::new(chain.clone() as Arc<dyn ChainClient>, storage.clone());
    handles.extend(indexer.run(cancel.clone()));

    let notifier = Notifier::new(
        webhook,
        currencies.clone(),
        adnl_address,
        prefixes.clone(),
        storage,
    );
    handles.extend(notifier.run(cancel.clone()));

    let accounts = tokio::time::timeout(
        STARTUP_DEADLINE,
        get_accounts_for_tracking(&store, chain.as_ref(), config.recipient, &currencies),
    )
    .await
    .context("account registration deadline")?
    .context("account registration")?;
    for (id, info) in accounts {
        accounts_tx
            .send(Account { id, info })
            .await
            .context("account channel closed")?;
    }

    let api_state = ApiState::new(
        store,
        currencies,
        adnl_address,
        prefixes,
        encryption_key,
        config.token.clone(),
    );
    let router = create_api_router(api_state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .context("binding api listener")?;
    info!(port = config.port, "running api server");
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    shutdown_signal().await?;
    info!("shutting down");
    cancel.cancel();
    server.await.context("api server task")?.context("api server")?;
    info!("api stopped");
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("installing SIGINT handler")?,
        _ = term.recv() => {}
    }
    Ok(())
}
