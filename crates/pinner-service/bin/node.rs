// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Pinner node entry point.

use std::{path::Path, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use pinner_daemon_client::HttpDaemonClient;
use pinner_service::{config::PinnerConfig, server, PinnerNode};
use pinner_store::PostgresStore;
use tokio::runtime;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer as _,
};

/// Manage and run a pinner node.
#[derive(Debug, Parser)]
#[clap(rename_all = "kebab-case", name = env!("CARGO_BIN_NAME"))]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
#[clap(rename_all = "kebab-case")]
enum Commands {
    /// Run a pinner node configured from the environment.
    Run,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = PinnerConfig::from_env()?;
    // The guard flushes the non-blocking log writer on drop; it must live
    // for the whole process.
    let _log_guard = init_tracing_subscriber(&config)?;

    match args.command {
        Commands::Run => run(config),
    }
}

fn run(config: PinnerConfig) -> anyhow::Result<()> {
    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    runtime.block_on(async move {
        let store = Arc::new(
            PostgresStore::connect(&config.db)
                .await
                .context("failed to connect to the pinner store")?,
        );
        let daemon = Arc::new(
            HttpDaemonClient::builder(config.daemon.host.clone(), config.daemon.port)
                .api_password(config.daemon.api_password.clone())
                .build()
                .context("failed to build the daemon client")?,
        );
        let node = Arc::new(
            PinnerNode::builder()
                .with_store(store)
                .with_daemon(daemon)
                .build(&config)?,
        );

        let cancel_token = CancellationToken::new();
        let exit_token = cancel_token.clone();
        tokio::spawn(async move {
            wait_until_terminated().await;
            exit_token.cancel();
        });

        let rest_api = tokio::spawn(server::serve(
            Arc::clone(&node),
            config.rest_api_address,
            cancel_token.child_token(),
        ));

        node.run(cancel_token).await?;

        tracing::debug!("waiting for the admin API to shut down");
        rest_api
            .await
            .context("the admin API task panicked")?
            .context("the admin API failed")?;
        Ok(())
    })
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` controls filtering (`info` by default) and `LOG_FORMAT`
/// selects the output format. When a log file is configured, everything is
/// additionally written there through a non-blocking writer; the returned
/// guard must be held until the process exits so buffered lines are
/// flushed.
fn init_tracing_subscriber(config: &PinnerConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let directive = format!(
        "info,{}",
        std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default()
    );

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let stderr_layer = match std::env::var("LOG_FORMAT")
        .ok()
        .map(|format| format.to_lowercase())
        .as_deref()
    {
        None | Some("default") => stderr_layer.boxed(),
        Some("compact") => stderr_layer.compact().boxed(),
        Some("pretty") => stderr_layer.pretty().boxed(),
        Some("json") => stderr_layer.json().boxed(),
        Some(format) => anyhow::bail!("LOG_FORMAT '{format}' is not supported"),
    };

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("log file path {} has no file name", path.display()))?;
            let directory = path.parent().filter(|dir| !dir.as_os_str().is_empty());
            let appender = tracing_appender::rolling::never(
                directory.unwrap_or_else(|| Path::new(".")),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(directive))
        .with(stderr_layer)
        .with(file_layer)
        .init();
    tracing::debug!("initialized global tracing subscriber");
    Ok(guard)
}

/// Wait for SIGINT and SIGTERM (unix only).
async fn wait_until_terminated() {
    #[cfg(not(unix))]
    async fn wait_for_other_signals() {
        // Disables this branch in the select statement.
        std::future::pending().await
    }

    #[cfg(unix)]
    async fn wait_for_other_signals() {
        use tokio::signal::unix;

        unix::signal(unix::SignalKind::terminate())
            .expect("unable to register for SIGTERM signals")
            .recv()
            .await;
        tracing::info!("received SIGTERM");
    }

    tokio::select! {
        biased;
        _ = wait_for_other_signals() => (),
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
    }
}
