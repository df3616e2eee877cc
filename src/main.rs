// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};
use tracing_subscriber::prelude::*;

use nsscope::cli::{Args, Command, OutputFormat};
use nsscope::config::{self, Config};
use nsscope::kubernetes::{
    DiscoveryNamespacesFilter, NamespaceSnapshot, SelectorSet, create_client, list_namespaces,
    run_event_loop, watch_namespaces,
};
use nsscope::output;

/// Initialize logging to stderr
fn init_logging(verbose: bool) {
    let filter = if verbose { "nsscope=debug" } else { "nsscope=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (aws-lc-rs)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };
    let config = Config::load(&config_path)?;

    match args.command.clone().unwrap_or_default() {
        Command::Run { reload_interval } => {
            let reload_interval = Duration::from_secs(reload_interval.max(1));
            run(&args, &config_path, config, reload_interval).await
        }
        Command::Members { output } => print_members(&args, &config, output).await,
        Command::Check => check(&config),
    }
}

async fn run(
    args: &Args,
    config_path: &Path,
    config: Config,
    reload_interval: Duration,
) -> Result<()> {
    let client = create_client(args.context.as_deref()).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let (store, watch_handle) = watch_namespaces(client, tx);

    let filter = Arc::new(DiscoveryNamespacesFilter::new(
        Arc::new(store.clone()),
        &config.discovery_selectors,
    )?);
    filter.add_handler(|namespace, event| {
        info!(namespace = %namespace, event = ?event, "Discovery scope changed");
    });

    store
        .wait_until_ready()
        .await
        .context("Namespace watch stopped before the initial list completed")?;
    let members = filter.sync_namespaces();
    info!(members, "Initial namespace sync complete");

    let events_handle = tokio::spawn(run_event_loop(Arc::clone(&filter), rx));

    let mut last_loaded = config.discovery_selectors;
    let mut ticker = tokio::time::interval(reload_interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                reload_selectors(&filter, config_path, &mut last_loaded);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    watch_handle.abort();
    events_handle.abort();
    Ok(())
}

/// Re-read the config and apply its selectors if they differ from the last load
fn reload_selectors(
    filter: &DiscoveryNamespacesFilter,
    config_path: &Path,
    last_loaded: &mut Vec<LabelSelector>,
) {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Failed to reload config");
            return;
        }
    };

    if config.discovery_selectors == *last_loaded {
        trace!("Discovery selectors unchanged");
        return;
    }

    info!(path = %config_path.display(), "Discovery selectors updated in config");
    // Invalid selectors are logged by the filter and not retried until the file changes
    let _ = filter.selectors_changed(&config.discovery_selectors);
    *last_loaded = config.discovery_selectors;
}

async fn print_members(args: &Args, config: &Config, format: OutputFormat) -> Result<()> {
    let client = create_client(args.context.as_deref()).await?;
    let namespaces = list_namespaces(client).await?;

    let source: NamespaceSnapshot = namespaces.into_iter().collect();
    let filter = DiscoveryNamespacesFilter::new(Arc::new(source), &config.discovery_selectors)?;
    println!("{}", output::format_members(&filter.get_members(), format));
    Ok(())
}

fn check(config: &Config) -> Result<()> {
    let selectors = SelectorSet::compile(&config.discovery_selectors)?;
    println!("{}", output::format_selectors(&selectors));
    Ok(())
}
