// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes client setup and namespace list/watch

use anyhow::{Context, Result, anyhow};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{ListParams, ObjectList};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::reflector::{self, Store};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, Config};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{NamespaceEvent, forward_watch_events};

/// Timeout for connecting to K8s API
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reading K8s API responses
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Page size for paginated list requests
const PAGE_SIZE: u32 = 500;

/// Create a client for `context`, or for the kubeconfig's current context
///
/// Falls back to in-cluster configuration when no kubeconfig is available and
/// no context was requested.
pub async fn create_client(context: Option<&str>) -> Result<Client> {
    let mut config = match Kubeconfig::read() {
        Ok(kubeconfig) => {
            if let Some(ctx) = context
                && !kubeconfig.contexts.iter().any(|c| c.name == ctx)
            {
                return Err(anyhow!("Context '{}' not found in kubeconfig", ctx));
            }
            Config::from_custom_kubeconfig(
                kubeconfig,
                &KubeConfigOptions {
                    context: context.map(String::from),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("Failed to load kubeconfig for context {:?}", context))?
        }
        Err(e) if context.is_none() => {
            debug!(error = %e, "No kubeconfig, trying in-cluster config");
            Config::incluster().context("Failed to load in-cluster config")?
        }
        Err(e) => return Err(e).context("Failed to read kubeconfig"),
    };

    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    let cluster = config.cluster_url.to_string();
    let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
    info!(cluster = %cluster, "Created Kubernetes client");
    Ok(client)
}

/// Start a namespace reflector and forward its events to `tx`
///
/// The returned store fills up as the watch progresses; wait on
/// [`Store::wait_until_ready`] before relying on it.
pub fn watch_namespaces(
    client: Client,
    tx: mpsc::UnboundedSender<NamespaceEvent>,
) -> (Store<Namespace>, JoinHandle<()>) {
    let api: Api<Namespace> = Api::all(client);
    let (reader, writer) = reflector::store();
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer);

    let handle = tokio::spawn(forward_watch_events(stream, tx));
    (reader, handle)
}

/// List every namespace once, following continue tokens
pub async fn list_namespaces(client: Client) -> Result<Vec<Namespace>> {
    let api: Api<Namespace> = Api::all(client);
    let mut all_items = Vec::new();
    let mut continue_token: Option<String> = None;
    let mut page_count = 0u32;

    loop {
        let mut params = ListParams::default().limit(PAGE_SIZE);
        if let Some(ref token) = continue_token {
            params = params.continue_token(token);
        }

        let list = list_page_with_retry(&api, &params).await?;
        all_items.extend(list.items);
        page_count += 1;

        match list.metadata.continue_ {
            Some(token) if !token.is_empty() => continue_token = Some(token),
            _ => break,
        }
    }

    debug!(
        pages = page_count,
        namespaces = all_items.len(),
        "Listed namespaces"
    );
    Ok(all_items)
}

async fn list_page_with_retry(
    api: &Api<Namespace>,
    params: &ListParams,
) -> Result<ObjectList<Namespace>> {
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        match api.list(params).await {
            Ok(list) => return Ok(list),
            Err(e) if is_retryable_error(&e) => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = MAX_RETRIES,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Retryable error listing namespaces, backing off"
                );
                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
            Err(e) => return Err(anyhow!("K8s API error: {}", e)),
        }
    }

    Err(anyhow!(
        "Failed after {} retries: {}",
        MAX_RETRIES,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Check if an error is retryable (transient failures)
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::HyperError(_) => true,
        // 429 (rate limit), 503 (unavailable), 504 (timeout)
        kube::Error::Api(api_err) => matches!(api_err.code, 429 | 503 | 504),
        _ => false,
    }
}
