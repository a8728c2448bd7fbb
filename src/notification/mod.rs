// ============================================================================
// Notification Forwarder
// ============================================================================
//
// Best-effort POST of the original request body to a downstream consumer.
//
// - One pooled `reqwest::Client` shared by every delivery (keep-alive,
//   bounded idle connections per host, idle timeout)
// - Each delivery is its own task; `notify` returns before any socket I/O
// - The response body is drained and discarded so the connection returns
//   to the pool
// - Failures are logged and counted, never surfaced to the original caller.
//   No retry.
//
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{NotificationConfig, NotificationTarget};
use crate::metrics;
use crate::telemetry::{NameResolver, ResolutionTracer};

const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// How a single notification ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Downstream answered 2xx
    Delivered(StatusCode),
    /// Downstream answered, but not with 2xx
    Rejected(StatusCode),
    /// No complete response (connect, I/O or task failure)
    Failed(String),
}

/// Handle to an in-flight notification.
///
/// Dropping it detaches the delivery. Awaiting `settled` only observes the
/// outcome; delivery is never guaranteed.
#[derive(Debug)]
pub struct BestEffort {
    handle: JoinHandle<Delivery>,
}

impl BestEffort {
    pub async fn settled(self) -> Delivery {
        self.handle
            .await
            .unwrap_or_else(|e| Delivery::Failed(format!("delivery task failed: {}", e)))
    }
}

#[derive(Clone)]
pub struct NotificationForwarder {
    client: reqwest::Client,
}

impl NotificationForwarder {
    /// Builds the pooled client, resolving names through `resolver`.
    pub fn new<R>(config: &NotificationConfig, resolver: ResolutionTracer<R>) -> Result<Self>
    where
        R: NameResolver + 'static,
    {
        let client = reqwest::Client::builder()
            .tcp_keepalive(TCP_KEEPALIVE)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .dns_resolver(Arc::new(resolver))
            .no_proxy()
            .build()
            .context("Failed to create notification HTTP client")?;

        Ok(Self { client })
    }

    /// POSTs `body` to `path` on `target`.
    pub fn notify(&self, target: &NotificationTarget, path: &str, body: Bytes) -> BestEffort {
        let client = self.client.clone();
        let url = target.url(path);

        let handle = tokio::spawn(async move {
            let delivery = deliver(&client, &url, body).await;
            match &delivery {
                Delivery::Delivered(status) => {
                    metrics::NOTIFICATIONS_DELIVERED_TOTAL.inc();
                    debug!(url = %url, status = %status, "Notification delivered");
                }
                Delivery::Rejected(status) => {
                    metrics::NOTIFICATIONS_FAILED_TOTAL.inc();
                    warn!(url = %url, status = %status, "Notification rejected downstream");
                }
                Delivery::Failed(reason) => {
                    metrics::NOTIFICATIONS_FAILED_TOTAL.inc();
                    warn!(url = %url, error = %reason, "Notification failed");
                }
            }
            delivery
        });

        BestEffort { handle }
    }
}

async fn deliver(client: &reqwest::Client, url: &str, body: Bytes) -> Delivery {
    // A sized body sets Content-Length
    let response = match client.post(url).body(body).send().await {
        Ok(response) => response,
        Err(e) => return Delivery::Failed(e.to_string()),
    };

    let status = response.status();
    if let Err(e) = response.bytes().await {
        return Delivery::Failed(format!("response body: {}", e));
    }

    if status.is_success() {
        Delivery::Delivered(status)
    } else {
        Delivery::Rejected(status)
    }
}

/// Removes `segments` leading path segments, keeping any query string.
///
/// `/transfers/123/fulfil` with one segment becomes `/123/fulfil`; a path
/// with nothing left becomes `/`.
pub fn downstream_path(path_and_query: &str, segments: usize) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let rest: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .skip(segments)
        .collect();

    let mut out = format!("/{}", rest.join("/"));
    if let Some(query) = query {
        out.push('?');
        out.push_str(query);
    }
    out
}
