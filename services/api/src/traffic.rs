//! Request counters, visitor and traffic gauges, and host resource gauges.
//! Everything is recorded through the `metrics` facade, so whatever recorder
//! backs `/metrics` renders it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use sysinfo::{Disks, Networks, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
pub(crate) const OS_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) fn describe() {
    describe_counter!("total_http_requests", "Total number of HTTP requests");
    describe_counter!(
        "successful_http_requests",
        "Total number of successful HTTP requests"
    );
    describe_counter!(
        "client_error_http_requests",
        "Total number of client error HTTP requests"
    );
    describe_counter!(
        "server_error_http_requests",
        "Total number of server error HTTP requests"
    );
    describe_counter!(
        "not_found_http_requests",
        "Total number of 404 Not Found HTTP requests"
    );
    describe_gauge!("unique_visitors", "Number of unique visitors");
    describe_gauge!("traffic_in_gb", "Total traffic in GB");
    describe_gauge!("cpu_usage", "CPU Usage");
    describe_gauge!("memory_usage", "Memory Usage");
    describe_gauge!("fs_usage", "File System Usage");
    describe_gauge!("network_traffic", "Network Traffic");
}

/// Visitors seen so far, keyed by `ip-userAgent`, with their last request time.
#[derive(Debug, Clone, Default)]
pub(crate) struct VisitorLog {
    seen: Arc<Mutex<HashMap<String, Instant>>>,
}

impl VisitorLog {
    /// Record a request and return the number of distinct visitors.
    pub(crate) fn touch(&self, key: String) -> usize {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.insert(key, Instant::now());
        seen.len()
    }
}

/// Middleware counting every request by outcome and tracking visitors and
/// response volume.
pub(crate) async fn track_traffic(
    State(visitors): State<VisitorLog>,
    request: Request,
    next: Next,
) -> Response {
    counter!("total_http_requests").increment(1);

    let key = visitor_key(
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
        request.headers(),
    );
    gauge!("unique_visitors").set(visitors.touch(key) as f64);

    let response = next.run(request).await;

    for name in outcome_counters(response.status()) {
        counter!(*name).increment(1);
    }
    let sent = content_length(response.headers());
    gauge!("traffic_in_gb").increment(sent as f64 / BYTES_PER_GB);

    response
}

fn visitor_key(peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
    let ip = peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("undefined");
    format!("{ip}-{user_agent}")
}

/// Counters bumped for a finished response. A 404 counts as a client error too.
fn outcome_counters(status: StatusCode) -> &'static [&'static str] {
    match status.as_u16() {
        200..=399 => &["successful_http_requests"],
        404 => &["client_error_http_requests", "not_found_http_requests"],
        400..=499 => &["client_error_http_requests"],
        500..=u16::MAX => &["server_error_http_requests"],
        _ => &[],
    }
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Refresh the host gauges once.
pub(crate) fn record_os_usage(system: &mut System) {
    system.refresh_cpu_usage();
    system.refresh_memory();
    gauge!("cpu_usage").set(f64::from(system.global_cpu_usage()) / 100.0);
    gauge!("memory_usage").set(ratio(system.used_memory(), system.total_memory()));

    let disks = Disks::new_with_refreshed_list();
    let (used, size) = disks.list().iter().fold((0u64, 0u64), |(used, size), disk| {
        let total = disk.total_space();
        (
            used + total.saturating_sub(disk.available_space()),
            size + total,
        )
    });
    gauge!("fs_usage").set(ratio(used, size));

    let networks = Networks::new_with_refreshed_list();
    let moved: u64 = networks
        .iter()
        .map(|(_, data)| data.total_received() + data.total_transmitted())
        .sum();
    gauge!("network_traffic").set(moved as f64 / BYTES_PER_GB);
}

/// Sample host gauges every `interval` until `stop` flips to true.
pub(crate) fn spawn_os_sampler(
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut system = System::new();
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => record_os_usage(&mut system),
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("os metrics sampler stopped");
    })
}
