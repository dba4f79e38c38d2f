//! Per-client request throttle.
//!
//! Mutating requests (ingestion and deletion) from one client address are
//! spaced at least `request_delay_ms` apart. A request arriving too early is
//! delayed for the remaining time, never rejected. The sweeper clears the
//! whole table periodically to bound memory.
//!
//! # Security Note
//!
//! By default, X-Forwarded-For and X-Real-IP headers are NOT trusted to prevent
//! IP spoofing. Configure `trusted_proxies` to enable header-based IP detection:
//!
//! - Empty list (default): Only direct connection IP is used (most secure)
//! - List of IPs/CIDRs: Headers trusted only when request comes from these IPs
//! - ["*"]: Trust headers from all sources (NOT recommended for production)

use crate::metrics::REQUESTS_THROTTLED;
use axum::{
    body::Body,
    extract::{ConnectInfo, State, connect_info::MockConnectInfo},
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use ipnet::IpNet;
use pasta_core::config::RateLimitConfig;
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// Throttle state shared across requests.
#[derive(Clone)]
pub struct RequestThrottle {
    inner: Option<Arc<ThrottleInner>>,
}

/// Inner state that's only allocated when throttling is enabled.
struct ThrottleInner {
    /// Minimum spacing between two requests of one client.
    delay: Duration,
    /// Last request time per client address.
    last_seen: Mutex<HashMap<String, Instant>>,
    /// Trusted proxy configuration.
    trusted_proxies: TrustedProxies,
    /// Whether ConnectInfo missing warning has been logged.
    connect_info_warned: AtomicBool,
}

/// A parsed trusted proxy entry (either an IP or CIDR range).
#[derive(Clone, Debug)]
enum TrustedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

/// Trusted proxy configuration for IP extraction.
#[derive(Clone, Debug)]
enum TrustedProxies {
    /// Never trust forwarded headers (default, most secure).
    None,
    /// Trust headers from all sources (dangerous, for development only).
    All,
    /// Trust headers only from specific IPs/CIDRs.
    List(Vec<TrustedEntry>),
}

impl TrustedProxies {
    fn from_config(proxies: &[String]) -> Self {
        if proxies.is_empty() {
            return Self::None;
        }
        if proxies.len() == 1 && proxies[0] == "*" {
            return Self::All;
        }

        let entries = proxies
            .iter()
            .filter_map(|p| {
                let parsed = if p.contains('/') {
                    p.parse::<IpNet>().map(TrustedEntry::Cidr).map_err(|e| e.to_string())
                } else {
                    p.parse::<IpAddr>().map(TrustedEntry::Ip).map_err(|e| e.to_string())
                };
                parsed
                    .inspect_err(|e| tracing::warn!("Invalid entry in trusted_proxies: '{}': {}", p, e))
                    .ok()
            })
            .collect();
        Self::List(entries)
    }

    /// Check if the given connection IP is a trusted proxy.
    fn is_trusted(&self, connection_ip: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::List(entries) => {
                let Ok(ip) = connection_ip.parse::<IpAddr>() else {
                    return false;
                };
                entries.iter().any(|entry| match entry {
                    TrustedEntry::Ip(trusted) => *trusted == ip,
                    TrustedEntry::Cidr(network) => network.contains(&ip),
                })
            }
        }
    }
}

impl RequestThrottle {
    /// Create a throttle from configuration. A zero delay disables it.
    pub fn new(config: &RateLimitConfig) -> Self {
        let Some(delay) = config.request_delay() else {
            return Self::disabled();
        };

        Self {
            inner: Some(Arc::new(ThrottleInner {
                delay,
                last_seen: Mutex::new(HashMap::new()),
                trusted_proxies: TrustedProxies::from_config(&config.trusted_proxies),
                connect_info_warned: AtomicBool::new(false),
            })),
        }
    }

    /// A throttle that never delays.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    fn table(inner: &ThrottleInner) -> MutexGuard<'_, HashMap<String, Instant>> {
        inner.last_seen.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("throttle table Mutex was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    /// Delay the caller until `client` may proceed, then record the request.
    ///
    /// The table lock is never held across the sleep, so waiting clients do
    /// not block each other. Returns how long the caller was delayed.
    pub async fn throttle(&self, client: &str) -> Duration {
        let Some(inner) = &self.inner else {
            return Duration::ZERO;
        };

        let wait = {
            let table = Self::table(inner);
            table
                .get(client)
                .map(|last| inner.delay.saturating_sub(last.elapsed()))
                .unwrap_or(Duration::ZERO)
        };

        if !wait.is_zero() {
            REQUESTS_THROTTLED.inc();
            tracing::debug!(client, wait_ms = wait.as_millis() as u64, "throttling request");
            tokio::time::sleep(wait).await;
        }

        Self::table(inner).insert(client.to_string(), Instant::now());
        wait
    }

    /// Forget every client. Returns the number of entries dropped.
    pub fn clear(&self) -> usize {
        let Some(inner) = &self.inner else {
            return 0;
        };
        let mut table = Self::table(inner);
        let count = table.len();
        *table = HashMap::new();
        count
    }

    /// Number of clients currently tracked.
    pub fn entry_count(&self) -> usize {
        self.inner
            .as_ref()
            .map(|inner| Self::table(inner).len())
            .unwrap_or(0)
    }

    /// Log a warning if ConnectInfo is not available (only once).
    fn warn_connect_info_missing(&self) {
        if let Some(inner) = &self.inner
            && !inner.connect_info_warned.swap(true, Ordering::Relaxed)
        {
            tracing::warn!(
                "ConnectInfo not available for throttling. All clients share the address \
                 'unknown'. Serve the router with into_make_service_with_connect_info::<SocketAddr>()."
            );
        }
    }
}

/// Extract client IP address from request headers (only if trusted).
fn extract_forwarded_ip(req: &Request<Body>) -> Option<String> {
    // X-Forwarded-For first; its first entry is the client
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(s) = forwarded.to_str()
        && let Some(ip) = s.split(',').next()
    {
        return Some(ip.trim().to_string());
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(s) = real_ip.to_str()
    {
        return Some(s.trim().to_string());
    }

    None
}

/// Extract connection IP from request extensions (set by ConnectInfo, or
/// by `MockConnectInfo` when the router is driven without a listener).
fn extract_connection_ip(req: &Request<Body>) -> Option<String> {
    let extensions = req.extensions();
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0)
        .or_else(|| extensions.get::<MockConnectInfo<SocketAddr>>().map(|mock| mock.0))
        .map(|addr| addr.ip().to_string())
}

/// Client address of a request, port stripped.
///
/// Forwarded headers are only read when the connection comes from a
/// trusted proxy (or when all proxies are trusted).
pub fn client_address(req: &Request<Body>, throttle: &RequestThrottle) -> String {
    let connection_ip = extract_connection_ip(req);

    let trust_headers = match (&throttle.inner, &connection_ip) {
        (None, _) => false,
        (Some(inner), None) => matches!(inner.trusted_proxies, TrustedProxies::All),
        (Some(inner), Some(conn_ip)) => inner.trusted_proxies.is_trusted(conn_ip),
    };

    if trust_headers && let Some(forwarded_ip) = extract_forwarded_ip(req) {
        return forwarded_ip;
    }

    match connection_ip {
        Some(ip) => ip,
        None => {
            throttle.warn_connect_info_missing();
            "unknown".to_string()
        }
    }
}

/// Whether a request creates or deletes a record.
fn is_mutating(req: &Request<Body>) -> bool {
    matches!(*req.method(), Method::POST | Method::PUT | Method::DELETE)
        || req.uri().path() == "/delete"
}

/// Throttling middleware for ingestion and deletion requests.
pub async fn throttle_middleware(
    State(throttle): State<RequestThrottle>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if throttle.is_enabled() && is_mutating(&req) {
        let client = client_address(&req, &throttle);
        throttle.throttle(&client).await;
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(delay_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            request_delay_ms: delay_ms,
            ..Default::default()
        }
    }

    fn request(method: Method, path: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_throttle_disabled() {
        let throttle = RequestThrottle::new(&config(0));
        assert!(!throttle.is_enabled());
        assert_eq!(throttle.throttle("127.0.0.1").await, Duration::ZERO);
        assert_eq!(throttle.throttle("127.0.0.1").await, Duration::ZERO);
        assert_eq!(throttle.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_throttle_delays_repeat_client() {
        let throttle = RequestThrottle::new(&config(200));

        assert_eq!(throttle.throttle("10.0.0.1").await, Duration::ZERO);

        let start = Instant::now();
        let waited = throttle.throttle("10.0.0.1").await;
        assert!(waited > Duration::ZERO);
        assert!(start.elapsed() >= Duration::from_millis(150));

        // Other clients are not affected
        assert_eq!(throttle.throttle("10.0.0.2").await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_throttle_no_delay_after_interval() {
        let throttle = RequestThrottle::new(&config(20));
        throttle.throttle("10.0.0.1").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(throttle.throttle("10.0.0.1").await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_clear_forgets_clients() {
        let throttle = RequestThrottle::new(&config(10_000));
        throttle.throttle("1.1.1.1").await;
        throttle.throttle("2.2.2.2").await;
        assert_eq!(throttle.entry_count(), 2);

        assert_eq!(throttle.clear(), 2);
        assert_eq!(throttle.entry_count(), 0);
        assert_eq!(throttle.throttle("1.1.1.1").await, Duration::ZERO);
    }

    #[test]
    fn test_is_mutating() {
        assert!(is_mutating(&request(Method::POST, "/")));
        assert!(is_mutating(&request(Method::PUT, "/")));
        assert!(is_mutating(&request(Method::DELETE, "/abcdefgh")));
        assert!(is_mutating(&request(Method::GET, "/delete?id=a&token=b")));
        assert!(!is_mutating(&request(Method::GET, "/abcdefgh")));
        assert!(!is_mutating(&request(Method::HEAD, "/abcdefgh")));
    }

    #[test]
    fn test_client_address_ignores_untrusted_headers() {
        let throttle = RequestThrottle::new(&config(100));
        let mut req = request(Method::POST, "/");
        req.headers_mut()
            .insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_address(&req, &throttle), "192.0.2.1");
    }

    #[test]
    fn test_client_address_trusted_proxy() {
        let throttle = RequestThrottle::new(&RateLimitConfig {
            request_delay_ms: 100,
            trusted_proxies: vec!["192.0.2.0/24".to_string()],
        });
        let mut req = request(Method::POST, "/");
        req.headers_mut()
            .insert("x-forwarded-for", "203.0.113.9, 192.0.2.1".parse().unwrap());
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_address(&req, &throttle), "203.0.113.9");
    }

    #[test]
    fn test_client_address_without_connect_info() {
        let throttle = RequestThrottle::new(&config(100));
        assert_eq!(client_address(&request(Method::POST, "/"), &throttle), "unknown");
    }

    #[test]
    fn test_trusted_proxies_none() {
        let proxies = TrustedProxies::from_config(&[]);
        assert!(!proxies.is_trusted("127.0.0.1"));
        assert!(!proxies.is_trusted("10.0.0.1"));
    }

    #[test]
    fn test_trusted_proxies_all() {
        let proxies = TrustedProxies::from_config(&["*".to_string()]);
        assert!(proxies.is_trusted("127.0.0.1"));
        assert!(proxies.is_trusted("anything"));
    }

    #[test]
    fn test_trusted_proxies_list() {
        let proxies =
            TrustedProxies::from_config(&["127.0.0.1".to_string(), "10.0.0.0/8".to_string()]);
        assert!(proxies.is_trusted("127.0.0.1"));
        assert!(proxies.is_trusted("10.255.255.255"));
        assert!(!proxies.is_trusted("192.168.1.1"));
        assert!(!proxies.is_trusted("not-an-ip"));
    }
}
