//! Per-client state shared by admission control and the download guard.
//!
//! Every client key maps to one [`ClientState`] held in a sharded `DashMap`.
//! All reads and writes of a client's state go through the map's entry API,
//! so updates for one key are serialized while unrelated clients proceed in
//! parallel.
//!
//! # Memory Safety
//!
//! - Configurable maximum entries (default: 100,000); unknown clients are
//!   rejected while the map is full
//! - Idle entries are evicted after a TTL unless they are blocked or have a
//!   download in flight
//! - Background cleanup task that runs periodically
//!
//! # Security Note
//!
//! By default, X-Forwarded-For and X-Real-IP headers are NOT trusted to prevent
//! IP spoofing attacks. You must explicitly configure `trusted_proxies` to enable
//! header-based IP detection:
//!
//! - Empty list (default): Only direct connection IP is used (most secure)
//! - List of IPs/CIDRs: Headers trusted only when request comes from these IPs
//! - ["*"]: Trust headers from all sources (NOT recommended for production)

use crate::state::AppState;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use dashmap::{DashMap, mapref::entry::Entry};
use ipnet::IpNet;
use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tulpar_core::config::ClientTrackingConfig;

/// Key used when the peer address cannot be determined.
const UNKNOWN_CLIENT: &str = "unknown";

/// Mutable state tracked for one client.
#[derive(Clone, Debug)]
pub struct ClientState {
    /// Start of the current admission window.
    pub window_start: Instant,
    /// Requests admitted in the current window.
    pub request_count: u32,
    /// Requests are rejected until this instant.
    pub blocked_until: Option<Instant>,
    /// Download streams currently open.
    pub active_downloads: u32,
    /// Last time any request touched this entry.
    pub last_seen: Instant,
}

impl ClientState {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            request_count: 0,
            blocked_until: None,
            active_downloads: 0,
            last_seen: now,
        }
    }

    /// Whether the client is blocked at `now`.
    pub fn is_blocked_at(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    fn is_evictable(&self, now: Instant, ttl: Duration) -> bool {
        self.active_downloads == 0
            && !self.is_blocked_at(now)
            && now.saturating_duration_since(self.last_seen) > ttl
    }
}

/// Returned when a new client cannot be tracked because the registry is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtCapacity;

/// Point-in-time counts across all tracked clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub tracked: usize,
    pub blocked: usize,
    pub active_downloads: u64,
}

/// A blocked client and the time left on its block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedClient {
    pub client: String,
    pub remaining: Duration,
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
            Self::None
        } else if proxies.len() == 1 && proxies[0] == "*" {
            Self::All
        } else {
            let entries = proxies
                .iter()
                .filter_map(|p| {
                    if p.contains('/') {
                        match p.parse::<IpNet>() {
                            Ok(net) => Some(TrustedEntry::Cidr(net)),
                            Err(e) => {
                                tracing::warn!("Invalid CIDR in trusted_proxies: '{}': {}", p, e);
                                None
                            }
                        }
                    } else {
                        match p.parse::<IpAddr>() {
                            Ok(ip) => Some(TrustedEntry::Ip(ip)),
                            Err(e) => {
                                tracing::warn!("Invalid IP in trusted_proxies: '{}': {}", p, e);
                                None
                            }
                        }
                    }
                })
                .collect();
            Self::List(entries)
        }
    }

    /// Check if the given connection IP is a trusted proxy.
    fn is_trusted(&self, ip: IpAddr) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::List(entries) => entries.iter().any(|entry| match entry {
                TrustedEntry::Ip(trusted) => *trusted == ip,
                TrustedEntry::Cidr(network) => network.contains(&ip),
            }),
        }
    }
}

/// Registry of client states, cheap to clone.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    clients: DashMap<String, ClientState>,
    trusted_proxies: TrustedProxies,
    max_entries: usize,
    entry_ttl: Duration,
    /// Whether ConnectInfo missing warning has been logged.
    connect_info_warned: AtomicBool,
    /// Whether the at-capacity warning has been logged (prevents log spam during DoS).
    at_capacity_warned: AtomicBool,
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("tracked", &self.inner.clients.len())
            .field("max_entries", &self.inner.max_entries)
            .finish()
    }
}

impl ClientRegistry {
    pub fn new(config: &ClientTrackingConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                clients: DashMap::new(),
                trusted_proxies: TrustedProxies::from_config(&config.trusted_proxies),
                max_entries: usize::try_from(config.max_entries).unwrap_or(usize::MAX),
                entry_ttl: config.entry_ttl(),
                connect_info_warned: AtomicBool::new(false),
                at_capacity_warned: AtomicBool::new(false),
            }),
        }
    }

    /// Run `f` on the state for `key`, creating it if needed.
    ///
    /// The entry lock is held for the duration of `f`, which makes any
    /// check-then-mutate inside `f` atomic for that key. `f` must not await
    /// or touch the registry.
    pub fn with_client<R>(
        &self,
        key: &str,
        now: Instant,
        f: impl FnOnce(&mut ClientState) -> R,
    ) -> Result<R, AtCapacity> {
        // DashMap's len() can deadlock if called while holding an entry lock,
        // so capacity is sampled first. Concurrent inserts may overshoot
        // max_entries by at most the number of racing threads.
        let current_len = self.inner.clients.len();
        let at_capacity = current_len >= self.inner.max_entries;

        let mut state = match self.inner.clients.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                if at_capacity {
                    self.warn_at_capacity(current_len);
                    return Err(AtCapacity);
                }
                entry.insert(ClientState::new(now))
            }
        };
        state.last_seen = now;
        Ok(f(&mut state))
    }

    /// Run `f` on the state for `key` only if the client is already tracked.
    pub fn with_existing<R>(&self, key: &str, f: impl FnOnce(&mut ClientState) -> R) -> Option<R> {
        self.inner.clients.get_mut(key).map(|mut state| f(&mut state))
    }

    /// Copy of the state for `key`.
    pub fn get(&self, key: &str) -> Option<ClientState> {
        self.inner.clients.get(key).map(|state| state.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.clients.is_empty()
    }

    /// Remove idle clients that are neither blocked nor downloading.
    /// Returns the number of entries evicted.
    ///
    /// Uses `remove_if` so an entry touched between collection and removal
    /// is kept.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let ttl = self.inner.entry_ttl;
        let candidates: Vec<String> = self
            .inner
            .clients
            .iter()
            .filter(|entry| entry.value().is_evictable(now, ttl))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in candidates {
            if self
                .inner
                .clients
                .remove_if(&key, |_, state| state.is_evictable(now, ttl))
                .is_some()
            {
                evicted += 1;
            }
        }

        if evicted > 0 {
            // Allow the at-capacity warning to fire again if we fill up
            self.inner.at_capacity_warned.store(false, Ordering::Relaxed);
            tracing::debug!(
                evicted = evicted,
                remaining = self.inner.clients.len(),
                "Client registry cleanup completed"
            );
        }
        evicted
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    /// Aggregate counts across all clients.
    pub fn stats_at(&self, now: Instant) -> ClientStats {
        let mut stats = ClientStats::default();
        for entry in self.inner.clients.iter() {
            stats.tracked += 1;
            if entry.is_blocked_at(now) {
                stats.blocked += 1;
            }
            stats.active_downloads += u64::from(entry.active_downloads);
        }
        stats
    }

    /// Clients currently blocked, sorted by key.
    pub fn blocked_at(&self, now: Instant) -> Vec<BlockedClient> {
        let mut blocked: Vec<BlockedClient> = self
            .inner
            .clients
            .iter()
            .filter_map(|entry| {
                let until = entry.blocked_until?;
                (now < until).then(|| BlockedClient {
                    client: entry.key().clone(),
                    remaining: until - now,
                })
            })
            .collect();
        blocked.sort_by(|a, b| a.client.cmp(&b.client));
        blocked
    }

    /// Resolve the client key for a request.
    ///
    /// # Security
    ///
    /// Forwarded headers are honored only when the direct peer is a trusted
    /// proxy. Without ConnectInfo, headers are trusted only when every source
    /// is trusted (`["*"]`).
    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let trust_headers = match peer {
            Some(addr) => self.inner.trusted_proxies.is_trusted(addr.ip()),
            None => matches!(self.inner.trusted_proxies, TrustedProxies::All),
        };

        if trust_headers && let Some(forwarded) = forwarded_ip(headers) {
            return forwarded.to_string();
        }

        match peer {
            Some(addr) => addr.ip().to_string(),
            None => {
                self.warn_connect_info_missing();
                UNKNOWN_CLIENT.to_string()
            }
        }
    }

    /// Log a warning if ConnectInfo is not available (only once).
    fn warn_connect_info_missing(&self) {
        if !self.inner.connect_info_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "ConnectInfo not available for client tracking. All requests will share a single \
                 client key ('unknown'). Serve the router with \
                 .into_make_service_with_connect_info::<SocketAddr>() to track clients by IP."
            );
        }
    }

    /// Log a warning when the registry is at capacity (only once per capacity event).
    fn warn_at_capacity(&self, current_entries: usize) {
        if !self.inner.at_capacity_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                current_entries = current_entries,
                max_entries = self.inner.max_entries,
                "Client registry at capacity, rejecting new clients. \
                 This warning is logged once per capacity event to prevent log spam."
            );
        }
    }
}

/// Extract the originating client IP from forwarding headers.
///
/// Only values that parse as an IP address are accepted, so a forged header
/// cannot mint arbitrary registry keys.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(s) = forwarded.to_str()
        && let Some(first) = s.split(',').next()
        && let Ok(ip) = first.trim().parse()
    {
        return Some(ip);
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// The resolved identity of the requesting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromRequestParts<AppState> for ClientKey {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        Ok(Self(state.clients.client_key(&parts.headers, peer)))
    }
}

/// Spawn a background task that periodically evicts idle clients.
pub fn spawn_cleanup_task(
    registry: ClientRegistry,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = registry.cleanup();
            crate::metrics::CLIENTS_EVICTED.inc_by(evicted as u64);
            if evicted > 0 {
                tracing::info!(evicted = evicted, "Client cleanup task evicted idle entries");
            }
        }
    })
}

/// Spawn a background task that periodically logs client activity and
/// refreshes the client gauges.
pub fn spawn_report_task(
    registry: ClientRegistry,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let stats = registry.stats_at(Instant::now());
            crate::metrics::record_client_stats(&stats);
            tracing::info!(
                tracked_clients = stats.tracked,
                blocked_clients = stats.blocked,
                active_downloads = stats.active_downloads,
                "Client activity report"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn registry(config: ClientTrackingConfig) -> ClientRegistry {
        ClientRegistry::new(&config)
    }

    fn peer(ip: &str) -> Option<SocketAddr> {
        Some(SocketAddr::new(ip.parse().unwrap(), 40000))
    }

    #[test]
    fn test_with_client_creates_and_updates() {
        let registry = registry(ClientTrackingConfig::default());
        let now = Instant::now();

        registry
            .with_client("1.1.1.1", now, |s| s.request_count += 1)
            .unwrap();
        registry
            .with_client("1.1.1.1", now, |s| s.request_count += 1)
            .unwrap();

        assert_eq!(registry.get("1.1.1.1").unwrap().request_count, 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_max_entries() {
        let registry = registry(ClientTrackingConfig {
            max_entries: 3,
            ..Default::default()
        });
        let now = Instant::now();

        assert!(registry.with_client("1.1.1.1", now, |_| ()).is_ok());
        assert!(registry.with_client("2.2.2.2", now, |_| ()).is_ok());
        assert!(registry.with_client("3.3.3.3", now, |_| ()).is_ok());

        assert_eq!(registry.with_client("4.4.4.4", now, |_| ()), Err(AtCapacity));

        // Existing clients should still work
        assert!(registry.with_client("1.1.1.1", now, |_| ()).is_ok());
    }

    #[test]
    fn test_with_existing_does_not_insert() {
        let registry = registry(ClientTrackingConfig::default());
        assert!(registry.with_existing("1.1.1.1", |_| ()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cleanup_keeps_blocked_and_downloading() {
        let registry = registry(ClientTrackingConfig {
            entry_ttl_secs: 10,
            ..Default::default()
        });
        let start = Instant::now();
        let later = start + Duration::from_secs(60);

        registry.with_client("idle", start, |_| ()).unwrap();
        registry
            .with_client("downloading", start, |s| s.active_downloads = 1)
            .unwrap();
        registry
            .with_client("blocked", start, |s| {
                s.blocked_until = Some(start + Duration::from_secs(120))
            })
            .unwrap();
        registry
            .with_client("block-expired", start, |s| {
                s.blocked_until = Some(start + Duration::from_secs(5))
            })
            .unwrap();
        registry.with_client("recent", later, |_| ()).unwrap();

        assert_eq!(registry.cleanup_at(later), 2);
        assert!(registry.get("idle").is_none());
        assert!(registry.get("block-expired").is_none());
        assert!(registry.get("downloading").is_some());
        assert!(registry.get("blocked").is_some());
        assert!(registry.get("recent").is_some());
    }

    #[test]
    fn test_stats_and_blocked_listing() {
        let registry = registry(ClientTrackingConfig::default());
        let now = Instant::now();

        registry
            .with_client("b", now, |s| {
                s.blocked_until = Some(now + Duration::from_secs(30))
            })
            .unwrap();
        registry
            .with_client("a", now, |s| {
                s.blocked_until = Some(now + Duration::from_secs(10));
                s.active_downloads = 2;
            })
            .unwrap();
        registry.with_client("c", now, |_| ()).unwrap();

        let stats = registry.stats_at(now);
        assert_eq!(
            stats,
            ClientStats {
                tracked: 3,
                blocked: 2,
                active_downloads: 2
            }
        );

        let blocked = registry.blocked_at(now);
        assert_eq!(blocked.len(), 2);
        assert_eq!(blocked[0].client, "a");
        assert_eq!(blocked[0].remaining, Duration::from_secs(10));
    }

    #[test]
    fn test_client_key_ignores_headers_by_default() {
        let registry = registry(ClientTrackingConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9"));

        assert_eq!(registry.client_key(&headers, peer("10.0.0.1")), "10.0.0.1");
        assert_eq!(registry.client_key(&headers, None), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_client_key_trusted_proxy() {
        let registry = registry(ClientTrackingConfig {
            trusted_proxies: vec!["10.0.0.0/8".to_string()],
            ..Default::default()
        });
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        assert_eq!(
            registry.client_key(&headers, peer("10.1.2.3")),
            "203.0.113.7"
        );
        // Untrusted peer cannot spoof
        assert_eq!(
            registry.client_key(&headers, peer("192.168.1.1")),
            "192.168.1.1"
        );
    }

    #[test]
    fn test_client_key_rejects_non_ip_header() {
        let registry = registry(ClientTrackingConfig {
            trusted_proxies: vec!["*".to_string()],
            ..Default::default()
        });
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));

        assert_eq!(registry.client_key(&headers, None), "198.51.100.2");
    }

    #[test]
    fn test_trusted_proxies_none() {
        let proxies = TrustedProxies::from_config(&[]);
        assert!(!proxies.is_trusted("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxies_all() {
        let proxies = TrustedProxies::from_config(&["*".to_string()]);
        assert!(proxies.is_trusted("127.0.0.1".parse().unwrap()));
        assert!(proxies.is_trusted("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxies_list() {
        let proxies =
            TrustedProxies::from_config(&["127.0.0.1".to_string(), "10.0.0.0/8".to_string()]);
        assert!(proxies.is_trusted("127.0.0.1".parse().unwrap()));
        assert!(proxies.is_trusted("10.255.255.255".parse().unwrap()));
        assert!(!proxies.is_trusted("192.168.1.1".parse().unwrap()));
        assert!(!proxies.is_trusted("11.0.0.1".parse().unwrap()));
    }
}
