//! Network Monitor - single authoritative reachability belief
//!
//! Combines host-supplied platform signals with active probing:
//! - Platform "offline" flips to OFFLINE immediately
//! - Platform "online" flips to ONLINE optimistically, then probes to confirm
//! - A periodic probe (default every 30s) flips state on a single result
//! - Listeners are notified exactly once per transition
//!
//! A confirmed return to ONLINE invokes the reconnect handler, which the
//! engine uses to start a queue drain.

use super::events::{Listeners, Subscription};
use super::remote::RemoteError;
use super::scheduler::{BackgroundScheduler, SchedulerConfig, SchedulerError};
use crate::config::{ConfigError, MonitorConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Offline => "offline",
        })
    }
}

/// Current reachability belief
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub status: NetworkStatus,
    pub last_transition_at: DateTime<Utc>,
    /// Last probe or platform signal
    pub last_check_at: Option<DateTime<Utc>>,
    /// Connection type reported by the host, if any
    pub connection_type: Option<String>,
}

/// Raw connectivity event from the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSignal {
    Online,
    Offline,
}

// ============================================================================
// Probing
// ============================================================================

/// Minimal liveness check against the backend
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> Result<(), RemoteError>;
}

/// `HEAD` request against a ping endpoint, cache disabled, bounded by a timeout
pub struct HttpProbe {
    client: Client,
    url: url::Url,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url::Url::parse(url)?,
            timeout,
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> Result<(), RemoteError> {
        let request = self
            .client
            .head(self.url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send();

        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RemoteError::Transient(format!(
                    "probe timed out after {:?}",
                    self.timeout
                )))
            }
        };

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RemoteError::Transient(format!("probe returned {}", response.status())))
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

type ReconnectHandler = Arc<dyn Fn() + Send + Sync>;

struct MonitorInner {
    probe: Arc<dyn ReachabilityProbe>,
    state: StdMutex<NetworkState>,
    listeners: Listeners<NetworkState>,
    on_reconnect: StdMutex<Option<ReconnectHandler>>,
    scheduler: BackgroundScheduler,
}

/// Reachability state machine
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
    /// Create a monitor starting from the host's current belief
    pub fn new(probe: Arc<dyn ReachabilityProbe>, initial: NetworkStatus, config: MonitorConfig) -> Self {
        let scheduler = BackgroundScheduler::new(SchedulerConfig::new("Network probe", config.probe_interval));
        Self {
            inner: Arc::new(MonitorInner {
                probe,
                state: StdMutex::new(NetworkState {
                    status: initial,
                    last_transition_at: Utc::now(),
                    last_check_at: None,
                    connection_type: None,
                }),
                listeners: Listeners::new(),
                on_reconnect: StdMutex::new(None),
                scheduler,
            }),
        }
    }

    pub fn state(&self) -> NetworkState {
        self.lock_state().clone()
    }

    pub fn status(&self) -> NetworkStatus {
        self.lock_state().status
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Receive every state transition
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkState) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    /// Install the callback run after a confirmed OFFLINE -> ONLINE return
    pub fn set_reconnect_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.on_reconnect.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    pub fn clear_reconnect_handler(&self) {
        *self.inner.on_reconnect.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Record the connection type reported by the host (e.g. "wifi")
    pub fn set_connection_type(&self, connection_type: Option<String>) {
        self.lock_state().connection_type = connection_type;
    }

    /// Feed a platform connectivity event into the state machine
    pub async fn handle_platform_signal(&self, signal: PlatformSignal) {
        match signal {
            PlatformSignal::Offline => {
                log::warn!("Network connection lost (platform signal)");
                self.transition(NetworkStatus::Offline);
            }
            PlatformSignal::Online => {
                log::info!("Network connection restored (platform signal), confirming");
                self.transition(NetworkStatus::Online);

                match self.inner.probe.probe().await {
                    Ok(()) => {
                        self.transition(NetworkStatus::Online);
                        self.notify_reconnect();
                    }
                    Err(e) => {
                        log::warn!("Platform reported online but probe failed: {}", e);
                        self.transition(NetworkStatus::Offline);
                    }
                }
            }
        }
    }

    /// Probe once and update state; returns the resulting status
    pub async fn check_connection(&self) -> NetworkStatus {
        let result = self.inner.probe.probe().await;

        match result {
            Ok(()) => {
                if self.transition(NetworkStatus::Online) {
                    log::info!("Connection restored via probe");
                    self.notify_reconnect();
                }
                NetworkStatus::Online
            }
            Err(e) => {
                if self.transition(NetworkStatus::Offline) {
                    log::warn!("Connection lost via probe: {}", e);
                } else {
                    log::debug!("Probe failed while offline: {}", e);
                }
                NetworkStatus::Offline
            }
        }
    }

    /// Begin periodic probing
    pub fn start(&self) -> Result<(), SchedulerError> {
        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.start(move || {
            let inner = weak.upgrade();
            async move {
                if let Some(inner) = inner {
                    NetworkMonitor { inner }.check_connection().await;
                }
            }
        })
    }

    pub fn stop(&self) -> Result<(), SchedulerError> {
        self.inner.scheduler.stop()
    }

    pub fn is_probing(&self) -> bool {
        self.inner.scheduler.is_running()
    }

    /// Apply `status`; emits and returns true only when it changed
    fn transition(&self, status: NetworkStatus) -> bool {
        let changed = {
            let mut state = self.lock_state();
            let now = Utc::now();
            state.last_check_at = Some(now);

            if state.status == status {
                None
            } else {
                state.status = status;
                state.last_transition_at = now;
                Some(state.clone())
            }
        };

        match changed {
            Some(state) => {
                log::info!("Network status changed to {}", state.status);
                self.inner.listeners.emit(&state);
                true
            }
            None => false,
        }
    }

    fn notify_reconnect(&self) {
        let handler = self
            .inner
            .on_reconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        if let Some(handler) = handler {
            handler();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, NetworkState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::ScriptedProbe;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn monitor(probe: Arc<ScriptedProbe>, initial: NetworkStatus) -> NetworkMonitor {
        NetworkMonitor::new(probe, initial, MonitorConfig::default())
    }

    fn record_statuses(monitor: &NetworkMonitor) -> Arc<StdMutex<Vec<NetworkStatus>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        monitor.subscribe(move |state: &NetworkState| sink.lock().unwrap().push(state.status));
        seen
    }

    fn count_reconnects(monitor: &NetworkMonitor) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        monitor.set_reconnect_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[tokio::test]
    async fn test_probe_transitions_emit_once() {
        let probe = Arc::new(ScriptedProbe::new(false));
        let monitor = monitor(probe.clone(), NetworkStatus::Online);
        let seen = record_statuses(&monitor);
        let reconnects = count_reconnects(&monitor);

        assert_eq!(monitor.check_connection().await, NetworkStatus::Offline);
        assert_eq!(monitor.check_connection().await, NetworkStatus::Offline);

        probe.set_reachable(true);
        assert_eq!(monitor.check_connection().await, NetworkStatus::Online);
        assert_eq!(monitor.check_connection().await, NetworkStatus::Online);

        assert_eq!(*seen.lock().unwrap(), vec![NetworkStatus::Offline, NetworkStatus::Online]);
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
        assert!(monitor.state().last_check_at.is_some());
    }

    #[tokio::test]
    async fn test_platform_offline_is_immediate() {
        let probe = Arc::new(ScriptedProbe::new(true));
        let monitor = monitor(probe.clone(), NetworkStatus::Online);
        let seen = record_statuses(&monitor);

        monitor.handle_platform_signal(PlatformSignal::Offline).await;

        assert!(!monitor.is_online());
        assert_eq!(*seen.lock().unwrap(), vec![NetworkStatus::Offline]);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_platform_online_confirmed_by_probe() {
        let probe = Arc::new(ScriptedProbe::new(true));
        let monitor = monitor(probe.clone(), NetworkStatus::Offline);
        let seen = record_statuses(&monitor);
        let reconnects = count_reconnects(&monitor);

        monitor.handle_platform_signal(PlatformSignal::Online).await;

        assert!(monitor.is_online());
        assert_eq!(*seen.lock().unwrap(), vec![NetworkStatus::Online]);
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_platform_online_refuted_by_probe() {
        let probe = Arc::new(ScriptedProbe::new(false));
        let monitor = monitor(probe, NetworkStatus::Offline);
        let seen = record_statuses(&monitor);
        let reconnects = count_reconnects(&monitor);

        monitor.handle_platform_signal(PlatformSignal::Online).await;

        assert!(!monitor.is_online());
        assert_eq!(*seen.lock().unwrap(), vec![NetworkStatus::Online, NetworkStatus::Offline]);
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_probe() {
        let probe = Arc::new(ScriptedProbe::new(false));
        let monitor = monitor(probe.clone(), NetworkStatus::Online);

        monitor.start().unwrap();
        assert!(monitor.is_probing());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!monitor.is_online());
        assert_eq!(probe.calls(), 1);

        monitor.stop().unwrap();
        assert!(!monitor.is_probing());
    }

    #[tokio::test]
    async fn test_http_probe_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", "/ping")
            .match_header("cache-control", "no-cache")
            .with_status(200)
            .create_async()
            .await;

        let probe = HttpProbe::new(&format!("{}/ping", server.url()), Duration::from_secs(5)).unwrap();
        assert!(probe.probe().await.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_probe_failure_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server.mock("HEAD", "/ping").with_status(503).create_async().await;

        let probe = HttpProbe::new(&format!("{}/ping", server.url()), Duration::from_secs(5)).unwrap();
        let err = probe.probe().await.unwrap_err();
        assert!(err.is_transient());
    }
}
