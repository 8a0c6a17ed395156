//! Heartbeat bookkeeping and the background beat sender.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::protocol::{Version, negotiate_heartbeats, parse_heartbeat_header};

/// Whether `elapsed` is within the interval plus a 10% grace period.
/// A disabled (`None`) interval is always alive.
pub fn within_grace(elapsed: Duration, interval: Option<Duration>) -> bool {
    match interval {
        None => true,
        Some(interval) if interval.is_zero() => true,
        Some(interval) => elapsed.as_millis() * 10 <= interval.as_millis() * 11,
    }
}

/// Negotiated heartbeat intervals and the timestamps they are checked
/// against.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    client_interval: Option<Duration>,
    broker_interval: Option<Duration>,
    last_transmitted: Instant,
    last_received: Instant,
}

impl HeartbeatMonitor {
    /// A monitor with both directions disabled.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn new(client_interval: Option<Duration>, broker_interval: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            client_interval,
            broker_interval,
            last_transmitted: now,
            last_received: now,
        }
    }

    /// Negotiate from the CONNECT and CONNECTED `heart-beat` values.
    /// Versions before 1.1 have no heartbeats.
    pub fn negotiate(version: Version, client_header: &str, broker_header: Option<&str>) -> Self {
        if !version.supports_heartbeats() {
            return Self::disabled();
        }
        let (cx, cy) = parse_heartbeat_header(client_header);
        let (sx, sy) = parse_heartbeat_header(broker_header.unwrap_or("0,0"));
        let (outgoing, incoming) = negotiate_heartbeats(cx, cy, sx, sy);
        Self::new(outgoing, incoming)
    }

    /// How often the client must send something.
    pub fn client_interval(&self) -> Option<Duration> {
        self.client_interval
    }

    /// How often the broker promised to send something.
    pub fn broker_interval(&self) -> Option<Duration> {
        self.broker_interval
    }

    pub fn transmitted(&mut self) {
        self.last_transmitted = Instant::now();
    }

    pub fn received(&mut self) {
        self.last_received = Instant::now();
    }

    pub fn client_alive_at(&self, now: Instant) -> bool {
        within_grace(now.saturating_duration_since(self.last_transmitted), self.client_interval)
    }

    pub fn broker_alive_at(&self, now: Instant) -> bool {
        within_grace(now.saturating_duration_since(self.last_received), self.broker_interval)
    }

    pub fn client_alive(&self) -> bool {
        self.client_alive_at(Instant::now())
    }

    pub fn broker_alive(&self) -> bool {
        self.broker_alive_at(Instant::now())
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Background task that keeps the client's heartbeat obligation by sending
/// a beat every negotiated client interval.
pub struct HeartbeatPump {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl HeartbeatPump {
    /// Start beating on `conn`. The task ends on its own when no client
    /// interval was negotiated or the client closes the connection; while
    /// the stream is down (e.g. during a reconnect) ticks are skipped.
    pub fn spawn(conn: Connection) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let handle = tokio::spawn(async move {
            let Some(interval) = conn.heartbeat().client_interval() else {
                debug!("no client heartbeat negotiated; pump idle");
                return;
            };
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        if conn.closed_by_client() {
                            break;
                        }
                        if !conn.is_connected() {
                            continue;
                        }
                        if let Err(e) = conn.beat().await {
                            warn!(error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        });
        Self {
            shutdown_tx,
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the pump and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_period_is_ten_percent() {
        let interval = Some(Duration::from_millis(1000));
        assert!(within_grace(Duration::from_millis(1000), interval));
        assert!(within_grace(Duration::from_millis(1100), interval));
        assert!(!within_grace(Duration::from_millis(1101), interval));
        assert!(!within_grace(Duration::from_millis(1200), interval));
        assert!(within_grace(Duration::from_secs(3600), None));
    }

    #[test]
    fn pre_11_sessions_have_no_intervals() {
        let monitor = HeartbeatMonitor::negotiate(Version::V1_0, "1000,1000", Some("1000,1000"));
        assert_eq!(monitor.client_interval(), None);
        assert_eq!(monitor.broker_interval(), None);
    }

    #[test]
    fn negotiation_uses_both_proposals() {
        let monitor = HeartbeatMonitor::negotiate(Version::V1_1, "1000,5000", Some("2000,500"));
        assert_eq!(monitor.client_interval(), Some(Duration::from_millis(1000)));
        assert_eq!(monitor.broker_interval(), Some(Duration::from_millis(5000)));
        let silent = HeartbeatMonitor::negotiate(Version::V1_2, "1000,1000", None);
        assert_eq!(silent.client_interval(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_follows_timestamps() {
        let mut monitor = HeartbeatMonitor::new(Some(Duration::from_millis(1000)), None);
        let start = Instant::now();
        assert!(monitor.client_alive_at(start + Duration::from_millis(1100)));
        assert!(!monitor.client_alive_at(start + Duration::from_millis(1200)));
        tokio::time::advance(Duration::from_millis(1150)).await;
        assert!(!monitor.client_alive());
        monitor.transmitted();
        assert!(monitor.client_alive());
        assert!(monitor.broker_alive());
    }
}
