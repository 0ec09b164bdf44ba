//! Prometheus-compatible lobby metrics
//!
//! Counters are shared by every coordinator in the process. The exposition
//! endpoint is optional and only started when a port is configured.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Metrics registry for session coordination
#[derive(Debug)]
pub struct LobbyMetrics {
    // Directory
    pub sessions_joined: AtomicU64,
    pub sessions_created: AtomicU64,
    pub join_failures: AtomicU64,

    // Transport
    pub broadcasts_sent: AtomicU64,
    pub broadcast_failures: AtomicU64,
    pub messages_received: AtomicU64,

    // Countdown
    pub timer_starts: AtomicU64,
    pub timer_stops: AtomicU64,
    pub all_ready_shortcuts: AtomicU64,
    pub activations: AtomicU64,

    // Bots and requests
    pub bots_spawned: AtomicU64,
    pub team_changes_rejected: AtomicU64,

    start_time: Instant,
}

impl LobbyMetrics {
    pub fn new() -> Self {
        Self {
            sessions_joined: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            join_failures: AtomicU64::new(0),
            broadcasts_sent: AtomicU64::new(0),
            broadcast_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            timer_starts: AtomicU64::new(0),
            timer_stops: AtomicU64::new(0),
            all_ready_shortcuts: AtomicU64::new(0),
            activations: AtomicU64::new(0),
            bots_spawned: AtomicU64::new(0),
            team_changes_rejected: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Render all counters in Prometheus text format
    pub fn render_prometheus(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 12] = [
            ("lobby_sessions_joined_total", "Sessions joined through random search", &self.sessions_joined),
            ("lobby_sessions_created_total", "Sessions created after a failed search", &self.sessions_created),
            ("lobby_join_failures_total", "Join-or-create attempts that failed", &self.join_failures),
            ("lobby_broadcasts_sent_total", "Messages broadcast", &self.broadcasts_sent),
            ("lobby_broadcast_failures_total", "Broadcasts the transport rejected", &self.broadcast_failures),
            ("lobby_messages_received_total", "Messages received", &self.messages_received),
            ("lobby_timer_starts_total", "Countdowns started", &self.timer_starts),
            ("lobby_timer_stops_total", "Countdowns stopped", &self.timer_stops),
            ("lobby_all_ready_shortcuts_total", "Starts triggered by all peers being ready", &self.all_ready_shortcuts),
            ("lobby_activations_total", "Activations observed", &self.activations),
            ("lobby_bots_spawned_total", "Filler bots announced", &self.bots_spawned),
            ("lobby_team_changes_rejected_total", "Team changes rejected because the team was full", &self.team_changes_rejected),
        ];

        let mut output = String::with_capacity(2048);
        for (name, help, counter) in counters {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name} {}\n", Self::get(counter)));
        }

        output.push_str("# HELP lobby_uptime_seconds Process uptime\n");
        output.push_str("# TYPE lobby_uptime_seconds gauge\n");
        output.push_str(&format!(
            "lobby_uptime_seconds {}\n",
            self.start_time.elapsed().as_secs()
        ));

        output
    }
}

impl Default for LobbyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve `/metrics` over plain HTTP
pub async fn start_metrics_server(metrics: Arc<LobbyMetrics>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Metrics server listening on http://0.0.0.0:{}/metrics", port);

    loop {
        let (mut socket, addr) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let n = match socket.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    debug!("Metrics read from {} failed: {}", addr, e);
                    return;
                }
            };

            let request = String::from_utf8_lossy(&buf[..n]);
            let response = if request.starts_with("GET /metrics") {
                let body = metrics.render_prometheus();
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                )
            } else {
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_string()
            };

            if let Err(e) = socket.write_all(response.as_bytes()).await {
                warn!("Metrics write to {} failed: {}", addr, e);
            }
        });
    }
}
