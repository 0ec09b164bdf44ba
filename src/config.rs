use std::str::FromStr;
use std::time::Duration;

/// Lobby configuration
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Session size, split evenly between the two teams
    pub capacity: usize,
    /// Opaque matchmaking bucket handed to the directory
    pub filter_bucket: u32,
    /// Countdown length once the session is full
    pub countdown: Duration,
    /// Interval of the processing loop
    pub tick_interval: Duration,
    /// Let the lowest peer id claim leadership when no leader is present
    pub reelect_on_leader_departure: bool,
    /// Seed for bot avatar selection (entropy when unset)
    pub bot_seed: Option<u64>,
    /// Maximum sessions the in-memory directory holds
    pub max_sessions: usize,
    /// Peers started by the local simulation
    pub simulated_peers: usize,
    /// Port for the Prometheus endpoint (disabled when unset)
    pub metrics_port: Option<u16>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            capacity: 6,
            filter_bucket: 0,
            countdown: Duration::from_secs(10),
            tick_interval: Duration::from_millis(100),
            reelect_on_leader_departure: false,
            bot_seed: None,
            max_sessions: 100,
            simulated_peers: 3,
            metrics_port: None,
        }
    }
}

/// Parse an environment variable, warning and returning None when invalid
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

impl LobbyConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(capacity) = env_parse::<usize>("LOBBY_CAPACITY") {
            if (2..=64).contains(&capacity) && capacity % 2 == 0 {
                config.capacity = capacity;
            } else {
                tracing::warn!("LOBBY_CAPACITY must be even and 2-64, using default");
            }
        }

        if let Some(bucket) = env_parse("LOBBY_FILTER_BUCKET") {
            config.filter_bucket = bucket;
        }

        if let Some(ms) = env_parse::<u64>("LOBBY_COUNTDOWN_MS") {
            config.countdown = Duration::from_millis(ms);
        }

        if let Some(ms) = env_parse::<u64>("LOBBY_TICK_MS") {
            if ms > 0 {
                config.tick_interval = Duration::from_millis(ms);
            } else {
                tracing::warn!("LOBBY_TICK_MS must be > 0, using default");
            }
        }

        if let Some(reelect) = env_parse("LOBBY_REELECT_LEADER") {
            config.reelect_on_leader_departure = reelect;
        }

        config.bot_seed = env_parse("LOBBY_BOT_SEED");

        if let Some(max_sessions) = env_parse::<usize>("LOBBY_MAX_SESSIONS") {
            if max_sessions > 0 && max_sessions <= 10000 {
                config.max_sessions = max_sessions;
            } else {
                tracing::warn!("LOBBY_MAX_SESSIONS must be 1-10000, using default");
            }
        }

        if let Some(peers) = env_parse("LOBBY_SIM_PEERS") {
            config.simulated_peers = peers;
        }

        config.metrics_port = env_parse::<u16>("METRICS_PORT").filter(|port| *port > 0);

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity < 2 {
            return Err("capacity must be at least 2".to_string());
        }
        if self.capacity % 2 != 0 {
            return Err("capacity must be even".to_string());
        }
        if self.tick_interval.is_zero() {
            return Err("tick_interval must be non-zero".to_string());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be at least 1".to_string());
        }
        Ok(())
    }

    /// Slots available to one team
    pub fn team_capacity(&self) -> usize {
        self.capacity / 2
    }
}
