//! Stream Configuration Settings
//!
//! Configuration types for the stream client, loaded from environment
//! variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::subscription::{DesiredSubscription, ValidationError};
use crate::infrastructure::kalshi::auth::{Credentials, SignatureError};

/// Production stream URL.
pub const PRODUCTION_WS_URL: &str = "wss://api.elections.kalshi.com/trade-api/ws/v2";

/// Demo stream URL.
pub const DEMO_WS_URL: &str = "wss://demo-api.kalshi.co/trade-api/ws/v2";

/// Kalshi environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Demo environment (no real money).
    #[default]
    Demo,
    /// Production environment.
    Production,
}

impl Environment {
    /// Parse environment from string. Unknown values fall back to demo.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" | "live" => Self::Production,
            _ => Self::Demo,
        }
    }

    /// Check if this is the production environment.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Production => "production",
        }
    }

    /// Default stream URL for this environment.
    #[must_use]
    pub const fn stream_url(&self) -> &'static str {
        match self {
            Self::Demo => DEMO_WS_URL,
            Self::Production => PRODUCTION_WS_URL,
        }
    }
}

/// Where the private key comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum PrivateKeySource {
    /// PEM file on disk.
    Path(PathBuf),
    /// PEM text from the environment.
    Inline(String),
}

impl std::fmt::Debug for PrivateKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Inline(_) => f.debug_tuple("Inline").field(&"[REDACTED]").finish(),
        }
    }
}

/// API key settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    /// API key id.
    pub key_id: String,
    /// Private key location.
    pub private_key: PrivateKeySource,
}

impl AuthSettings {
    /// Load and parse the configured key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Credentials` if the key cannot be read or
    /// parsed.
    pub fn load_credentials(&self) -> Result<Credentials, ConfigError> {
        let credentials = match &self.private_key {
            PrivateKeySource::Path(path) => Credentials::from_pem_file(&self.key_id, path)?,
            PrivateKeySource::Inline(pem) => Credentials::new(&self.key_id, pem)?,
        };
        Ok(credentials)
    }
}

/// Connection and reconnect timing.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Bound on dial plus upgrade.
    pub handshake_timeout: Duration,
    /// Keep-alive probe period.
    pub ping_interval: Duration,
    /// Probe answer bound (`None` = never declare the connection dead).
    pub pong_timeout: Option<Duration>,
    /// Supervisor liveness check period.
    pub liveness_interval: Duration,
    /// Cap on the wait between failed attempts.
    pub reconnect_delay_max: Duration,
    /// Growth factor of the wait (`1.0` = fixed interval).
    pub reconnect_multiplier: f64,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(10),
            pong_timeout: Some(Duration::from_secs(30)),
            liveness_interval: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_multiplier: 1.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Capacity of the lifecycle/control event channel.
    pub events_capacity: usize,
    /// Capacity of the data channel.
    pub data_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            events_capacity: 1_000,
            data_capacity: 10_000,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Kalshi environment.
    pub environment: Environment,
    /// Stream URL override.
    pub ws_url: Option<String>,
    /// API key settings; `None` connects unauthenticated.
    pub auth: Option<AuthSettings>,
    /// Initial desired subscriptions.
    pub subscriptions: Vec<DesiredSubscription>,
    /// Connection timing.
    pub stream: StreamSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are half-configured or a
    /// subscription entry is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let environment = env
            .get("KALSHI_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let ws_url = env.get("KALSHI_WS_URL");
        let auth = parse_auth(&env)?;
        let subscriptions = env
            .get("KALSHI_SUBSCRIPTIONS")
            .map(|raw| parse_subscriptions(&raw))
            .transpose()?
            .unwrap_or_default();

        let defaults = StreamSettings::default();
        let pong_timeout_secs = env.u64(
            "STREAM_PONG_TIMEOUT_SECS",
            defaults.pong_timeout.map_or(0, |d| d.as_secs()),
        );
        let multiplier = env.f64("STREAM_RECONNECT_MULTIPLIER", defaults.reconnect_multiplier);

        let stream = StreamSettings {
            handshake_timeout: env.secs("STREAM_HANDSHAKE_TIMEOUT_SECS", defaults.handshake_timeout),
            ping_interval: env.secs("STREAM_PING_INTERVAL_SECS", defaults.ping_interval),
            pong_timeout: (pong_timeout_secs > 0).then(|| Duration::from_secs(pong_timeout_secs)),
            liveness_interval: env.secs(
                "STREAM_LIVENESS_INTERVAL_SECS",
                defaults.liveness_interval,
            ),
            reconnect_delay_max: env.secs(
                "STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_multiplier: if multiplier.is_finite() && multiplier >= 1.0 {
                multiplier
            } else {
                defaults.reconnect_multiplier
            },
            max_reconnect_attempts: env.u32(
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        let broadcast = BroadcastSettings {
            events_capacity: env.usize(
                "STREAM_EVENTS_CAPACITY",
                BroadcastSettings::default().events_capacity,
            ),
            data_capacity: env.usize(
                "STREAM_DATA_CAPACITY",
                BroadcastSettings::default().data_capacity,
            ),
        };

        let server = ServerSettings {
            health_port: env.u16("STREAM_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            environment,
            ws_url,
            auth,
            subscriptions,
            stream,
            broadcast,
            server,
        })
    }

    /// Stream URL: the override if set, else the environment default.
    #[must_use]
    pub fn stream_url(&self) -> String {
        self.ws_url
            .clone()
            .unwrap_or_else(|| self.environment.stream_url().to_string())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// A subscription entry could not be parsed.
    #[error("invalid subscription `{entry}`: {source}")]
    InvalidSubscription {
        /// The offending `channel:ticker` entry.
        entry: String,
        /// Why it was rejected.
        source: ValidationError,
    },
    /// The private key could not be loaded.
    #[error("credentials: {0}")]
    Credentials(#[from] SignatureError),
}

fn parse_auth<F>(env: &Env<F>) -> Result<Option<AuthSettings>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let key_id = env.get("KALSHI_API_KEY_ID");
    let private_key = env
        .get("KALSHI_PRIVATE_KEY_PATH")
        .map(|path| PrivateKeySource::Path(PathBuf::from(path)))
        .or_else(|| {
            env.get("KALSHI_PRIVATE_KEY")
                .map(|pem| PrivateKeySource::Inline(pem.replace("\\n", "\n")))
        });

    match (key_id, private_key) {
        (None, None) => Ok(None),
        (Some(key_id), Some(private_key)) => Ok(Some(AuthSettings {
            key_id,
            private_key,
        })),
        (Some(_), None) => Err(ConfigError::MissingEnvVar(
            "KALSHI_PRIVATE_KEY_PATH or KALSHI_PRIVATE_KEY".to_string(),
        )),
        (None, Some(_)) => Err(ConfigError::MissingEnvVar("KALSHI_API_KEY_ID".to_string())),
    }
}

/// Parse `channel:TICKER,channel:TICKER`.
fn parse_subscriptions(raw: &str) -> Result<Vec<DesiredSubscription>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = |source| ConfigError::InvalidSubscription {
                entry: entry.to_string(),
                source,
            };
            let (channel, ticker) = entry.split_once(':').ok_or_else(|| {
                invalid(ValidationError::InvalidParams(
                    "expected channel:ticker".to_string(),
                ))
            })?;
            DesiredSubscription::parse(channel.trim(), ticker.trim()).map_err(invalid)
        })
        .collect()
}

/// Environment lookup with the parse-or-default helpers.
///
/// Empty values count as unset; unparsable values fall back to the default.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.parse(key).unwrap_or(default)
    }

    fn u32(&self, key: &str, default: u32) -> u32 {
        self.parse(key).unwrap_or(default)
    }

    fn u64(&self, key: &str, default: u64) -> u64 {
        self.parse(key).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.parse(key).unwrap_or(default)
    }

    fn f64(&self, key: &str, default: f64) -> f64 {
        self.parse(key).unwrap_or(default)
    }

    /// Zero is treated as unset; every period must be positive.
    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key)
            .filter(|&secs| secs > 0)
            .map_or(default, Duration::from_secs)
    }
}
