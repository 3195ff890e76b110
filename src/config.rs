use anyhow::{Context, Result};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use zeroize::{Zeroize, Zeroizing};

/// Shortest allowed token rotation, in seconds.
pub const MIN_ROTATION_SECS: u64 = 30;
/// Longest allowed token rotation, in seconds.
pub const MAX_ROTATION_SECS: u64 = 60;
pub const DEFAULT_ROTATION_SECS: u64 = 45;
pub const DEFAULT_STALENESS_SECS: i64 = 120;
pub const DEFAULT_GEOFENCE_RADIUS_METERS: f64 = 100.0;
pub const DEFAULT_ANOMALY_LOOKBACK_SECS: i64 = 3600;

/// Secrets that ship in sample configs and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["qr-secret-key", "changeme", "secret"];

/// Where current QR tokens live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCacheDriver {
    /// Shared Redis, for more than one service instance.
    Redis,
    /// Process memory, for a single instance.
    Memory,
}

impl FromStr for TokenCacheDriver {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("TOKEN_CACHE must be 'redis' or 'memory', got '{}'", other),
        }
    }
}

/// What a fingerprint anomaly does to the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyPolicy {
    /// The attempt is recorded as `spoofed`.
    Reject,
    /// The anomaly is logged and reported; the verdict ignores it.
    Flag,
}

impl FromStr for AnomalyPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "flag" => Ok(Self::Flag),
            other => anyhow::bail!("ANOMALY_POLICY must be 'reject' or 'flag', got '{}'", other),
        }
    }
}

/// Knobs for the presence checks.
#[derive(Clone)]
pub struct PresenceConfig {
    /// HMAC key for QR tokens.
    pub token_secret: Zeroizing<Vec<u8>>,
    /// How long a token stays current before the lecturer display rotates it.
    pub rotation_interval_secs: u64,
    /// Absolute maximum token age, independent of the cache.
    pub staleness_ceiling_secs: i64,
    /// Radius used when a session does not set its own.
    pub default_geofence_radius_meters: f64,
    /// How far back the anomaly detector looks.
    pub anomaly_lookback_secs: i64,
    pub anomaly_policy: AnomalyPolicy,
    /// Lock the session row so same-session check-ins see each other's writes.
    pub serialize_same_session: bool,
}

impl fmt::Debug for PresenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceConfig")
            .field("token_secret", &"<redacted>")
            .field("rotation_interval_secs", &self.rotation_interval_secs)
            .field("staleness_ceiling_secs", &self.staleness_ceiling_secs)
            .field("default_geofence_radius_meters", &self.default_geofence_radius_meters)
            .field("anomaly_lookback_secs", &self.anomaly_lookback_secs)
            .field("anomaly_policy", &self.anomaly_policy)
            .field("serialize_same_session", &self.serialize_same_session)
            .finish()
    }
}

impl PresenceConfig {
    /// Defaults for everything except the secret.
    pub fn new(token_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            token_secret: Zeroizing::new(token_secret.into()),
            rotation_interval_secs: DEFAULT_ROTATION_SECS,
            staleness_ceiling_secs: DEFAULT_STALENESS_SECS,
            default_geofence_radius_meters: DEFAULT_GEOFENCE_RADIUS_METERS,
            anomaly_lookback_secs: DEFAULT_ANOMALY_LOOKBACK_SECS,
            anomaly_policy: AnomalyPolicy::Reject,
            serialize_same_session: true,
        }
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.anomaly_lookback_secs)
    }

    /// Rejects values the checks cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.token_secret.is_empty() {
            anyhow::bail!("QR_SECRET must not be empty");
        }
        if !(MIN_ROTATION_SECS..=MAX_ROTATION_SECS).contains(&self.rotation_interval_secs) {
            anyhow::bail!(
                "QR_ROTATION_SECONDS must be between {} and {}",
                MIN_ROTATION_SECS,
                MAX_ROTATION_SECS
            );
        }
        if self.staleness_ceiling_secs <= 0 {
            anyhow::bail!("QR_STALENESS_SECONDS must be positive");
        }
        if !self.default_geofence_radius_meters.is_finite() || self.default_geofence_radius_meters <= 0.0 {
            anyhow::bail!("DEFAULT_GEOFENCE_RADIUS_METERS must be a positive number");
        }
        if self.anomaly_lookback_secs <= 0 {
            anyhow::bail!("ANOMALY_LOOKBACK_SECONDS must be positive");
        }
        Ok(())
    }

    fn from_env(is_production: bool) -> Result<Self> {
        let mut secret = env::var("QR_SECRET")
            .context("QR_SECRET must be set (generate with: openssl rand -hex 32)")?;

        if is_production && PLACEHOLDER_SECRETS.contains(&secret.trim()) {
            secret.zeroize();
            anyhow::bail!("QR_SECRET is a placeholder value; set a real secret in production");
        }

        let mut config = Self::new(secret.as_bytes().to_vec());
        secret.zeroize();

        config.rotation_interval_secs = parse_env("QR_ROTATION_SECONDS", DEFAULT_ROTATION_SECS)?;
        config.staleness_ceiling_secs = parse_env("QR_STALENESS_SECONDS", DEFAULT_STALENESS_SECS)?;
        config.default_geofence_radius_meters =
            parse_env("DEFAULT_GEOFENCE_RADIUS_METERS", DEFAULT_GEOFENCE_RADIUS_METERS)?;
        config.anomaly_lookback_secs =
            parse_env("ANOMALY_LOOKBACK_SECONDS", DEFAULT_ANOMALY_LOOKBACK_SECS)?;
        config.anomaly_policy = parse_env("ANOMALY_POLICY", AnomalyPolicy::Reject)?;
        config.serialize_same_session = parse_env("CHECKIN_SERIALIZE_SESSION", true)?;

        config.validate()?;
        Ok(config)
    }
}

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Which token cache driver to use.
    pub token_cache: TokenCacheDriver,
    /// Presence check settings.
    pub presence: PresenceConfig,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let is_production = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            == "production";

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            bind_addr: parse_env("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            token_cache: parse_env("TOKEN_CACHE", TokenCacheDriver::Redis)?,
            presence: PresenceConfig::from_env(is_production)?,
        })
    }
}

/// Reads `key`, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PresenceConfig::new(b"s3cret".to_vec());
        assert!(config.validate().is_ok());
        assert_eq!(config.rotation_interval_secs, 45);
        assert_eq!(config.staleness_ceiling_secs, 120);
        assert_eq!(config.default_geofence_radius_meters, 100.0);
        assert_eq!(config.lookback(), chrono::Duration::hours(1));
    }

    #[test]
    fn rejects_empty_secret_and_bad_rotation() {
        assert!(PresenceConfig::new(Vec::new()).validate().is_err());

        let mut config = PresenceConfig::new(b"s3cret".to_vec());
        config.rotation_interval_secs = 10;
        assert!(config.validate().is_err());
        config.rotation_interval_secs = 61;
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let config = PresenceConfig::new(b"super-secret-value".to_vec());
        let printed = format!("{:?}", config);
        assert!(!printed.contains("super-secret-value"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn parses_driver_and_policy() {
        assert_eq!("Memory".parse::<TokenCacheDriver>().unwrap(), TokenCacheDriver::Memory);
        assert_eq!("flag".parse::<AnomalyPolicy>().unwrap(), AnomalyPolicy::Flag);
        assert!("sqlite".parse::<TokenCacheDriver>().is_err());
    }
}
