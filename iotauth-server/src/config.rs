use std::net::SocketAddr;
use std::time::Duration;

use clap::Args;
use serde::Deserialize;
use zeroize::Zeroize;

fn default_access_duration() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_refresh_duration() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Server configuration, assembled from the environment per §6's
/// recognized-options table.
#[derive(Debug, Clone, Args, Deserialize)]
pub struct Config {
    #[arg(long, env = "IOTAUTH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HMAC-SHA512 signing key for the tokenizer (§4.1). Zeroized on drop so
    /// a core dump or swapped page doesn't leak it past process lifetime.
    #[arg(long, env = "IOTAUTH_SECRET_KEY")]
    pub secret_key: SecretKey,

    #[arg(long, env = "IOTAUTH_ACCESS_DURATION", value_parser = humantime::parse_duration, default_value = "1h")]
    #[serde(default = "default_access_duration")]
    pub access_duration: Duration,

    #[arg(long, env = "IOTAUTH_REFRESH_DURATION", value_parser = humantime::parse_duration, default_value = "24h")]
    #[serde(default = "default_refresh_duration")]
    pub refresh_duration: Duration,

    #[arg(long, env = "IOTAUTH_DATABASE_URL", default_value = "sqlite::memory:")]
    pub database_url: String,

    #[arg(long, env = "IOTAUTH_POLICY_ENGINE_ADDR")]
    pub policy_engine_addr: String,

    #[arg(long, env = "IOTAUTH_TRACING_ENDPOINT")]
    pub tracing_endpoint: Option<String>,

    #[arg(long, env = "IOTAUTH_TRACE_SAMPLE_RATIO")]
    pub trace_sample_ratio: Option<f64>,

    #[arg(long, env = "IOTAUTH_INSTANCE_ID", default_value = "iotauth-0")]
    pub instance_id: String,

    #[arg(long, env = "IOTAUTH_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "IOTAUTH_ISSUER", default_value = "iotauth")]
    pub issuer: String,

    #[arg(long, env = "IOTAUTH_PLATFORM_ID", default_value = "iotauth")]
    pub platform_id: String,
}

impl Config {
    /// Validates presence of the signing key and a parseable policy-engine
    /// address, mirroring the teacher's `Config::sanitize` validating the
    /// storage path before the server starts accepting connections.
    pub fn sanitize(&self) -> anyhow::Result<()> {
        if self.secret_key.0.is_empty() {
            return Err(anyhow::Error::msg("IOTAUTH_SECRET_KEY must not be empty"));
        }
        self.policy_engine_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow::Error::msg("IOTAUTH_POLICY_ENGINE_ADDR is not a valid host:port"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey(pub Vec<u8>);

impl std::str::FromStr for SecretKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.as_bytes().to_vec()))
    }
}
