use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use boutique_gateway::connection::ChannelOptions;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub allow_client_push: bool,
    pub heartbeat_interval: Duration,
    pub identify_timeout: Duration,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("BOUTIQUE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("BOUTIQUE_JWT_SECRET is unset or still a placeholder; it must match the storefront's signing secret");
        }

        let port: u16 = lookup("BOUTIQUE_PORT")
            .unwrap_or_else(|| "8000".into())
            .parse()
            .context("BOUTIQUE_PORT")?;

        let heartbeat_secs = parse_secs(&lookup, "BOUTIQUE_HEARTBEAT_SECS", 15)?;
        let identify_secs = parse_secs(&lookup, "BOUTIQUE_IDENTIFY_TIMEOUT_SECS", 10)?;

        Ok(Self {
            host: lookup("BOUTIQUE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: lookup("BOUTIQUE_DB_PATH")
                .unwrap_or_else(|| "boutique.db".into())
                .into(),
            jwt_secret,
            allow_client_push: lookup("BOUTIQUE_ALLOW_CLIENT_PUSH")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            identify_timeout: Duration::from_secs(identify_secs),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            heartbeat_interval: self.heartbeat_interval,
            identify_timeout: self.identify_timeout,
            allow_client_push: self.allow_client_push,
        }
    }
}

fn parse_secs<F>(lookup: &F, key: &str, default: u64) -> anyhow::Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = match lookup(key) {
        Some(raw) => raw.parse().with_context(|| key.to_string())?,
        None => default,
    };
    if secs == 0 {
        bail!("{} must be at least 1", key);
    }
    Ok(secs)
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
