//! Configuration management

use axum::http::HeaderValue;
use chrono::Duration;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::auth::AuthConfig;
use crate::policy::{PolicyError, PolicyTable};
use crate::portal::ServerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("{0} must be set together with {1}")]
    Incomplete(&'static str, &'static str),

    #[error("invalid PORTAL_POLICY_OVERRIDES: {0}")]
    Policy(#[from] PolicyError),
}

/// Longest accepted session or cookie cache lifetime (10 years)
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Read `PORTAL_LOG_FORMAT`; needed before the rest of the config so
    /// the subscriber is up when config warnings fire
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::parse(std::env::var("PORTAL_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Result<Self, ConfigError> {
        match value {
            None | Some("text") => Ok(LogFormat::Text),
            Some("json") => Ok(LogFormat::Json),
            Some(other) => Err(ConfigError::Invalid {
                var: "PORTAL_LOG_FORMAT",
                value: other.to_string(),
            }),
        }
    }
}

/// Account created at startup when missing
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

/// Portal configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listener settings
    pub server: ServerConfig,

    /// SQLite database path
    pub db_path: PathBuf,

    /// Cookie cache signing secret
    pub auth_secret: String,

    /// Mark cookies `Secure` (requires HTTPS)
    pub secure_cookies: bool,

    /// Read client addresses from proxy headers
    pub trust_proxy_headers: bool,

    /// Store session lifetime in seconds
    pub session_ttl_secs: i64,

    /// Cookie cache lifetime in seconds
    pub cookie_cache_ttl_secs: i64,

    /// Policy table with overrides applied
    pub policy: PolicyTable,

    pub bootstrap_admin: Option<BootstrapAdmin>,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut server = ServerConfig::default();

        if let Some(addr) = parse::<IpAddr>(&lookup, "PORTAL_BIND_ADDR")? {
            server.bind_addr = addr;
        }

        if let Some(port) = parse::<u16>(&lookup, "PORTAL_PORT")? {
            server.port = port;
        }

        if let Some(origins) = lookup("PORTAL_TRUSTED_ORIGINS") {
            server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(|o| {
                    // Credentialed CORS cannot use a wildcard origin
                    if o == "*" || o.parse::<HeaderValue>().is_err() {
                        return Err(ConfigError::Invalid {
                            var: "PORTAL_TRUSTED_ORIGINS",
                            value: o.to_string(),
                        });
                    }
                    Ok(o.to_string())
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
        }

        if let Some(val) = lookup("PORTAL_LOG_REQUESTS") {
            server.log_requests = is_truthy(&val);
        }

        let db_path = lookup("PORTAL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./admin-portal.db"));

        let auth_secret = lookup("PORTAL_AUTH_SECRET")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                tracing::warn!("No PORTAL_AUTH_SECRET configured - using random secret (development only)");
                rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(64)
                    .map(char::from)
                    .collect()
            });

        let secure_cookies = lookup("PORTAL_SECURE_COOKIES")
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        let trust_proxy_headers = lookup("PORTAL_TRUST_PROXY")
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        let session_ttl_secs = ttl(&lookup, "PORTAL_SESSION_TTL_SECS")?.unwrap_or(7 * 24 * 60 * 60);
        let cookie_cache_ttl_secs = ttl(&lookup, "PORTAL_COOKIE_CACHE_TTL_SECS")?.unwrap_or(5 * 60);

        let policy = match lookup("PORTAL_POLICY_OVERRIDES") {
            Some(raw) => PolicyTable::with_overrides(&raw)?,
            None => PolicyTable::default(),
        };

        let bootstrap_admin = match (
            lookup("PORTAL_BOOTSTRAP_ADMIN_EMAIL"),
            lookup("PORTAL_BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Incomplete(
                    "PORTAL_BOOTSTRAP_ADMIN_EMAIL",
                    "PORTAL_BOOTSTRAP_ADMIN_PASSWORD",
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete(
                    "PORTAL_BOOTSTRAP_ADMIN_PASSWORD",
                    "PORTAL_BOOTSTRAP_ADMIN_EMAIL",
                ))
            }
        };

        let log_format = LogFormat::parse(lookup("PORTAL_LOG_FORMAT").as_deref())?;

        if !server.is_localhost() && !secure_cookies {
            tracing::warn!(
                "Portal binding to {} without PORTAL_SECURE_COOKIES",
                server.bind_addr
            );
        }

        Ok(Self {
            server,
            db_path,
            auth_secret,
            secure_cookies,
            trust_proxy_headers,
            session_ttl_secs,
            cookie_cache_ttl_secs,
            policy,
            bootstrap_admin,
            log_format,
        })
    }

    /// Settings for the auth service
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            secret: self.auth_secret.clone(),
            secure_cookies: self.secure_cookies,
            session_ttl: Duration::seconds(self.session_ttl_secs),
            cookie_cache_ttl: Duration::seconds(self.cookie_cache_ttl_secs),
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

fn is_truthy(val: &str) -> bool {
    val == "true" || val == "1"
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// Lifetime in seconds within `1..=MAX_TTL_SECS`
fn ttl(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<i64>, ConfigError> {
    match parse::<i64>(lookup, var)? {
        Some(n) if n <= 0 || n > MAX_TTL_SECS => Err(ConfigError::Invalid {
            var,
            value: n.to_string(),
        }),
        other => Ok(other),
    }
}
