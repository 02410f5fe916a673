//! Runtime configuration loaded from the environment.

use std::net::SocketAddr;

use thiserror::Error;

use tripvault_core::Currency;

const DEV_JWT_SECRET: &str = "dev-secret";
const DEV_WEBHOOK_SECRET: &str = "whsec_dev";

/// Upper bound for `TRIPVAULT_INTENT_TTL_SECS` (seven days).
pub const MAX_INTENT_TTL_SECS: i64 = 7 * 24 * 60 * 60;
/// Upper bound for `PROCESSOR_WEBHOOK_TOLERANCE_SECS` (one day).
pub const MAX_WEBHOOK_TOLERANCE_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct VaultConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// `None` selects the in-memory backend.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub intent_ttl_secs: i64,
    pub default_currency: Currency,
    /// Payment processor REST endpoint; `None` selects the simulator.
    pub processor_api_base: Option<String>,
    pub processor_secret_key: Option<String>,
    pub processor_timeout_secs: u64,
}

impl VaultConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = match get("TRIPVAULT_BIND_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|e| ConfigError::invalid("TRIPVAULT_BIND_ADDR", format!("{raw}: {e}")))?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let webhook_secret = get("PROCESSOR_WEBHOOK_SECRET").unwrap_or_else(|| {
            tracing::warn!("PROCESSOR_WEBHOOK_SECRET not set; using insecure dev default");
            DEV_WEBHOOK_SECRET.to_string()
        });

        let db_max_connections = parse_or(&get, "TRIPVAULT_DB_MAX_CONNECTIONS", 5u32)?;
        if db_max_connections == 0 {
            return Err(ConfigError::invalid("TRIPVAULT_DB_MAX_CONNECTIONS", "must be at least 1"));
        }

        let webhook_tolerance_secs = parse_or(&get, "PROCESSOR_WEBHOOK_TOLERANCE_SECS", 300i64)?;
        if !(1..=MAX_WEBHOOK_TOLERANCE_SECS).contains(&webhook_tolerance_secs) {
            return Err(ConfigError::invalid(
                "PROCESSOR_WEBHOOK_TOLERANCE_SECS",
                format!("must be between 1 and {MAX_WEBHOOK_TOLERANCE_SECS}"),
            ));
        }

        let intent_ttl_secs = parse_or(&get, "TRIPVAULT_INTENT_TTL_SECS", 1800i64)?;
        if !(1..=MAX_INTENT_TTL_SECS).contains(&intent_ttl_secs) {
            return Err(ConfigError::invalid(
                "TRIPVAULT_INTENT_TTL_SECS",
                format!("must be between 1 and {MAX_INTENT_TTL_SECS}"),
            ));
        }

        let processor_api_base = get("PROCESSOR_API_BASE").map(|raw| raw.trim_end_matches('/').to_string());
        if let Some(base) = &processor_api_base {
            if !(base.starts_with("https://") || base.starts_with("http://")) {
                return Err(ConfigError::invalid("PROCESSOR_API_BASE", format!("{base}: expected an http(s) URL")));
            }
        }
        let processor_secret_key = get("PROCESSOR_SECRET_KEY");
        if processor_api_base.is_some() != processor_secret_key.is_some() {
            return Err(ConfigError::invalid(
                "PROCESSOR_SECRET_KEY",
                "PROCESSOR_API_BASE and PROCESSOR_SECRET_KEY must be set together",
            ));
        }

        let processor_timeout_secs = parse_or(&get, "PROCESSOR_TIMEOUT_SECS", 10u64)?;
        if processor_timeout_secs == 0 {
            return Err(ConfigError::invalid("PROCESSOR_TIMEOUT_SECS", "must be at least 1"));
        }

        let default_currency = match get("TRIPVAULT_DEFAULT_CURRENCY") {
            Some(raw) => Currency::new(&raw)
                .map_err(|e| ConfigError::invalid("TRIPVAULT_DEFAULT_CURRENCY", e.to_string()))?,
            None => Currency::usd(),
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            database_url: get("DATABASE_URL"),
            db_max_connections,
            webhook_secret,
            webhook_tolerance_secs,
            intent_ttl_secs,
            default_currency,
            processor_api_base,
            processor_secret_key,
            processor_timeout_secs,
        })
    }

    /// Bounded by [`MAX_INTENT_TTL_SECS`] when loaded through `from_lookup`.
    pub fn intent_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.intent_ttl_secs.clamp(0, MAX_INTENT_TTL_SECS))
            .unwrap_or_else(chrono::Duration::zero)
    }

    /// True when a real processor endpoint is configured.
    pub fn has_processor_api(&self) -> bool {
        self.processor_api_base.is_some() && self.processor_secret_key.is_some()
    }

    /// Database URL with the password replaced, for logging.
    pub fn database_url_masked(&self) -> Option<String> {
        self.database_url.as_deref().map(mask_url)
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url_masked())
            .field("db_max_connections", &self.db_max_connections)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("intent_ttl_secs", &self.intent_ttl_secs)
            .field("default_currency", &self.default_currency)
            .field("processor_api_base", &self.processor_api_base)
            .field("processor_timeout_secs", &self.processor_timeout_secs)
            .finish_non_exhaustive()
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, format!("{raw}: {e}"))),
        None => Ok(default),
    }
}

fn mask_url(url: &str) -> String {
    let (Some(scheme_end), Some(at)) = (url.find("://"), url.rfind('@')) else {
        return url.to_string();
    };
    let credentials = &url[scheme_end + 3..at];
    match credentials.split_once(':') {
        Some((user, _)) => format!("{}{user}:***{}", &url[..scheme_end + 3], &url[at..]),
        None => url.to_string(),
    }
}
