//! Relay configuration from `RCHAT_*` environment variables.
//!
//! | Variable                  | Format                                   | Default        |
//! |---------------------------|------------------------------------------|----------------|
//! | `RCHAT_BIND`              | comma-separated listen addresses         | `0.0.0.0:9000` |
//! | `RCHAT_UPSTREAMS`         | comma-separated `target=user:pass@addr`  | none           |
//! | `RCHAT_ACCOUNTS`          | comma-separated `user:pass`              | none           |
//! | `RCHAT_SESSION_TTL_SECS`  | seconds; unset = sessions never expire   | unset          |
//! | `RCHAT_DIAL_TIMEOUT_SECS` | seconds per federation dial step         | `5`            |

use std::time::Duration;

use super::federation::{Upstream, UpstreamParseError};
use super::session::SessionPolicy;

pub const DEFAULT_BIND: &str = "0.0.0.0:9000";
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Upstream(#[from] UpstreamParseError),
    #[error("invalid account `{0}`: expected username:password")]
    Account(String),
    #[error("{var}: `{value}` is not a number of seconds")]
    Seconds { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind: Vec<String>,
    /// Federation upstreams, dialed in this order at startup.
    pub upstreams: Vec<Upstream>,
    /// Accounts created in the directory at startup.
    pub accounts: Vec<(String, String)>,
    pub session_policy: SessionPolicy,
    pub dial_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: vec![DEFAULT_BIND.to_owned()],
            upstreams: Vec::new(),
            accounts: Vec::new(),
            session_policy: SessionPolicy::default(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("RCHAT_BIND") {
            let addrs = list(&bind);
            if !addrs.is_empty() {
                config.bind = addrs.into_iter().map(str::to_owned).collect();
            }
        }

        if let Some(upstreams) = lookup("RCHAT_UPSTREAMS") {
            config.upstreams = list(&upstreams)
                .into_iter()
                .map(str::parse::<Upstream>)
                .collect::<Result<_, _>>()?;
        }

        if let Some(accounts) = lookup("RCHAT_ACCOUNTS") {
            config.accounts = list(&accounts)
                .into_iter()
                .map(|entry| match entry.split_once(':') {
                    Some((user, pass)) if !user.is_empty() => {
                        Ok((user.to_owned(), pass.to_owned()))
                    }
                    _ => Err(ConfigError::Account(entry.to_owned())),
                })
                .collect::<Result<_, _>>()?;
        }

        if let Some(ttl) = seconds(&lookup, "RCHAT_SESSION_TTL_SECS")? {
            config.session_policy = SessionPolicy::with_ttl(ttl);
        }

        if let Some(limit) = seconds(&lookup, "RCHAT_DIAL_TIMEOUT_SECS")? {
            config.dial_timeout = limit;
        }

        Ok(config)
    }
}

/// Split a comma-separated value, dropping blanks.
fn list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|s| Some(Duration::from_secs(s)))
            .map_err(|_| ConfigError::Seconds { var, value }),
    }
}
