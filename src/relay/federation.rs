//! Federation bootstrap: dial trusted upstream relays at startup.
//!
//! Each upstream is logged into as an ordinary user and its event stream is
//! registered locally under a reserved target name. From then on the link
//! is just another connection to the router: `remote@bob` leaves through
//! the `remote` link and arrives upstream addressed to `bob`.
//!
//! Federation is best-effort. An upstream that cannot be reached, refuses
//! the login or refuses the stream is skipped and startup carries on.
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

use super::address::{canonical, is_valid_username};
use super::client::{Client, ClientError, EventStream};
use super::metrics;
use super::server::Relay;

/// Credentials and address of one upstream relay, and the local name its
/// link is reachable under.
#[derive(Clone, PartialEq, Eq)]
pub struct Upstream {
    pub username: String,
    pub password: String,
    pub address: String,
    pub target_name: String,
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("address", &self.address)
            .field("target_name", &self.target_name)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid upstream `{entry}`: expected target=username:password@host:port")]
pub struct UpstreamParseError {
    pub entry: String,
}

impl FromStr for Upstream {
    type Err = UpstreamParseError;

    /// Parse `target=username:password@host:port`. The password may contain
    /// `@` and `:`; the address is everything after the last `@`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || UpstreamParseError {
            entry: s.to_owned(),
        };
        let (target_name, rest) = s.split_once('=').ok_or_else(err)?;
        let (creds, address) = rest.rsplit_once('@').ok_or_else(err)?;
        let (username, password) = creds.split_once(':').ok_or_else(err)?;

        let target_name = target_name.trim();
        if target_name.is_empty() || username.is_empty() || address.is_empty() {
            return Err(err());
        }

        Ok(Upstream {
            username: username.to_owned(),
            password: password.to_owned(),
            address: address.trim().to_owned(),
            target_name: target_name.to_owned(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("invalid target name `{0}`")]
    InvalidTarget(String),
    #[error("dial failed: {0}")]
    Dial(#[source] ClientError),
    #[error("login failed: {0}")]
    Login(#[source] ClientError),
    #[error("open failed: {0}")]
    Open(#[source] ClientError),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
}

impl FederationError {
    /// Bootstrap stage the failure happened in, for metrics labels.
    pub fn stage(&self) -> &'static str {
        match self {
            FederationError::InvalidTarget(_) => "validate",
            FederationError::Dial(_) => "dial",
            FederationError::Login(_) => "login",
            FederationError::Open(_) => "open",
            FederationError::Timeout { stage, .. } => *stage,
        }
    }
}

/// Link every upstream, in order. Returns how many links came up.
pub async fn bootstrap(relay: &Relay, upstreams: &[Upstream], dial_timeout: Duration) -> usize {
    let mut linked = 0;
    for upstream in upstreams {
        match link(relay, upstream, dial_timeout).await {
            Ok(()) => {
                linked += 1;
                metrics::federation_link_up();
                info!(
                    upstream = upstream.target_name,
                    address = upstream.address,
                    "federation: link established"
                );
            }
            Err(e) => {
                metrics::federation_link_failed(e.stage());
                warn!(
                    upstream = upstream.target_name,
                    address = upstream.address,
                    "federation: skipping upstream: {e}"
                );
            }
        }
    }
    linked
}

/// Reserve the upstream's target name, dial it, and register the link.
pub async fn link(
    relay: &Relay,
    upstream: &Upstream,
    dial_timeout: Duration,
) -> Result<(), FederationError> {
    if !is_valid_username(&upstream.target_name) {
        return Err(FederationError::InvalidTarget(upstream.target_name.clone()));
    }
    let target = canonical(&upstream.target_name);

    // Reserved before dialing so no signup can take the name meanwhile.
    relay.registry().reserve(&target);

    let stream = dial(upstream, dial_timeout).await?;
    info!(
        upstream = target,
        remote_identity = stream.identity(),
        "federation: stream open"
    );
    relay.spawn_link(&target, stream.into_framed());
    Ok(())
}

/// Connect, log in and open an event stream on an upstream relay. Each
/// step is bounded by `limit`.
pub async fn dial(
    upstream: &Upstream,
    limit: Duration,
) -> Result<EventStream<TcpStream>, FederationError> {
    let timed_out = |stage| FederationError::Timeout {
        stage,
        after: limit,
    };

    let mut client = timeout(limit, Client::connect(upstream.address.as_str()))
        .await
        .map_err(|_| timed_out("dial"))?
        .map_err(FederationError::Dial)?;

    let token = timeout(limit, client.login(&upstream.username, &upstream.password))
        .await
        .map_err(|_| timed_out("login"))?
        .map_err(FederationError::Login)?;

    timeout(limit, client.open(&token))
        .await
        .map_err(|_| timed_out("open"))?
        .map_err(FederationError::Open)
}
