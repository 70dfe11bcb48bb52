//! Relay server core: owned state, auth gateway, client handling.
//!
//! One [`Relay`] owns the session store, the connection registry and the
//! router. Nothing is global: tests run many relays side by side.
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::address::{canonical, is_valid_username};
use super::codec::{CodecError, FrameCodec};
use super::config::RelayConfig;
use super::directory::{Directory, DirectoryError};
use super::federation;
use super::registry::Registry;
use super::router::Router;
use super::session::{SessionNotFound, SessionPolicy, SessionStore};
use super::wire::{Credentials, Frame};

/// Signup/login failures, returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username")]
    InvalidUsername,
    #[error("entity name already exists")]
    AlreadyExists,
    /// Unknown account or wrong password; callers cannot tell which.
    #[error("invalid username/password")]
    BadCredentials,
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Why a client connection ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Session(#[from] SessionNotFound),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub struct Relay {
    directory: Arc<dyn Directory>,
    sessions: SessionStore,
    registry: Arc<Registry>,
    router: Router,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// A relay with no federation links.
    pub fn new(directory: Arc<dyn Directory>, policy: SessionPolicy) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        Arc::new(Self {
            directory,
            sessions: SessionStore::new(policy),
            router: Router::new(Arc::clone(&registry)),
            registry,
        })
    }

    /// Build a relay and dial every configured upstream, in order.
    /// Upstreams that fail are skipped; construction always succeeds.
    pub async fn bootstrap(directory: Arc<dyn Directory>, config: &RelayConfig) -> Arc<Self> {
        let relay = Self::new(directory, config.session_policy);
        let linked = federation::bootstrap(&relay, &config.upstreams, config.dial_timeout).await;
        info!(
            linked,
            configured = config.upstreams.len(),
            "federation bootstrap complete"
        );
        relay
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Create an account and start a session.
    pub async fn signup(&self, username: &str, password: &str) -> Result<String, AuthError> {
        if !is_valid_username(username) {
            return Err(AuthError::InvalidUsername);
        }
        let identity = canonical(username);
        if self.registry.is_claimed(&identity) {
            return Err(AuthError::AlreadyExists);
        }

        self.directory.create(username, password).await?;
        let token = self.sessions.issue(&identity).await;
        info!(identity, "signup");
        Ok(token)
    }

    /// Start a fresh session for an existing account.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        self.directory
            .validate(username, password)
            .await
            .map_err(|e| match e {
                DirectoryError::NotFound | DirectoryError::BadPassword => {
                    AuthError::BadCredentials
                }
                other => AuthError::Directory(other),
            })?;
        let identity = canonical(username);
        let token = self.sessions.issue(&identity).await;
        info!(identity, "login");
        Ok(token)
    }

    pub async fn whoami(&self, token: &str) -> Result<String, SessionNotFound> {
        self.sessions.whoami(token).await
    }

    /// Bind `transport` to the identity behind `token` and route its events
    /// until it closes. An invalid token is refused before registration.
    pub async fn open<T, E>(&self, token: &str, mut transport: T) -> Result<(), ConnectionError>
    where
        T: Stream<Item = Result<Frame, E>> + Sink<Frame, Error = E> + Unpin,
        E: fmt::Display + Into<ConnectionError>,
    {
        let identity = match self.whoami(token).await {
            Ok(identity) => identity,
            Err(e) => {
                transport
                    .send(Frame::failure(e))
                    .await
                    .map_err(Into::<ConnectionError>::into)?;
                return Err(e.into());
            }
        };

        let (registration, outbound) = self.registry.attach(&identity);
        transport
            .send(Frame::Opened {
                identity: identity.clone(),
            })
            .await
            .map_err(Into::<ConnectionError>::into)?;
        self.router.serve(registration, outbound, transport).await;
        Ok(())
    }

    /// Register an already-authenticated transport under `identity` and
    /// drive it on its own task. Registration happens before this returns.
    pub fn spawn_link<T, E>(&self, identity: &str, transport: T) -> JoinHandle<()>
    where
        T: Stream<Item = Result<Frame, E>> + Sink<Frame, Error = E> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (registration, outbound) = self.registry.attach(identity);
        let router = self.router.clone();
        tokio::spawn(async move { router.serve(registration, outbound, transport).await })
    }
}

fn auth_reply(result: Result<String, AuthError>) -> Frame {
    match result {
        Ok(token) => Frame::Auth { token },
        Err(e) => {
            debug!("auth refused: {e}");
            Frame::failure(e)
        }
    }
}

/// Run the relay on every address in `config.bind`.
///
/// All listeners are bound before any connection is accepted, so a port
/// conflict fails fast.
pub async fn run(
    directory: Arc<dyn Directory>,
    config: RelayConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut listeners = Vec::with_capacity(config.bind.len());
    for addr in &config.bind {
        let listener = TcpListener::bind(addr).await?;
        info!("rchat listening on {addr}");
        listeners.push(listener);
    }

    let relay = Relay::bootstrap(directory, &config).await;

    let mut handles = Vec::new();
    for listener in listeners {
        handles.push(tokio::spawn(accept_loop(listener, Arc::clone(&relay))));
    }

    // Accept loops only return on listener failure.
    for handle in handles {
        handle.await??;
    }

    Ok(())
}

/// Accept connections on `listener` forever, one task per client.
pub async fn accept_loop(
    listener: TcpListener,
    relay: Arc<Relay>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let (socket, addr) = listener.accept().await?;
        info!(%addr, "new connection");
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, addr, &relay).await {
                warn!(%addr, "client error: {e}");
            }
            info!(%addr, "disconnected");
        });
    }
}

/// Serve request/reply frames until the client opens a stream or leaves.
async fn handle_client(
    socket: TcpStream,
    addr: SocketAddr,
    relay: &Relay,
) -> Result<(), ConnectionError> {
    socket.set_nodelay(true).map_err(CodecError::from)?;
    let mut framed = Framed::new(socket, FrameCodec);

    while let Some(frame) = framed.next().await {
        let reply = match frame? {
            Frame::Signup(Credentials { username, password }) => {
                auth_reply(relay.signup(&username, &password).await)
            }
            Frame::Login(Credentials { username, password }) => {
                auth_reply(relay.login(&username, &password).await)
            }
            Frame::Whoami { token } => match relay.whoami(&token).await {
                Ok(name) => Frame::User { name },
                Err(e) => Frame::failure(e),
            },
            Frame::Open { token } => {
                debug!(%addr, "opening stream");
                return relay.open(&token, framed).await;
            }
            other => {
                debug!(%addr, ?other, "frame not valid before open");
                Frame::failure("stream not open")
            }
        };
        framed.send(reply).await?;
    }

    Ok(())
}
