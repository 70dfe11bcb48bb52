//! Relay client: signup/login/whoami requests and opening an event stream.
//!
//! Used by federation bootstrap to dial upstream relays, and by tests to
//! act as chat users.

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use super::codec::{CodecError, FrameCodec};
use super::event::Event;
use super::wire::{Credentials, Frame};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("connection closed by relay")]
    Closed,
    #[error("relay refused request: {0}")]
    Refused(String),
    #[error("unexpected reply: {0:?}")]
    Unexpected(Box<Frame>),
}

/// A connection in request/reply mode.
#[derive(Debug)]
pub struct Client<S = TcpStream> {
    framed: Framed<S, FrameCodec>,
}

impl Client<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        Self {
            framed: Framed::new(io, FrameCodec),
        }
    }

    async fn call(&mut self, request: Frame) -> Result<Frame, ClientError> {
        self.framed.send(request).await?;
        match self.framed.next().await {
            Some(Ok(Frame::Failure { reason })) => Err(ClientError::Refused(reason)),
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::Closed),
        }
    }

    async fn authenticate(&mut self, request: Frame) -> Result<String, ClientError> {
        match self.call(request).await? {
            Frame::Auth { token } => Ok(token),
            other => Err(ClientError::Unexpected(Box::new(other))),
        }
    }

    /// Create an account. Returns a session token.
    pub async fn signup(&mut self, username: &str, password: &str) -> Result<String, ClientError> {
        self.authenticate(Frame::Signup(Credentials::new(username, password)))
            .await
    }

    /// Log in to an existing account. Returns a fresh session token.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<String, ClientError> {
        self.authenticate(Frame::Login(Credentials::new(username, password)))
            .await
    }

    pub async fn whoami(&mut self, token: &str) -> Result<String, ClientError> {
        match self.call(Frame::Whoami { token: token.into() }).await? {
            Frame::User { name } => Ok(name),
            other => Err(ClientError::Unexpected(Box::new(other))),
        }
    }

    /// Switch this connection into a duplex event stream.
    pub async fn open(mut self, token: &str) -> Result<EventStream<S>, ClientError> {
        match self.call(Frame::Open { token: token.into() }).await? {
            Frame::Opened { identity } => Ok(EventStream {
                framed: self.framed,
                identity,
            }),
            other => Err(ClientError::Unexpected(Box::new(other))),
        }
    }
}

/// An open event stream, bound to one identity on the relay.
#[derive(Debug)]
pub struct EventStream<S = TcpStream> {
    framed: Framed<S, FrameCodec>,
    identity: String,
}

impl<S> EventStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Identity the relay bound this stream to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn send(&mut self, event: Event) -> Result<(), ClientError> {
        self.framed.send(Frame::from(event)).await?;
        Ok(())
    }

    /// Next event from the relay, or `None` once the relay closes the stream.
    pub async fn recv(&mut self) -> Result<Option<Event>, ClientError> {
        match self.framed.next().await {
            Some(Ok(Frame::Event { event })) => Ok(Some(event)),
            Some(Ok(other)) => Err(ClientError::Unexpected(Box::new(other))),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// The underlying framed transport, for handing to a router.
    pub fn into_framed(self) -> Framed<S, FrameCodec> {
        self.framed
    }
}
