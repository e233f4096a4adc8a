//! Connection to the punter server.
//!
//! The server listens on one of a small window of ports above a base port.
//! Without an explicit port we probe the window from the top down and keep
//! the first port that accepts.

use crate::error::{ConnectionError, DuctError, Result};
use lamduct_core::{FramedTransport, Message};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub const DEFAULT_PORT_BASE: u16 = 9000;
pub const DEFAULT_PORT_WINDOW: u16 = 10;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Where and how long to look for the server.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub port_base: u16,
    pub port_window: u16,
    /// Applies to each connection attempt only, never to in-game reads.
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            port_base: DEFAULT_PORT_BASE,
            port_window: DEFAULT_PORT_WINDOW,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectOptions {
    /// Candidate ports, highest first: `base + window` down to `base + 1`.
    pub fn candidates(&self) -> impl Iterator<Item = u16> + use<> {
        let base = self.port_base;
        (1..=self.port_window)
            .rev()
            .filter_map(move |offset| base.checked_add(offset))
    }
}

/// Try `ports` in order and return the first that `dial` connects.
///
/// No port after the successful one is attempted.
pub async fn probe_ports<T, F, Fut>(
    host: &str,
    ports: impl IntoIterator<Item = u16>,
    mut dial: F,
) -> Result<(u16, T)>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    let mut tried = 0;
    for port in ports {
        tried += 1;
        tracing::info!("trying {} {}", host, port);
        match dial(port).await {
            Ok(conn) => return Ok((port, conn)),
            Err(e) => tracing::debug!("port {} refused: {}", port, e),
        }
    }
    Err(ConnectionError::Exhausted {
        host: host.to_string(),
        tried,
    }
    .into())
}

/// The framed channel to the server for one game.
#[derive(Debug)]
pub struct ServerConnection<R = OwnedReadHalf, W = OwnedWriteHalf> {
    transport: Option<FramedTransport<R, W>>,
    peer: Option<SocketAddr>,
}

impl ServerConnection {
    /// Connect to `host`, on `port` if given, otherwise by probing.
    pub async fn connect(host: &str, port: Option<u16>, options: &ConnectOptions) -> Result<Self> {
        let ip = resolve(host).await?;
        let limit = options.connect_timeout;
        let attempt = |port: u16| dial(SocketAddr::new(ip, port), limit);

        let (port, stream) = match port {
            Some(port) => {
                tracing::info!("trying {} {}", host, port);
                let stream = attempt(port).await.map_err(|e| {
                    tracing::debug!("port {} refused: {}", port, e);
                    DuctError::from(ConnectionError::Refused {
                        host: host.to_string(),
                        port,
                    })
                })?;
                (port, stream)
            }
            None => probe_ports(host, options.candidates(), attempt).await?,
        };

        tracing::info!("connected to {} {}", host, port);
        Ok(Self::from_stream(stream))
    }

    /// Wrap an established socket.
    pub fn from_stream(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("could not set TCP_NODELAY: {}", e);
        }
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        Self {
            transport: Some(FramedTransport::new(reader, writer)),
            peer,
        }
    }

    /// The server's address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl<R, W> ServerConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Use an already framed stream as the server channel.
    pub fn over(transport: FramedTransport<R, W>) -> Self {
        Self {
            transport: Some(transport),
            peer: None,
        }
    }

    /// False once closed.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Send one message to the server.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(ConnectionError::NotConnected)?;
        Ok(transport.send(message).await?)
    }

    /// Wait for the server's next message.
    pub async fn receive(&mut self) -> Result<Message> {
        let transport = self.transport.as_mut().ok_or(ConnectionError::NotConnected)?;
        Ok(transport.receive().await?)
    }

    /// Close the socket. Safe to call repeatedly or before connecting.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close().await
        {
            tracing::debug!("error closing server connection: {}", e);
        }
    }
}

async fn resolve(host: &str) -> Result<IpAddr> {
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|source| ConnectionError::Resolve {
            host: host.to_string(),
            source,
        })?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| ConnectionError::NoAddress(host.to_string()).into())
}

async fn dial(addr: SocketAddr, limit: Duration) -> std::io::Result<TcpStream> {
    match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
        Ok(stream) => stream,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("no answer within {:?}", limit),
        )),
    }
}
