//! Single FalkorDB connection: transport, authentication, and request/response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use graphmind_core::QueryParams;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{PoolError, Result};
use crate::queries::{self, QueryResponse};
use crate::resp::{self, Frame};

/// A byte-stream the protocol can run over (plain TCP, TLS, or an in-memory pipe).
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Opens raw transports to the graph database.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<BoxedTransport>;
}

/// TCP connector with optional TLS.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<BoxedTransport> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;

        if !self.tls {
            return Ok(Box::new(stream));
        }

        let tls = tokio_native_tls::native_tls::TlsConnector::new()
            .map_err(|e| PoolError::Unavailable(format!("TLS setup failed: {e}")))?;
        let tls = tokio_native_tls::TlsConnector::from(tls);
        let stream = tls
            .connect(&self.host, stream)
            .await
            .map_err(|e| PoolError::Unavailable(format!("TLS handshake failed: {e}")))?;
        Ok(Box::new(stream))
    }
}

/// Username/password sent with `AUTH` right after connecting.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Lifecycle of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    InUse,
    Warming,
    Stale,
    Closed,
}

/// One authenticated protocol connection.
///
/// Owned exclusively by the pool, or by one caller through a lease.
pub struct GraphConnection {
    id: u64,
    transport: BoxedTransport,
    read_buf: Vec<u8>,
    state: ConnectionState,
    created_at: Instant,
    last_used_at: Instant,
    last_health_check_at: Instant,
}

impl std::fmt::Debug for GraphConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphConnection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("age_ms", &self.created_at.elapsed().as_millis())
            .finish()
    }
}

impl GraphConnection {
    /// Open a transport and authenticate.
    pub async fn establish(
        id: u64,
        connector: &Arc<dyn Connector>,
        credentials: &Credentials,
    ) -> Result<Self> {
        let transport = connector.connect().await?;
        let now = Instant::now();
        let mut conn = Self {
            id,
            transport,
            read_buf: Vec::with_capacity(4096),
            state: ConnectionState::Warming,
            created_at: now,
            last_used_at: now,
            last_health_check_at: now,
        };
        conn.authenticate(credentials).await?;
        tracing::debug!(connection_id = id, "Graph connection established");
        Ok(conn)
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        let Some(password) = credentials.password.as_deref() else {
            return Ok(());
        };
        let reply = match credentials.username.as_deref() {
            Some(user) => self.command(&["AUTH", user, password]).await?,
            None => self.command(&["AUTH", password]).await?,
        };
        match reply {
            Frame::Error(msg) => Err(PoolError::Auth(msg)),
            _ => Ok(()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub fn last_health_check_at(&self) -> Instant {
        self.last_health_check_at
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Send one command and read one reply frame.
    ///
    /// Server error replies are returned as `Frame::Error`; only transport and
    /// decode failures are `Err`.
    pub async fn command<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Frame> {
        let request = resp::encode_command(args);
        self.transport.write_all(&request).await?;
        self.transport.flush().await?;
        let frame = self.read_frame().await?;
        self.last_used_at = Instant::now();
        Ok(frame)
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some((frame, used)) = resp::decode(&self.read_buf)? {
                self.read_buf.drain(..used);
                return Ok(frame);
            }
            let n = self.transport.read(&mut chunk).await?;
            if n == 0 {
                return Err(PoolError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Health probe: `PING` must answer `PONG`.
    pub async fn ping(&mut self) -> Result<()> {
        match self.command(&["PING"]).await? {
            Frame::Simple(s) if s.eq_ignore_ascii_case("PONG") => {
                self.last_health_check_at = Instant::now();
                Ok(())
            }
            other => Err(PoolError::Protocol(format!("unexpected PING reply {other:?}"))),
        }
    }

    /// Run a read-only graph query against `graph_key`.
    pub async fn query(
        &mut self,
        graph_key: &str,
        text: &str,
        params: &QueryParams,
    ) -> Result<QueryResponse> {
        let body = queries::request_text(text, params);
        let reply = self.command(&["GRAPH.RO_QUERY", graph_key, body.as_str()]).await?;
        queries::decode_result_set(reply)
    }

    /// Best-effort shutdown of the transport.
    pub async fn close(mut self) {
        self.state = ConnectionState::Closed;
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!(connection_id = self.id, error = %e, "Transport shutdown failed");
        }
    }
}
