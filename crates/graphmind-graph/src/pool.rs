//! Bounded, health-checked pool of FalkorDB connections.
//!
//! Pool membership (idle list, in-use and warming counts) lives behind one
//! mutex, so acquire, release, retire, and the warmup sweep are totally
//! ordered. The lock is never held across I/O: queries on leased connections
//! run concurrently. A semaphore with `max_size` permits bounds the number of
//! connections out of the idle list at any time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use graphmind_core::{QueryParams, TenantNamespace};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::client::{ConnectionState, Connector, Credentials, GraphConnection, TcpConnector};
use crate::error::{PoolError, Result};
use crate::queries::{self, QueryResponse, SchemaSummary};
use crate::resp::Frame;

/// Pool and connection settings.
///
/// Loaded from the `[falkordb]` config section or `GRAPHMIND__FALKORDB__*`.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Wrap the TCP stream in TLS.
    #[serde(default)]
    pub tls: bool,

    /// Connections kept warm by the sweep.
    #[serde(default = "default_min_size")]
    pub min_size: usize,

    /// Hard cap on connections in use at once.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle connections older than this are stale and get replaced.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,

    /// Warmup sweep interval; also the minimum gap between probes of one connection.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Extra connection attempts after the first failure.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// First backoff delay; doubles per retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Prepended to the namespace to form the graph key.
    #[serde(default)]
    pub graph_prefix: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_min_size() -> usize {
    2
}

fn default_max_size() -> usize {
    16
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_max_idle_secs() -> u64 {
    300
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            tls: false,
            min_size: default_min_size(),
            max_size: default_max_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_idle_secs: default_max_idle_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            connect_retries: default_connect_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            graph_prefix: String::new(),
        }
    }
}

impl PoolConfig {
    fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub warming: usize,
    pub total: usize,
    pub min_size: usize,
    pub max_size: usize,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<GraphConnection>,
    in_use: usize,
    warming: usize,
    closed: bool,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.in_use + self.warming
    }
}

struct PoolInner {
    config: PoolConfig,
    credentials: Credentials,
    connector: Arc<dyn Connector>,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

/// Thread-safe handle to the pool. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

/// A connection leased to exactly one caller.
///
/// Return it with [`ConnectionPool::release`]. Dropping a lease without
/// releasing it retires the connection, since a request may have been cut
/// off mid-flight.
pub struct PooledConnection {
    conn: Option<GraphConnection>,
    broken: bool,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn id(&self) -> Option<u64> {
        self.conn.as_ref().map(GraphConnection::id)
    }

    pub fn state(&self) -> ConnectionState {
        self.conn
            .as_ref()
            .map(GraphConnection::state)
            .unwrap_or(ConnectionState::Closed)
    }

    /// Raw command on the leased connection.
    pub async fn command<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Frame> {
        let conn = self.conn.as_mut().ok_or(PoolError::Closed)?;
        let result = conn.command(args).await;
        if matches!(&result, Err(e) if e.is_transport()) {
            self.broken = true;
        }
        result
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("broken", &self.broken)
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(connection_id = conn.id(), "Lease dropped without release; retiring");
            let mut state = self.pool.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionPool {
    /// Build a pool over TCP (optionally TLS) and open the first connection.
    ///
    /// Fails with `Unavailable` if the server cannot be reached after the
    /// configured retries. Starts the warmup sweep.
    pub async fn connect(config: PoolConfig) -> Result<Self> {
        let connector = TcpConnector {
            host: config.host.clone(),
            port: config.port,
            tls: config.tls,
        };
        let pool = Self::with_connector(config, Arc::new(connector));
        pool.warm_up().await?;
        pool.start_warmup();
        tracing::info!(
            host = %pool.inner.config.host,
            port = pool.inner.config.port,
            tls = pool.inner.config.tls,
            "Connected to FalkorDB"
        );
        Ok(pool)
    }

    /// Build a pool without touching the network.
    pub fn with_connector(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        let max = config.max_size.max(1);
        let credentials = config.credentials();
        Self {
            inner: Arc::new(PoolInner {
                config,
                credentials,
                connector,
                permits: Arc::new(Semaphore::new(max)),
                state: Mutex::new(PoolState::default()),
                next_id: AtomicU64::new(1),
                sweep: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Graph key for a namespace.
    pub fn graph_key(&self, namespace: &TenantNamespace) -> String {
        format!("{}{}", self.inner.config.graph_prefix, namespace)
    }

    /// Open one connection now, then fill towards `min_size` best-effort.
    pub async fn warm_up(&self) -> Result<()> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        {
            let mut state = self.inner.state.lock();
            state.warming += 1;
        }
        let opened = open_connection(&self.inner).await;
        {
            let mut state = self.inner.state.lock();
            state.warming -= 1;
            match opened {
                Ok(mut conn) => {
                    conn.set_state(ConnectionState::Idle);
                    state.idle.push_back(conn);
                }
                Err(e) => return Err(e),
            }
        }
        drop(permit);
        top_up(&self.inner).await;
        Ok(())
    }

    /// Spawn the periodic warmup sweep (idempotent).
    pub fn start_warmup(&self) {
        let mut slot = self.inner.sweep.lock();
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let period = Duration::from_secs(self.inner.config.health_check_interval_secs.max(1));
        *slot = Some(tokio::spawn(run_sweep_loop(weak, period)));
    }

    /// Lease a connection, waiting up to `acquire_timeout_ms`.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let timeout_ms = self.inner.config.acquire_timeout_ms;
        let permit = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                tracing::warn!(timeout_ms, "Connection pool exhausted");
                return Err(PoolError::Exhausted { timeout_ms });
            }
        };

        let max_idle = Duration::from_secs(self.inner.config.max_idle_secs);
        let (reused, stale) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            let mut stale = Vec::new();
            let mut reused = None;
            while let Some(mut conn) = state.idle.pop_front() {
                if conn.idle_for() > max_idle {
                    conn.set_state(ConnectionState::Stale);
                    stale.push(conn);
                    continue;
                }
                reused = Some(conn);
                break;
            }
            // Reserve the slot before any I/O so counts never exceed max_size.
            state.in_use += 1;
            (reused, stale)
        };

        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "Retiring stale idle connections");
            let inner = self.inner.clone();
            tokio::spawn(async move {
                for conn in stale {
                    conn.close().await;
                }
                top_up(&inner).await;
            });
        }

        let mut conn = match reused {
            Some(conn) => conn,
            None => match open_connection(&self.inner).await {
                Ok(conn) => conn,
                Err(e) => {
                    let mut state = self.inner.state.lock();
                    state.in_use -= 1;
                    return Err(e);
                }
            },
        };
        conn.set_state(ConnectionState::InUse);

        Ok(PooledConnection {
            conn: Some(conn),
            broken: false,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Run one graph query on a leased connection.
    pub async fn execute(
        &self,
        lease: &mut PooledConnection,
        namespace: &TenantNamespace,
        text: &str,
        params: &QueryParams,
    ) -> Result<QueryResponse> {
        let graph_key = self.graph_key(namespace);
        let conn = lease.conn.as_mut().ok_or(PoolError::Closed)?;
        let result = conn.query(&graph_key, text, params).await;
        if let Err(e) = &result {
            if e.is_transport() {
                lease.broken = true;
            }
        }
        result
    }

    /// Return a lease. Broken connections are retired instead of reused.
    pub fn release(&self, mut lease: PooledConnection) {
        let Some(mut conn) = lease.conn.take() else {
            return;
        };
        let mut state = self.inner.state.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if lease.broken || state.closed {
            drop(state);
            tracing::warn!(connection_id = conn.id(), "Retiring broken connection");
            tokio::spawn(conn.close());
            return;
        }
        conn.set_state(ConnectionState::Idle);
        state.idle.push_back(conn);
        // The permit drops with `lease` after the connection is back in `idle`.
    }

    /// Retire a lease's connection without returning it to the pool.
    pub fn retire(&self, mut lease: PooledConnection) {
        lease.broken = true;
        self.release(lease);
    }

    /// Acquire, run, release. A transport failure retires the connection and
    /// retries once on a fresh one; a second failure is `ServiceUnavailable`.
    pub async fn run_query(
        &self,
        namespace: &TenantNamespace,
        text: &str,
        params: &QueryParams,
    ) -> Result<QueryResponse> {
        let mut last_error = None;
        for attempt in 0..2 {
            let mut lease = self.acquire().await?;
            match self.execute(&mut lease, namespace, text, params).await {
                Ok(response) => {
                    self.release(lease);
                    return Ok(response);
                }
                Err(e) if e.is_transport() => {
                    tracing::warn!(
                        namespace = %namespace,
                        attempt = attempt + 1,
                        error = %e,
                        "Transport failure during query; retiring connection"
                    );
                    self.retire(lease);
                    last_error = Some(e);
                }
                Err(e) => {
                    self.release(lease);
                    return Err(e);
                }
            }
        }
        Err(PoolError::ServiceUnavailable(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    /// Acquire, send a raw command, release. Same retry rule as `run_query`.
    pub async fn command<A: AsRef<[u8]>>(&self, args: &[A]) -> Result<Frame> {
        let mut last_error = None;
        for _ in 0..2 {
            let mut lease = self.acquire().await?;
            match lease.command(args).await {
                Ok(frame) => {
                    self.release(lease);
                    return Ok(frame);
                }
                Err(e) => {
                    self.retire(lease);
                    last_error = Some(e);
                }
            }
        }
        Err(PoolError::ServiceUnavailable(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    /// Labels, relationship types, and property keys of a tenant graph.
    pub async fn schema_summary(&self, namespace: &TenantNamespace) -> Result<SchemaSummary> {
        let empty = QueryParams::new();
        let labels = self.run_query(namespace, "CALL db.labels()", &empty).await?;
        let rel_types = self
            .run_query(namespace, "CALL db.relationshipTypes()", &empty)
            .await?;
        let keys = self
            .run_query(namespace, "CALL db.propertyKeys()", &empty)
            .await?;
        Ok(SchemaSummary {
            labels: queries::first_column_strings(&labels),
            relationship_types: queries::first_column_strings(&rel_types),
            property_keys: queries::first_column_strings(&keys),
        })
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            in_use: state.in_use,
            warming: state.warming,
            total: state.total(),
            min_size: self.inner.config.min_size,
            max_size: self.inner.config.max_size,
        }
    }

    /// Stop the sweep, close idle connections, and fail pending acquires.
    pub async fn close(&self) {
        if let Some(handle) = self.inner.sweep.lock().take() {
            handle.abort();
        }
        self.inner.permits.close();
        let drained: Vec<GraphConnection> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.idle.drain(..).collect()
        };
        for conn in drained {
            conn.close().await;
        }
        tracing::info!("Connection pool closed");
    }
}

/// Establish a connection with bounded exponential backoff.
async fn open_connection(inner: &PoolInner) -> Result<GraphConnection> {
    let connect_timeout = Duration::from_millis(inner.config.connect_timeout_ms);
    let mut backoff = Duration::from_millis(inner.config.retry_backoff_ms);
    let mut last_error = String::new();
    let attempts = inner.config.connect_retries + 1;

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let establish = GraphConnection::establish(id, &inner.connector, &inner.credentials);
        match tokio::time::timeout(connect_timeout, establish).await {
            Ok(Ok(conn)) => return Ok(conn),
            Ok(Err(PoolError::Auth(msg))) => return Err(PoolError::Auth(msg)),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("connect timed out after {}ms", connect_timeout.as_millis()),
        }
        tracing::warn!(
            attempt = attempt + 1,
            attempts,
            error = %last_error,
            "Graph connection attempt failed"
        );
    }

    Err(PoolError::Unavailable(format!(
        "{attempts} connection attempts failed: {last_error}"
    )))
}

/// Open connections until `min_size` exist, without blocking acquirers.
async fn top_up(inner: &PoolInner) {
    loop {
        let Ok(permit) = inner.permits.clone().try_acquire_owned() else {
            return;
        };
        {
            let mut state = inner.state.lock();
            if state.closed || state.total() >= inner.config.min_size {
                return;
            }
            state.warming += 1;
        }
        let opened = open_connection(inner).await;
        let mut state = inner.state.lock();
        state.warming -= 1;
        match opened {
            Ok(mut conn) if !state.closed => {
                conn.set_state(ConnectionState::Idle);
                state.idle.push_back(conn);
            }
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Warmup could not open connection");
                return;
            }
        }
        drop(state);
        drop(permit);
    }
}

/// Probe idle connections that are due, dropping stale or failing ones.
async fn sweep(inner: &PoolInner) {
    let probe_every = Duration::from_secs(inner.config.health_check_interval_secs);
    let max_idle = Duration::from_secs(inner.config.max_idle_secs);
    let probe_timeout = Duration::from_millis(inner.config.connect_timeout_ms);
    let started = Instant::now();

    loop {
        let Ok(permit) = inner.permits.clone().try_acquire_owned() else {
            break;
        };
        let candidate = {
            let mut state = inner.state.lock();
            if state.closed {
                return;
            }
            let due = state.idle.iter().position(|c| {
                c.last_health_check_at() < started
                    && (c.last_health_check_at().elapsed() >= probe_every || c.idle_for() > max_idle)
            });
            match due.and_then(|idx| state.idle.remove(idx)) {
                Some(conn) => {
                    state.warming += 1;
                    Some(conn)
                }
                None => None,
            }
        };
        let Some(mut conn) = candidate else {
            break;
        };

        if conn.idle_for() > max_idle {
            conn.set_state(ConnectionState::Stale);
            tracing::info!(connection_id = conn.id(), "Idle connection stale; replacing");
            conn.close().await;
            inner.state.lock().warming -= 1;
            continue;
        }

        conn.set_state(ConnectionState::Warming);
        let probe = tokio::time::timeout(probe_timeout, conn.ping()).await;
        let mut state = inner.state.lock();
        state.warming -= 1;
        match probe {
            Ok(Ok(())) if !state.closed => {
                conn.set_state(ConnectionState::Idle);
                state.idle.push_back(conn);
            }
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(connection_id = conn.id(), error = %e, "Health probe failed; retiring");
            }
            Err(_) => {
                tracing::warn!(connection_id = conn.id(), "Health probe timed out; retiring");
            }
        }
        drop(state);
        drop(permit);
    }

    top_up(inner).await;
}

async fn run_sweep_loop(pool: Weak<PoolInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = pool.upgrade() else {
            return;
        };
        sweep(&inner).await;
        let status = {
            let state = inner.state.lock();
            (state.idle.len(), state.in_use)
        };
        tracing::debug!(idle = status.0, in_use = status.1, "Warmup sweep complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BoxedTransport;
    use crate::resp::{self, Frame};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Connector handing out in-memory pipes served by a tiny RESP server.
    struct PipeConnector {
        opened: Arc<AtomicUsize>,
        fail: bool,
    }

    async fn serve(mut stream: DuplexStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            while let Ok(Some((frame, used))) = resp::decode(&buf) {
                buf.drain(..used);
                let Frame::Array(args) = frame else { return };
                let cmd = args.first().and_then(Frame::as_text).unwrap_or("").to_string();
                let reply = match cmd.as_str() {
                    "PING" => Frame::Simple("PONG".into()),
                    "GRAPH.RO_QUERY" => Frame::Array(vec![
                        Frame::Array(vec![Frame::Bulk(b"n".to_vec())]),
                        Frame::Array(vec![Frame::Array(vec![Frame::Integer(1)])]),
                        Frame::Array(vec![]),
                    ]),
                    _ => Frame::Error("ERR unknown".into()),
                };
                let mut out = Vec::new();
                resp::encode_frame(&reply, &mut out);
                if stream.write_all(&out).await.is_err() {
                    return;
                }
            }
        }
    }

    #[async_trait]
    impl Connector for PipeConnector {
        async fn connect(&self) -> Result<BoxedTransport> {
            if self.fail {
                return Err(PoolError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(64 * 1024);
            tokio::spawn(serve(server));
            Ok(Box::new(client))
        }
    }

    fn test_pool(max_size: usize, acquire_timeout_ms: u64) -> (ConnectionPool, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let config = PoolConfig {
            min_size: 1,
            max_size,
            acquire_timeout_ms,
            retry_backoff_ms: 1,
            ..PoolConfig::default()
        };
        let connector = PipeConnector {
            opened: opened.clone(),
            fail: false,
        };
        (ConnectionPool::with_connector(config, Arc::new(connector)), opened)
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.port, 6379);
        assert_eq!(config.min_size, 2);
        assert_eq!(config.max_size, 16);
        assert_eq!(config.acquire_timeout_ms, 5_000);
        assert!(!config.tls);
    }

    #[tokio::test]
    async fn test_acquire_release_reuses_connection() {
        let (pool, opened) = test_pool(2, 100);
        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.state(), ConnectionState::InUse);
        let first_id = lease.id();
        pool.release(lease);
        assert_eq!(pool.status().idle, 1);

        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.id(), first_id);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        pool.release(lease);
    }

    #[tokio::test]
    async fn test_exhausted_after_timeout() {
        let (pool, _) = test_pool(1, 50);
        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { timeout_ms: 50 }));
        pool.release(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let (pool, opened) = test_pool(1, 2_000);
        let held = pool.acquire().await.unwrap();
        let p2 = pool.clone();
        let waiter = tokio::spawn(async move { p2.acquire().await.map(|l| l.id()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let held_id = held.id();
        pool.release(held);
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, held_id);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_lease_is_retired() {
        let (pool, _) = test_pool(2, 100);
        let lease = pool.acquire().await.unwrap();
        drop(lease);
        let status = pool.status();
        assert_eq!(status.in_use, 0);
        assert_eq!(status.idle, 0);
    }

    #[tokio::test]
    async fn test_run_query_round_trip() {
        let (pool, _) = test_pool(2, 100);
        let ns = TenantNamespace::new("t1").unwrap();
        let response = pool
            .run_query(&ns, "MATCH (n) RETURN n LIMIT 1", &QueryParams::new())
            .await
            .unwrap();
        assert_eq!(response.columns, vec!["n"]);
        assert_eq!(response.rows[0]["n"], serde_json::json!(1));
        assert_eq!(pool.status().in_use, 0);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let config = PoolConfig {
            connect_retries: 2,
            retry_backoff_ms: 1,
            ..PoolConfig::default()
        };
        let connector = PipeConnector {
            opened: Arc::new(AtomicUsize::new(0)),
            fail: true,
        };
        let pool = ConnectionPool::with_connector(config, Arc::new(connector));
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Unavailable(_)));
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn test_warm_up_fills_to_min_size() {
        let opened = Arc::new(AtomicUsize::new(0));
        let config = PoolConfig {
            min_size: 3,
            max_size: 4,
            ..PoolConfig::default()
        };
        let connector = PipeConnector {
            opened: opened.clone(),
            fail: false,
        };
        let pool = ConnectionPool::with_connector(config, Arc::new(connector));
        pool.warm_up().await.unwrap();
        let status = pool.status();
        assert_eq!(status.idle, 3);
        assert_eq!(status.total, 3);
        assert_eq!(opened.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_graph_key_uses_prefix() {
        let config = PoolConfig {
            graph_prefix: "graphmind_".into(),
            ..PoolConfig::default()
        };
        let connector = PipeConnector {
            opened: Arc::new(AtomicUsize::new(0)),
            fail: false,
        };
        let pool = ConnectionPool::with_connector(config, Arc::new(connector));
        let ns = TenantNamespace::new("alice").unwrap();
        assert_eq!(pool.graph_key(&ns), "graphmind_alice");
    }

    #[tokio::test]
    async fn test_close_fails_pending_acquire() {
        let (pool, _) = test_pool(1, 5_000);
        let held = pool.acquire().await.unwrap();
        let p2 = pool.clone();
        let waiter = tokio::spawn(async move { p2.acquire().await.err() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.close().await;
        let err = waiter.await.unwrap();
        assert!(matches!(err, Some(PoolError::Closed)));
        drop(held);
    }
}
