//! Loopback server.

use crate::error::MockError;
use crate::handler::Handler;
use crate::store::{KvStore, MemoryStore};
use rpcbench_protocol::{Decoder, Encoder, Framing};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::broadcast;

/// Mock server configuration.
#[derive(Clone)]
pub struct MockConfig {
    /// Address to bind to. Port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// Close each connection after this many responses.
    pub close_after: Option<usize>,
    /// Delay applied before every response.
    pub response_delay: Option<Duration>,
    /// Store behind `set`/`get`/`del`.
    pub store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for MockConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConfig")
            .field("bind_addr", &self.bind_addr)
            .field("close_after", &self.close_after)
            .field("response_delay", &self.response_delay)
            .field("store_len", &self.store.len())
            .finish()
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            close_after: None,
            response_delay: None,
            store: Arc::new(MemoryStore::new()),
        }
    }
}

impl MockConfig {
    pub fn with_close_after(mut self, responses: usize) -> Self {
        self.close_after = Some(responses);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = store;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct MockStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Loopback JSON-RPC server running on its own tokio runtime.
///
/// Dropping the server stops the accept loop and every open connection.
pub struct MockServer {
    addr: SocketAddr,
    stats: Arc<MockStats>,
    store: Arc<dyn KvStore>,
    shutdown: broadcast::Sender<()>,
    runtime: Option<Runtime>,
}

impl MockServer {
    /// Binds and starts serving in the background.
    pub fn start(config: MockConfig) -> Result<Self, MockError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("rpcbench-mock")
            .enable_all()
            .build()?;

        let listener = runtime.block_on(TcpListener::bind(config.bind_addr))?;
        let addr = listener.local_addr()?;
        tracing::info!("Mock server listening on {}", addr);

        let (shutdown_tx, _) = broadcast::channel(1);
        let stats = Arc::new(MockStats::default());
        let store = config.store.clone();
        let handler = Arc::new(Handler::new(store.clone()));

        runtime.spawn(accept_loop(
            listener,
            config,
            handler,
            stats.clone(),
            shutdown_tx.clone(),
        ));

        Ok(Self {
            addr,
            stats,
            store,
            shutdown: shutdown_tx,
            runtime: Some(runtime),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn stats(&self) -> &MockStats {
        &self.stats
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Number of connections accepted so far.
    pub fn connections_accepted(&self) -> u64 {
        self.stats.connections_total.load(Ordering::Relaxed)
    }

    /// Number of requests served so far.
    pub fn requests_served(&self) -> u64 {
        self.stats.requests_total.load(Ordering::Relaxed)
    }

    /// Stops the server and drops all connections.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_millis(100));
            tracing::info!("Mock server on {} stopped", self.addr);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: MockConfig,
    handler: Arc<Handler>,
    stats: Arc<MockStats>,
    shutdown: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        stats.connections_total.fetch_add(1, Ordering::Relaxed);
                        stats.connections_active.fetch_add(1, Ordering::Relaxed);

                        let handler = handler.clone();
                        let stats = stats.clone();
                        let config = config.clone();
                        let mut conn_shutdown = shutdown.subscribe();

                        tokio::spawn(async move {
                            let result = handle_connection(
                                stream,
                                addr,
                                &handler,
                                &config,
                                &stats,
                                &mut conn_shutdown,
                            )
                            .await;

                            if let Err(e) = result {
                                tracing::debug!("Connection {} error: {}", addr, e);
                                stats.errors_total.fetch_add(1, Ordering::Relaxed);
                            }
                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            tracing::debug!("Client disconnected: {}", addr);
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!("Mock server shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    handler: &Handler,
    config: &MockConfig,
    stats: &MockStats,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), MockError> {
    tracing::debug!("Client connected: {}", addr);
    stream.set_nodelay(true)?;

    let mut buf = [0u8; 8192];
    let mut pending = Vec::new();
    let mut decoder: Option<Decoder> = None;
    let mut responses = 0usize;

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result? {
                    0 => {
                        tracing::debug!("[{}] Connection closed by client", addr);
                        return Ok(());
                    }
                    n => match decoder.as_mut() {
                        Some(decoder) => decoder.extend(&buf[..n]),
                        None => pending.extend_from_slice(&buf[..n]),
                    },
                }
            }
            _ = shutdown.recv() => {
                return Err(MockError::ShuttingDown);
            }
        }

        // The first bytes decide the framing for the whole connection.
        if decoder.is_none() {
            let Some(framing) = Framing::detect(&pending) else {
                continue;
            };
            tracing::debug!("[{}] Framing: {}", addr, framing);
            let mut fresh = Decoder::new(framing);
            fresh.extend(&pending);
            pending.clear();
            decoder = Some(fresh);
        }
        let Some(decoder) = decoder.as_mut() else {
            continue;
        };

        while let Some(request) = decoder.decode_request()? {
            stats.requests_total.fetch_add(1, Ordering::Relaxed);
            let framing = decoder.framing();
            let reply = handler.handle_body(request).await;

            if let Some(delay) = config.response_delay {
                tokio::time::sleep(delay).await;
            }

            // Raw framing acknowledges notifications with silence.
            if reply.is_none() && framing == Framing::Raw {
                continue;
            }
            let bytes = Encoder::encode_reply(framing, reply.as_ref())?;
            stream.write_all(&bytes).await?;
            responses += 1;

            if config.close_after.is_some_and(|limit| responses >= limit) {
                tracing::debug!("[{}] Closing after {} responses", addr, responses);
                stream.shutdown().await?;
                return Ok(());
            }
        }
    }
}
