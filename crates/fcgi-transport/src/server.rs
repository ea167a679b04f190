//! Listening service: accept loop and bounded worker pool.
//!
//! [`Service::run`] binds the listening socket with the requested backlog,
//! flips the running flag, and spawns the accept loop. A worker slot is
//! taken from the pool *before* each `accept`, so once every worker is busy
//! new connections wait in the kernel's accept queue rather than inside the
//! application. Each accepted connection becomes one task that owns its
//! [`Transceiver`] until it returns; failures and panics in that task are
//! logged and go no further.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionTracker;
use crate::error::ServiceError;
use crate::transceiver::Transceiver;

/// Implemented by the request layer; called once per accepted connection.
///
/// The handler owns the connection for the whole call and may serve several
/// sequential requests on it. Returning an error only ends that connection.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle_connection(
        &self,
        transceiver: Transceiver,
    ) -> impl std::future::Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send;
}

/// Service configuration, supplied by the caller at `run()` time.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to bind, e.g. `127.0.0.1:9000` (port 0 for OS-assigned)
    pub listen_address: String,
    /// Connections served concurrently
    pub worker_count: usize,
    /// Kernel backlog of accepted-but-unserved connections
    pub accept_queue_depth: u32,
    /// Upper bound on any single read or write
    pub io_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:9000".into(),
            worker_count: 8,
            accept_queue_depth: 128,
            io_timeout: Duration::from_secs(30),
        }
    }
}

struct RunningState {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// The FastCGI service: owns the listener and the worker pool.
pub struct Service<H: ConnectionHandler> {
    handler: Arc<H>,
    running: AtomicBool,
    tracker: ConnectionTracker,
    state: Mutex<Option<RunningState>>,
}

impl<H: ConnectionHandler> Service<H> {
    pub fn new(handler: H) -> Self {
        Self::with_shared_handler(Arc::new(handler))
    }

    /// Build a service around a handler that is also used elsewhere.
    pub fn with_shared_handler(handler: Arc<H>) -> Self {
        Self {
            handler,
            running: AtomicBool::new(false),
            tracker: ConnectionTracker::new(),
            state: Mutex::new(None),
        }
    }

    /// Bind, start the worker pool, and begin accepting.
    ///
    /// Returns the bound address. Fails without touching the existing
    /// listener if the service is already running.
    pub async fn run(&self, config: ServiceConfig) -> Result<SocketAddr, ServiceError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServiceError::AlreadyRunning);
        }

        match self.start(config) {
            Ok(addr) => Ok(addr),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn start(&self, config: ServiceConfig) -> Result<SocketAddr, ServiceError> {
        let address: SocketAddr =
            config
                .listen_address
                .parse()
                .map_err(|source| ServiceError::InvalidAddress {
                    address: config.listen_address.clone(),
                    source,
                })?;

        let listener = bind_listener(address, config.accept_queue_depth)
            .map_err(|source| ServiceError::Bind { address, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServiceError::Bind { address, source })?;

        let workers = config.worker_count.max(1);
        info!(
            "FastCGI service listening on {local_addr} ({workers} workers, backlog {})",
            config.accept_queue_depth
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(accept_loop(
            listener,
            self.handler.clone(),
            Arc::new(Semaphore::new(workers)),
            self.tracker.clone(),
            config.io_timeout,
            shutdown_rx,
        ));

        *self.state.lock() = Some(RunningState {
            shutdown_tx,
            handle,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Stop accepting, close the listener, and wait for in-flight
    /// connections to finish. Idempotent.
    pub async fn shutdown(&self) {
        let Some(state) = self.state.lock().take() else {
            return;
        };

        info!("Shutting down FastCGI service on {}", state.local_addr);
        let _ = state.shutdown_tx.send(true);
        if let Err(e) = state.handle.await {
            error!("Accept loop ended abnormally: {e}");
        }

        self.running.store(false, Ordering::SeqCst);
        info!("FastCGI service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().as_ref().map(|s| s.local_addr)
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }
}

impl<H: ConnectionHandler> Drop for Service<H> {
    fn drop(&mut self) {
        // Without an await point the best we can do is signal the loop.
        if let Some(state) = self.state.get_mut().take() {
            let _ = state.shutdown_tx.send(true);
        }
    }
}

fn bind_listener(address: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if address.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(address)?;
    socket.listen(backlog)
}

async fn accept_loop<H: ConnectionHandler>(
    listener: TcpListener,
    handler: Arc<H>,
    workers: Arc<Semaphore>,
    tracker: ConnectionTracker,
    io_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut tasks = JoinSet::new();

    loop {
        while let Some(result) = tasks.try_join_next() {
            report_task_exit(result);
        }

        // Take a worker first so backlog beyond the pool stays in the kernel
        let permit = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            permit = workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {e}");
                    // Typically fd exhaustion; back off instead of spinning
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {peer}: {e}");
        }

        let guard = tracker.track(peer);
        let label = format!("{} ({peer})", guard.id());
        let handler = handler.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            let transceiver = Transceiver::new(stream, io_timeout).with_peer(label.clone());
            if let Err(e) = handler.handle_connection(transceiver).await {
                warn!("Connection {label} ended with error: {e}");
            }
        });
    }

    drop(listener);
    if !tasks.is_empty() {
        info!("Listener closed; waiting for {} connection(s) to finish", tasks.len());
    }
    while let Some(result) = tasks.join_next().await {
        report_task_exit(result);
    }
}

fn report_task_exit(result: Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!("Connection task panicked: {e}"),
        Err(e) => debug!("Connection task cancelled: {e}"),
    }
}
