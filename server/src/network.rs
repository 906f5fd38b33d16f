//! Accepting side of the server: listens for TCP connections and hands them
//! to the worker pool until told to stop.

use crate::config::ServerConfig;
use crate::state::SharedState;
use crate::worker::{self, Pending};
use crossbeam_channel::TrySendError;
use log::{error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};

/// Error type of the server's entry points; sendable so `run` can be spawned.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main server: one accepting task feeding a fixed pool of workers
///
/// The accepting side is async and never touches game state. Accepted
/// sockets are converted to blocking std streams and queued for the
/// workers, which own them from then on. When the queue is full the new
/// connection is dropped straight away.
pub struct Server {
    config: ServerConfig,
    state: SharedState,
    listener: TcpListener,
}

impl Server {
    /// Binds the listening socket with a backlog of `config.max_clients()`.
    pub async fn bind(config: ServerConfig, state: SharedState) -> Result<Self, BoxError> {
        let socket = if config.bind_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(config.bind_addr)?;
        let backlog = u32::try_from(config.max_clients()).unwrap_or(u32::MAX);
        let listener = socket.listen(backlog)?;

        info!("Server listening on {}", listener.local_addr()?);
        Ok(Server {
            config,
            state,
            listener,
        })
    }

    /// Address actually bound, useful when binding to port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the shared state the workers mutate
    ///
    /// Kept by the caller to persist the state after `run` returns.
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Accepts connections until `shutdown` completes
    ///
    /// Then raises the stop flag and joins every worker. Each worker closes
    /// its connections on the way out, releasing any playing flag they
    /// hold. Connections still queued at that point are dropped without
    /// ever being read.
    pub async fn run<F>(self, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()>,
    {
        let (pending_tx, pending_rx) =
            crossbeam_channel::bounded::<Pending>(self.config.max_clients());
        let stop = Arc::new(AtomicBool::new(false));
        let workers = worker::spawn_workers(&self.config, &self.state, &pending_rx, &stop)?;
        drop(pending_rx);
        info!(
            "Started {} workers with {} connections each",
            self.config.workers, self.config.connections_per_worker
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            continue;
                        }
                    };

                    let stream = match stream.into_std() {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!("Dropping {}: {}", peer, e);
                            continue;
                        }
                    };

                    match pending_tx.try_send((stream, peer)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("Connection queue full, dropping {}", peer)
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            error!("All workers are gone, stopping");
                            break;
                        }
                    }
                }
            }
        }

        info!("Shutting down workers");
        stop.store(true, Ordering::Relaxed);
        drop(pending_tx);

        tokio::task::spawn_blocking(move || {
            for handle in workers {
                if handle.join().is_err() {
                    error!("A worker panicked");
                }
            }
        })
        .await?;

        info!("All workers stopped");
        Ok(())
    }
}
