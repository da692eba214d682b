//! TCP server for scoring chain streams.
//!
//! Accepts connections and runs one [`ConnectionHandler`] task per
//! connection. Tasks share nothing but the logging pipeline, so a failing
//! connection never affects its siblings.

use crate::config::ServerConfig;
use crate::connection::ConnectionHandler;
use crate::error::{Error, Result};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Server instance
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Resolve the configured address and bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = tokio::net::lookup_host((config.listen.host.as_str(), config.listen.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve to any address", config.listen),
                )
            })?;

        let listener = TcpListener::from_std(create_listener(addr)?)?;
        info!(address = %listener.local_addr()?, "Server listening");

        Ok(Server {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            config,
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves, then wait for the
    /// sessions still in flight. A Ctrl-C during that wait abandons them.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();
        let mut next_id = 0u64;

        // Finished sessions are reaped while idle, not only on accept.
        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                Some(finished) = sessions.join_next() => {
                    reap(finished);
                    continue;
                }
                permit = Arc::clone(&self.connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                Some(finished) = sessions.join_next() => {
                    reap(finished);
                    continue;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            next_id += 1;
            let span = info_span!("conn", id = next_id, peer = %peer);
            let buffer_size = self.config.buffer_size;
            sessions.spawn(serve_connection(stream, peer, buffer_size, permit).instrument(span));
        }

        info!("Shutting down server...");
        drop(self.listener);

        if !sessions.is_empty() {
            info!(in_flight = sessions.len(), "Waiting for open connections");
            let drained = tokio::select! {
                _ = async { while sessions.join_next().await.is_some() {} } => true,
                _ = tokio::signal::ctrl_c() => false,
            };
            if !drained {
                warn!(abandoned = sessions.len(), "Abandoning open connections");
                sessions.shutdown().await;
            }
        }

        Ok(())
    }
}

fn reap(finished: std::result::Result<(), JoinError>) {
    match finished {
        Ok(()) => trace!("Connection task reaped"),
        Err(e) => error!(error = %e, "Connection task failed"),
    }
}

/// Run one session and report how it ended.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    buffer_size: usize,
    _permit: OwnedSemaphorePermit,
) {
    info!("Connection from {peer}");
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    match ConnectionHandler::new(buffer_size).run(stream).await {
        Ok(summary) => info!(
            chains = summary.chains,
            valid = summary.valid,
            invalid = summary.invalid,
            "Process from {peer} completed in {:.2} seconds.",
            summary.elapsed.as_secs_f64()
        ),
        Err(Error::Protocol(e)) => error!(error = %e, "Session from {peer} incomplete"),
        Err(e) => error!(error = %e, "Error while handling {peer}"),
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
