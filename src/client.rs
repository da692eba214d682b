//! Producer client.
//!
//! Sends generated chains over one connection while a separate task
//! collects the scored results. The write half only writes and the read
//! half only reads. The sender ends the session with the sentinel; the
//! receiver ends when it sees the server's sentinel.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::frame::{FrameReader, FrameWriter, SEPARATOR};
use crate::scheduler::{self, GenerationRequest};
use bytes::BytesMut;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Outcome of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub chains_sent: u64,
    pub results_received: u64,
    pub elapsed: Duration,
}

/// Connect to the server, stream all chains and collect every result.
///
/// The sender and the receiver run together. Whichever fails first ends the
/// session, and its error is returned.
pub async fn run(config: &ClientConfig) -> Result<SessionReport> {
    let mut request = GenerationRequest::new(config.chains, config.chunk_size, config.workers)?;
    if let Some(seed) = config.seed {
        request = request.with_seed(seed);
    }

    let chains_file = create_sink(&config.chains_file, config.buffer_size).await?;
    let results_file = create_sink(&config.results_file, config.buffer_size).await?;

    let start = Instant::now();
    let stream = TcpStream::connect((config.address.host.as_str(), config.address.port)).await?;
    stream.set_nodelay(true)?;
    info!(address = %config.address, "Connected");

    let (read_half, write_half) = stream.into_split();
    let mut receiver = tokio::spawn(receive_results(
        read_half,
        results_file,
        config.buffer_size,
    ));

    let mut writer = FrameWriter::with_storage(write_half, chains_file);
    let send = async move {
        let summary = scheduler::run(&request, &mut writer).await?;
        let (mut write_half, _) = writer.finish().await?;
        write_half.shutdown().await?;
        debug!(chains = summary.chains, "All chains sent");
        Ok::<_, Error>(summary.chains)
    };
    tokio::pin!(send);

    // Dropping `send` early drops the write half, which closes our side.
    let (sent, received) = tokio::select! {
        sent = &mut send => match sent {
            // Results may still be in flight after the last write.
            Ok(sent) => (sent, (&mut receiver).await??),
            Err(e) => {
                receiver.abort();
                return Err(e);
            }
        },
        received = &mut receiver => {
            let received = received??;
            (send.await?, received)
        }
    };

    let report = SessionReport {
        chains_sent: sent,
        results_received: received,
        elapsed: start.elapsed(),
    };
    info!(
        chains = report.chains_sent,
        results = report.results_received,
        "Session completed in {:.2} seconds",
        report.elapsed.as_secs_f64()
    );
    Ok(report)
}

async fn create_sink(path: &Path, buffer_size: usize) -> Result<BufWriter<File>> {
    let file = File::create(path).await.map_err(Error::Storage)?;
    Ok(BufWriter::with_capacity(buffer_size, file))
}

/// Read result lines until the server's sentinel and append each one,
/// newline-terminated, to `sink`. Returns the number of results.
pub async fn receive_results<R, W>(mut transport: R, mut sink: W, buffer_size: usize) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = FrameReader::new();
    let mut buffer = BytesMut::with_capacity(buffer_size.max(1));
    let mut lines = BytesMut::new();

    while !reader.is_terminated() {
        buffer.clear();
        buffer.reserve(buffer_size.max(1));
        transport.read_buf(&mut buffer).await?;

        let results = reader.feed(&buffer)?;
        if results.is_empty() {
            continue;
        }
        lines.clear();
        for result in &results {
            lines.extend_from_slice(result.as_bytes());
            lines.extend_from_slice(&[SEPARATOR]);
        }
        sink.write_all(&lines).await.map_err(Error::Storage)?;
    }

    sink.flush().await.map_err(Error::Storage)?;
    Ok(reader.records())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Address, ServerConfig};
    use crate::error::ProtocolViolation;
    use crate::score::{score, Score};
    use crate::server::Server;
    use std::path::PathBuf;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_receive_results_across_reads() {
        let transport = Builder::new()
            .read(b"ab cd : 6.00\nx y")
            .read(b" : 3.00\n")
            .read(b"*")
            .build();
        let mut sink = Vec::new();
        let count = receive_results(transport, &mut sink, 64).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(sink, b"ab cd : 6.00\nx y : 3.00\n");
    }

    #[tokio::test]
    async fn test_receive_results_coalesced_sentinel() {
        let transport = Builder::new().read(b"ab cd : 6.00*").build();
        let mut sink = Vec::new();
        let count = receive_results(transport, &mut sink, 64).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(sink, b"ab cd : 6.00\n");
    }

    #[tokio::test]
    async fn test_receive_results_premature_close() {
        let transport = Builder::new().read(b"ab cd : 6.00\n").build();
        let mut sink = Vec::new();
        let err = receive_results(transport, &mut sink, 64).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolViolation::PrematureClose { pending: 0 })
        ));
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "chainscore-{name}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn start_server() -> (
        u16,
        tokio::sync::oneshot::Sender<()>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let server = Server::bind(ServerConfig {
            listen: Address {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            buffer_size: 4096,
            max_connections: 4,
            log_file: "unused.log".into(),
            console: false,
        })
        .await
        .unwrap();
        let port = server.local_addr().unwrap().port();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));
        (port, stop_tx, handle)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_full_session_against_server() {
        let (port, stop_tx, server) = start_server().await;

        let dir = scratch_dir("session");
        let config = ClientConfig {
            address: Address {
                host: "127.0.0.1".to_string(),
                port,
            },
            chains: 2_500,
            chunk_size: 300,
            workers: 4,
            chains_file: dir.join("chains.txt"),
            results_file: dir.join("results.txt"),
            buffer_size: 1024,
            seed: Some(11),
        };

        let report = run(&config).await.unwrap();
        assert_eq!(report.chains_sent, 2_500);

        let chains = std::fs::read_to_string(&config.chains_file).unwrap();
        let results = std::fs::read_to_string(&config.results_file).unwrap();
        assert_eq!(chains.lines().count(), 2_500);

        // Results are exactly the valid chains, in order, with their weights.
        let expected: Vec<String> = chains
            .lines()
            .filter_map(|chain| match score(chain) {
                Score::Valid(weight) => Some(crate::score::result_line(chain, weight)),
                Score::Invalid(_) => None,
            })
            .collect();
        let received: Vec<&str> = results.lines().collect();
        assert_eq!(received, expected);
        assert_eq!(report.results_received, expected.len() as u64);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_storage_failure_ends_session() {
        let (port, stop_tx, server) = start_server().await;

        let dir = scratch_dir("full-disk");
        let config = ClientConfig {
            address: Address {
                host: "127.0.0.1".to_string(),
                port,
            },
            // Far more results than the socket buffers hold.
            chains: 200_000,
            chunk_size: 10_000,
            workers: 4,
            chains_file: dir.join("chains.txt"),
            results_file: PathBuf::from("/dev/full"),
            buffer_size: 1024,
            seed: Some(5),
        };

        let outcome = tokio::time::timeout(Duration::from_secs(20), run(&config))
            .await
            .expect("client must not stall when the receiver fails");
        assert!(matches!(outcome, Err(Error::Storage(_))), "{outcome:?}");

        // The server sees the session end and shuts down cleanly.
        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(20), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
