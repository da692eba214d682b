//! Parallel chain generation with ordered output.
//!
//! A request for `total` chains is cut into chunks of at most `chunk_size`.
//! Up to `workers` chunks are generated concurrently on the blocking pool,
//! but completed chunks are always drained in dispatch order, so the
//! emitted stream does not depend on the pool width.

use crate::chain::{generate_chains, Chain};
use crate::config::ConfigError;
use crate::error::Result;
use crate::frame::FrameWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What to generate and how wide to fan out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    total: u64,
    chunk_size: usize,
    workers: usize,
    seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(total: u64, chunk_size: usize, workers: usize) -> Result<Self, ConfigError> {
        if total == 0 {
            return Err(ConfigError::NotPositive("chains"));
        }
        if chunk_size == 0 {
            return Err(ConfigError::NotPositive("chunk_size"));
        }
        if workers == 0 {
            return Err(ConfigError::NotPositive("workers"));
        }
        Ok(Self {
            total,
            chunk_size,
            workers,
            seed: None,
        })
    }

    /// Make generation reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Chunk sizes in dispatch order: full chunks, then one remainder chunk.
    pub fn chunk_sizes(&self) -> ChunkSizes {
        ChunkSizes {
            remaining: self.total,
            chunk_size: self.chunk_size as u64,
        }
    }
}

/// Iterator over chunk sizes; see [`GenerationRequest::chunk_sizes`].
#[derive(Debug, Clone)]
pub struct ChunkSizes {
    remaining: u64,
    chunk_size: u64,
}

impl Iterator for ChunkSizes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let size = self.remaining.min(self.chunk_size);
        self.remaining -= size;
        Some(size as usize)
    }
}

/// Totals of a completed generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSummary {
    pub chunks: u64,
    pub chains: u64,
}

/// Generate one chunk from its own seed.
fn generate_chunk(size: usize, seed: u64) -> Vec<Chain> {
    let mut rng = StdRng::seed_from_u64(seed);
    generate_chains(size, &mut rng)
}

/// Generate everything `request` asks for and write it through `writer`,
/// chunk by chunk, in dispatch order.
pub async fn run<T, S>(
    request: &GenerationRequest,
    writer: &mut FrameWriter<T, S>,
) -> Result<GenerationSummary>
where
    T: AsyncWrite + Unpin,
    S: AsyncWrite + Unpin,
{
    let seed = request.seed.unwrap_or_else(|| rand::rng().random());
    // Per-chunk seeds are drawn in dispatch order.
    let mut seeds = StdRng::seed_from_u64(seed);

    info!(
        total = request.total,
        chunk_size = request.chunk_size,
        workers = request.workers,
        seed,
        "Starting chain generation"
    );

    let mut sizes = request.chunk_sizes();
    let mut in_flight: VecDeque<JoinHandle<Vec<Chain>>> =
        VecDeque::with_capacity(request.workers);
    let mut summary = GenerationSummary {
        chunks: 0,
        chains: 0,
    };

    loop {
        while in_flight.len() < request.workers {
            let Some(size) = sizes.next() else { break };
            let chunk_seed: u64 = seeds.random();
            in_flight.push_back(tokio::task::spawn_blocking(move || {
                generate_chunk(size, chunk_seed)
            }));
        }

        let Some(handle) = in_flight.pop_front() else {
            break;
        };
        let chunk = handle.await?;
        writer.write_batch(&chunk).await?;

        summary.chunks += 1;
        summary.chains += chunk.len() as u64;
        debug!(chunk = summary.chunks, size = chunk.len(), "Chunk emitted");
    }

    info!(
        chunks = summary.chunks,
        chains = summary.chains,
        "Chain generation complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(matches!(
            GenerationRequest::new(0, 10, 1),
            Err(ConfigError::NotPositive("chains"))
        ));
        assert!(matches!(
            GenerationRequest::new(10, 0, 1),
            Err(ConfigError::NotPositive("chunk_size"))
        ));
        assert!(matches!(
            GenerationRequest::new(10, 10, 0),
            Err(ConfigError::NotPositive("workers"))
        ));
    }

    #[test]
    fn test_chunk_sizes() {
        let sizes = |n, c| -> Vec<usize> {
            GenerationRequest::new(n, c, 4)
                .unwrap()
                .chunk_sizes()
                .collect()
        };
        assert_eq!(sizes(25, 10), vec![10, 10, 5]);
        assert_eq!(sizes(30, 10), vec![10, 10, 10]);
        assert_eq!(sizes(7, 10), vec![7]);
        assert_eq!(sizes(10, 10), vec![10]);
        assert_eq!(sizes(1, 1), vec![1]);
    }

    #[test]
    fn test_chunk_sizes_sum_to_total() {
        for (n, c) in [(1_000_003u64, 10_000usize), (99, 7), (12, 5), (5, 12)] {
            let request = GenerationRequest::new(n, c, 3).unwrap();
            let sizes: Vec<usize> = request.chunk_sizes().collect();
            assert!(sizes.iter().all(|&s| s > 0 && s <= c));
            assert_eq!(sizes.iter().map(|&s| s as u64).sum::<u64>(), n);
        }
    }

    async fn generate(total: u64, chunk_size: usize, workers: usize, seed: u64) -> Vec<u8> {
        let request = GenerationRequest::new(total, chunk_size, workers)
            .unwrap()
            .with_seed(seed);
        let mut writer = FrameWriter::with_storage(Vec::new(), Vec::new());
        let summary = run(&request, &mut writer).await.unwrap();
        assert_eq!(summary.chains, total);

        let (transport, storage) = writer.finish().await.unwrap();
        let mut expected = storage.clone();
        expected.extend_from_slice(crate::frame::SENTINEL);
        assert_eq!(transport, expected);
        storage
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_output_independent_of_pool_width() {
        let sequential = generate(1_234, 100, 1, 7).await;
        for workers in [2, 4, 16] {
            let parallel = generate(1_234, 100, workers, 7).await;
            assert_eq!(parallel, sequential, "workers = {workers}");
        }
    }

    #[tokio::test]
    async fn test_exact_count_emitted() {
        let storage = generate(257, 16, 3, 1).await;
        let text = String::from_utf8(storage).unwrap();
        assert_eq!(text.lines().count(), 257);
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_different_seeds_differ() {
        assert_ne!(generate(10, 5, 2, 1).await, generate(10, 5, 2, 2).await);
    }
}
