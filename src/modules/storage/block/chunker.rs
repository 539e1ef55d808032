//! Fixed-size chunking of a payload stream.
//!
//! The builder reads the payload through [`fill_chunk`], which fills a
//! `chunk_size` buffer from the reader before emitting it. Every chunk
//! except the last is therefore exactly `chunk_size` bytes long; the last
//! chunk carries whatever non-empty tail preceded EOF. A zero-length chunk
//! is never emitted.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

/// Default leaf chunk size: 512 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 512 << 10;

/// Chunking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Leaf chunk size in bytes.
    pub chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkerConfig {
    /// Configuration with an explicit chunk size.
    pub fn with_size(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Load configuration from environment variables.
    ///
    /// - `BLOCK_CHUNK_SIZE`: leaf chunk size in bytes (default: 524288)
    pub fn from_env() -> Self {
        let chunk_size = std::env::var("BLOCK_CHUNK_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CHUNK_SIZE);

        debug!(chunk_size, "Chunker configured");
        Self { chunk_size }
    }
}

/// Fill `buf` from the reader until it is full or the stream ends.
///
/// Returns the number of bytes placed into `buf`: `buf.len()` for every
/// chunk before the last, `1..buf.len()` for a short terminal chunk, and
/// `0` once the stream is exhausted. Transient short reads are coalesced so
/// chunk boundaries do not depend on how the producer fragments its writes.
pub async fn fill_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Send + Unpin + ?Sized,
{
    let mut filled = 0;

    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
        trace!(read = n, filled, capacity = buf.len(), "Filled chunk bytes");
    }

    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn collect_chunks(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
        let mut reader = Cursor::new(data.to_vec());
        let mut chunks = Vec::new();
        let mut buf = vec![0u8; chunk_size];

        loop {
            let n = fill_chunk(&mut reader, &mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            chunks.push(buf[..n].to_vec());
        }

        chunks
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_chunk() {
        let data = vec![7u8; 40];
        let chunks = collect_chunks(&data, 10).await;

        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() == 10));
    }

    #[tokio::test]
    async fn test_short_tail_emitted_once() {
        let data = vec![1u8; 35];
        let chunks = collect_chunks(&data, 10).await;

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3].len(), 5);
    }

    #[tokio::test]
    async fn test_empty_input_emits_nothing() {
        let chunks = collect_chunks(&[], 10).await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_reconstruction_preserves_order() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let chunks = collect_chunks(&data, 64).await;

        let reconstructed: Vec<u8> = chunks.into_iter().flatten().collect();
        assert_eq!(reconstructed, data);
    }

    #[tokio::test]
    async fn test_fragmented_reads_are_coalesced() {
        // A duplex pipe delivers bytes in the writer's fragments; the fill
        // loop must still produce full-sized chunks.
        let (mut tx, mut rx) = tokio::io::duplex(16);

        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for piece in [&b"abc"[..], b"defgh", b"ij", b"klmnopqrst"] {
                tx.write_all(piece).await.unwrap();
            }
            // tx dropped here closes the pipe
        });

        let mut buf = vec![0u8; 8];
        let mut chunks = Vec::new();
        loop {
            let n = fill_chunk(&mut rx, &mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            chunks.push(buf[..n].to_vec());
        }
        writer.await.unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], b"abcdefgh");
        assert_eq!(chunks[1], b"ijklmnop");
        assert_eq!(chunks[2], b"qrst");
    }

    #[test]
    fn test_default_chunk_size() {
        assert_eq!(ChunkerConfig::default().chunk_size, 512 * 1024);
        assert_eq!(ChunkerConfig::with_size(1024).chunk_size, 1024);
    }
}
