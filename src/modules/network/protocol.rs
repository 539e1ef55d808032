//! Codec for the block read protocol.
//!
//! The protocol is a single request/response exchange per stream:
//!
//! ```text
//! client → server: <binary content id>     (self-delimiting)
//! server → client: <raw bytes of the block>
//! server closes write; client reads to EOF
//! ```
//!
//! There is no framing beyond the id prefix on the request and EOF on the
//! response: the id's varint prefixes (version, codec, hash algorithm, hash
//! length) determine exactly how many bytes remain to be read.

use async_trait::async_trait;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::StreamProtocol;
use libp2p::request_response::Codec;
use std::io;
use tracing::{trace, warn};

use crate::modules::storage::block::ContentId;

/// Protocol identifier for reading a block from a remote peer.
pub const BLOCK_READ_PROTOCOL: &str = "/blockstorage/block/read/1.0.0";

/// Maximum accepted response size (16 MB).
pub const MAX_RESPONSE_SIZE: u64 = 16 * 1024 * 1024;

/// Longest accepted digest length in a request id.
const MAX_DIGEST_SIZE: u64 = 128;

/// The protocol as a libp2p StreamProtocol.
pub fn stream_protocol() -> StreamProtocol {
    StreamProtocol::new(BLOCK_READ_PROTOCOL)
}

/// Read one unsigned varint, echoing the consumed bytes into `raw`.
async fn read_varint<T>(io: &mut T, raw: &mut Vec<u8>) -> io::Result<u64>
where
    T: AsyncRead + Unpin + Send,
{
    let mut value: u64 = 0;
    let mut shift = 0u32;

    loop {
        let mut byte = [0u8; 1];
        io.read_exact(&mut byte).await?;
        raw.push(byte[0]);

        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }

        shift += 7;
        if shift >= 63 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint too long",
            ));
        }
    }
}

/// Read a self-delimiting binary content id from the stream.
///
/// Consumes the CIDv1 prefix varints (version, codec, hash algorithm, hash
/// length) and then exactly the announced digest bytes.
pub async fn read_content_id<T>(io: &mut T) -> io::Result<ContentId>
where
    T: AsyncRead + Unpin + Send,
{
    let mut raw = Vec::with_capacity(40);

    let version = read_varint(io, &mut raw).await?;
    if version != 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported cid version: {}", version),
        ));
    }

    let _codec = read_varint(io, &mut raw).await?;
    let _hash_algo = read_varint(io, &mut raw).await?;
    let digest_len = read_varint(io, &mut raw).await?;

    if digest_len > MAX_DIGEST_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("digest length {} exceeds limit", digest_len),
        ));
    }

    let prefix_len = raw.len();
    raw.resize(prefix_len + digest_len as usize, 0);
    io.read_exact(&mut raw[prefix_len..]).await?;

    trace!(bytes = raw.len(), "Read binary content id from stream");

    ContentId::from_bytes(&raw).map_err(|e| {
        warn!(error = %e, "Failed to parse content id from stream");
        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
    })
}

/// Codec for the block read protocol.
///
/// Requests are binary content ids; responses are the raw stored bytes,
/// delimited by the responder closing its write side.
#[derive(Debug, Clone, Default)]
pub struct BlockReadCodec;

#[async_trait]
impl Codec for BlockReadCodec {
    type Protocol = StreamProtocol;
    type Request = ContentId;
    type Response = Vec<u8>;

    async fn read_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_content_id(io).await
    }

    async fn read_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut data = Vec::new();
        io.take(MAX_RESPONSE_SIZE).read_to_end(&mut data).await?;

        trace!(bytes = data.len(), "Read block response");
        Ok(data)
    }

    async fn write_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.write_all(&req.to_bytes()).await?;
        io.flush().await
    }

    async fn write_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        res: Self::Response,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.write_all(&res).await?;
        io.flush().await
    }
}
