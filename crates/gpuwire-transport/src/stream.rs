//! Bridge between memory channels and an async byte stream.
//!
//! Lets the two endpoints of a session live on opposite sides of any
//! `AsyncRead`/`AsyncWrite` pair (pipe, socket, `tokio::io::duplex`).
//! Framing is preserved: the receiving side only ever hands whole records
//! to its channel, so the decoder's "complete records only" guarantee holds
//! across the stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use gpuwire_protocol::wire::{self, HEADER_SIZE};

use crate::channel::{ChannelSink, ChannelSource};
use crate::error::TransportError;

/// Forward every flushed batch waiting in `source` to `io`.
/// Returns the number of bytes forwarded.
pub async fn forward<S, W>(source: &mut S, io: &mut W) -> Result<usize, TransportError>
where
    S: ChannelSource,
    W: AsyncWrite + Unpin,
{
    let mut total = 0;
    while let Some(batch) = source.poll_incoming()? {
        io.write_all(&batch).await?;
        total += batch.len();
    }
    io.flush().await?;
    if total > 0 {
        debug!(bytes = total, "forwarded to stream");
    }
    Ok(total)
}

/// Read one complete record from `io` and append it to `sink` without
/// flushing. Returns the record's size on the wire.
pub async fn read_record<R, K>(io: &mut R, sink: &mut K) -> Result<usize, TransportError>
where
    R: AsyncRead + Unpin,
    K: ChannelSink,
{
    let mut header = [0u8; HEADER_SIZE];
    if let Err(e) = io.read_exact(&mut header).await {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(e),
        });
    }
    let parsed = wire::decode_header(&header)?;

    let total = HEADER_SIZE + parsed.length as usize;
    let mut record = Vec::with_capacity(total);
    record.extend_from_slice(&header);
    record.resize(total, 0);
    io.read_exact(&mut record[HEADER_SIZE..]).await?;

    sink.write(&record)?;
    Ok(total)
}

/// Read records from `io` until `bytes` have been consumed, then flush
/// them to the peer as one batch.
pub async fn receive<R, K>(io: &mut R, sink: &mut K, bytes: usize) -> Result<usize, TransportError>
where
    R: AsyncRead + Unpin,
    K: ChannelSink,
{
    let mut consumed = 0;
    while consumed < bytes {
        consumed += read_record(io, sink).await?;
    }
    sink.flush()?;
    Ok(consumed)
}
