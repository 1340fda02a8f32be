//! Frame-level bidirectional relay.
//!
//! One pump drives one session while it is in the relaying phase. Inbound
//! frames are written verbatim to the upstream socket; every chunk read from
//! upstream leaves as exactly one inbound frame. There is no buffering and
//! no backpressure across the two sides: once an endpoint is gone, traffic
//! headed for it is dropped and the pump reports why it stopped. Teardown of
//! the surviving endpoint is the caller's job and happens immediately.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, Instant};
use veiltun_core::transport::FrameChannel;
use veiltun_metrics::{record_bytes_inbound, record_bytes_outbound};

/// How a relay ended. Decides which endpoint the session still has to
/// tear down.
#[derive(Debug)]
pub enum PumpEnd {
    /// Inbound channel closed by the peer.
    InboundClosed,
    /// Inbound channel failed.
    InboundError(io::Error),
    /// Upstream socket reached EOF or stopped accepting writes.
    UpstreamClosed,
    /// Upstream socket failed.
    UpstreamError(io::Error),
    /// No data moved in either direction for the idle window.
    IdleTimeout,
}

impl PumpEnd {
    /// Stable label for logging and the teardown-cause metric.
    pub fn cause(&self) -> &'static str {
        match self {
            PumpEnd::InboundClosed => "inbound_closed",
            PumpEnd::InboundError(_) => "inbound_error",
            PumpEnd::UpstreamClosed => "upstream_closed",
            PumpEnd::UpstreamError(_) => "upstream_error",
            PumpEnd::IdleTimeout => "idle_timeout",
        }
    }
}

/// Forward frames and bytes in both directions until either side goes down
/// or the idle timer fires.
///
/// Per-session ordering holds by construction: a single task alternates
/// between the two directions, so inbound frames reach upstream in arrival
/// order and upstream chunks reach the channel unreordered and unduplicated.
pub async fn pump<C, U>(
    channel: &mut C,
    upstream: &mut U,
    idle_timeout: Duration,
    buffer_size: usize,
) -> PumpEnd
where
    C: FrameChannel,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let idle = sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            frame = channel.next() => match frame {
                Some(Ok(frame)) => {
                    if upstream.write_all(&frame).await.is_err() {
                        // Upstream already closing: the frame is dropped,
                        // nothing is signalled back to the sender.
                        return PumpEnd::UpstreamClosed;
                    }
                    record_bytes_inbound(frame.len() as u64);
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                }
                Some(Err(err)) => return PumpEnd::InboundError(err),
                None => return PumpEnd::InboundClosed,
            },
            read = upstream.read(&mut buf) => match read {
                Ok(0) => return PumpEnd::UpstreamClosed,
                Ok(n) => {
                    if channel.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        // Inbound already closing: the chunk is dropped.
                        return PumpEnd::InboundClosed;
                    }
                    record_bytes_outbound(n as u64);
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                }
                Err(err) => return PumpEnd::UpstreamError(err),
            },
            () = &mut idle => return PumpEnd::IdleTimeout,
        }
    }
}
