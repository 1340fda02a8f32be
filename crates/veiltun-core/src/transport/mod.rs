//! Inbound transport adapters.

mod ws;

pub use ws::WsFrames;

use std::io;

use bytes::Bytes;
use futures_util::{Sink, Stream};

/// The framed duplex inbound channel a tunnel session is driven by.
///
/// Receiving yields whole frames in arrival order; sending emits one frame
/// per item. Dropping the receive side or closing the sink closes the
/// channel. [`WsFrames`] is the production implementation; tests substitute
/// in-memory channels.
pub trait FrameChannel:
    Stream<Item = io::Result<Bytes>> + Sink<Bytes, Error = io::Error> + Unpin + Send
{
}

impl<T> FrameChannel for T where
    T: Stream<Item = io::Result<Bytes>> + Sink<Bytes, Error = io::Error> + Unpin + Send
{
}
