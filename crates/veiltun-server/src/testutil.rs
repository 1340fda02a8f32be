//! In-memory frame channel for driving sessions and pumps in tests.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::sync::mpsc;

/// Generous idle timeout for tests that should never hit it.
pub const IDLE: Duration = Duration::from_secs(30);

/// Build a connected (channel, remote) pair. The channel side satisfies
/// `FrameChannel` and is handed to the code under test; the remote side
/// plays the tunnel client.
pub fn frame_channel() -> (TestChannel, TestRemote) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        TestChannel {
            incoming: in_rx,
            outgoing: out_tx,
            closed: closed.clone(),
        },
        TestRemote {
            incoming: Some(in_tx),
            outgoing: out_rx,
            closed,
        },
    )
}

/// The server-facing half: a frame channel backed by queues.
pub struct TestChannel {
    incoming: mpsc::UnboundedReceiver<io::Result<Bytes>>,
    outgoing: mpsc::UnboundedSender<Bytes>,
    closed: Arc<AtomicBool>,
}

impl Stream for TestChannel {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.incoming.poll_recv(cx)
    }
}

impl Sink<Bytes> for TestChannel {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.closed.load(Ordering::Acquire) {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.outgoing
            .send(item)
            .map_err(|_| io::ErrorKind::BrokenPipe.into())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.closed.store(true, Ordering::Release);
        Poll::Ready(Ok(()))
    }
}

/// The client-facing half.
pub struct TestRemote {
    incoming: Option<mpsc::UnboundedSender<io::Result<Bytes>>>,
    outgoing: mpsc::UnboundedReceiver<Bytes>,
    closed: Arc<AtomicBool>,
}

impl TestRemote {
    /// Queue a frame for the channel to receive.
    pub fn push_frame(&mut self, data: &[u8]) {
        if let Some(tx) = &self.incoming {
            let _ = tx.send(Ok(Bytes::copy_from_slice(data)));
        }
    }

    /// Queue a transport error.
    pub fn push_error(&mut self, err: io::Error) {
        if let Some(tx) = &self.incoming {
            let _ = tx.send(Err(err));
        }
    }

    /// Close the inbound direction (the channel sees end-of-stream).
    pub fn finish(&mut self) {
        self.incoming.take();
    }

    /// Next frame the server sent, or `None` once the channel is gone.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        self.outgoing.recv().await
    }

    /// Whether the server closed the channel.
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until the server closes the channel.
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.closed() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.closed()
    }
}
