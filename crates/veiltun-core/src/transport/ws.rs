//! WebSocket frame-channel adapter.
//!
//! `WsFrames` wraps a `WebSocketStream` and exposes it as a channel of
//! binary frames: each received binary (or text) message surfaces as one
//! `Bytes` item, and each item sent leaves as exactly one binary message.
//! Ping frames are answered inline, pong frames are skipped, and a close
//! frame (or the peer vanishing) ends the stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};

/// Frame-level adapter over a server-side WebSocket stream.
pub struct WsFrames<S> {
    ws: WebSocketStream<S>,
}

impl<S> WsFrames<S> {
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }

    /// Consumes the adapter and returns the underlying WebSocket stream.
    pub fn into_inner(self) -> WebSocketStream<S> {
        self.ws
    }
}

impl<S> Stream for WsFrames<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.ws).poll_next(cx) {
                Poll::Ready(Some(Ok(msg))) => match msg {
                    Message::Binary(data) => return Poll::Ready(Some(Ok(Bytes::from(data)))),
                    Message::Text(text) => {
                        // Text frames carry tunnel bytes all the same.
                        return Poll::Ready(Some(Ok(Bytes::from(text.into_bytes()))));
                    }
                    Message::Ping(payload) => {
                        let mut ws = Pin::new(&mut self.ws);
                        match ws.as_mut().poll_ready(cx) {
                            Poll::Ready(Ok(())) => {
                                if let Err(err) = ws.start_send(Message::Pong(payload)) {
                                    return Poll::Ready(Some(Err(ws_err(err))));
                                }
                                continue;
                            }
                            Poll::Ready(Err(err)) => {
                                return Poll::Ready(Some(Err(ws_err(err))));
                            }
                            Poll::Pending => return Poll::Pending,
                        }
                    }
                    Message::Pong(_) | Message::Frame(_) => continue,
                    Message::Close(_) => return Poll::Ready(None),
                },
                Poll::Ready(Some(Err(WsError::ConnectionClosed))) => return Poll::Ready(None),
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(ws_err(err)))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> Sink<Bytes> for WsFrames<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = io::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.ws).poll_ready(cx).map_err(ws_err)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Bytes) -> io::Result<()> {
        Pin::new(&mut self.ws)
            .start_send(Message::Binary(item.to_vec()))
            .map_err(ws_err)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.ws).poll_flush(cx).map_err(ws_err)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match Pin::new(&mut self.ws).poll_close(cx) {
            // Closing an already-closed socket is not an event.
            Poll::Ready(Err(WsError::ConnectionClosed)) => Poll::Ready(Ok(())),
            other => other.map_err(ws_err),
        }
    }
}

fn ws_err(err: WsError) -> io::Error {
    io::Error::other(err)
}
