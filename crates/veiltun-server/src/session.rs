//! Per-connection tunnel session.
//!
//! One session exists per accepted inbound connection and owns the upstream
//! socket for its whole lifetime. The session is a straight-line state
//! machine over its frame channel:
//!
//! ```text
//! AwaitingHeader --decode ok--> Connecting --connect ok--> Relaying --> Closed
//!       |                           |                          |
//!       +--------decode fails-------+------connect fails-------+--> Closed
//! ```
//!
//! States never repeat and the handshake is decoded at most once, no matter
//! how many frames arrive afterwards.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use veiltun_core::transport::FrameChannel;
use veiltun_metrics::{record_bytes_inbound, record_handshake_failure, record_relay_teardown};
use veiltun_proto::{decode, encode_ack, DecodeError};

use crate::error::ServerError;
use crate::pump::{pump, PumpEnd};
use crate::state::ServerState;
use crate::upstream;

/// Session lifecycle states. Ordered: transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    AwaitingHeader,
    Connecting,
    Relaying,
    Closed,
}

/// A single tunnel session, generic over the inbound frame channel.
pub struct TunnelSession<C> {
    channel: C,
    state: SessionState,
    shared: Arc<ServerState>,
    peer: SocketAddr,
}

impl<C: FrameChannel> TunnelSession<C> {
    pub fn new(channel: C, shared: Arc<ServerState>, peer: SocketAddr) -> Self {
        Self {
            channel,
            state: SessionState::AwaitingHeader,
            shared,
            peer,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(self.state < next, "session state must move forward");
        trace!(peer = %self.peer, from = ?self.state, to = ?next, "session transition");
        self.state = next;
    }

    async fn close_channel(&mut self) {
        let _ = self.channel.close().await;
    }

    /// Drive the session to completion.
    ///
    /// Consumes the session; every exit path leaves both endpoints closed
    /// and the upstream socket (if one was ever opened) released.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let first = match self.channel.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                self.transition(SessionState::Closed);
                return Err(ServerError::Transport(err));
            }
            None => {
                // Peer went away before saying anything.
                self.transition(SessionState::Closed);
                return Ok(());
            }
        };

        // The one and only decode for this session.
        let request = match decode(&first) {
            Ok(request) => request,
            Err(err) => {
                record_handshake_failure(failure_reason(&err));
                self.close_channel().await;
                self.transition(SessionState::Closed);
                return Err(ServerError::Handshake(err));
            }
        };
        if request.client_id != *self.shared.client_id.as_bytes() {
            // The identifier is not authenticated; observed protocol
            // behavior opens the tunnel regardless. Logged so operators can
            // see foreign ids, nothing more.
            debug!(peer = %self.peer, "handshake identifier differs from configured id (not enforced)");
        }
        debug!(
            peer = %self.peer,
            target = %request.address,
            port = request.port,
            version = request.version,
            "handshake decoded"
        );

        self.transition(SessionState::Connecting);
        let mut upstream = match upstream::connect(&request, &self.shared).await {
            Ok(stream) => stream,
            Err(err) => {
                self.close_channel().await;
                self.transition(SessionState::Closed);
                return Err(err);
            }
        };

        // The ack is the first thing ever sent on the inbound channel.
        let ack = encode_ack(request.version);
        if let Err(err) = self.channel.send(Bytes::copy_from_slice(&ack)).await {
            self.transition(SessionState::Closed);
            return Err(ServerError::Transport(err));
        }

        // Payload that rode in with the handshake goes upstream before any
        // later frame is looked at.
        let residual = &first[request.payload_offset..];
        if !residual.is_empty() {
            if let Err(err) = upstream.write_all(residual).await {
                self.close_channel().await;
                self.transition(SessionState::Closed);
                return Err(ServerError::Io(err));
            }
            record_bytes_inbound(residual.len() as u64);
        }

        self.transition(SessionState::Relaying);
        let end = pump(
            &mut self.channel,
            &mut upstream,
            self.shared.idle_timeout,
            self.shared.relay_buffer_size,
        )
        .await;
        record_relay_teardown(end.cause());
        debug!(peer = %self.peer, cause = end.cause(), "relay finished");

        // Teardown coupling: release the upstream socket, then close the
        // inbound channel if it was the survivor. Unconditional, no drain.
        drop(upstream);
        match end {
            PumpEnd::InboundClosed | PumpEnd::InboundError(_) => {}
            PumpEnd::UpstreamClosed | PumpEnd::UpstreamError(_) | PumpEnd::IdleTimeout => {
                self.close_channel().await;
            }
        }
        self.transition(SessionState::Closed);
        Ok(())
    }
}

fn failure_reason(err: &DecodeError) -> &'static str {
    match err {
        DecodeError::HeaderTooShort => "header_too_short",
        DecodeError::UnsupportedCommand(_) => "unsupported_command",
        DecodeError::UnknownAddressType(_) => "unknown_address_type",
    }
}
