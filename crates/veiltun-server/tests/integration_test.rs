//! Integration tests for veiltun-server.
//!
//! These tests run the real server against a real WebSocket client and a
//! mock echo upstream, covering the complete flow: HTTP inspection, upgrade,
//! handshake decode, acknowledgment, relay and teardown.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;
use veiltun_config::{
    Config, DiscoveryConfig, LoggingConfig, MetricsConfig, ServerConfig, WebSocketConfig,
};
use veiltun_proto::{encode_request, AddressSpec, CLIENT_ID_LEN};
use veiltun_server::{CancellationToken, Server};

const CLIENT_ID: &str = "d342d11e-d424-4f6a-b093-93956c17dc4b";

// ============================================================================
// Test Helpers
// ============================================================================

/// A TCP server that echoes back whatever it receives.
async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut sock, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if sock.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

fn test_config(destination: Option<String>) -> Config {
    Config {
        server: ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            client_id: Uuid::parse_str(CLIENT_ID).unwrap(),
            destination,
            connect_timeout_secs: 5,
            idle_timeout_secs: 60,
            max_header_bytes: 8192,
            max_connections: None,
            resource_limits: None,
        },
        websocket: WebSocketConfig {
            path: "/tunnel".to_string(),
            host: None,
            max_frame_bytes: 1 << 20,
        },
        discovery: DiscoveryConfig {
            enabled: true,
            path: "/sub".to_string(),
            advertise_host: None,
        },
        metrics: MetricsConfig::default(),
        logging: LoggingConfig::default(),
    }
}

/// Bind and spawn the server, returning its address and shutdown token.
fn start_server(config: Config) -> (SocketAddr, CancellationToken) {
    let server = Server::bind(&config).unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        server.run(token).await.unwrap();
    });
    (addr, shutdown)
}

fn handshake_frame(target: SocketAddr, version: u8, payload: &[u8]) -> Vec<u8> {
    let octets = match target {
        SocketAddr::V4(v4) => v4.ip().octets(),
        SocketAddr::V6(_) => panic!("test upstream must be IPv4"),
    };
    encode_request(
        version,
        Uuid::parse_str(CLIENT_ID).unwrap().as_bytes(),
        &[],
        &AddressSpec::Ipv4(octets),
        target.port(),
        payload,
    )
    .unwrap()
}

/// Next binary frame from the server, or `None` once the connection closes.
async fn next_binary(
    ws: &mut (impl futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
          + Unpin),
) -> Option<Vec<u8>> {
    loop {
        match ws.next().await? {
            Ok(Message::Binary(data)) => return Some(data),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(other) => panic!("unexpected message: {other:?}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn tunnel_roundtrip_with_early_payload() {
    let upstream = start_echo_server().await;
    let (addr, shutdown) = start_server(test_config(None));

    let (mut ws, _) = connect_async(format!("ws://{addr}/tunnel")).await.unwrap();
    ws.send(Message::Binary(handshake_frame(upstream, 0, b"early")))
        .await
        .unwrap();

    // The ack frame comes first, exactly [version, 0].
    let ack = next_binary(&mut ws).await.expect("ack");
    assert_eq!(ack, vec![0, 0]);

    // The payload that rode in with the handshake was forwarded and echoed.
    let echoed = next_binary(&mut ws).await.expect("echo");
    assert_eq!(echoed, b"early");

    // Subsequent frames keep flowing.
    ws.send(Message::Binary(b"more data".to_vec())).await.unwrap();
    let echoed = next_binary(&mut ws).await.expect("echo 2");
    assert_eq!(echoed, b"more data");

    ws.close(None).await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn ack_echoes_nonzero_version() {
    let upstream = start_echo_server().await;
    let (addr, shutdown) = start_server(test_config(None));

    let (mut ws, _) = connect_async(format!("ws://{addr}/tunnel")).await.unwrap();
    ws.send(Message::Binary(handshake_frame(upstream, 7, b"")))
        .await
        .unwrap();

    let ack = next_binary(&mut ws).await.expect("ack");
    assert_eq!(ack, vec![7, 0]);

    ws.close(None).await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn unsupported_command_closes_without_ack() {
    let upstream = start_echo_server().await;
    let (addr, shutdown) = start_server(test_config(None));

    let (mut ws, _) = connect_async(format!("ws://{addr}/tunnel")).await.unwrap();
    let mut frame = handshake_frame(upstream, 0, b"");
    frame[17 + 1] = 0x02; // command byte, no addons
    ws.send(Message::Binary(frame)).await.unwrap();

    // No ack, just a close.
    assert!(next_binary(&mut ws).await.is_none());
    shutdown.cancel();
}

#[tokio::test]
async fn upstream_close_propagates_to_client() {
    // An upstream that answers once, then hangs up.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let n = sock.read(&mut buf).await.unwrap();
        sock.write_all(&buf[..n]).await.unwrap();
    });

    let (addr, shutdown) = start_server(test_config(None));
    let (mut ws, _) = connect_async(format!("ws://{addr}/tunnel")).await.unwrap();
    ws.send(Message::Binary(handshake_frame(upstream, 0, b"ping")))
        .await
        .unwrap();

    assert_eq!(next_binary(&mut ws).await.unwrap(), vec![0, 0]);
    assert_eq!(next_binary(&mut ws).await.unwrap(), b"ping");
    // The hangup reaches the client as a close, with no client-side action.
    assert!(next_binary(&mut ws).await.is_none());
    shutdown.cancel();
}

#[tokio::test]
async fn connect_failure_closes_connection() {
    // Bind-then-drop to get a dead port.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let (addr, shutdown) = start_server(test_config(None));
    let (mut ws, _) = connect_async(format!("ws://{addr}/tunnel")).await.unwrap();
    ws.send(Message::Binary(handshake_frame(dead_addr, 0, b"")))
        .await
        .unwrap();

    assert!(next_binary(&mut ws).await.is_none());
    shutdown.cancel();
}

#[tokio::test]
async fn destination_override_wins() {
    let upstream = start_echo_server().await;
    let (addr, shutdown) =
        start_server(test_config(Some(upstream.ip().to_string())));

    let (mut ws, _) = connect_async(format!("ws://{addr}/tunnel")).await.unwrap();
    // The decoded host is unreachable nonsense; only the override works.
    let frame = encode_request(
        0,
        Uuid::parse_str(CLIENT_ID).unwrap().as_bytes(),
        &[],
        &AddressSpec::Domain("does-not-exist.invalid".to_string()),
        upstream.port(),
        b"via override",
    )
    .unwrap();
    ws.send(Message::Binary(frame)).await.unwrap();

    assert_eq!(next_binary(&mut ws).await.unwrap(), vec![0, 0]);
    assert_eq!(next_binary(&mut ws).await.unwrap(), b"via override");

    ws.close(None).await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn discovery_endpoint_serves_descriptor() {
    let (addr, shutdown) = start_server(test_config(None));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /sub HTTP/1.1\r\nHost: tunnel.example.com\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains(&format!("veil://{CLIENT_ID}@tunnel.example.com")));
    assert!(response.contains("path=%2Ftunnel"));
    shutdown.cancel();
}

#[tokio::test]
async fn unknown_path_gets_404() {
    let (addr, shutdown) = start_server(test_config(None));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /definitely-not-here HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
    shutdown.cancel();
}

#[tokio::test]
async fn upgrade_on_wrong_path_rejected() {
    let (addr, shutdown) = start_server(test_config(None));
    let result = connect_async(format!("ws://{addr}/elsewhere")).await;
    assert!(result.is_err());
    shutdown.cancel();
}

#[tokio::test]
async fn sessions_are_independent() {
    let upstream = start_echo_server().await;
    let (addr, shutdown) = start_server(test_config(None));

    let (mut ws_a, _) = connect_async(format!("ws://{addr}/tunnel")).await.unwrap();
    let (mut ws_b, _) = connect_async(format!("ws://{addr}/tunnel")).await.unwrap();

    ws_a.send(Message::Binary(handshake_frame(upstream, 1, b"from a")))
        .await
        .unwrap();
    ws_b.send(Message::Binary(handshake_frame(upstream, 2, b"from b")))
        .await
        .unwrap();

    assert_eq!(next_binary(&mut ws_a).await.unwrap(), vec![1, 0]);
    assert_eq!(next_binary(&mut ws_b).await.unwrap(), vec![2, 0]);
    assert_eq!(next_binary(&mut ws_a).await.unwrap(), b"from a");
    assert_eq!(next_binary(&mut ws_b).await.unwrap(), b"from b");

    // Killing one session leaves the other flowing.
    ws_a.close(None).await.unwrap();
    ws_b.send(Message::Binary(b"still here".to_vec())).await.unwrap();
    assert_eq!(next_binary(&mut ws_b).await.unwrap(), b"still here");

    ws_b.close(None).await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn graceful_shutdown_stops_accepting() {
    let (addr, shutdown) = start_server(test_config(None));
    shutdown.cancel();
    // Give the accept loop a moment to wind down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let result = TcpStream::connect(addr).await;
    // Either refused outright or accepted by a dying listener that never
    // upgrades; the WebSocket handshake must fail in any case.
    if result.is_ok() {
        let err = connect_async(format!("ws://{addr}/tunnel")).await;
        assert!(err.is_err());
    }
}
