//! Integration tests for vncrelay-server.
//!
//! These tests run the relay in-process against real sockets:
//! - raw TCP relay, including half-close and large transfers
//! - WebSocket upgrade and per-request target selection
//! - session registry bookkeeping and shutdown draining
//! - session limits and startup failures
#![allow(clippy::tests_outside_test_module)]

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener},
    thread,
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use vncrelay_config::{Config, ListenerConfig, Transport, load_config, validate_config};
use vncrelay_server::{
    CancellationToken, CloseReport, Server, ServerError, SessionRegistry, SessionState,
};

// ============================================================================
// Test Helper: Mock upstream servers
// ============================================================================

/// A simple TCP server that echoes back whatever it receives.
struct MockEchoServer {
    addr: SocketAddr,
    _handle: thread::JoinHandle<()>,
}

impl MockEchoServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                });
            }
        });

        Self {
            addr,
            _handle: handle,
        }
    }
}

/// Reads the whole request until EOF, then answers with a fixed reply.
struct MockReplyAfterEofServer {
    addr: SocketAddr,
    _handle: thread::JoinHandle<()>,
}

impl MockReplyAfterEofServer {
    fn start(reply: &'static [u8]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                thread::spawn(move || {
                    let mut request = Vec::new();
                    if stream.read_to_end(&mut request).is_err() {
                        return;
                    }
                    let _ = stream.write_all(reply);
                    let _ = stream.shutdown(std::net::Shutdown::Write);
                });
            }
        });

        Self {
            addr,
            _handle: handle,
        }
    }
}

/// Accepts connections and holds them open without ever reading.
struct MockStalledServer {
    addr: SocketAddr,
    _handle: thread::JoinHandle<()>,
}

impl MockStalledServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });

        Self {
            addr,
            _handle: handle,
        }
    }
}

/// An address nothing listens on.
fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

// ============================================================================
// Test Helper: Relay server
// ============================================================================

struct TestServer {
    addr: SocketAddr,
    registry: SessionRegistry,
    shutdown: CancellationToken,
    handle: JoinHandle<CloseReport>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        validate_config(&config).unwrap();
        let server = Server::bind(&config).await.unwrap();
        let addr = server.local_addrs()[0];
        let registry = server.registry();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));
        Self {
            addr,
            registry,
            shutdown,
            handle,
        }
    }

    async fn tcp(target: SocketAddr) -> Self {
        Self::start(single_listener(target, Transport::Tcp)).await
    }

    async fn stop(self) -> CloseReport {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
    }
}

fn single_listener(target: SocketAddr, transport: Transport) -> Config {
    let mut listener = ListenerConfig::new("127.0.0.1:0", target.to_string());
    listener.transport = transport;
    let mut config = Config::default();
    config.listeners.push(listener);
    config.timeouts.connect_timeout_secs = 2;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

async fn wait_for_len(registry: &SessionRegistry, len: usize) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while registry.len() != len {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "expected {} sessions, registry has {}",
        len,
        registry.len()
    );
}

/// Deterministic pseudo-random payload (xorshift64).
fn blob(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed | 1;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            x as u8
        })
        .collect()
}

// ============================================================================
// TCP relay
// ============================================================================

#[tokio::test]
async fn tcp_relay_echoes_and_unregisters() {
    let echo = MockEchoServer::start();
    let server = TestServer::tcp(echo.addr).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(b"RFB 003.008\n").await.unwrap();
    let mut buf = [0u8; 12];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"RFB 003.008\n");

    wait_for_len(&server.registry, 1).await;
    let sessions = server.registry.list_active();
    assert_eq!(sessions[0].target.to_string(), echo.addr.to_string());

    drop(client);
    assert!(
        server.registry.wait_empty(Duration::from_secs(1)).await,
        "session still registered after client closed"
    );

    let report = server.stop().await;
    assert_eq!(report.requested, 0);
}

#[tokio::test]
async fn tcp_relay_preserves_large_payloads() {
    let echo = MockEchoServer::start();
    let server = TestServer::tcp(echo.addr).await;

    for (i, len) in [1usize, 1500, 64 * 1024, 1024 * 1024].into_iter().enumerate() {
        let payload = blob(len, i as u64 + 7);
        let client = TcpStream::connect(server.addr).await.unwrap();
        let (mut rd, mut wr) = client.into_split();

        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            wr.write_all(&payload).await.unwrap();
            wr
        });
        let mut received = vec![0u8; len];
        rd.read_exact(&mut received).await.unwrap();
        assert!(received == expected, "payload of {} bytes corrupted", len);
        drop(writer.await.unwrap());
    }

    server.stop().await;
}

#[tokio::test]
async fn tcp_relay_delivers_reply_after_client_half_close() {
    let upstream = MockReplyAfterEofServer::start(b"done after eof");
    let server = TestServer::tcp(upstream.addr).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(b"whole request").await.unwrap();
    client.shutdown().await.unwrap();

    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, b"done after eof");

    server.stop().await;
}

#[tokio::test]
async fn unreachable_upstream_closes_client() {
    let server = TestServer::tcp(closed_port()).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf))
        .await
        .unwrap();
    // EOF or reset, but never data.
    if let Ok(n) = read {
        assert_eq!(n, 0);
    }

    assert!(server.registry.wait_empty(Duration::from_secs(2)).await);
    server.stop().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn shutdown_drains_open_sessions() {
    let echo = MockEchoServer::start();
    let server = TestServer::tcp(echo.addr).await;

    let mut clients = Vec::new();
    for i in 0..5u8 {
        let mut client = TcpStream::connect(server.addr).await.unwrap();
        client.write_all(&[i]).await.unwrap();
        let mut b = [0u8; 1];
        client.read_exact(&mut b).await.unwrap();
        assert_eq!(b[0], i);
        clients.push(client);
    }
    wait_for_len(&server.registry, 5).await;

    let registry = server.registry.clone();
    let addr = server.addr;
    let report = server.stop().await;
    assert_eq!(report.requested, 5);
    assert_eq!(report.drained, 5);
    assert_eq!(report.forced, 0);
    assert!(registry.is_empty());

    for mut client in clients {
        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0, "client should see EOF after shutdown");
    }

    // Listener released.
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn close_request_marks_session_closing_while_draining() {
    let upstream = MockStalledServer::start();
    let server = TestServer::tcp(upstream.addr).await;

    // Keep the client→upstream direction stuck mid-write.
    let client = TcpStream::connect(server.addr).await.unwrap();
    let (_client_r, mut client_w) = client.into_split();
    let writer = tokio::spawn(async move {
        let chunk = vec![0u8; 64 * 1024];
        while client_w.write_all(&chunk).await.is_ok() {}
    });

    wait_for_len(&server.registry, 1).await;
    let id = server.registry.list_active()[0].id;
    let relaying = tokio::time::timeout(Duration::from_secs(5), async {
        while server.registry.list_active()[0].state != SessionState::Relaying {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(relaying.is_ok(), "session never started relaying");

    assert!(server.registry.request_close(id));
    let closing = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let sessions = server.registry.list_active();
            if sessions.first().map(|s| s.state) == Some(SessionState::Closing) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(closing.is_ok(), "session not reported as closing during drain");
    assert_eq!(server.registry.len(), 1, "drain is still in progress");

    let report = server.stop().await;
    assert_eq!(report.requested, 1);
    assert_eq!(report.forced, 1);
    writer.await.unwrap();
}

// ============================================================================
// WebSocket
// ============================================================================

#[tokio::test]
async fn websocket_relay_echoes_binary_messages() {
    let echo = MockEchoServer::start();
    let mut config = single_listener(echo.addr, Transport::Websocket);
    config.listeners[0].websocket.path = "/websockify".into();
    let server = TestServer::start(config).await;

    let url = format!("ws://{}/websockify", server.addr);
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    ws.send(Message::Binary(b"RFB 003.008\n".to_vec()))
        .await
        .unwrap();
    let mut received = Vec::new();
    while received.len() < 12 {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => received.extend_from_slice(&data),
            other => panic!("unexpected websocket event: {other:?}"),
        }
    }
    assert_eq!(received, b"RFB 003.008\n");

    ws.close(None).await.unwrap();
    drop(ws);
    assert!(server.registry.wait_empty(Duration::from_secs(2)).await);

    server.stop().await;
}

#[tokio::test]
async fn websocket_query_selects_target() {
    let echo = MockEchoServer::start();
    let mut config = single_listener(closed_port(), Transport::Websocket);
    config.listeners[0].websocket.allow_target_query = true;
    let server = TestServer::start(config).await;

    let url = format!(
        "ws://{}/?ip={}&port={}",
        server.addr,
        echo.addr.ip(),
        echo.addr.port()
    );
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
        Ok(Some(Ok(Message::Binary(data)))) => assert_eq!(data, vec![1, 2, 3]),
        other => panic!("unexpected websocket event: {other:?}"),
    }

    let sessions = server.registry.list_active();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].target.to_string(), echo.addr.to_string());

    drop(ws);
    server.stop().await;
}

#[tokio::test]
async fn websocket_wrong_path_is_rejected() {
    let echo = MockEchoServer::start();
    let mut config = single_listener(echo.addr, Transport::Websocket);
    config.listeners[0].websocket.path = "/websockify".into();
    let server = TestServer::start(config).await;

    let url = format!("ws://{}/elsewhere", server.addr);
    assert!(connect_async(url.as_str()).await.is_err());
    assert!(server.registry.wait_empty(Duration::from_secs(2)).await);

    server.stop().await;
}

// ============================================================================
// Limits and startup
// ============================================================================

#[tokio::test]
async fn max_sessions_rejects_extra_connections() {
    let echo = MockEchoServer::start();
    let mut config = single_listener(echo.addr, Transport::Tcp);
    config.limits.max_sessions = Some(1);
    let server = TestServer::start(config).await;

    let mut first = TcpStream::connect(server.addr).await.unwrap();
    first.write_all(b"a").await.unwrap();
    let mut b = [0u8; 1];
    first.read_exact(&mut b).await.unwrap();

    let mut second = TcpStream::connect(server.addr).await.unwrap();
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), second.read_to_end(&mut buf))
        .await
        .unwrap();
    if let Ok(n) = read {
        assert_eq!(n, 0, "rejected connection must not carry data");
    }
    assert_eq!(server.registry.len(), 1);

    drop(first);
    assert!(server.registry.wait_empty(Duration::from_secs(2)).await);

    // The permit is released with the session.
    let mut third = TcpStream::connect(server.addr).await.unwrap();
    third.write_all(b"c").await.unwrap();
    third.read_exact(&mut b).await.unwrap();
    assert_eq!(&b, b"c");

    server.stop().await;
}

#[tokio::test]
async fn bind_conflict_fails_startup() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = Config::default();
    config.listeners.push(ListenerConfig::new(
        taken.local_addr().unwrap().to_string(),
        "127.0.0.1:5900",
    ));

    match Server::bind(&config).await {
        Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, taken.local_addr().unwrap()),
        Err(other) => panic!("expected bind error, got {other}"),
        Ok(_) => panic!("bind should fail on a port in use"),
    }
}

#[tokio::test]
async fn multiple_listeners_share_one_registry() {
    let echo_a = MockEchoServer::start();
    let echo_b = MockEchoServer::start();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[[listeners]]
name = "a"
listen = "127.0.0.1:0"
target = "{}"

[[listeners]]
name = "b"
listen = "127.0.0.1:0"
target = "{}"
"#,
            echo_a.addr, echo_b.addr
        ),
    )
    .unwrap();
    let config = load_config(&path).unwrap();
    validate_config(&config).unwrap();

    let server = Server::bind(&config).await.unwrap();
    let addrs = server.local_addrs();
    assert_eq!(addrs.len(), 2);
    let registry = server.registry();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.run(shutdown.clone()));

    let mut clients = Vec::new();
    for addr in &addrs {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"x").await.unwrap();
        let mut b = [0u8; 1];
        client.read_exact(&mut b).await.unwrap();
        clients.push(client);
    }
    wait_for_len(&registry, 2).await;

    let mut listeners: Vec<_> = registry
        .list_active()
        .into_iter()
        .map(|s| s.listener)
        .collect();
    listeners.sort();
    assert_eq!(listeners, vec!["a".to_string(), "b".to_string()]);

    shutdown.cancel();
    let report = handle.await.unwrap();
    assert_eq!(report.requested, 2);
}
