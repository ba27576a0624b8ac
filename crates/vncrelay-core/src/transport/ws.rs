//! WebSocket stream adapter.
//!
//! Browser VNC clients cannot open raw TCP sockets, so they tunnel the RFB
//! byte stream through binary WebSocket messages. `WsIo` undoes the framing
//! and exposes the tunnel as `AsyncRead + AsyncWrite`, so the relay treats a
//! WebSocket client exactly like a TCP one.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};

/// WebSocket stream adapter that exposes AsyncRead/AsyncWrite using binary frames.
///
/// - Binary and text message payloads are read as one continuous byte stream
/// - Writes become binary messages
/// - Pings are answered with pongs
/// - A close frame (or the end of the stream) reads as EOF
/// - Once the peer has closed, writes fail with `BrokenPipe`; a WebSocket
///   cannot be half-closed, so the peer takes nothing more
/// - Shutdown sends a close frame
pub struct WsIo<S> {
    ws: WebSocketStream<S>,
    read_buf: Bytes,
    peer_closed: bool,
}

impl<S> WsIo<S> {
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self {
            ws,
            read_buf: Bytes::new(),
            peer_closed: false,
        }
    }

    fn copy_buffered(&mut self, buf: &mut ReadBuf<'_>) {
        let to_copy = self.read_buf.len().min(buf.remaining());
        buf.put_slice(&self.read_buf[..to_copy]);
        self.read_buf = self.read_buf.slice(to_copy..);
    }
}

impl<S> AsyncRead for WsIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        // Leftover from a message larger than the caller's buffer.
        if !self.read_buf.is_empty() {
            self.copy_buffered(buf);
            return Poll::Ready(Ok(()));
        }

        loop {
            match Pin::new(&mut self.ws).poll_next(cx) {
                Poll::Ready(Some(Ok(msg))) => match msg {
                    Message::Binary(data) => {
                        // An empty message must not be mistaken for EOF.
                        if data.is_empty() {
                            continue;
                        }
                        self.read_buf = Bytes::from(data);
                        self.copy_buffered(buf);
                        return Poll::Ready(Ok(()));
                    }
                    Message::Text(text) => {
                        if text.is_empty() {
                            continue;
                        }
                        self.read_buf = Bytes::from(text.into_bytes());
                        self.copy_buffered(buf);
                        return Poll::Ready(Ok(()));
                    }
                    Message::Ping(payload) => {
                        let mut ws = Pin::new(&mut self.ws);
                        match ws.as_mut().poll_ready(cx) {
                            Poll::Ready(Ok(())) => {
                                if let Err(err) = ws.start_send(Message::Pong(payload)) {
                                    return Poll::Ready(Err(ws_err(err)));
                                }
                                continue;
                            }
                            Poll::Ready(Err(err)) => return Poll::Ready(Err(ws_err(err))),
                            Poll::Pending => return Poll::Pending,
                        }
                    }
                    Message::Pong(_) | Message::Frame(_) => continue,
                    Message::Close(_) => {
                        self.peer_closed = true;
                        return Poll::Ready(Ok(()));
                    }
                },
                Poll::Ready(Some(Err(WsError::ConnectionClosed))) | Poll::Ready(None) => {
                    self.peer_closed = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(ws_err(err))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> AsyncWrite for WsIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.peer_closed {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let mut ws = Pin::new(&mut self.ws);
        match ws.as_mut().poll_ready(cx) {
            Poll::Ready(Ok(())) => {
                if let Err(err) = ws.start_send(Message::Binary(data.to_vec())) {
                    return Poll::Ready(Err(ws_err(err)));
                }
                Poll::Ready(Ok(data.len()))
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(ws_err(err))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.ws).poll_flush(cx).map_err(ws_err)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match Pin::new(&mut self.ws).poll_close(cx) {
            // Peer already closed; nothing left to half-close.
            Poll::Ready(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                Poll::Ready(Ok(()))
            }
            other => other.map_err(ws_err),
        }
    }
}

/// Closing-handshake errors become `BrokenPipe`, everything else `Other`.
fn ws_err(err: WsError) -> io::Error {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::SendAfterClosing) => {
            io::Error::new(io::ErrorKind::BrokenPipe, err)
        }
        other => io::Error::other(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (WsIo<tokio::io::DuplexStream>, WebSocketStream<tokio::io::DuplexStream>) {
        let (server, client) = duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (WsIo::new(server), client)
    }

    #[tokio::test]
    async fn reads_binary_messages_as_stream() {
        let (mut io, mut client) = pair().await;

        client.send(Message::Binary(b"RFB 003".to_vec())).await.unwrap();
        client.send(Message::Binary(vec![])).await.unwrap();
        client.send(Message::Binary(b".008\n".to_vec())).await.unwrap();
        client.close(None).await.unwrap();

        let mut received = Vec::new();
        io.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"RFB 003.008\n");
    }

    #[tokio::test]
    async fn splits_large_message_across_reads() {
        let (mut io, mut client) = pair().await;
        let payload: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        client.send(Message::Binary(payload.clone())).await.unwrap();

        let mut received = vec![0u8; payload.len()];
        let mut chunk = [0u8; 1000];
        let mut filled = 0;
        while filled < payload.len() {
            let n = io.read(&mut chunk).await.unwrap();
            assert!(n > 0 && n <= 1000);
            received[filled..filled + n].copy_from_slice(&chunk[..n]);
            filled += n;
        }
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn writes_binary_messages() {
        let (mut io, mut client) = pair().await;

        io.write_all(b"framebuffer").await.unwrap();
        io.flush().await.unwrap();

        match client.next().await {
            Some(Ok(Message::Binary(data))) => assert_eq!(data, b"framebuffer"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn writes_after_peer_close_are_broken_pipe() {
        let (mut io, mut client) = pair().await;
        client.close(None).await.unwrap();

        let mut received = Vec::new();
        io.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());

        let err = io.write_all(b"late update").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn browser_close_during_streaming_completes_relay() {
        use crate::io::{NoOpMetrics, RelayOptions, RelayOutcome, relay_bidirectional};
        use std::time::Duration;
        use tokio_util::sync::CancellationToken;

        let (io, mut client) = pair().await;
        let (upstream_side, upstream) = duplex(64 * 1024);

        // The VNC server keeps pushing framebuffer updates.
        let streamer = tokio::spawn(async move {
            let (_upstream_r, mut upstream_w) = tokio::io::split(upstream);
            let chunk = [0x5au8; 512];
            while upstream_w.write_all(&chunk).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let relay = tokio::spawn(async move {
            let (close, abort) = (CancellationToken::new(), CancellationToken::new());
            relay_bidirectional(
                io,
                upstream_side,
                &RelayOptions::default(),
                &NoOpMetrics,
                &close,
                &abort,
            )
            .await
        });

        for _ in 0..3 {
            match client.next().await {
                Some(Ok(Message::Binary(data))) => assert!(!data.is_empty()),
                other => panic!("unexpected message: {other:?}"),
            }
        }
        client.close(None).await.unwrap();
        // Keep reading so the closing handshake and in-flight data can land.
        let drain = tokio::spawn(async move { while let Some(Ok(_)) = client.next().await {} });

        let outcome = tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .expect("relay must end after the browser closes")
            .unwrap();
        assert_eq!(outcome.unwrap(), RelayOutcome::Completed);

        streamer.await.unwrap();
        drain.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_sends_close_frame() {
        let (mut io, mut client) = pair().await;
        io.shutdown().await.unwrap();

        match client.next().await {
            Some(Ok(Message::Close(_))) => {}
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
