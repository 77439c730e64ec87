//! Integration tests for the WebSocket client connection.
//!
//! Each test runs a bare `tokio-tungstenite` server on an ephemeral port
//! and connects a real client to it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use huddle_transport::{Connection, TransportError, WebSocketConnection};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    type ServerWs = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    /// Binds a listener on an OS-assigned port and returns it with its
    /// `ws://` URL.
    async fn relay() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().unwrap();
        (listener, format!("ws://{addr}"))
    }

    async fn accept(listener: TcpListener) -> ServerWs {
        let (stream, _) = listener.accept().await.expect("should accept");
        tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake should succeed")
    }

    #[tokio::test]
    async fn test_connect_send_and_receive_text() {
        let (listener, url) = relay().await;
        let server = tokio::spawn(accept(listener));

        let client = WebSocketConnection::connect(&url)
            .await
            .expect("client should connect");
        let mut server_ws = server.await.unwrap();
        assert!(client.id().into_inner() > 0);

        // --- Client sends, relay receives a text frame ---
        client
            .send(br#"{"kind":"pingPong","message":"ping"}"#)
            .await
            .expect("send should succeed");
        let msg = server_ws.next().await.unwrap().unwrap();
        assert!(msg.is_text(), "UTF-8 payloads must go out as text");
        assert_eq!(
            msg.into_text().unwrap().as_str(),
            r#"{"kind":"pingPong","message":"ping"}"#
        );

        // --- Relay sends, client receives ---
        server_ws
            .send(Message::Text(r#"{"kind":"participantLeft","name":"a"}"#.into()))
            .await
            .unwrap();
        let received = client
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, br#"{"kind":"participantLeft","name":"a"}"#);

        client.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_relay_close() {
        let (listener, url) = relay().await;
        let server = tokio::spawn(accept(listener));

        let client = WebSocketConnection::connect(&url).await.unwrap();
        let mut server_ws = server.await.unwrap();

        server_ws.send(Message::Close(None)).await.unwrap();

        let result = client.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on relay close");
    }

    #[tokio::test]
    async fn test_pending_recv_does_not_block_send() {
        // The reader task parks in recv() for the whole session; sends
        // from the writer task must still go through.
        let (listener, url) = relay().await;
        let server = tokio::spawn(accept(listener));

        let client = std::sync::Arc::new(
            WebSocketConnection::connect(&url).await.unwrap(),
        );
        let mut server_ws = server.await.unwrap();

        let reader = {
            let client = std::sync::Arc::clone(&client);
            tokio::spawn(async move { client.recv().await })
        };
        tokio::task::yield_now().await;

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            client.send(b"while reading"),
        )
        .await
        .expect("send must not wait for recv")
        .unwrap();

        let msg = server_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"while reading");
        reader.abort();
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let (listener, url) = relay().await;
        drop(listener);

        let result = WebSocketConnection::connect(&url).await;

        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }
}
