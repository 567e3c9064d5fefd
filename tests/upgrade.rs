//! Connection hand-off to upgrade targets.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use h1_adapter::http::adapter::Outcome;
use h1_adapter::http::request::{PseudoField, Version};
use h1_adapter::http::tokenizer::{ParserHandler, TokenizerError};
use h1_adapter::http::{
    app_fn, AdapterOptions, Application, Headers, Http1Adapter, HttparseTokenizer, Tokenizer,
};
use h1_adapter::net::io::RawConnection;
use h1_adapter::upgrade::{upgrade_fn, websocket, H2Adapter, UpgradeRegistry, WebSocketUpgrade};
use h1_adapter::Error;

mod common;

fn counting_app() -> (Arc<dyn Application>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let app = app_fn(move |conn: &mut Http1Adapter| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { conn.respond(b"plain", &Headers::new()).await })
    });

    let app: Arc<dyn Application> = Arc::new(app);
    (app, calls)
}

#[tokio::test]
async fn test_websocket_upgrade_echoes_without_dispatch() {
    let (app, calls) = counting_app();
    let upgrades = UpgradeRegistry::new().register(
        "websocket",
        WebSocketUpgrade::new(|ws, _headers| websocket::echo(ws)),
    );
    let (client, handle) = common::spawn_adapter(app, upgrades, AdapterOptions::default());

    let (mut ws, response) = tokio_tungstenite::client_async("ws://localhost/chat", client)
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 101);

    ws.send(Message::text("hi")).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::text("hi"));

    ws.close(None).await.unwrap();
    drop(ws);

    let outcome = tokio::time::timeout(common::TIMEOUT, handle).await.unwrap();
    assert_eq!(outcome.unwrap().unwrap(), Outcome::Upgraded);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_websocket_without_key_is_rejected() {
    let (app, _calls) = counting_app();
    let upgrades = UpgradeRegistry::new().register(
        "websocket",
        WebSocketUpgrade::new(|ws, _headers| websocket::echo(ws)),
    );
    let (mut client, handle) = common::spawn_adapter(app, upgrades, AdapterOptions::default());

    client
        .write_all(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
        .await
        .unwrap();

    let out = common::read_all(&mut client).await;
    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(matches!(
        handle.await.unwrap(),
        Err(Error::Upgrade { ref protocol, .. }) if protocol == "websocket"
    ));
}

#[tokio::test]
async fn test_bytes_after_upgrade_request_reach_the_target() {
    let (app, calls) = counting_app();
    let upgrades = UpgradeRegistry::new().register(
        "echo",
        upgrade_fn(|mut conn: RawConnection, headers: Headers| async move {
            assert_eq!(headers.get("upgrade"), Some("echo"));

            let mut buf = [0u8; 5];
            conn.read_exact(&mut buf).await?;
            conn.write_all(b"got ").await?;
            conn.write_all(&buf).await?;
            conn.shutdown().await?;
            Ok::<_, Error>(())
        }),
    );
    let (mut client, handle) = common::spawn_adapter(app, upgrades, AdapterOptions::default());

    client
        .write_all(b"GET / HTTP/1.1\r\nUpgrade: echo\r\nConnection: Upgrade\r\n\r\nHELLO")
        .await
        .unwrap();

    assert_eq!(common::read_all(&mut client).await, "got HELLO");
    assert_eq!(handle.await.unwrap().unwrap(), Outcome::Upgraded);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_requests_before_the_upgrade_are_served_first() {
    let (app, calls) = counting_app();
    let upgrades = UpgradeRegistry::new().register(
        "echo",
        upgrade_fn(|mut conn: RawConnection, _headers: Headers| async move {
            conn.write_all(b"switched").await?;
            conn.shutdown().await?;
            Ok::<_, Error>(())
        }),
    );
    let (mut client, handle) = common::spawn_adapter(app, upgrades, AdapterOptions::default());

    client
        .write_all(b"GET /first HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\nUpgrade: echo\r\n\r\n")
        .await
        .unwrap();

    let out = common::read_all(&mut client).await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(out.ends_with("5\r\nplain\r\n0\r\n\r\nswitched"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.await.unwrap().unwrap(), Outcome::Upgraded);
}

#[tokio::test]
async fn test_upgrade_body_drained_without_continue() {
    let (app, calls) = counting_app();
    let upgrades = UpgradeRegistry::new().register(
        "echo",
        upgrade_fn(|mut conn: RawConnection, _headers: Headers| async move {
            conn.write_all(b"switched").await?;
            conn.shutdown().await?;
            Ok::<_, Error>(())
        }),
    );
    let (mut client, handle) = common::spawn_adapter(app, upgrades, AdapterOptions::default());

    client
        .write_all(b"POST / HTTP/1.1\r\nUpgrade: echo\r\nExpect: 100-continue\r\nContent-Length: 4\r\n\r\n")
        .await
        .unwrap();

    // a client gives up waiting for 100 Continue and sends the body anyway
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    client.write_all(b"body").await.unwrap();

    assert_eq!(common::read_all(&mut client).await, "switched");
    assert_eq!(handle.await.unwrap().unwrap(), Outcome::Upgraded);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unresolved_upgrade_is_dispatched_normally() {
    let (app, calls) = counting_app();
    let (mut client, handle) = common::spawn_app(app);

    client
        .write_all(b"GET / HTTP/1.1\r\nUpgrade: h2c\r\nConnection: Upgrade\r\n\r\n")
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    let out = common::read_all(&mut client).await;
    assert!(out.ends_with("5\r\nplain\r\n0\r\n\r\n"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.await.unwrap().unwrap(), Outcome::Closed);
}

struct RecordingH2 {
    tx: mpsc::UnboundedSender<(Headers, Bytes)>,
}

impl H2Adapter for RecordingH2 {
    fn serve(
        &self,
        conn: RawConnection,
        _options: AdapterOptions,
        headers: Headers,
        _app: Arc<dyn Application>,
    ) -> BoxFuture<'static, Result<(), Error>> {
        let (_io, buffered) = conn.into_parts();
        let _ = self.tx.send((headers, buffered));
        Box::pin(async { Ok::<_, Error>(()) })
    }
}

#[tokio::test]
async fn test_h2c_hands_off_with_adjusted_headers() {
    let (app, calls) = counting_app();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let upgrades = UpgradeRegistry::new().with_h2(RecordingH2 { tx });
    let (mut client, handle) = common::spawn_adapter(app, upgrades, AdapterOptions::default());

    let preface = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
    let mut request = b"GET /h2 HTTP/1.1\r\n\
        Host: example.com\r\n\
        Connection: Upgrade, HTTP2-Settings\r\n\
        Upgrade: h2c\r\n\
        HTTP2-Settings: AAMAAABkAAQAAP__\r\n\r\n"
        .to_vec();
    request.extend_from_slice(preface);
    client.write_all(&request).await.unwrap();

    let (headers, buffered) = tokio::time::timeout(common::TIMEOUT, rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(headers.pseudo(PseudoField::Scheme), Some("http"));
    assert_eq!(headers.pseudo(PseudoField::Authority), Some("example.com"));
    assert_eq!(headers.pseudo(PseudoField::Path), Some("/h2"));
    assert_eq!(headers.get("http2-settings"), Some("AAMAAABkAAQAAP__"));
    assert_eq!(&buffered[..], &preface[..]);

    assert_eq!(handle.await.unwrap().unwrap(), Outcome::Upgraded);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Counts the bytes handed to the wrapped tokenizer.
struct CountingTokenizer {
    inner: HttparseTokenizer,
    fed: Arc<AtomicUsize>,
}

impl Tokenizer for CountingTokenizer {
    fn feed(&mut self, data: &[u8], handler: &mut dyn ParserHandler) -> Result<(), TokenizerError> {
        self.fed.fetch_add(data.len(), Ordering::SeqCst);
        self.inner.feed(data, handler)
    }

    fn http_version(&self) -> Version {
        self.inner.http_version()
    }

    fn keep_alive(&self) -> bool {
        self.inner.keep_alive()
    }

    fn take_buffered(&mut self) -> Bytes {
        self.inner.take_buffered()
    }
}

#[tokio::test]
async fn test_tokenizer_sees_nothing_after_upgrade() {
    let (app, _calls) = counting_app();
    let upgrades = Arc::new(UpgradeRegistry::new().register(
        "raw",
        upgrade_fn(|mut conn: RawConnection, _headers: Headers| async move {
            let mut buf = Vec::new();
            conn.read_to_end(&mut buf).await?;
            conn.write_all(&buf).await?;
            conn.shutdown().await?;
            Ok::<_, Error>(())
        }),
    ));

    let fed = Arc::new(AtomicUsize::new(0));
    let tokenizer = CountingTokenizer {
        inner: HttparseTokenizer::default(),
        fed: Arc::clone(&fed),
    };

    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let handle = tokio::spawn(async move {
        let mut adapter = Http1Adapter::with_tokenizer(
            server,
            Box::new(tokenizer),
            AdapterOptions::default(),
            upgrades,
        );
        adapter.run(app).await
    });

    let head = b"GET / HTTP/1.1\r\nUpgrade: raw\r\n\r\n";
    let mut first = head.to_vec();
    first.extend_from_slice(b"early");
    client.write_all(&first).await.unwrap();

    // give the adapter time to hand the connection over
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    client.write_all(b" late GET / HTTP/1.1\r\n\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let out = common::read_all(&mut client).await;
    assert_eq!(out, "early late GET / HTTP/1.1\r\n\r\n");
    assert_eq!(handle.await.unwrap().unwrap(), Outcome::Upgraded);
    assert_eq!(fed.load(Ordering::SeqCst), first.len());
}
