use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use respkv::client::Client;
use respkv::server::{Server, ServerConfig, ServerHandle};

const OP_TIMEOUT: Duration = Duration::from_secs(2);

struct TestServer {
    addr: SocketAddr,
    handle: ServerHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

async fn start_server() -> Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server = Server::new(listener, ServerConfig::default());
    let addr = server.local_addr()?;
    let handle = server.handle();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = server.run_until(shutdown).await;
    });

    Ok(TestServer {
        addr,
        handle,
        shutdown: shutdown_tx,
        task,
    })
}

impl TestServer {
    async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        timeout(OP_TIMEOUT, self.task)
            .await
            .context("server did not stop in time")??;
        Ok(())
    }
}

/// Polls until the live-connection count reaches `expected`.
async fn wait_for_connections(handle: &ServerHandle, expected: usize) -> bool {
    for _ in 0..200 {
        if handle.connections() == expected {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    timeout(OP_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .context("timed out waiting for reply bytes")??;
    Ok(buf)
}

#[tokio::test]
async fn set_get_del_end_to_end() -> Result<()> {
    let server = start_server().await?;
    let mut client = Client::connect(server.addr).await?;

    let hello = timeout(OP_TIMEOUT, client.hello()).await??;
    assert!(hello.contains(&("server".to_string(), "redis".to_string())));

    timeout(OP_TIMEOUT, client.set("foo", "bar")).await??;
    assert_eq!(
        timeout(OP_TIMEOUT, client.get("foo")).await??,
        Some(Bytes::from_static(b"bar")),
    );

    // Repeating the same write leaves the value unchanged.
    timeout(OP_TIMEOUT, client.set("foo", "bar")).await??;
    assert_eq!(
        timeout(OP_TIMEOUT, client.get("foo")).await??,
        Some(Bytes::from_static(b"bar")),
    );

    assert!(timeout(OP_TIMEOUT, client.del("foo")).await??);
    assert_eq!(timeout(OP_TIMEOUT, client.get("foo")).await??, None);
    assert!(!timeout(OP_TIMEOUT, client.del("foo")).await??);

    client.close().await?;
    server.stop().await
}

#[tokio::test]
async fn concurrent_clients_keep_their_own_keys() -> Result<()> {
    let server = start_server().await?;
    let client_count = 10;

    let mut workers = Vec::new();
    for index in 0..client_count {
        let addr = server.addr;
        workers.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await?;
            let key = format!("client_foo_{index}");
            let value = format!("client_bar_{index}");

            client.set(key.clone(), value.clone()).await?;
            let read_back = client.get(key).await?;
            anyhow::ensure!(
                read_back == Some(Bytes::from(value)),
                "client {index} read someone else's value: {read_back:?}",
            );
            client.close().await?;
            Ok::<_, anyhow::Error>(())
        }));
    }
    for worker in workers {
        timeout(OP_TIMEOUT, worker).await???;
    }

    // Every client hung up, so the live-connection set drains to zero while
    // the written data stays behind.
    assert!(
        wait_for_connections(&server.handle, 0).await,
        "connections never drained, still {}",
        server.handle.connections(),
    );
    assert_eq!(server.handle.store().len(), client_count);
    assert_eq!(
        server.handle.store().get(b"client_foo_3"),
        Some(Bytes::from_static(b"client_bar_3")),
    );

    server.stop().await
}

#[tokio::test]
async fn malformed_requests_leave_the_connection_usable() -> Result<()> {
    let server = start_server().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    // Unknown command, wrong arity, and framing garbage: all dropped with
    // no reply and no disconnect.
    stream.write_all(b"*1\r\n$4\r\nping\r\n").await?;
    stream.write_all(b"*1\r\n$3\r\nget\r\n").await?;
    stream.write_all(b"hows it going\r\n").await?;

    // The very next reply on the wire belongs to this well-formed set.
    stream
        .write_all(b"*3\r\n$3\r\nset\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .await?;
    assert_eq!(read_exactly(&mut stream, 5).await?, b"+OK\r\n");

    stream.write_all(b"*2\r\n$3\r\nget\r\n$3\r\nfoo\r\n").await?;
    assert_eq!(read_exactly(&mut stream, 9).await?, b"$3\r\nbar\r\n");

    server.stop().await
}

#[tokio::test]
async fn deeply_nested_input_does_not_take_down_the_server() -> Result<()> {
    let server = start_server().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    // Hostile nesting far past anything a real request uses. The decoder
    // rejects it at its depth cap; the leftover headers drain as further
    // rejected requests, and the connection stays usable.
    stream.write_all(&b"*1\r\n".repeat(10_000)).await?;
    stream
        .write_all(b"*3\r\n$3\r\nset\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .await?;
    assert_eq!(read_exactly(&mut stream, 5).await?, b"+OK\r\n");

    // Other connections are unaffected throughout.
    let mut client = Client::connect(server.addr).await?;
    assert_eq!(
        timeout(OP_TIMEOUT, client.get("foo")).await??,
        Some(Bytes::from_static(b"bar")),
    );

    client.close().await?;
    server.stop().await
}

#[tokio::test]
async fn uppercase_tokens_are_accepted() -> Result<()> {
    let server = start_server().await?;
    let mut stream = TcpStream::connect(server.addr).await?;

    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .await?;
    assert_eq!(read_exactly(&mut stream, 5).await?, b"+OK\r\n");

    stream.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await?;
    assert_eq!(read_exactly(&mut stream, 9).await?, b"$3\r\nbar\r\n");

    stream.write_all(b"*2\r\n$3\r\nDEL\r\n$3\r\nfoo\r\n").await?;
    assert_eq!(read_exactly(&mut stream, 4).await?, b":1\r\n");

    stream.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await?;
    assert_eq!(read_exactly(&mut stream, 5).await?, b"$-1\r\n");

    stream.write_all(b"*2\r\n$3\r\nDEL\r\n$3\r\nfoo\r\n").await?;
    assert_eq!(read_exactly(&mut stream, 4).await?, b":0\r\n");

    server.stop().await
}

#[tokio::test]
async fn shutdown_closes_live_connections_and_the_listener() -> Result<()> {
    let server = start_server().await?;
    let addr = server.addr;

    let mut client = Client::connect(addr).await?;
    timeout(OP_TIMEOUT, client.set("foo", "bar")).await??;
    assert!(wait_for_connections(&server.handle, 1).await);

    server.stop().await?;

    // The engine dropped this connection's transport, so the next request
    // sees the stream closed instead of a reply.
    let result = timeout(OP_TIMEOUT, client.get("foo")).await?;
    assert!(result.is_err());

    assert!(Client::connect(addr).await.is_err());
    Ok(())
}
