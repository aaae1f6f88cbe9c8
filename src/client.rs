use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::resp::{self, Value};

/// Minimal client for the wire protocol, used by the CLI subcommands and
/// the integration tests. One request in flight at a time.
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Performs the `hello` handshake, returning the negotiated fields.
    pub async fn hello(&mut self) -> Result<Vec<(String, String)>> {
        let reply = self
            .request(vec![Bytes::from_static(b"hello"), Bytes::from_static(b"2")])
            .await?;
        match reply {
            Value::Map(pairs) => Ok(pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect()),
            other => bail!("unexpected hello reply: {other:?}"),
        }
    }

    pub async fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let reply = self
            .request(vec![Bytes::from_static(b"set"), key.into(), value.into()])
            .await?;
        match reply {
            Value::Simple(status) if status == "OK" => Ok(()),
            other => bail!("unexpected set reply: {other:?}"),
        }
    }

    pub async fn get(&mut self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        let reply = self
            .request(vec![Bytes::from_static(b"get"), key.into()])
            .await?;
        match reply {
            Value::Bulk(value) => Ok(Some(value)),
            Value::Null => Ok(None),
            other => bail!("unexpected get reply: {other:?}"),
        }
    }

    /// Removes a key, returning whether the server reported it present.
    pub async fn del(&mut self, key: impl Into<Bytes>) -> Result<bool> {
        let reply = self
            .request(vec![Bytes::from_static(b"del"), key.into()])
            .await?;
        match reply {
            Value::Integer(removed) => Ok(removed == 1),
            other => bail!("unexpected del reply: {other:?}"),
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn request(&mut self, parts: Vec<Bytes>) -> Result<Value> {
        let command = Value::Array(parts.into_iter().map(Value::Bulk).collect());
        resp::write_value(&mut self.writer, &command).await?;
        match resp::read_value(&mut self.reader).await? {
            Some(reply) => Ok(reply),
            None => bail!("server closed the connection without replying"),
        }
    }
}
