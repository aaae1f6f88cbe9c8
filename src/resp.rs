use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single bulk string payload. Matches the limit real
/// redis enforces on client input.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Upper bound on declared array/map lengths, so a bogus header cannot
/// trigger a huge allocation.
const MAX_AGGREGATE_LEN: usize = 1024 * 1024;

/// Upper bound on array/map nesting. Requests are flat arrays of bulk
/// strings, so anything deep is hostile input; the cap keeps the boxed
/// recursion in `read_body` from growing the stack without bound.
const MAX_NESTING_DEPTH: usize = 32;

/// Upper bound on one header line. Headers are type markers plus a short
/// length or status, so a line this long is never legitimate.
const MAX_LINE_LEN: usize = 64 * 1024;

/// One RESP wire value. Requests arrive as arrays of bulk strings; replies
/// use the scalar variants plus `Map` for the `hello` handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Byte payload of a bulk or simple string element, if it is one.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            Value::Bulk(bytes) => Some(bytes.clone()),
            Value::Simple(text) => Some(Bytes::copy_from_slice(text.as_bytes())),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Simple(text) => text.fmt(f),
            Value::Error(message) => write!(f, "error: {message}"),
            Value::Integer(number) => number.fmt(f),
            Value::Bulk(bytes) => String::from_utf8_lossy(bytes).fmt(f),
            Value::Null => "(nil)".fmt(f),
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, " ")?;
                    }
                    item.fmt(f)?;
                }
                Ok(())
            }
            Value::Map(pairs) => {
                for (index, (key, value)) in pairs.iter().enumerate() {
                    if index > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                Ok(())
            }
        }
    }
}

/// Reads the next value off the stream. Returns `None` on a clean EOF at a
/// value boundary; EOF in the middle of a value is an `UnexpectedEof` error.
///
/// A line that does not start with a known type marker yields `InvalidData`
/// after consuming through the next newline, so the caller can log the
/// protocol error and keep reading from the same stream.
pub async fn read_value<R>(reader: &mut R) -> io::Result<Option<Value>>
where
    R: AsyncBufRead + Unpin + Send,
{
    let marker = match read_marker(reader).await? {
        Some(marker) => marker,
        None => return Ok(None),
    };
    read_body(reader, marker, 0).await.map(Some)
}

/// Writes one encoded value and flushes, so clients see replies promptly.
pub async fn write_value<W>(writer: &mut W, value: &Value) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode(value);
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Encodes a value into its wire representation.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Simple(text) => {
            buf.push(b'+');
            buf.extend_from_slice(text.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Value::Error(message) => {
            buf.push(b'-');
            buf.extend_from_slice(message.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Value::Integer(number) => {
            buf.push(b':');
            buf.extend_from_slice(number.to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Value::Null => buf.extend_from_slice(b"$-1\r\n"),
        Value::Bulk(bytes) => {
            buf.push(b'$');
            buf.extend_from_slice(bytes.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(bytes);
            buf.extend_from_slice(b"\r\n");
        }
        Value::Array(items) => {
            buf.push(b'*');
            buf.extend_from_slice(items.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            for item in items {
                encode_into(item, buf);
            }
        }
        Value::Map(pairs) => {
            buf.push(b'%');
            buf.extend_from_slice(pairs.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            for (key, value) in pairs {
                encode_into(key, buf);
                encode_into(value, buf);
            }
        }
    }
}

async fn read_marker<R>(reader: &mut R) -> io::Result<Option<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte).await? == 0 {
            return Ok(None);
        }
        // Tolerate stray line terminators between values.
        if byte[0] != b'\r' && byte[0] != b'\n' {
            return Ok(Some(byte[0]));
        }
    }
}

// Boxed so decoding can recurse into array and map elements. `depth` counts
// enclosing aggregates and is capped so hostile nesting cannot overflow the
// stack.
fn read_body<'a, R>(
    reader: &'a mut R,
    marker: u8,
    depth: usize,
) -> Pin<Box<dyn Future<Output = io::Result<Value>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        if depth > MAX_NESTING_DEPTH && matches!(marker, b'*' | b'%') {
            return Err(invalid_data("value nested too deeply"));
        }
        match marker {
            b'+' => Ok(Value::Simple(read_line(reader).await?)),
            b'-' => Ok(Value::Error(read_line(reader).await?)),
            b':' => {
                let line = read_line(reader).await?;
                line.parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| invalid_data("invalid integer value"))
            }
            b'$' => match read_length(reader, MAX_BULK_LEN).await? {
                None => Ok(Value::Null),
                Some(len) => {
                    let mut payload = vec![0u8; len];
                    reader.read_exact(&mut payload).await?;
                    read_terminator(reader).await?;
                    Ok(Value::Bulk(Bytes::from(payload)))
                }
            },
            b'*' => match read_length(reader, MAX_AGGREGATE_LEN).await? {
                None => Ok(Value::Null),
                Some(len) => {
                    let mut items = Vec::with_capacity(len);
                    for _ in 0..len {
                        items.push(read_element(reader, depth + 1).await?);
                    }
                    Ok(Value::Array(items))
                }
            },
            b'%' => match read_length(reader, MAX_AGGREGATE_LEN).await? {
                None => Ok(Value::Null),
                Some(len) => {
                    let mut pairs = Vec::with_capacity(len);
                    for _ in 0..len {
                        let key = read_element(reader, depth + 1).await?;
                        let value = read_element(reader, depth + 1).await?;
                        pairs.push((key, value));
                    }
                    Ok(Value::Map(pairs))
                }
            },
            other => {
                // Consume the rest of the line so one garbage line does not
                // poison every read that follows.
                let _ = read_line(reader).await;
                Err(invalid_data(format!("invalid type marker 0x{other:02x}")))
            }
        }
    })
}

async fn read_element<R>(reader: &mut R, depth: usize) -> io::Result<Value>
where
    R: AsyncBufRead + Unpin + Send,
{
    match read_marker(reader).await? {
        Some(marker) => read_body(reader, marker, depth).await,
        None => Err(unexpected_eof()),
    }
}

async fn read_length<R>(reader: &mut R, max: usize) -> io::Result<Option<usize>>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    let len = line
        .parse::<i64>()
        .map_err(|_| invalid_data("invalid length header"))?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if len > max {
        return Err(invalid_data(format!("declared length {len} exceeds limit")));
    }
    Ok(Some(len))
}

/// Reads one CRLF-terminated line, refusing lines past `MAX_LINE_LEN` so a
/// stream that never sends a newline cannot grow the buffer without bound.
async fn read_line<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let (consumed, terminated) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Err(unexpected_eof());
            }
            match chunk.iter().position(|&byte| byte == b'\n') {
                Some(position) => {
                    buf.extend_from_slice(&chunk[..position]);
                    (position + 1, true)
                }
                None => {
                    buf.extend_from_slice(chunk);
                    (chunk.len(), false)
                }
            }
        };
        reader.consume(consumed);
        if buf.len() > MAX_LINE_LEN {
            return Err(invalid_data("header line exceeds limit"));
        }
        if terminated {
            break;
        }
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| invalid_data("header is not valid utf-8"))
}

async fn read_terminator<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut terminator = [0u8; 2];
    reader.read_exact(&mut terminator).await?;
    if &terminator != b"\r\n" {
        return Err(invalid_data("missing payload terminator"));
    }
    Ok(())
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed mid value")
}
