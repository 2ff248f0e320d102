//! Content-Length message framing for the command/reply channel.
//!
//! This module implements HTTP-style Content-Length framing, the same header
//! grammar used by the Language Server Protocol (LSP). It gives the
//! stream-oriented local socket reliable message boundaries for the
//! comma-separated command and reply strings.
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <length>\r\n
//! Request-Id: <id>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! `Request-Id` is optional. Header parsing is case-insensitive, handles both
//! CRLF and LF line endings and ignores unknown headers.

use anyhow::{anyhow, bail, Context, Result};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum message body size (16MB) to prevent OOM from a misbehaving peer.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum size of the header block before the blank line.
const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Initial read buffer capacity. Replies are usually a few hundred bytes.
const READ_CHUNK: usize = 4096;

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation id from the `Request-Id` header, if the sender set one.
    pub request_id: Option<u64>,
    /// Message text.
    pub body: String,
}

#[derive(Debug, Default)]
struct FrameHeaders {
    content_length: Option<usize>,
    request_id: Option<u64>,
}

/// Write a Content-Length framed message to the stream.
///
/// # Errors
///
/// Returns an error if the write or flush fails.
///
/// # Example
///
/// ```ignore
/// write_message(&mut writer, Some(7), "GetVersion").await?;
/// ```
pub async fn write_message<W>(writer: &mut W, request_id: Option<u64>, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body_bytes = body.as_bytes();
    let mut header = format!("Content-Length: {}\r\n", body_bytes.len());
    if let Some(id) = request_id {
        header.push_str(&format!("Request-Id: {}\r\n", id));
    }
    header.push_str("\r\n");

    writer
        .write_all(header.as_bytes())
        .await
        .context("Failed to write message header")?;

    writer
        .write_all(body_bytes)
        .await
        .context("Failed to write message body")?;

    writer.flush().await.context("Failed to flush message")?;

    Ok(())
}

/// Buffered frame decoder over an async byte stream.
///
/// Bytes are accumulated in an internal buffer and only removed once a
/// complete frame is available, so [`FrameReader::read_frame`] is
/// cancellation safe: dropping the future (for example when a timeout fires)
/// never loses part of a frame.
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap a readable stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The stream ends in the middle of a frame
    /// - No Content-Length header is found
    /// - Content-Length exceeds [`MAX_MESSAGE_SIZE`]
    /// - The header block exceeds 8KB
    /// - The body is not valid UTF-8
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = parse_frame(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            self.buffer.reserve(READ_CHUNK);
            let bytes_read = self
                .reader
                .read_buf(&mut self.buffer)
                .await
                .context("Failed to read from channel")?;

            if bytes_read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                bail!(
                    "Connection closed mid-frame ({} bytes buffered)",
                    self.buffer.len()
                );
            }
        }
    }

    /// Number of bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Try to split one complete frame off the front of `buffer`.
fn parse_frame(buffer: &mut BytesMut) -> Result<Option<Frame>> {
    let Some((header_len, headers)) = parse_headers(buffer)? else {
        if buffer.len() > MAX_HEADER_SIZE {
            bail!("Header block exceeds {} bytes", MAX_HEADER_SIZE);
        }
        return Ok(None);
    };

    let size = headers
        .content_length
        .ok_or_else(|| anyhow!("Missing Content-Length header"))?;

    if size > MAX_MESSAGE_SIZE {
        bail!(
            "Message size {} exceeds maximum {} bytes",
            size,
            MAX_MESSAGE_SIZE
        );
    }

    if buffer.len() < header_len + size {
        return Ok(None);
    }

    buffer.advance(header_len);
    let body = buffer.split_to(size);
    let body = String::from_utf8(body.to_vec()).context("Message body is not valid UTF-8")?;

    Ok(Some(Frame {
        request_id: headers.request_id,
        body,
    }))
}

/// Parse the header block. Returns its length (including the blank line)
/// once the blank line has been received.
fn parse_headers(buffer: &[u8]) -> Result<Option<(usize, FrameHeaders)>> {
    let mut headers = FrameHeaders::default();
    let mut start = 0;

    while let Some(offset) = buffer[start..].iter().position(|&b| b == b'\n') {
        let end = start + offset;
        let line = &buffer[start..end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        start = end + 1;

        // Empty line signals end of headers
        if line.is_empty() {
            return Ok(Some((start, headers)));
        }

        let line = std::str::from_utf8(line).context("Header line is not valid UTF-8")?;
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key.eq_ignore_ascii_case("Content-Length") {
            headers.content_length = Some(
                value
                    .parse()
                    .with_context(|| format!("Invalid Content-Length value: {}", value))?,
            );
        } else if key.eq_ignore_ascii_case("Request-Id") {
            headers.request_id = Some(
                value
                    .parse()
                    .with_context(|| format!("Invalid Request-Id value: {}", value))?,
            );
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::UnixStream;
    use tokio::time::timeout;

    /// Test timeout to prevent hanging tests.
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a connected pair of Unix sockets for testing.
    /// Returns (server_read, server_write, client_read, client_write).
    fn socket_pair() -> (OwnedReadHalf, OwnedWriteHalf, OwnedReadHalf, OwnedWriteHalf) {
        let (stream_a, stream_b) = UnixStream::pair().expect("Failed to create socket pair");
        let (a_read, a_write) = stream_a.into_split();
        let (b_read, b_write) = stream_b.into_split();
        (a_read, a_write, b_read, b_write)
    }

    async fn read_one(reader: &mut FrameReader<OwnedReadHalf>) -> Result<Option<Frame>> {
        timeout(TEST_TIMEOUT, reader.read_frame())
            .await
            .expect("Test timed out")
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (server_read, _server_write, _client_read, mut client_write) = socket_pair();

        write_message(&mut client_write, Some(42), "GetTrace,1,0,-1,0,1,0,0")
            .await
            .expect("Write failed");

        let mut reader = FrameReader::new(server_read);
        let frame = read_one(&mut reader).await.expect("Read failed").unwrap();

        assert_eq!(frame.request_id, Some(42));
        assert_eq!(frame.body, "GetTrace,1,0,-1,0,1,0,0");
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_frame_without_request_id() {
        let (server_read, _server_write, _client_read, mut client_write) = socket_pair();

        write_message(&mut client_write, None, "GetVersion")
            .await
            .expect("Write failed");

        let mut reader = FrameReader::new(server_read);
        let frame = read_one(&mut reader).await.expect("Read failed").unwrap();

        assert_eq!(frame.request_id, None);
        assert_eq!(frame.body, "GetVersion");
    }

    #[tokio::test]
    async fn test_read_missing_content_length() {
        let (server_read, _server_write, _client_read, mut client_write) = socket_pair();

        client_write.write_all(b"\r\n").await.expect("Write failed");
        drop(client_write);

        let mut reader = FrameReader::new(server_read);
        let result = read_one(&mut reader).await;

        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("Missing Content-Length"),
            "Expected 'Missing Content-Length' error, got: {}",
            err_msg
        );
    }

    #[tokio::test]
    async fn test_read_handles_lf_only() {
        let (server_read, _server_write, _client_read, mut client_write) = socket_pair();

        let body = "7100,1,0";
        let raw = format!("Content-Length: {}\nRequest-Id: 3\n\n{}", body.len(), body);
        client_write
            .write_all(raw.as_bytes())
            .await
            .expect("Write failed");

        let mut reader = FrameReader::new(server_read);
        let frame = read_one(&mut reader).await.expect("Read failed").unwrap();

        assert_eq!(frame.request_id, Some(3));
        assert_eq!(frame.body, body);
    }

    #[tokio::test]
    async fn test_read_case_insensitive_header() {
        let (server_read, _server_write, _client_read, mut client_write) = socket_pair();

        let body = "BAD COMMAND";
        let raw = format!(
            "content-length: {}\r\nX-Ignored: yes\r\nrequest-id: 9\r\n\r\n{}",
            body.len(),
            body
        );
        client_write
            .write_all(raw.as_bytes())
            .await
            .expect("Write failed");

        let mut reader = FrameReader::new(server_read);
        let frame = read_one(&mut reader).await.expect("Read failed").unwrap();

        assert_eq!(frame.request_id, Some(9));
        assert_eq!(frame.body, body);
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_message() {
        let (server_read, _server_write, _client_read, mut client_write) = socket_pair();

        let raw = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1);
        client_write
            .write_all(raw.as_bytes())
            .await
            .expect("Write failed");

        let mut reader = FrameReader::new(server_read);
        let err_msg = read_one(&mut reader).await.unwrap_err().to_string();

        assert!(
            err_msg.contains("exceeds maximum"),
            "Expected size error, got: {}",
            err_msg
        );
    }

    #[tokio::test]
    async fn test_connection_closed_between_frames() {
        let (server_read, _server_write, _client_read, client_write) = socket_pair();

        drop(client_write);

        let mut reader = FrameReader::new(server_read);
        let frame = read_one(&mut reader).await.expect("Clean EOF is not an error");
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_connection_closed_mid_frame() {
        let (server_read, _server_write, _client_read, mut client_write) = socket_pair();

        client_write
            .write_all(b"Content-Length: 10\r\n\r\nGetV")
            .await
            .expect("Write failed");
        drop(client_write);

        let mut reader = FrameReader::new(server_read);
        let err_msg = read_one(&mut reader).await.unwrap_err().to_string();
        assert!(err_msg.contains("mid-frame"), "got: {}", err_msg);
    }

    #[tokio::test]
    async fn test_back_to_back_frames_in_one_write() {
        let (server_read, _server_write, _client_read, mut client_write) = socket_pair();

        client_write
            .write_all(b"Content-Length: 1\r\n\r\n0Content-Length: 2\r\nRequest-Id: 5\r\n\r\n-1")
            .await
            .expect("Write failed");

        let mut reader = FrameReader::new(server_read);
        let first = read_one(&mut reader).await.unwrap().unwrap();
        let second = read_one(&mut reader).await.unwrap().unwrap();

        assert_eq!(first.body, "0");
        assert_eq!(second.body, "-1");
        assert_eq!(second.request_id, Some(5));
    }

    #[tokio::test]
    async fn test_cancelled_read_keeps_partial_frame() {
        let (server_read, _server_write, _client_read, mut client_write) = socket_pair();

        client_write
            .write_all(b"Content-Length: 5\r\nRequest-Id: 1\r\n\r\nGet")
            .await
            .expect("Write failed");

        let mut reader = FrameReader::new(server_read);
        let first_attempt = timeout(Duration::from_millis(50), reader.read_frame()).await;
        assert!(first_attempt.is_err(), "Partial frame must not complete");

        client_write.write_all(b"Up").await.expect("Write failed");

        let frame = read_one(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.body, "GetUp");
        assert_eq!(frame.request_id, Some(1));
    }

    #[test]
    fn test_header_block_limit() {
        let mut buffer = BytesMut::from(&vec![b'x'; MAX_HEADER_SIZE + 1][..]);
        let err = parse_frame(&mut buffer).unwrap_err().to_string();
        assert!(err.contains("Header block exceeds"), "got: {}", err);
    }

    #[test]
    fn test_invalid_request_id_is_rejected() {
        let mut buffer = BytesMut::from(&b"Content-Length: 1\r\nRequest-Id: abc\r\n\r\n1"[..]);
        let err = parse_frame(&mut buffer).unwrap_err().to_string();
        assert!(err.contains("Invalid Request-Id"), "got: {}", err);
    }
}
