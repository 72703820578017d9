//! DAP transport layer: Content-Length based message framing.
//!
//! `encode_message`/`decode_message` work on byte buffers. `FrameReader`
//! and `FrameWriter` apply the same framing to async streams.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::DapError;

/// Upper bound on a single frame body.
pub const MAX_CONTENT_LENGTH: usize = 16 * 1024 * 1024;

/// Upper bound on a frame's header section, separator included.
pub const MAX_HEADER_LENGTH: usize = 4096;

/// Encode a JSON value into a DAP wire-format message with Content-Length header.
pub fn encode_message(value: &serde_json::Value) -> Vec<u8> {
    let body = serde_json::to_string(value).unwrap_or_default();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf
}

/// Decode a DAP wire-format message from a byte buffer.
///
/// Returns the parsed JSON value and the number of bytes consumed from the
/// buffer. If the buffer does not contain a complete message, returns a
/// `Transport` error.
pub fn decode_message(data: &[u8]) -> Result<(serde_json::Value, usize), DapError> {
    let separator = b"\r\n\r\n";
    let sep_pos = data
        .windows(separator.len())
        .position(|w| w == separator)
        .ok_or_else(|| DapError::Transport("incomplete header: missing \\r\\n\\r\\n".into()))?;

    let header_part = std::str::from_utf8(&data[..sep_pos])
        .map_err(|e| DapError::Transport(format!("invalid UTF-8 in header: {e}")))?;
    let body_start = sep_pos + separator.len();
    let content_length = parse_content_length(header_part)?;

    let total_consumed = body_start + content_length;
    if data.len() < total_consumed {
        return Err(DapError::Transport(format!(
            "incomplete body: expected {content_length} bytes, have {}",
            data.len() - body_start
        )));
    }

    let value = parse_body(&data[body_start..total_consumed])?;
    Ok((value, total_consumed))
}

/// Parse the Content-Length value from the header section.
fn parse_content_length(header: &str) -> Result<usize, DapError> {
    for line in header.split("\r\n") {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Content-Length:") {
            let value = value.trim();
            let length = value.parse::<usize>().map_err(|e| {
                DapError::Transport(format!("invalid Content-Length value '{value}': {e}"))
            })?;
            if length > MAX_CONTENT_LENGTH {
                return Err(DapError::Transport(format!(
                    "Content-Length {length} exceeds limit of {MAX_CONTENT_LENGTH}"
                )));
            }
            return Ok(length);
        }
    }
    Err(DapError::Transport("missing Content-Length header".into()))
}

fn parse_body(body: &[u8]) -> Result<serde_json::Value, DapError> {
    serde_json::from_slice(body).map_err(|e| DapError::Malformed(format!("JSON parse error: {e}")))
}

/// Reads framed messages from an async byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames. A stream
    /// that ends inside a frame, or a frame that fails to parse, is an error.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, DapError> {
        let mut header = String::new();
        let mut consumed = 0;
        loop {
            let remaining = MAX_HEADER_LENGTH - consumed;
            if remaining == 0 {
                return Err(DapError::Transport("header section too long".into()));
            }
            let mut line = String::new();
            let n = (&mut self.inner)
                .take(remaining as u64)
                .read_line(&mut line)
                .await?;
            if n == 0 {
                if consumed == 0 {
                    return Ok(None);
                }
                return Err(DapError::Transport("stream ended inside header".into()));
            }
            consumed += n;
            if !line.ends_with('\n') {
                if n == remaining {
                    return Err(DapError::Transport("header section too long".into()));
                }
                return Err(DapError::Transport("stream ended inside header".into()));
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            header.push_str(line.trim_end_matches(['\r', '\n']));
            header.push_str("\r\n");
        }

        let content_length = parse_content_length(&header)?;
        let mut body = vec![0u8; content_length];
        self.inner.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                DapError::Transport(format!("incomplete body: expected {content_length} bytes"))
            } else {
                DapError::Io(e)
            }
        })?;
        parse_body(&body).map(Some)
    }
}

/// Writes framed messages to an async byte stream.
///
/// Each message goes out in a single `write_all`, so a writer shared behind
/// a mutex never interleaves two frames.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    pub async fn write_value(&mut self, value: &serde_json::Value) -> Result<(), DapError> {
        let frame = encode_message(value);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut the stream down; the peer observes end of stream.
    pub async fn shutdown(&mut self) -> Result<(), DapError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_serialize_request() {
        let req = serde_json::json!({
            "seq": 1,
            "type": "request",
            "command": "initialize",
            "arguments": {
                "adapterID": "gantry"
            }
        });
        let encoded = encode_message(&req);
        let s = String::from_utf8(encoded.clone()).unwrap();
        assert!(s.starts_with("Content-Length: "));
        assert!(s.contains("\r\n\r\n"));

        let (decoded, consumed) = decode_message(&encoded).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn transport_content_length_counts_bytes() {
        let msg = serde_json::json!({"output": "héllo"});
        let encoded = encode_message(&msg);
        let body = serde_json::to_string(&msg).unwrap();
        let expected = format!("Content-Length: {}\r\n\r\n", body.len());
        assert!(String::from_utf8(encoded).unwrap().starts_with(&expected));
    }

    #[test]
    fn transport_malformed_header() {
        let data = b"Bad-Header: 42\r\n\r\n{}";
        let err = decode_message(data).unwrap_err();
        assert!(
            err.to_string().contains("missing Content-Length"),
            "got: {err}"
        );
    }

    #[test]
    fn transport_incomplete_body() {
        let data = b"Content-Length: 100\r\n\r\n{\"short\":true}";
        let err = decode_message(data).unwrap_err();
        assert!(err.to_string().contains("incomplete body"), "got: {err}");
    }

    #[test]
    fn transport_invalid_json_body() {
        let data = b"Content-Length: 5\r\n\r\n{abc}";
        let err = decode_message(data).unwrap_err();
        assert!(matches!(err, DapError::Malformed(_)), "got: {err}");
    }

    #[test]
    fn transport_oversized_frame_rejected() {
        let data = format!("Content-Length: {}\r\n\r\n", MAX_CONTENT_LENGTH + 1);
        let err = decode_message(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("exceeds limit"), "got: {err}");
    }

    #[test]
    fn transport_multiple_messages() {
        let msg1 = serde_json::json!({"seq": 1, "type": "request", "command": "init"});
        let msg2 = serde_json::json!({"seq": 2, "type": "event", "event": "output"});

        let mut buf = encode_message(&msg1);
        buf.extend_from_slice(&encode_message(&msg2));

        let (decoded1, consumed1) = decode_message(&buf).unwrap();
        assert_eq!(decoded1, msg1);
        let (decoded2, consumed2) = decode_message(&buf[consumed1..]).unwrap();
        assert_eq!(decoded2, msg2);
        assert_eq!(consumed1 + consumed2, buf.len());
    }

    #[test]
    fn transport_missing_separator() {
        let data = b"Content-Length: 2\r\n{}";
        let err = decode_message(data).unwrap_err();
        assert!(err.to_string().contains("incomplete header"), "got: {err}");
    }

    #[tokio::test]
    async fn frame_reader_reads_consecutive_frames() {
        let msg1 = serde_json::json!({"seq": 0, "type": "request", "command": "initialize"});
        let msg2 = serde_json::json!({"seq": 1, "type": "request", "command": "launch"});
        let mut bytes = encode_message(&msg1);
        bytes.extend_from_slice(&encode_message(&msg2));

        let mut reader = FrameReader::new(&bytes[..]);
        assert_eq!(reader.read_frame().await.unwrap(), Some(msg1));
        assert_eq!(reader.read_frame().await.unwrap(), Some(msg2));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn frame_reader_accepts_extra_headers() {
        let bytes = b"Content-Type: application/json\r\nContent-Length: 2\r\n\r\n{}";
        let mut reader = FrameReader::new(&bytes[..]);
        assert_eq!(
            reader.read_frame().await.unwrap(),
            Some(serde_json::json!({}))
        );
    }

    #[tokio::test]
    async fn frame_reader_truncated_body_is_error() {
        let bytes = b"Content-Length: 50\r\n\r\n{\"seq\":";
        let mut reader = FrameReader::new(&bytes[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.to_string().contains("incomplete body"), "got: {err}");
    }

    #[tokio::test]
    async fn frame_reader_truncated_header_is_error() {
        let bytes = b"Content-Length: 5\r\n";
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn frame_reader_bounds_unterminated_header() {
        let bytes = vec![b'X'; 1024 * 1024];
        let mut reader = FrameReader::new(&bytes[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.to_string().contains("header section too long"), "got: {err}");
    }

    #[tokio::test]
    async fn frame_reader_bounds_many_header_lines() {
        let mut bytes = Vec::new();
        while bytes.len() <= MAX_HEADER_LENGTH {
            bytes.extend_from_slice(b"X-Padding: 0123456789\r\n");
        }
        bytes.extend_from_slice(b"Content-Length: 2\r\n\r\n{}");
        let mut reader = FrameReader::new(&bytes[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.to_string().contains("header section too long"), "got: {err}");
    }

    #[tokio::test]
    async fn frame_reader_header_cut_mid_line_is_error() {
        let bytes = b"Content-Len";
        let mut reader = FrameReader::new(&bytes[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.to_string().contains("stream ended inside header"), "got: {err}");
    }

    #[tokio::test]
    async fn frame_writer_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(server);
        let msg = serde_json::json!({"seq": 1, "type": "event", "event": "initialized"});
        writer.write_value(&msg).await.unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = FrameReader::new(client);
        assert_eq!(reader.read_frame().await.unwrap(), Some(msg));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }
}
