use serde_json::Value;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest `Content-Length` body accepted before the frame is rejected.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// How a message was delimited on the wire. Replies reuse the framing of
/// the message they answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// One JSON document per line (MCP stdio transport).
    Line,
    /// `Content-Length` header block followed by the JSON body.
    ContentLength,
}

#[derive(Debug)]
pub enum Frame {
    Message(Value),
    /// The frame was delimited correctly but is not valid JSON.
    Malformed(String),
}

/// Read the next message. `Ok(None)` means clean EOF.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<(Framing, Frame)>>
where
    R: AsyncBufRead + Unpin,
{
    let first = loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            break trimmed.to_string();
        }
    };

    if !is_header_line(&first) {
        let frame = match serde_json::from_str(&first) {
            Ok(value) => Frame::Message(value),
            Err(e) => Frame::Malformed(e.to_string()),
        };
        return Ok(Some((Framing::Line, frame)));
    }

    let mut content_length = parse_content_length(&first)?;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(len) = parse_content_length(line)? {
            content_length = Some(len);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "Missing Content-Length header")
    })?;
    if content_length > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Content-Length {content_length} exceeds the {MAX_FRAME_BYTES} byte limit"),
        ));
    }
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    let frame = match serde_json::from_slice(&payload) {
        Ok(value) => Frame::Message(value),
        Err(e) => Frame::Malformed(e.to_string()),
    };
    Ok(Some((Framing::ContentLength, frame)))
}

/// `Name: value` with an RFC 7230 token as the name. Anything else on the
/// first line of a message is treated as a line-delimited JSON attempt.
fn is_header_line(line: &str) -> bool {
    line.split_once(':').is_some_and(|(name, _)| {
        !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
    })
}

fn parse_content_length(line: &str) -> io::Result<Option<usize>> {
    let Some((name, value)) = line.split_once(':') else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Expected a JSON message or header line, got '{line}'"),
        ));
    };
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return Ok(None);
    }
    value.trim().parse::<usize>().map(Some).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "Invalid Content-Length header")
    })
}

pub async fn write_message<W>(writer: &mut W, framing: Framing, value: &Value) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::Line => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
    }
    writer.flush().await
}

/// Two-space indented JSON, the format tool replies are rendered in.
pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_line_delimited_messages_and_skips_blank_lines() {
        let input = "\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\n[1,2]\n";
        let mut reader = BufReader::new(input.as_bytes());

        let (framing, frame) = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(framing, Framing::Line);
        match frame {
            Frame::Message(value) => assert_eq!(value["method"], "ping"),
            Frame::Malformed(e) => panic!("unexpected parse error: {e}"),
        }

        let (_, frame) = read_message(&mut reader).await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Message(Value::Array(_))));
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_content_length_frames_with_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#;
        let input = format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut reader = BufReader::new(input.as_bytes());

        let (framing, frame) = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(framing, Framing::ContentLength);
        match frame {
            Frame::Message(value) => assert_eq!(value["id"], 7),
            Frame::Malformed(e) => panic!("unexpected parse error: {e}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_line_is_reported_not_fatal() {
        let mut reader = BufReader::new("{not json}\n".as_bytes());
        let (_, frame) = read_message(&mut reader).await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Malformed(_)));
    }

    #[tokio::test]
    async fn stray_text_and_scalars_are_line_frames() {
        let input = "hello there\n42\n\"ping\"\n{\"id\":1}\n";
        let mut reader = BufReader::new(input.as_bytes());

        let (framing, frame) = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(framing, Framing::Line);
        assert!(matches!(frame, Frame::Malformed(_)));

        let (_, frame) = read_message(&mut reader).await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Message(Value::Number(_))));

        let (_, frame) = read_message(&mut reader).await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Message(Value::String(_))));

        let (_, frame) = read_message(&mut reader).await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Message(Value::Object(_))));
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected_without_allocating() {
        let input = "Content-Length: 18446744073709551615\r\n\r\n{}";
        let mut reader = BufReader::new(input.as_bytes());
        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let input = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = BufReader::new(input.as_bytes());
        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn invalid_content_length_is_an_io_error() {
        let mut reader = BufReader::new("Content-Length: lots\r\n\r\n{}".as_bytes());
        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_header_block_is_unexpected_eof() {
        let mut reader = BufReader::new("Content-Length: 10\r\n".as_bytes());
        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn writes_both_framings() {
        let value = json!({ "ok": true });

        let mut line = Vec::new();
        write_message(&mut line, Framing::Line, &value).await.unwrap();
        assert_eq!(String::from_utf8(line).unwrap(), "{\"ok\":true}\n");

        let mut framed = Vec::new();
        write_message(&mut framed, Framing::ContentLength, &value)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(framed).unwrap(),
            "Content-Length: 11\r\nContent-Type: application/json\r\n\r\n{\"ok\":true}"
        );
    }
}
