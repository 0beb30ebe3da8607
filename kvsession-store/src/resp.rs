//! RESP wire codec
//!
//! Requests go out as arrays of bulk strings; replies come back as one of the
//! five RESP frame types. Both directions are implemented so a server loop can
//! reuse the same codec.

use kvsession_core::{network_error, protocol_error, SessionResult};
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Upper bound on a single bulk string, matching the server-side default
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Deepest array nesting accepted in one frame
const MAX_NESTING: usize = 32;

/// A single request: command name followed by its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    parts: Vec<Vec<u8>>,
}

impl Command {
    pub fn new(name: &str) -> Self {
        Self {
            parts: vec![name.as_bytes().to_vec()],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.parts.push(arg.as_ref().to_vec());
        self
    }

    pub fn ping() -> Self {
        Self::new("PING")
    }

    pub fn auth(credential: &str) -> Self {
        Self::new("AUTH").arg(credential)
    }

    pub fn get(key: &str) -> Self {
        Self::new("GET").arg(key)
    }

    pub fn set(key: &str, value: &str) -> Self {
        Self::new("SET").arg(key).arg(value)
    }

    /// Upper-cased command name
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.parts[0]).to_ascii_uppercase()
    }

    /// Arguments after the command name
    pub fn args(&self) -> &[Vec<u8>] {
        &self.parts[1..]
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.parts.iter().map(Vec::len).sum::<usize>());
        buf.extend_from_slice(format!("*{}\r\n", self.parts.len()).as_bytes());
        for part in &self.parts {
            write_bulk(&mut buf, part);
        }
        buf
    }

    /// Interpret a decoded frame as a client request
    pub fn from_reply(frame: Reply) -> SessionResult<Self> {
        let Reply::Array(Some(items)) = frame else {
            return Err(protocol_error!("request must be an array of bulk strings", "resp"));
        };
        if items.is_empty() {
            return Err(protocol_error!("empty request", "resp"));
        }

        let parts = items
            .into_iter()
            .map(|item| match item {
                Reply::Bulk(Some(bytes)) => Ok(bytes),
                other => Err(protocol_error!(
                    format!("request element must be a bulk string, got {:?}", other),
                    "resp"
                )),
            })
            .collect::<SessionResult<Vec<_>>>()?;

        Ok(Self { parts })
    }
}

/// A decoded reply frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`
    Status(String),
    /// `-ERR message`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$n` payload, `None` for the nil bulk string `$-1`
    Bulk(Option<Vec<u8>>),
    /// `*n` elements, `None` for the nil array `*-1`
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn bulk(value: impl AsRef<[u8]>) -> Self {
        Reply::Bulk(Some(value.as_ref().to_vec()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(status) => {
                buf.push(b'+');
                buf.extend_from_slice(status.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Error(message) => {
                buf.push(b'-');
                buf.extend_from_slice(message.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Integer(value) => {
                buf.extend_from_slice(format!(":{}\r\n", value).as_bytes());
            }
            Reply::Bulk(None) => buf.extend_from_slice(b"$-1\r\n"),
            Reply::Bulk(Some(bytes)) => write_bulk(buf, bytes),
            Reply::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
            Reply::Array(Some(items)) => {
                buf.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode_into(buf);
                }
            }
        }
    }
}

fn write_bulk(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
    buf.extend_from_slice(bytes);
    buf.extend_from_slice(b"\r\n");
}

/// Read one complete frame from `reader`
pub fn read_reply<'a, R>(
    reader: &'a mut R,
) -> Pin<Box<dyn Future<Output = SessionResult<Reply>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    read_frame(reader, 0)
}

fn read_frame<'a, R>(
    reader: &'a mut R,
    depth: usize,
) -> Pin<Box<dyn Future<Output = SessionResult<Reply>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_line(reader).await?;
        let (prefix, body) = match line.split_first() {
            Some((prefix, body)) => (*prefix, body),
            None => return Err(protocol_error!("empty frame header", "resp")),
        };

        match prefix {
            b'+' => Ok(Reply::Status(utf8(body)?)),
            b'-' => Ok(Reply::Error(utf8(body)?)),
            b':' => Ok(Reply::Integer(parse_int(body)?)),
            b'$' => {
                let len = parse_int(body)?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                if len > MAX_BULK_LEN {
                    return Err(protocol_error!(
                        format!("bulk string of {} bytes exceeds limit", len),
                        "resp"
                    ));
                }

                let mut payload = vec![0u8; len as usize + 2];
                reader
                    .read_exact(&mut payload)
                    .await
                    .map_err(|e| network_error!("Failed to read bulk payload", "resp", e))?;
                if !payload.ends_with(b"\r\n") {
                    return Err(protocol_error!("bulk string not terminated by CRLF", "resp"));
                }
                payload.truncate(len as usize);
                Ok(Reply::Bulk(Some(payload)))
            }
            b'*' => {
                let len = parse_int(body)?;
                if len < 0 {
                    return Ok(Reply::Array(None));
                }
                if depth >= MAX_NESTING {
                    return Err(protocol_error!(
                        format!("array nesting exceeds {} levels", MAX_NESTING),
                        "resp"
                    ));
                }

                let mut items = Vec::with_capacity(len.min(1024) as usize);
                for _ in 0..len {
                    items.push(read_frame(reader, depth + 1).await?);
                }
                Ok(Reply::Array(Some(items)))
            }
            other => Err(protocol_error!(
                format!("unexpected frame type byte 0x{:02x}", other),
                "resp"
            )),
        }
    })
}

/// Read a CRLF-terminated header line, returning it without the terminator
async fn read_line<R>(reader: &mut R) -> SessionResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut line = Vec::new();
    let read = reader
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| network_error!("Failed to read frame header", "resp", e))?;

    if read == 0 {
        return Err(network_error!("Connection closed by peer", "resp"));
    }
    if !line.ends_with(b"\r\n") {
        return Err(protocol_error!("frame header not terminated by CRLF", "resp"));
    }

    line.truncate(line.len() - 2);
    Ok(line)
}

fn utf8(bytes: &[u8]) -> SessionResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| protocol_error!("frame header is not valid UTF-8", "resp"))
}

fn parse_int(bytes: &[u8]) -> SessionResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            protocol_error!(
                format!("invalid integer '{}'", String::from_utf8_lossy(bytes)),
                "resp"
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvsession_core::ErrorKind;
    use tokio::io::BufReader;

    async fn decode(bytes: &[u8]) -> SessionResult<Reply> {
        let mut reader = BufReader::new(bytes);
        read_reply(&mut reader).await
    }

    #[test]
    fn test_command_encoding() {
        let command = Command::set("a1b2c3", r#"{"user":"alice"}"#);
        assert_eq!(
            command.encode(),
            b"*3\r\n$3\r\nSET\r\n$6\r\na1b2c3\r\n$16\r\n{\"user\":\"alice\"}\r\n".to_vec()
        );
        assert_eq!(Command::ping().encode(), b"*1\r\n$4\r\nPING\r\n".to_vec());
    }

    #[test]
    fn test_command_name_is_uppercased() {
        let command = Command::new("auth").arg("secret");
        assert_eq!(command.name(), "AUTH");
        assert_eq!(command.args(), &[b"secret".to_vec()]);
    }

    #[tokio::test]
    async fn test_decode_scalar_replies() {
        let test_cases: [(&[u8], Reply); 5] = [
            (b"+PONG\r\n", Reply::Status("PONG".to_string())),
            (
                b"-ERR invalid password\r\n",
                Reply::Error("ERR invalid password".to_string()),
            ),
            (b":-17\r\n", Reply::Integer(-17)),
            (b"$5\r\nhello\r\n", Reply::bulk("hello")),
            (b"$-1\r\n", Reply::Bulk(None)),
        ];

        for (bytes, expected) in test_cases {
            assert_eq!(decode(bytes).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_decode_bulk_with_embedded_crlf() {
        let reply = decode(b"$7\r\nab\r\ncde\r\n").await.unwrap();
        assert_eq!(reply, Reply::bulk("ab\r\ncde"));
    }

    #[tokio::test]
    async fn test_decode_nested_arrays() {
        let reply = decode(b"*3\r\n:1\r\n*2\r\n+a\r\n$-1\r\n*-1\r\n").await.unwrap();
        assert_eq!(
            reply,
            Reply::Array(Some(vec![
                Reply::Integer(1),
                Reply::Array(Some(vec![Reply::Status("a".to_string()), Reply::Bulk(None)])),
                Reply::Array(None),
            ]))
        );
    }

    #[tokio::test]
    async fn test_reply_encoding_decodes_back() {
        let reply = Reply::Array(Some(vec![
            Reply::ok(),
            Reply::Error("ERR nope".to_string()),
            Reply::Integer(3),
            Reply::bulk(""),
            Reply::Bulk(None),
        ]));
        assert_eq!(decode(&reply.encode()).await.unwrap(), reply);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_protocol_errors() {
        let malformed: [&[u8]; 5] = [
            b"?what\r\n",
            b":12x\r\n",
            b"+missing-cr\n",
            b"$3\r\nabcd\r\n",
            b"\r\n",
        ];

        for bytes in malformed {
            let error = decode(bytes).await.unwrap_err();
            assert_eq!(
                error.kind(),
                ErrorKind::Protocol,
                "input {:?} gave {}",
                String::from_utf8_lossy(bytes),
                error
            );
        }
    }

    #[tokio::test]
    async fn test_deeply_nested_array_is_rejected() {
        let mut frame = b"*1\r\n".repeat(5_000);
        frame.extend_from_slice(b":1\r\n");

        let error = decode(&frame).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_nesting_up_to_limit_is_accepted() {
        let mut frame = b"*1\r\n".repeat(MAX_NESTING);
        frame.extend_from_slice(b":1\r\n");

        let mut reply = decode(&frame).await.unwrap();
        for _ in 0..MAX_NESTING {
            reply = match reply {
                Reply::Array(Some(mut items)) => items.remove(0),
                other => panic!("Expected array, got {:?}", other),
            };
        }
        assert_eq!(reply, Reply::Integer(1));
    }

    #[tokio::test]
    async fn test_truncated_input_is_network_error() {
        assert_eq!(decode(b"").await.unwrap_err().kind(), ErrorKind::Network);
        assert_eq!(
            decode(b"$10\r\nshort").await.unwrap_err().kind(),
            ErrorKind::Network
        );
    }

    #[tokio::test]
    async fn test_request_parsing() {
        let frame = decode(&Command::get("session-1").encode()).await.unwrap();
        let command = Command::from_reply(frame).unwrap();
        assert_eq!(command.name(), "GET");
        assert_eq!(command.args(), &[b"session-1".to_vec()]);

        assert!(Command::from_reply(Reply::ok()).is_err());
        assert!(Command::from_reply(Reply::Array(Some(vec![Reply::Integer(1)]))).is_err());
    }
}
