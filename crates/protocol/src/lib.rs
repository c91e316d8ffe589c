//! Wire protocol for client-server communication.
//!
//! Each direction is a sequence of newline-delimited UTF-8 JSON objects. A
//! request is `{"type": ..., "payload": ...}`; a response always carries a
//! `type` field with its remaining fields inlined. A connection that
//! accumulates more than 1 MiB without a newline is terminated.

use common::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Hard cap on one frame: anything longer without a newline is a protocol
/// violation and closes the connection.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Request frame sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Request {
    Auth { username: String, password: String },
    Use { database: String },
    Query {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<HashMap<String, Value>>,
    },
    Ping,
    ListDatabases,
    DropDatabase { database: String },
    Stats,
}

/// The executor's native output, embedded in `query_result` frames: rows, a
/// status message, an aggregate number, or an EXPLAIN plan object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Message(String),
    /// Aggregate number (or null), or an EXPLAIN plan object.
    Value(Value),
}

/// Response frame sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Welcome {
        server: String,
        version: String,
        auth_required: bool,
    },
    AuthSuccess,
    UseSuccess { database: String },
    QueryResult {
        result: QueryOutput,
        query: String,
        #[serde(rename = "executionTime")]
        execution_time_ms: f64,
    },
    Pong { timestamp: u64 },
    DatabaseList { databases: Vec<String> },
    DropSuccess { database: String },
    Stats {
        uptime_seconds: u64,
        active_connections: u64,
        total_connections: u64,
        total_queries: u64,
        total_errors: u64,
        workers: u64,
    },
    Error { error: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error { error: message.into() }
    }
}

/// Newline-delimited JSON framing over async streams.
pub mod frame {
    use super::MAX_FRAME_BYTES;
    use serde::{de::DeserializeOwned, Serialize};
    use std::io;
    use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

    /// Serialize `message` and write it as one `\n`-terminated line.
    pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let mut line = serde_json::to_vec(message)
            .map_err(|e| io::Error::other(format!("encode failed: {e}")))?;
        line.push(b'\n');
        writer.write_all(&line).await
    }

    /// Read one line and decode it. Returns `Ok(None)` on a clean EOF before
    /// any bytes, and an `InvalidData` error when the line exceeds
    /// [`MAX_FRAME_BYTES`] or fails to decode.
    pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<Option<T>>
    where
        R: AsyncBufReadExt + Unpin,
        T: DeserializeOwned,
    {
        let mut line = Vec::new();
        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                ));
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(idx) => {
                    line.extend_from_slice(&available[..idx]);
                    reader.consume(idx + 1);
                    break;
                }
                None => {
                    let len = available.len();
                    line.extend_from_slice(available);
                    reader.consume(len);
                    if line.len() > MAX_FRAME_BYTES {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "frame exceeds 1 MiB without a newline",
                        ));
                    }
                }
            }
        }
        if line.len() > MAX_FRAME_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame exceeds 1 MiB without a newline",
            ));
        }
        let message = serde_json::from_slice(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad frame: {e}")))?;
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;
    use tokio::io::BufReader;

    #[test]
    fn requests_use_type_and_payload() {
        let req = Request::Query {
            query: "SELECT * FROM t".into(),
            params: None,
        };
        let text = serde_json::to_string(&req).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], json!("query"));
        assert_eq!(value["payload"]["query"], json!("SELECT * FROM t"));

        let back: Request = serde_json::from_str(&text).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn responses_inline_their_fields() {
        let resp = Response::error("nope");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value, json!({"type": "error", "error": "nope"}));

        let resp = Response::QueryResult {
            result: QueryOutput::Value(json!(3)),
            query: "SELECT COUNT(*) FROM t".into(),
            execution_time_ms: 1.25,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["type"], json!("query_result"));
        assert_eq!(value["result"], json!(3));
        assert_eq!(value["executionTime"], json!(1.25));
    }

    #[test]
    fn query_output_embeds_naturally() {
        let rows = QueryOutput::Rows(vec![Row::new()]);
        assert_eq!(serde_json::to_value(&rows).unwrap(), json!([{}]));
        let msg = QueryOutput::Message("ok".into());
        assert_eq!(serde_json::to_value(&msg).unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let mut buf = Vec::new();
        frame::write_frame(&mut buf, &Request::Ping).await.unwrap();
        assert!(buf.ends_with(b"\n"));

        let mut reader = BufReader::new(buf.as_slice());
        let back: Request = frame::read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(back, Request::Ping);

        // EOF afterwards.
        let end: Option<Request> = frame::read_frame(&mut reader).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut buf = vec![b'x'; MAX_FRAME_BYTES + 10];
        buf.push(b'\n');
        let mut reader = BufReader::new(buf.as_slice());
        let result: io::Result<Option<Request>> = frame::read_frame(&mut reader).await;
        assert!(result.is_err());
    }

}
