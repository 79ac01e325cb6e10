//! Codec shared by both wire surfaces.
//!
//! Request format: one JSON object per line, tagged by `"op"`. Response
//! format: `{"ok": ...}` or `{"err": {"error": "..."}}`, one per line.

use std::io::{BufRead, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on a single request or response line.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds {max} bytes (got {got})")]
    FrameTooLarge { max: usize, got: usize },

    #[error("invalid message: {reason}")]
    Invalid { reason: String },

    #[error("invalid address `{addr}`")]
    Address { addr: String },

    #[error("remote error: {reason}")]
    Remote { reason: String },

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A response envelope: the payload on success, a reported reason
/// otherwise.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply<T> {
    Ok(T),
    Err(ErrorBody),
}

impl<T> Reply<T> {
    pub fn err(reason: impl Into<String>) -> Self {
        Reply::Err(ErrorBody {
            error: reason.into(),
        })
    }

    pub fn into_result(self) -> Result<T, RpcError> {
        match self {
            Reply::Ok(payload) => Ok(payload),
            Reply::Err(body) => Err(RpcError::Remote { reason: body.error }),
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, RpcError> {
    let mut bytes = serde_json::to_vec(message).map_err(|err| RpcError::Invalid {
        reason: err.to_string(),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, RpcError> {
    if line.len() > MAX_FRAME_BYTES {
        return Err(RpcError::FrameTooLarge {
            max: MAX_FRAME_BYTES,
            got: line.len(),
        });
    }
    serde_json::from_str(line).map_err(|err| RpcError::Invalid {
        reason: err.to_string(),
    })
}

pub fn send<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), RpcError> {
    let bytes = encode(message)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read one line; `None` at end of stream.
pub fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, RpcError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if line.len() > MAX_FRAME_BYTES {
        return Err(RpcError::FrameTooLarge {
            max: MAX_FRAME_BYTES,
            got: line.len(),
        });
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}
