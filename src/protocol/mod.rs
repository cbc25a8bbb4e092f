//! Framed request/response wire protocol
//!
//! Requests and responses are length-prefixed frames, all integers
//! big-endian:
//!
//! ```text
//! request:  [u32 size][u16 api_key][u16 api_version][u32 correlation_id]
//!           [u16 client_id_len][client_id][body...]
//! response: [u32 size][u32 correlation_id][body...]
//! ```
//!
//! `size` counts everything after itself. A `client_id_len` of -1 encodes a
//! null client id. ApiKey 0 is Produce (body: raw record batch; response
//! body: assigned base offset, 8 bytes). ApiKey 1 is Fetch (body:
//! `[u64 offset][u32 max_bytes]`; response body: concatenated batches,
//! empty on no data).

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, StreamlogError};

/// Produce request api key
pub const API_KEY_PRODUCE: i16 = 0;

/// Fetch request api key
pub const API_KEY_FETCH: i16 = 1;

/// Upper bound on a request frame
pub const MAX_REQUEST_SIZE: usize = 100 * 1024 * 1024;

/// Fixed request header: api_key(2) + api_version(2) + correlation_id(4) +
/// client_id_len(2)
pub const FIXED_HEADER_SIZE: usize = 10;

/// Fetch request body: offset(8) + max_bytes(4)
pub const FETCH_BODY_SIZE: usize = 12;

/// Parsed request header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

/// A framed request; `body` stays mutable so the produce path can rewrite
/// the batch's base offset in place.
#[derive(Debug)]
pub struct Request {
    pub header: RequestHeader,
    pub body: BytesMut,
}

/// Read one request frame.
///
/// Returns `Ok(None)` on a clean connection close (EOF at a frame
/// boundary); mid-frame EOF and malformed frames are errors.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>>
where
    R: AsyncRead + Unpin,
{
    let mut size_buf = [0u8; 4];
    match reader.read_exact(&mut size_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_be_bytes(size_buf) as usize;
    if size == 0 || size > MAX_REQUEST_SIZE {
        return Err(StreamlogError::Protocol(format!(
            "invalid request size: {size}"
        )));
    }

    let mut frame = BytesMut::zeroed(size);
    reader.read_exact(&mut frame).await?;

    if frame.len() < FIXED_HEADER_SIZE {
        return Err(StreamlogError::Protocol(format!(
            "request header truncated: {} bytes",
            frame.len()
        )));
    }

    let mut cursor = &frame[..];
    let api_key = cursor.get_i16();
    let api_version = cursor.get_i16();
    let correlation_id = cursor.get_i32();
    let client_id_len = cursor.get_i16();

    let mut consumed = FIXED_HEADER_SIZE;
    let client_id = if client_id_len < 0 {
        None
    } else {
        let len = client_id_len as usize;
        if frame.len() < consumed + len {
            return Err(StreamlogError::Protocol(format!(
                "client id truncated: want {len} bytes"
            )));
        }
        let id = std::str::from_utf8(&frame[consumed..consumed + len])
            .map_err(|_| StreamlogError::Protocol("client id is not utf-8".to_string()))?
            .to_string();
        consumed += len;
        Some(id)
    };

    let body = frame.split_off(consumed);

    Ok(Some(Request {
        header: RequestHeader {
            api_key,
            api_version,
            correlation_id,
            client_id,
        },
        body,
    }))
}

/// Write one response frame: `[size][correlation_id][body]`.
///
/// The header goes out as a single 8-byte write; the body is written
/// directly from the caller's buffer without copying.
pub async fn write_response<W>(writer: &mut W, correlation_id: i32, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(&((4 + body.len()) as u32).to_be_bytes());
    header[4..8].copy_from_slice(&correlation_id.to_be_bytes());

    writer.write_all(&header).await?;
    if !body.is_empty() {
        writer.write_all(body).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Encode a request frame. Used by clients and tests.
pub fn encode_request(
    api_key: i16,
    correlation_id: i32,
    client_id: Option<&str>,
    body: &[u8],
) -> Vec<u8> {
    let client_id_len = client_id.map_or(0, str::len);
    let size = FIXED_HEADER_SIZE + client_id_len + body.len();

    let mut frame = Vec::with_capacity(4 + size);
    frame.extend_from_slice(&(size as u32).to_be_bytes());
    frame.extend_from_slice(&api_key.to_be_bytes());
    frame.extend_from_slice(&0i16.to_be_bytes()); // api_version
    frame.extend_from_slice(&correlation_id.to_be_bytes());
    match client_id {
        Some(id) => {
            frame.extend_from_slice(&(id.len() as i16).to_be_bytes());
            frame.extend_from_slice(id.as_bytes());
        }
        None => frame.extend_from_slice(&(-1i16).to_be_bytes()),
    }
    frame.extend_from_slice(body);
    frame
}
