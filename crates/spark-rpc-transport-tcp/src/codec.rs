//! 线上帧编解码。
//!
//! # 教案式说明
//! - **帧格式 (What)**：外层是 `LengthDelimitedCodec` 的 4 字节大端长度前缀；
//!   帧体依次为 4 字节大端头部长度、JSON 编码的头部、原样的载荷字节；
//! - **头部**：请求携带 `id`、`method`、`metadata`；响应携带 `id` 与 `status`
//!   （`success` 或带错误码的 `failure`）；
//! - **实现 (How)**：客户端与服务端各用一个编解码器，方向不同但共享分帧逻辑。

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use spark_rpc::wire::{Metadata, WireRequest, WireResponse, WireStatus};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::FrameError;

/// 单帧上限。
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

const HEADER_LEN_BYTES: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct RequestHeader {
    id: u64,
    method: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseHeader {
    id: u64,
    #[serde(flatten)]
    status: WireStatus,
}

fn framing() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

fn write_body<H: Serialize>(header: &H, payload: &[u8]) -> Result<Bytes, FrameError> {
    let header = serde_json::to_vec(header)?;
    let header_len = u32::try_from(header.len()).map_err(|_| {
        FrameError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "frame header exceeds u32::MAX bytes",
        ))
    })?;
    let mut body = BytesMut::with_capacity(HEADER_LEN_BYTES + header.len() + payload.len());
    body.put_u32(header_len);
    body.put_slice(&header);
    body.put_slice(payload);
    Ok(body.freeze())
}

fn read_body<H: DeserializeOwned>(mut body: BytesMut) -> Result<(H, Bytes), FrameError> {
    if body.len() < HEADER_LEN_BYTES {
        return Err(FrameError::Truncated {
            len: body.len(),
            header: HEADER_LEN_BYTES,
        });
    }
    let header_len = body.get_u32() as usize;
    if body.len() < header_len {
        return Err(FrameError::Truncated {
            len: body.len(),
            header: header_len,
        });
    }
    let header = body.split_to(header_len);
    let header = serde_json::from_slice(&header)?;
    Ok((header, body.freeze()))
}

/// 客户端编解码器：写请求、读响应。
#[derive(Debug)]
pub struct ClientCodec {
    framing: LengthDelimitedCodec,
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self { framing: framing() }
    }
}

impl Encoder<WireRequest> for ClientCodec {
    type Error = FrameError;

    fn encode(&mut self, item: WireRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = RequestHeader {
            id: item.id,
            method: item.method,
            metadata: item.metadata,
        };
        let body = write_body(&header, &item.payload)?;
        self.framing.encode(body, dst)?;
        Ok(())
    }
}

impl Decoder for ClientCodec {
    type Item = WireResponse;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(body) = self.framing.decode(src)? else {
            return Ok(None);
        };
        let (header, payload): (ResponseHeader, Bytes) = read_body(body)?;
        Ok(Some(WireResponse {
            id: header.id,
            status: header.status,
            payload,
        }))
    }
}

/// 服务端编解码器：读请求、写响应。
#[derive(Debug)]
pub struct ServerCodec {
    framing: LengthDelimitedCodec,
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self { framing: framing() }
    }
}

impl Decoder for ServerCodec {
    type Item = WireRequest;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(body) = self.framing.decode(src)? else {
            return Ok(None);
        };
        let (header, payload): (RequestHeader, Bytes) = read_body(body)?;
        Ok(Some(WireRequest {
            id: header.id,
            method: header.method,
            metadata: header.metadata,
            payload,
        }))
    }
}

impl Encoder<WireResponse> for ServerCodec {
    type Error = FrameError;

    fn encode(&mut self, item: WireResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = ResponseHeader {
            id: item.id,
            status: item.status,
        };
        let body = write_body(&header, &item.payload)?;
        self.framing.encode(body, dst)?;
        Ok(())
    }
}
