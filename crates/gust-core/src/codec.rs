use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Delivery, GustError, LoadTestMessage, Result};

const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB limit
const MAX_TOPIC_LEN: usize = u16::MAX as usize;

const ACK_ACCEPTED: u8 = 0;
const ACK_REJECTED: u8 = 1;

/// JSON body encoding for generated messages
pub struct MessageCodec;

impl MessageCodec {
    pub fn encode(msg: &LoadTestMessage) -> std::result::Result<Bytes, serde_json::Error> {
        serde_json::to_vec(msg).map(Bytes::from)
    }

    pub fn decode(data: &[u8]) -> std::result::Result<LoadTestMessage, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// One publish sent to the sink broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRequest {
    pub topic: String,
    pub payload: Bytes,
}

/// Broker response to a [`ProduceRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProduceAck {
    Accepted(Delivery),
    Rejected(String),
}

/// Length-prefixed framing used between the TCP sender and the sink.
///
/// Request frame: `u32 len | u16 topic_len | topic | payload`.
/// Ack frame: `u32 len | u8 status | (i32 partition, i64 offset) or (utf-8 reason)`.
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a produce request with its length prefix
    pub fn encode_request(req: &ProduceRequest) -> Result<BytesMut> {
        if req.topic.len() > MAX_TOPIC_LEN {
            return Err(GustError::Protocol(format!(
                "Topic too long: {} bytes",
                req.topic.len()
            )));
        }

        let body_len = 2 + req.topic.len() + req.payload.len();
        if body_len > MAX_FRAME_SIZE {
            return Err(GustError::Protocol(format!(
                "Frame too large: {} bytes",
                body_len
            )));
        }

        let mut buf = BytesMut::with_capacity(4 + body_len);
        buf.put_u32(body_len as u32);
        buf.put_u16(req.topic.len() as u16);
        buf.extend_from_slice(req.topic.as_bytes());
        buf.extend_from_slice(&req.payload);
        Ok(buf)
    }

    /// Read the next produce request. `None` when the peer closed cleanly.
    pub async fn read_request<R: AsyncRead + Unpin>(
        reader: &mut R,
    ) -> Result<Option<ProduceRequest>> {
        let Some(mut body) = Self::read_frame(reader).await? else {
            return Ok(None);
        };

        if body.remaining() < 2 {
            return Err(GustError::Protocol("Truncated produce frame".to_string()));
        }
        let topic_len = body.get_u16() as usize;
        if body.remaining() < topic_len {
            return Err(GustError::Protocol(format!(
                "Topic length {} exceeds frame",
                topic_len
            )));
        }

        let topic = String::from_utf8(body.split_to(topic_len).to_vec())
            .map_err(|e| GustError::Protocol(format!("Invalid topic: {}", e)))?;

        Ok(Some(ProduceRequest {
            topic,
            payload: body,
        }))
    }

    pub async fn write_request<W: AsyncWrite + Unpin>(
        writer: &mut W,
        req: &ProduceRequest,
    ) -> Result<()> {
        let encoded = Self::encode_request(req)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    pub fn encode_ack(ack: &ProduceAck) -> BytesMut {
        let mut body = BytesMut::new();
        match ack {
            ProduceAck::Accepted(delivery) => {
                body.put_u8(ACK_ACCEPTED);
                body.put_i32(delivery.partition);
                body.put_i64(delivery.offset);
            }
            ProduceAck::Rejected(reason) => {
                body.put_u8(ACK_REJECTED);
                body.extend_from_slice(reason.as_bytes());
            }
        }

        let mut buf = BytesMut::with_capacity(4 + body.len());
        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(&body);
        buf
    }

    pub async fn read_ack<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ProduceAck> {
        let mut body = Self::read_frame(reader).await?.ok_or_else(|| {
            GustError::Protocol("Connection closed before acknowledgement".to_string())
        })?;

        if !body.has_remaining() {
            return Err(GustError::Protocol("Empty acknowledgement".to_string()));
        }
        match body.get_u8() {
            ACK_ACCEPTED => {
                if body.remaining() < 12 {
                    return Err(GustError::Protocol("Truncated acknowledgement".to_string()));
                }
                Ok(ProduceAck::Accepted(Delivery {
                    partition: body.get_i32(),
                    offset: body.get_i64(),
                }))
            }
            ACK_REJECTED => Ok(ProduceAck::Rejected(
                String::from_utf8_lossy(&body).into_owned(),
            )),
            other => Err(GustError::Protocol(format!(
                "Unknown acknowledgement status {}",
                other
            ))),
        }
    }

    pub async fn write_ack<W: AsyncWrite + Unpin>(writer: &mut W, ack: &ProduceAck) -> Result<()> {
        writer.write_all(&Self::encode_ack(ack)).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Bytes>> {
        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len > MAX_FRAME_SIZE {
            return Err(GustError::Protocol(format!(
                "Frame too large: {} bytes",
                len
            )));
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).await?;
        Ok(Some(Bytes::from(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_frame_round_trip() {
        let message = LoadTestMessage::new(2, 41);
        let req = ProduceRequest {
            topic: "test-topic".to_string(),
            payload: MessageCodec::encode(&message).unwrap(),
        };

        let encoded = FrameCodec::encode_request(&req).unwrap();
        let mut reader = &encoded[..];
        let decoded = FrameCodec::read_request(&mut reader).await.unwrap().unwrap();

        assert_eq!(decoded, req);
        assert_eq!(MessageCodec::decode(&decoded.payload).unwrap(), message);
    }

    #[tokio::test]
    async fn test_read_request_on_closed_stream() {
        let mut reader: &[u8] = &[];
        assert!(FrameCodec::read_request(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_oversized_frame() {
        let mut header = BytesMut::new();
        header.put_u32((MAX_FRAME_SIZE + 1) as u32);
        let mut reader = &header[..];

        let err = FrameCodec::read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, GustError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_rejected_ack_carries_reason() {
        let encoded = FrameCodec::encode_ack(&ProduceAck::Rejected("unknown topic".to_string()));
        let mut reader = &encoded[..];

        let ack = FrameCodec::read_ack(&mut reader).await.unwrap();
        assert_eq!(ack, ProduceAck::Rejected("unknown topic".to_string()));
    }

    #[tokio::test]
    async fn test_truncated_ack_is_protocol_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_u8(ACK_ACCEPTED);
        buf.put_u16(7);
        let mut reader = &buf[..];

        assert!(matches!(
            FrameCodec::read_ack(&mut reader).await,
            Err(GustError::Protocol(_))
        ));
    }
}
