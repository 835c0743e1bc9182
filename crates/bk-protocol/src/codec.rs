use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::error::{ProtocolError, ProtocolResult};

/// Upper bound on a single frame body, matching the bookie-side default.
pub const MAX_FRAME_SIZE: usize = 5 * 1024 * 1024;

/// Length of the big-endian frame size prefix.
const LEN_PREFIX: usize = 4;

/// Codec for bookie protocol frames: `[4 bytes len][protobuf body]`.
///
/// The length excludes the prefix itself.
pub struct BookieCodec;

impl BookieCodec {
    /// Encode a message with its length prefix.
    pub fn encode<M: Message>(msg: &M) -> ProtocolResult<Bytes> {
        let len = msg.encoded_len();
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        let mut buf = BytesMut::with_capacity(LEN_PREFIX + len);
        buf.put_u32(len as u32);
        msg.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one framed message from the front of `data`.
    /// Returns (message, bytes_consumed).
    pub fn decode<M: Message + Default>(data: &[u8]) -> ProtocolResult<(M, usize)> {
        if data.len() < LEN_PREFIX {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge { size: len, max: MAX_FRAME_SIZE });
        }
        let total = LEN_PREFIX + len;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let msg = Self::decode_body(&data[LEN_PREFIX..total])?;
        Ok((msg, total))
    }

    /// Decode a frame body (no length prefix).
    pub fn decode_body<M: Message + Default>(body: &[u8]) -> ProtocolResult<M> {
        Ok(M::decode(body)?)
    }

    /// Read one frame body off a stream.
    ///
    /// Waits until the 4-byte prefix and then exactly that many body bytes
    /// have arrived; a partially received frame never surfaces.
    pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Bytes> {
        let len = reader.read_u32().await? as usize;
        if len > MAX_FRAME_SIZE {
            warn!(len, max = MAX_FRAME_SIZE, "oversized frame announced by peer");
            return Err(ProtocolError::MessageTooLarge { size: len, max: MAX_FRAME_SIZE });
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Ok(Bytes::from(body))
    }

    /// Encode a message and write it as a single frame, then flush.
    pub async fn write_frame<W: AsyncWrite + Unpin, M: Message>(
        writer: &mut W,
        msg: &M,
    ) -> ProtocolResult<()> {
        let frame = Self::encode(msg)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, Response, StatusCode};

    fn sample_request() -> Request {
        Request::add_entry(
            42,
            1,
            0,
            Bytes::from_static(&[7u8; 20]),
            Bytes::from_static(b"frame-bytes"),
        )
    }

    #[test]
    fn prefix_excludes_itself() {
        let req = sample_request();
        let frame = BookieCodec::encode(&req).unwrap();
        let len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);
        assert_eq!(len, req.encoded_len());
    }

    #[test]
    fn decode_reports_consumed() {
        let resp = Response::add_entry(42, StatusCode::Eok, 1, 0);
        let mut data = BookieCodec::encode(&resp).unwrap().to_vec();
        let frame_len = data.len();
        data.extend_from_slice(b"trailing");
        let (decoded, consumed): (Response, usize) = BookieCodec::decode(&data).unwrap();
        assert_eq!(consumed, frame_len);
        assert_eq!(decoded, resp);
    }

    #[test]
    fn decode_truncated() {
        let err = BookieCodec::decode::<Response>(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));

        let frame = BookieCodec::encode(&sample_request()).unwrap();
        let err = BookieCodec::decode::<Request>(&frame[..frame.len() - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[test]
    fn decode_oversized() {
        let data = [0xFFu8, 0xFF, 0xFF, 0xFF, 0];
        let err = BookieCodec::decode::<Response>(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[test]
    fn decode_garbage_body() {
        let data = [0u8, 0, 0, 2, 0xFF, 0xFF];
        let err = BookieCodec::decode::<Response>(&data).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn encode_rejects_oversized_message() {
        let req = Request::add_entry(
            1,
            1,
            0,
            Bytes::new(),
            Bytes::from(vec![0u8; MAX_FRAME_SIZE + 1]),
        );
        assert!(matches!(
            BookieCodec::encode(&req),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn read_frame_waits_for_split_writes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let frame = BookieCodec::encode(&sample_request()).unwrap();
        let (head, tail) = frame.split_at(6);
        let head = head.to_vec();
        let tail = tail.to_vec();

        let writer = tokio::spawn(async move {
            client.write_all(&head).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            client.write_all(&tail).await.unwrap();
            client
        });

        let body = BookieCodec::read_frame(&mut server).await.unwrap();
        let decoded: Request = BookieCodec::decode_body(&body).unwrap();
        assert_eq!(decoded, sample_request());
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn read_frame_eof_is_io_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = BookieCodec::read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[tokio::test]
    async fn write_then_read() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let resp = Response::add_entry(3, StatusCode::Efenced, 8, 9);
        BookieCodec::write_frame(&mut client, &resp).await.unwrap();
        let body = BookieCodec::read_frame(&mut server).await.unwrap();
        let decoded: Response = BookieCodec::decode_body(&body).unwrap();
        assert_eq!(decoded.txn_id(), 3);
        assert_eq!(decoded.add_outcome().unwrap(), StatusCode::Efenced);
    }
}
