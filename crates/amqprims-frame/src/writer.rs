use amqprims_codec::{Performative, SaslPerformative};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::frame::{
    AMQP_FRAME_TYPE, DEFAULT_DOFF, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, SASL_FRAME_TYPE,
};
use crate::header::ProtocolHeader;
use crate::pool::OutgoingFrame;

/// Serializes headers and frames, enforcing the peer's max-frame-size.
///
/// Wire format of a frame:
/// ```text
/// ┌────────────┬──────┬──────┬─────────┬─────────────┬─────────┐
/// │ Size (4B)  │ DOFF │ Type │ Channel │ Performative│ Payload │
/// │ BE, total  │ (1B) │ (1B) │ (2B BE) │ (described) │         │
/// └────────────┴──────┴──────┴─────────┴─────────────┴─────────┘
/// ```
#[derive(Debug, Clone)]
pub struct FrameWriter {
    max_frame_size: u32,
}

impl FrameWriter {
    pub fn new(max_frame_size: u32) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Apply the max-frame-size advertised by the peer.
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    pub fn write_header(&self, header: &ProtocolHeader, dst: &mut BytesMut) {
        dst.put_slice(header.as_bytes());
    }

    /// An empty AMQP frame on channel 0.
    pub fn write_heartbeat(&self, dst: &mut BytesMut) {
        put_frame_header(FRAME_HEADER_SIZE, AMQP_FRAME_TYPE, 0, dst);
    }

    pub fn write_sasl(&self, body: &SaslPerformative, dst: &mut BytesMut) -> Result<()> {
        let mut encoded = BytesMut::new();
        body.encode(&mut encoded);
        let size = FRAME_HEADER_SIZE + encoded.len();
        self.check_size(size, body.name())?;
        dst.reserve(size);
        put_frame_header(size, SASL_FRAME_TYPE, 0, dst);
        dst.put_slice(&encoded);
        Ok(())
    }

    /// Write an unpooled frame; fails if the payload does not fit.
    pub fn write_performative(
        &self,
        channel: u16,
        body: &Performative,
        payload: Option<&[u8]>,
        dst: &mut BytesMut,
    ) -> Result<()> {
        let mut encoded = BytesMut::new();
        body.encode(&mut encoded);
        let payload = payload.unwrap_or_default();
        let size = FRAME_HEADER_SIZE + encoded.len() + payload.len();
        if size > self.max_frame_size as usize {
            return Err(FrameError::PayloadTooLarge {
                performative: body.name(),
                size: payload.len(),
                max: self.max_frame_size as usize,
            });
        }
        dst.reserve(size);
        put_frame_header(size, AMQP_FRAME_TYPE, channel, dst);
        dst.put_slice(&encoded);
        dst.put_slice(payload);
        Ok(())
    }

    /// Write a pooled frame.
    ///
    /// When the payload does not fit, the frame's payload-too-large handler
    /// decides: without one the write fails naming the performative; with
    /// one the (possibly adjusted) performative is written with as much
    /// payload as fits and the rest stays in the frame.
    pub fn write_frame(&self, frame: &mut OutgoingFrame, dst: &mut BytesMut) -> Result<()> {
        let max = self.max_frame_size as usize;
        let (channel, body, payload, handler) = frame.parts_mut();
        let channel =
            channel.ok_or_else(|| FrameError::MalformedFrame("frame is not acquired".into()))?;
        let body =
            body.ok_or_else(|| FrameError::MalformedFrame("frame has no performative".into()))?;

        let mut encoded = BytesMut::new();
        body.encode(&mut encoded);
        let payload_len = payload.as_ref().map_or(0, Bytes::len);
        if FRAME_HEADER_SIZE + encoded.len() > max {
            return Err(FrameError::PayloadTooLarge {
                performative: body.name(),
                size: payload_len,
                max,
            });
        }
        let mut available = max - FRAME_HEADER_SIZE - encoded.len();

        if payload_len > available {
            let Some(handler) = handler else {
                return Err(FrameError::PayloadTooLarge {
                    performative: body.name(),
                    size: payload_len,
                    max,
                });
            };
            handler(&mut *body)?;
            encoded.clear();
            body.encode(&mut encoded);
            available = max.saturating_sub(FRAME_HEADER_SIZE + encoded.len());
            if available == 0 {
                return Err(FrameError::PayloadTooLarge {
                    performative: body.name(),
                    size: payload_len,
                    max,
                });
            }
        }

        let chunk = match payload.take() {
            Some(mut bytes) if bytes.len() > available => {
                let chunk = bytes.split_to(available);
                *payload = Some(bytes);
                chunk
            }
            Some(bytes) => bytes,
            None => Bytes::new(),
        };

        let size = FRAME_HEADER_SIZE + encoded.len() + chunk.len();
        dst.reserve(size);
        put_frame_header(size, AMQP_FRAME_TYPE, channel, dst);
        dst.put_slice(&encoded);
        dst.put_slice(&chunk);
        Ok(())
    }

    fn check_size(&self, size: usize, performative: &'static str) -> Result<()> {
        if size > self.max_frame_size as usize {
            return Err(FrameError::PayloadTooLarge {
                performative,
                size,
                max: self.max_frame_size as usize,
            });
        }
        Ok(())
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

fn put_frame_header(size: usize, frame_type: u8, channel: u16, dst: &mut BytesMut) {
    dst.put_u32(size as u32);
    dst.put_u8(DEFAULT_DOFF);
    dst.put_u8(frame_type);
    dst.put_u16(channel);
}

#[cfg(test)]
mod tests {
    use amqprims_codec::{Begin, Transfer};

    use super::*;
    use crate::pool::FramePool;

    #[test]
    fn test_heartbeat_bytes() {
        let mut buf = BytesMut::new();
        FrameWriter::default().write_heartbeat(&mut buf);
        assert_eq!(buf.to_vec(), vec![0, 0, 0, 8, 2, 0, 0, 0]);
    }

    #[test]
    fn test_frame_header_layout() {
        let mut pool = FramePool::default();
        let handle = pool.acquire(
            7,
            Begin {
                next_outgoing_id: 1,
                incoming_window: 1,
                outgoing_window: 1,
                ..Begin::default()
            },
            None,
        );
        let mut buf = BytesMut::new();
        FrameWriter::default()
            .write_frame(pool.get_mut(&handle), &mut buf)
            .unwrap();

        let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(size, buf.len());
        assert_eq!(buf[4], DEFAULT_DOFF);
        assert_eq!(buf[5], AMQP_FRAME_TYPE);
        assert_eq!(u16::from_be_bytes([buf[6], buf[7]]), 7);
        pool.release(handle);
    }

    #[test]
    fn test_oversized_payload_fails_naming_performative() {
        let mut pool = FramePool::default();
        let handle = pool.acquire(0, Transfer::default(), Some(Bytes::from(vec![0u8; 1024])));
        let mut buf = BytesMut::new();
        let err = FrameWriter::new(512)
            .write_frame(pool.get_mut(&handle), &mut buf)
            .unwrap_err();

        assert!(matches!(
            err,
            FrameError::PayloadTooLarge {
                performative: "Transfer",
                size: 1024,
                max: 512
            }
        ));
        assert!(err.to_string().contains("Cannot transmit performative Transfer"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_custom_handler_splits_payload() {
        let mut pool = FramePool::default();
        let handle = pool.acquire(0, Transfer::default(), Some(Bytes::from(vec![1u8; 1024])));
        pool.get_mut(&handle)
            .set_payload_too_large_handler(Box::new(|body| {
                if let Performative::Transfer(transfer) = body {
                    transfer.more = true;
                }
                Ok(())
            }));

        let writer = FrameWriter::new(512);
        let mut buf = BytesMut::new();
        writer.write_frame(pool.get_mut(&handle), &mut buf).unwrap();

        assert_eq!(buf.len(), 512);
        let remaining = pool.get(&handle).payload().map_or(0, Bytes::len);
        assert!(remaining > 0 && remaining < 1024);
        match pool.get(&handle).body() {
            Some(Performative::Transfer(transfer)) => assert!(transfer.more),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_write_sasl_uses_sasl_type() {
        let mut buf = BytesMut::new();
        FrameWriter::default()
            .write_sasl(
                &SaslPerformative::Mechanisms(amqprims_codec::SaslMechanisms {
                    mechanisms: vec!["ANONYMOUS".into()],
                }),
                &mut buf,
            )
            .unwrap();
        assert_eq!(buf[5], SASL_FRAME_TYPE);
    }
}
