use amqprims_codec::{Performative, SaslPerformative};
use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::error::{FrameError, Result};
use crate::frame::{
    IncomingFrame, ProtocolFrame, SaslFrame, AMQP_FRAME_TYPE, DEFAULT_DOFF,
    DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, SASL_FRAME_TYPE,
};
use crate::header::{ProtocolHeader, HEADER_SIZE};

/// Configuration for frame parsing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest frame accepted from the peer. Default: 64 KiB.
    pub max_frame_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    AwaitingHeader,
    Framing,
    Failed,
}

/// Resumable frame parser.
///
/// Starts out expecting a protocol header, then decodes frames. Returns
/// `Ok(None)` whenever the buffer does not yet hold a complete unit; the
/// unconsumed bytes stay in the buffer for the next call. Any error is
/// terminal: the parser refuses further input.
///
/// After decoding a SASL outcome the parser expects a protocol header again,
/// since the peer restarts with the AMQP header once authentication ends.
#[derive(Debug, Clone)]
pub struct FrameParser {
    state: ParserState,
    config: FrameConfig,
}

impl FrameParser {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            state: ParserState::AwaitingHeader,
            config,
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Update the maximum accepted frame size (after Open is sent).
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.config.max_frame_size = max_frame_size;
    }

    /// Expect a protocol header at the next frame boundary. Used by the side
    /// that sends the SASL outcome, since it never decodes one.
    pub fn expect_header(&mut self) {
        if self.state != ParserState::Failed {
            self.state = ParserState::AwaitingHeader;
        }
    }

    pub fn is_awaiting_header(&self) -> bool {
        self.state == ParserState::AwaitingHeader
    }

    pub fn is_failed(&self) -> bool {
        self.state == ParserState::Failed
    }

    /// Decode the next header or frame from `src`.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<IncomingFrame>> {
        let result = match self.state {
            ParserState::AwaitingHeader => self.decode_header(src),
            ParserState::Framing => self.decode_frame(src),
            ParserState::Failed => Err(FrameError::MalformedFrame(
                "parser failed on an earlier frame".into(),
            )),
        };
        if result.is_err() {
            self.state = ParserState::Failed;
        }
        result
    }

    fn decode_header(&mut self, src: &mut BytesMut) -> Result<Option<IncomingFrame>> {
        if src.len() < HEADER_SIZE {
            // a partial header can already be rejected
            if !b"AMQP".starts_with(&src[..src.len().min(4)]) {
                let mut bytes = [0u8; HEADER_SIZE];
                bytes[..src.len()].copy_from_slice(&src[..]);
                return Err(FrameError::InvalidHeader(bytes));
            }
            return Ok(None);
        }
        let mut bytes = [0u8; HEADER_SIZE];
        src.copy_to_slice(&mut bytes);
        let header = ProtocolHeader::from_bytes(bytes)?;
        trace!(%header, "header received");
        self.state = ParserState::Framing;
        Ok(Some(IncomingFrame::Header(header)))
    }

    fn decode_frame(&mut self, src: &mut BytesMut) -> Result<Option<IncomingFrame>> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let size = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        let doff = src[4];
        let frame_type = src[5];
        let channel = u16::from_be_bytes([src[6], src[7]]);

        if size > self.config.max_frame_size as usize {
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.config.max_frame_size as usize,
            });
        }
        if size < FRAME_HEADER_SIZE {
            return Err(FrameError::MalformedFrame(format!(
                "frame size {size} smaller than frame header"
            )));
        }
        if doff < DEFAULT_DOFF || doff as usize * 4 > size {
            return Err(FrameError::InvalidDataOffset { doff, size });
        }
        if frame_type != AMQP_FRAME_TYPE && frame_type != SASL_FRAME_TYPE {
            return Err(FrameError::UnknownFrameType(frame_type));
        }
        if src.len() < size {
            return Ok(None);
        }

        let mut frame = src.split_to(size).freeze();
        frame.advance(doff as usize * 4);

        if frame_type == SASL_FRAME_TYPE {
            let body = SaslPerformative::decode(&mut frame)?;
            if !frame.is_empty() {
                return Err(FrameError::MalformedFrame(format!(
                    "{} trailing bytes after SASL performative",
                    frame.len()
                )));
            }
            if matches!(body, SaslPerformative::Outcome(_)) {
                self.state = ParserState::AwaitingHeader;
            }
            trace!(performative = body.name(), "sasl frame decoded");
            return Ok(Some(IncomingFrame::Sasl(SaslFrame { body })));
        }

        if frame.is_empty() {
            trace!(channel, "heartbeat decoded");
            return Ok(Some(IncomingFrame::Amqp(ProtocolFrame {
                channel,
                body: None,
                payload: None,
            })));
        }

        let body = Performative::decode(&mut frame)?;
        let payload = (!frame.is_empty()).then_some(frame);
        trace!(
            channel,
            performative = body.name(),
            payload = payload.as_ref().map_or(0, |p| p.len()),
            "frame decoded"
        );
        Ok(Some(IncomingFrame::Amqp(ProtocolFrame::new(
            channel, body, payload,
        ))))
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use amqprims_codec::{Close, Open, SaslCode, SaslOutcome};
    use bytes::BufMut;

    use super::*;
    use crate::writer::FrameWriter;

    fn framed(body: Performative, payload: Option<&[u8]>) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameWriter::default()
            .write_performative(1, &body, payload, &mut buf)
            .unwrap();
        buf
    }

    fn started() -> FrameParser {
        let mut parser = FrameParser::default();
        let mut header = BytesMut::from(&ProtocolHeader::AMQP.as_bytes()[..]);
        assert!(matches!(
            parser.decode(&mut header).unwrap(),
            Some(IncomingFrame::Header(h)) if h == ProtocolHeader::AMQP
        ));
        parser
    }

    #[test]
    fn test_header_then_frame() {
        let mut parser = started();
        let mut buf = framed(Close::default().into(), None);
        let frame = parser.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            frame,
            IncomingFrame::Amqp(ProtocolFrame::new(1, Close::default().into(), None))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_reads_accumulate() {
        let mut parser = FrameParser::default();
        let mut wire = BytesMut::new();
        wire.put_slice(ProtocolHeader::AMQP.as_bytes());
        wire.extend_from_slice(&framed(
            Open {
                container_id: "c".into(),
                ..Open::default()
            }
            .into(),
            None,
        ));

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in wire {
            buf.put_u8(byte);
            while let Some(frame) = parser.decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].kind(), "amqp");
    }

    #[test]
    fn test_payload_is_split_from_body() {
        let mut parser = started();
        let mut buf = framed(Close::default().into(), Some(b"tail"));
        match parser.decode(&mut buf).unwrap() {
            Some(IncomingFrame::Amqp(frame)) => {
                assert_eq!(frame.payload.as_deref(), Some(&b"tail"[..]))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat() {
        let mut parser = started();
        let mut buf = BytesMut::new();
        FrameWriter::default().write_heartbeat(&mut buf);
        let frame = parser.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.kind(), "heartbeat");
    }

    #[test]
    fn test_frame_too_large_is_terminal() {
        let mut parser = FrameParser::new(FrameConfig {
            max_frame_size: 512,
        });
        let mut header = BytesMut::from(&ProtocolHeader::AMQP.as_bytes()[..]);
        parser.decode(&mut header).unwrap();

        let mut buf = BytesMut::new();
        buf.put_u32(1024);
        buf.put_slice(&[2, 0, 0, 0]);
        assert!(matches!(
            parser.decode(&mut buf),
            Err(FrameError::FrameTooLarge { size: 1024, max: 512 })
        ));
        assert!(parser.is_failed());
        assert!(parser.decode(&mut BytesMut::new()).is_err());
    }

    #[test]
    fn test_bad_data_offset() {
        let mut parser = started();
        let mut buf = BytesMut::new();
        buf.put_u32(8);
        buf.put_slice(&[1, 0, 0, 0]);
        assert!(matches!(
            parser.decode(&mut buf),
            Err(FrameError::InvalidDataOffset { doff: 1, size: 8 })
        ));
    }

    #[test]
    fn test_extended_header_skipped() {
        let mut parser = started();
        let mut body = BytesMut::new();
        Performative::from(Close::default()).encode(&mut body);
        let mut buf = BytesMut::new();
        buf.put_u32((12 + body.len()) as u32);
        buf.put_slice(&[3, 0, 0, 0]);
        buf.put_u32(0xdead_beef);
        buf.extend_from_slice(&body);
        assert!(matches!(
            parser.decode(&mut buf).unwrap(),
            Some(IncomingFrame::Amqp(ProtocolFrame { body: Some(Performative::Close(_)), .. }))
        ));
    }

    #[test]
    fn test_foreign_header_rejected_early() {
        let mut parser = FrameParser::default();
        let mut buf = BytesMut::from(&b"GET"[..]);
        assert!(matches!(
            parser.decode(&mut buf),
            Err(FrameError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_sasl_outcome_rearms_header() {
        let mut parser = FrameParser::default();
        let mut buf = BytesMut::from(&ProtocolHeader::SASL.as_bytes()[..]);
        parser.decode(&mut buf).unwrap();

        FrameWriter::default()
            .write_sasl(
                &SaslPerformative::Outcome(SaslOutcome {
                    code: SaslCode::Ok,
                    additional_data: None,
                }),
                &mut buf,
            )
            .unwrap();
        buf.put_slice(ProtocolHeader::AMQP.as_bytes());

        assert!(matches!(
            parser.decode(&mut buf).unwrap(),
            Some(IncomingFrame::Sasl(_))
        ));
        assert!(parser.is_awaiting_header());
        assert!(matches!(
            parser.decode(&mut buf).unwrap(),
            Some(IncomingFrame::Header(h)) if h == ProtocolHeader::AMQP
        ));
    }
}
