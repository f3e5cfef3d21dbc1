//! `tokio_util::codec` adapter for stream transports.

use amqprims_codec::{Performative, SaslPerformative};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;
use crate::frame::IncomingFrame;
use crate::header::ProtocolHeader;
use crate::parser::{FrameConfig, FrameParser};
use crate::writer::FrameWriter;

/// A unit the encoder can put on the wire.
#[derive(Debug, Clone)]
pub enum OutgoingItem {
    Header(ProtocolHeader),
    Sasl(SaslPerformative),
    Frame {
        channel: u16,
        body: Performative,
        payload: Option<Bytes>,
    },
    Heartbeat,
}

/// Frames an AMQP byte stream for `FramedRead`/`FramedWrite`.
#[derive(Debug, Clone, Default)]
pub struct AmqpCodec {
    parser: FrameParser,
    writer: FrameWriter,
}

impl AmqpCodec {
    pub fn new(config: FrameConfig, remote_max_frame_size: u32) -> Self {
        Self {
            parser: FrameParser::new(config),
            writer: FrameWriter::new(remote_max_frame_size),
        }
    }

    pub fn parser_mut(&mut self) -> &mut FrameParser {
        &mut self.parser
    }

    pub fn writer_mut(&mut self) -> &mut FrameWriter {
        &mut self.writer
    }
}

impl Decoder for AmqpCodec {
    type Item = IncomingFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.parser.decode(src)
    }
}

impl Encoder<OutgoingItem> for AmqpCodec {
    type Error = FrameError;

    fn encode(&mut self, item: OutgoingItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            OutgoingItem::Header(header) => {
                self.writer.write_header(&header, dst);
                Ok(())
            }
            OutgoingItem::Sasl(body) => self.writer.write_sasl(&body, dst),
            OutgoingItem::Frame {
                channel,
                body,
                payload,
            } => self
                .writer
                .write_performative(channel, &body, payload.as_deref(), dst),
            OutgoingItem::Heartbeat => {
                self.writer.write_heartbeat(dst);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use amqprims_codec::Open;

    use super::*;

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = AmqpCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(OutgoingItem::Header(ProtocolHeader::AMQP), &mut buf)
            .unwrap();
        codec
            .encode(
                OutgoingItem::Frame {
                    channel: 0,
                    body: Open {
                        container_id: "codec".into(),
                        ..Open::default()
                    }
                    .into(),
                    payload: None,
                },
                &mut buf,
            )
            .unwrap();
        codec.encode(OutgoingItem::Heartbeat, &mut buf).unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| codec.decode(&mut buf).unwrap())
            .map(|frame| frame.kind())
            .collect();
        assert_eq!(kinds, vec!["header", "amqp", "heartbeat"]);
    }
}
