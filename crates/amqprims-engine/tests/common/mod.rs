#![allow(dead_code)]

use amqprims_codec::Performative;
use amqprims_engine::{
    create_engine, Engine, EngineConfiguration, EngineError, EngineEvent, LinkId, SessionId,
};
use amqprims_frame::{
    FrameConfig, FrameParser, FrameWriter, IncomingFrame, ProtocolFrame, ProtocolHeader,
    DEFAULT_MAX_FRAME_SIZE,
};
use bytes::{Bytes, BytesMut};

pub fn config(container_id: &str) -> EngineConfiguration {
    EngineConfiguration {
        container_id: container_id.to_string(),
        ..EngineConfiguration::default()
    }
}

/// Two engines wired back-to-back in memory.
pub struct Pair {
    pub client: Engine,
    pub server: Engine,
}

impl Pair {
    pub fn new(client: EngineConfiguration, server: EngineConfiguration) -> Self {
        let mut client = create_engine(client).unwrap();
        let mut server = create_engine(server).unwrap();
        client.start().unwrap();
        server.start().unwrap();
        Self { client, server }
    }

    /// Move bytes both ways until neither side has anything to say.
    pub fn pump(&mut self) -> Result<(), EngineError> {
        loop {
            let to_server = self.client.take_output();
            let to_client = self.server.take_output();
            if to_server.is_empty() && to_client.is_empty() {
                return Ok(());
            }
            if !to_server.is_empty() && self.server.is_writable() {
                self.server.ingest(to_server)?;
            }
            if !to_client.is_empty() && self.client.is_writable() {
                self.client.ingest(to_client)?;
            }
        }
    }

    /// Open both connections and one session between them.
    pub fn open(client: EngineConfiguration, server: EngineConfiguration) -> (Self, SessionId) {
        let mut pair = Self::new(client, server);
        pair.client.connection().open().unwrap();
        pair.pump().unwrap();
        pair.server.connection().open().unwrap();
        pair.pump().unwrap();

        let client_session = {
            let mut connection = pair.client.connection();
            let mut session = connection.session().unwrap();
            session.open().unwrap();
            session.id()
        };
        pair.pump().unwrap();
        let server_session = events(&mut pair.server)
            .into_iter()
            .find_map(|event| match event {
                EngineEvent::SessionRemotelyBegun(id) => Some(id),
                _ => None,
            })
            .unwrap();
        pair.server.session(server_session).unwrap().open().unwrap();
        pair.pump().unwrap();
        drain_events(&mut pair.client);
        (pair, client_session)
    }

    /// A client sender attached to a server receiver.
    pub fn link(&mut self, session: SessionId, name: &str) -> (LinkId, LinkId) {
        let sender = {
            let mut session = self.client.session(session).unwrap();
            let mut sender = session.sender(name).unwrap();
            sender.open().unwrap();
            sender.id()
        };
        self.pump().unwrap();
        let receiver = events(&mut self.server)
            .into_iter()
            .find_map(|event| match event {
                EngineEvent::LinkRemotelyAttached(id) => Some(id),
                _ => None,
            })
            .unwrap();
        self.server.receiver(receiver).unwrap().open().unwrap();
        self.pump().unwrap();
        drain_events(&mut self.client);
        (sender, receiver)
    }
}

pub fn events(engine: &mut Engine) -> Vec<EngineEvent> {
    std::iter::from_fn(|| engine.poll_event()).collect()
}

pub fn drain_events(engine: &mut Engine) {
    while engine.poll_event().is_some() {}
}

/// A scripted peer: encodes frames by hand and decodes what the engine sends.
pub struct Wire {
    parser: FrameParser,
    writer: FrameWriter,
}

impl Default for Wire {
    fn default() -> Self {
        Self {
            parser: FrameParser::new(FrameConfig {
                max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            }),
            writer: FrameWriter::default(),
        }
    }
}

impl Wire {
    pub fn header(&self) -> Bytes {
        Bytes::copy_from_slice(ProtocolHeader::AMQP.as_bytes())
    }

    pub fn frame(&self, channel: u16, body: impl Into<Performative>) -> Bytes {
        self.frame_with_payload(channel, body, None)
    }

    pub fn frame_with_payload(
        &self,
        channel: u16,
        body: impl Into<Performative>,
        payload: Option<&[u8]>,
    ) -> Bytes {
        let mut buf = BytesMut::new();
        self.writer
            .write_performative(channel, &body.into(), payload, &mut buf)
            .unwrap();
        buf.freeze()
    }

    pub fn read(&mut self, bytes: Bytes) -> Vec<IncomingFrame> {
        let mut buf = BytesMut::from(&bytes[..]);
        let mut frames = Vec::new();
        while let Some(frame) = self.parser.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        assert!(buf.is_empty(), "trailing partial frame");
        frames
    }

    /// Only the AMQP frames among what the engine sent.
    pub fn read_frames(&mut self, bytes: Bytes) -> Vec<ProtocolFrame> {
        self.read(bytes)
            .into_iter()
            .filter_map(|frame| match frame {
                IncomingFrame::Amqp(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }
}

/// Performatives only, heartbeats dropped.
pub fn bodies(frames: Vec<ProtocolFrame>) -> Vec<Performative> {
    frames.into_iter().filter_map(|frame| frame.body).collect()
}
