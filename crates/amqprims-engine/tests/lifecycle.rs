mod common;

use std::cell::Cell;
use std::rc::Rc;

use amqprims_codec::{conditions, Attach, Begin, Flow, Open, Performative, Role};
use amqprims_engine::{
    create_engine, ConnectionState, EndpointState, EngineConfiguration, EngineError, EngineEvent,
    EngineState,
};
use amqprims_frame::{FrameError, IncomingFrame, ProtocolHeader};
use bytes::Bytes;

use common::{bodies, config, drain_events, events, Pair, Wire};

#[test]
fn header_is_echoed_and_exchanged() {
    let mut engine = create_engine(config("server")).unwrap();
    engine.start().unwrap();
    let wire = Wire::default();

    engine.ingest(wire.header()).unwrap();

    assert_eq!(&engine.take_output()[..], ProtocolHeader::AMQP.as_bytes());
    assert_eq!(engine.connection_state(), ConnectionState::HeaderExchanged);
}

#[test]
fn unsupported_header_is_answered_then_fails() {
    let mut engine = create_engine(config("server")).unwrap();
    engine.start().unwrap();

    let err = engine
        .ingest(Bytes::from_static(b"AMQP\x00\x02\x00\x00"))
        .err()
        .unwrap();

    assert!(matches!(
        err,
        EngineError::Protocol { ref condition, .. } if condition == conditions::NOT_IMPLEMENTED
    ));
    assert_eq!(&engine.take_output()[..], ProtocolHeader::AMQP.as_bytes());
    assert!(engine.is_shutdown());
    assert_eq!(engine.state(), EngineState::Failed);
}

#[test]
fn open_carries_configuration() {
    let mut engine = create_engine(EngineConfiguration {
        container_id: "client".into(),
        hostname: Some("broker.local".into()),
        max_frame_size: 4096,
        channel_max: 9,
        idle_timeout_ms: 30_000,
        offered_capabilities: vec!["cap-1".into()],
        ..EngineConfiguration::default()
    })
    .unwrap();
    engine.start().unwrap().open().unwrap();

    let mut wire = Wire::default();
    let frames = wire.read(engine.take_output());
    assert_eq!(frames[0], IncomingFrame::Header(ProtocolHeader::AMQP));
    let IncomingFrame::Amqp(frame) = &frames[1] else {
        panic!("expected Open, got {frames:?}");
    };
    let Some(Performative::Open(open)) = &frame.body else {
        panic!("expected Open, got {frame:?}");
    };
    assert_eq!(open.container_id, "client");
    assert_eq!(open.hostname.as_deref(), Some("broker.local"));
    assert_eq!(open.max_frame_size, Some(4096));
    assert_eq!(open.channel_max, Some(9));
    assert_eq!(open.idle_timeout, Some(30_000));
    assert_eq!(open.offered_capabilities.as_ref().map(Vec::len), Some(1));
    assert!(open.desired_capabilities.is_none());
}

#[test]
fn connections_open_and_close() {
    let mut pair = Pair::new(config("client"), config("server"));
    pair.client.connection().open().unwrap();
    pair.pump().unwrap();
    assert_eq!(
        events(&mut pair.server),
        [EngineEvent::ConnectionRemotelyOpened]
    );
    assert_eq!(pair.server.connection_state(), ConnectionState::HeaderExchanged);

    pair.server.connection().open().unwrap();
    pair.pump().unwrap();
    assert_eq!(pair.client.connection_state(), ConnectionState::Opened);
    assert_eq!(
        pair.client
            .connection()
            .remote_open()
            .map(|open| open.container_id.clone()),
        Some("server".to_string())
    );

    pair.client.connection().close(None).unwrap();
    assert_eq!(pair.client.connection_state(), ConnectionState::Closing);
    pair.pump().unwrap();
    assert_eq!(
        events(&mut pair.server),
        [EngineEvent::ConnectionRemotelyClosed { error: None }]
    );
    pair.server.connection().close(None).unwrap();
    pair.pump().unwrap();
    assert_eq!(pair.client.connection_state(), ConnectionState::Closed);
    assert_eq!(pair.server.connection_state(), ConnectionState::Closed);
}

#[test]
fn connection_open_twice_is_refused() {
    let mut engine = create_engine(config("client")).unwrap();
    engine.start().unwrap().open().unwrap();
    assert!(matches!(
        engine.connection().open(),
        Err(EngineError::State(_))
    ));
    assert!(engine.is_writable());
}

#[test]
fn remote_begin_answer_uses_configured_windows() {
    let mut engine = create_engine(EngineConfiguration {
        container_id: "server".into(),
        initial_outgoing_id: 11,
        session_incoming_window: 300,
        session_outgoing_window: 200,
        ..EngineConfiguration::default()
    })
    .unwrap();
    engine.start().unwrap();
    let mut wire = Wire::default();
    let mut input = wire.header().to_vec();
    input.extend_from_slice(&wire.frame(0, Open::default()));
    input.extend_from_slice(&wire.frame(
        3,
        Begin {
            next_outgoing_id: 7,
            incoming_window: 100,
            outgoing_window: 50,
            ..Begin::default()
        },
    ));
    engine.ingest(input).unwrap();

    let session = events(&mut engine)
        .into_iter()
        .find_map(|event| match event {
            EngineEvent::SessionRemotelyBegun(id) => Some(id),
            _ => None,
        })
        .unwrap();
    engine.connection().open().unwrap();
    engine.session(session).unwrap().open().unwrap();

    let frames = wire.read_frames(engine.take_output());
    let begin = frames
        .iter()
        .find_map(|frame| match &frame.body {
            Some(Performative::Begin(begin)) => Some((frame.channel, begin.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(begin.0, session.channel());
    assert_eq!(begin.1.remote_channel, Some(3));
    assert_eq!(begin.1.next_outgoing_id, 11);
    assert_eq!(begin.1.incoming_window, 300);
    assert_eq!(begin.1.outgoing_window, 200);
}

#[test]
fn session_begin_and_end() {
    let (mut pair, session) = Pair::open(config("client"), config("server"));
    {
        let client = pair.client.session(session).unwrap();
        assert_eq!(client.local_state(), EndpointState::Active);
        assert_eq!(client.remote_state(), EndpointState::Active);
        assert_eq!(client.outgoing_window(), 2048);
    }

    pair.client.session(session).unwrap().close(None).unwrap();
    pair.pump().unwrap();
    let ended = events(&mut pair.server)
        .into_iter()
        .find_map(|event| match event {
            EngineEvent::SessionRemotelyEnded { session, error } => Some((session, error)),
            _ => None,
        })
        .unwrap();
    assert_eq!(ended.1, None);
    pair.server.session(ended.0).unwrap().close(None).unwrap();
    pair.pump().unwrap();

    assert!(matches!(
        pair.client.session(session),
        Err(EngineError::UnknownSession(_))
    ));
    assert!(pair.server.connection().sessions().is_empty());
}

#[test]
fn session_before_connection_open_is_refused() {
    let mut engine = create_engine(config("client")).unwrap();
    let mut connection = engine.start().unwrap();
    let mut session = connection.session().unwrap();
    assert!(matches!(session.open(), Err(EngineError::State(_))));
}

#[test]
fn link_attach_and_detach() {
    let (mut pair, session) = Pair::open(config("client"), config("server"));
    let (sender, receiver) = pair.link(session, "queue");

    {
        let receiver = pair.server.receiver(receiver).unwrap();
        assert_eq!(receiver.name(), Some("queue"));
        assert_eq!(receiver.remote_state(), EndpointState::Active);
    }
    assert!(pair.server.sender(receiver).is_err());

    pair.client.sender(sender).unwrap().close(None).unwrap();
    pair.pump().unwrap();
    assert!(events(&mut pair.server).contains(&EngineEvent::LinkRemotelyDetached {
        link: receiver,
        closed: true,
        error: None,
    }));
    pair.server.receiver(receiver).unwrap().close(None).unwrap();
    pair.pump().unwrap();

    assert!(pair.client.sender(sender).is_err());
    assert!(pair.client.session(session).unwrap().links().is_empty());
}

#[test]
fn link_settings_locked_after_attach() {
    let (mut pair, session) = Pair::open(config("client"), config("server"));
    let (sender, _) = pair.link(session, "l");
    assert!(matches!(
        pair.client.sender(sender).unwrap().set_max_message_size(10),
        Err(EngineError::State(_))
    ));
}

#[test]
fn duplicate_remote_handle_ends_session() {
    let mut engine = create_engine(config("server")).unwrap();
    engine.start().unwrap().open().unwrap();
    let mut wire = Wire::default();
    let mut input = wire.header().to_vec();
    input.extend_from_slice(&wire.frame(0, Open::default()));
    input.extend_from_slice(&wire.frame(
        0,
        Begin {
            incoming_window: 10,
            outgoing_window: 10,
            ..Begin::default()
        },
    ));
    engine.ingest(input).unwrap();
    let session = events(&mut engine)
        .into_iter()
        .find_map(|event| match event {
            EngineEvent::SessionRemotelyBegun(id) => Some(id),
            _ => None,
        })
        .unwrap();
    engine.session(session).unwrap().open().unwrap();
    wire.read(engine.take_output());

    let attach = |name: &str| Attach {
        name: name.into(),
        handle: 0,
        role: Role::Sender,
        initial_delivery_count: Some(0),
        ..Attach::default()
    };
    let mut input = wire.frame(0, attach("a")).to_vec();
    input.extend_from_slice(&wire.frame(0, attach("b")));
    engine.ingest(input).unwrap();

    let end = bodies(wire.read_frames(engine.take_output()))
        .into_iter()
        .find_map(|body| match body {
            Performative::End(end) => Some(end),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        end.error.map(|e| e.condition.as_str().to_string()),
        Some(conditions::HANDLE_IN_USE.to_string())
    );
    assert!(events(&mut engine)
        .iter()
        .any(|event| matches!(event, EngineEvent::LinkForceDetached(_))));
    assert!(engine.is_writable());
}

#[test]
fn echoed_link_flow_is_answered() {
    let mut engine = create_engine(config("server")).unwrap();
    engine.start().unwrap().open().unwrap();
    let mut wire = Wire::default();
    let mut input = wire.header().to_vec();
    input.extend_from_slice(&wire.frame(0, Open::default()));
    input.extend_from_slice(&wire.frame(
        0,
        Begin {
            incoming_window: 10,
            outgoing_window: 10,
            ..Begin::default()
        },
    ));
    input.extend_from_slice(&wire.frame(
        0,
        Attach {
            name: "echo".into(),
            handle: 4,
            role: Role::Receiver,
            ..Attach::default()
        },
    ));
    engine.ingest(input).unwrap();
    let mut session = None;
    let mut link = None;
    for event in events(&mut engine) {
        match event {
            EngineEvent::SessionRemotelyBegun(id) => session = Some(id),
            EngineEvent::LinkRemotelyAttached(id) => link = Some(id),
            _ => {}
        }
    }
    let (session, link) = (session.unwrap(), link.unwrap());
    engine.session(session).unwrap().open().unwrap();
    engine.sender(link).unwrap().open().unwrap();
    wire.read(engine.take_output());

    engine
        .ingest(wire.frame(
            0,
            Flow {
                next_incoming_id: Some(0),
                incoming_window: 10,
                outgoing_window: 10,
                handle: Some(4),
                delivery_count: Some(0),
                link_credit: Some(5),
                echo: true,
                ..Flow::default()
            },
        ))
        .unwrap();

    let answer = bodies(wire.read_frames(engine.take_output()))
        .into_iter()
        .find_map(|body| match body {
            Performative::Flow(flow) => Some(flow),
            _ => None,
        })
        .unwrap();
    assert_eq!(answer.handle, Some(link.handle()));
    assert_eq!(answer.link_credit, Some(5));
    assert_eq!(answer.delivery_count, Some(0));
    assert!(!answer.echo);
    assert!(events(&mut engine).contains(&EngineEvent::LinkCreditUpdated(link)));
    assert!(engine.is_writable());
}

#[test]
fn frame_before_open_fails_connection() {
    let mut engine = create_engine(config("server")).unwrap();
    engine.start().unwrap();
    let wire = Wire::default();
    let mut input = wire.header().to_vec();
    input.extend_from_slice(&wire.frame(0, Begin::default()));

    let err = engine.ingest(input).err().unwrap();

    assert!(matches!(
        err,
        EngineError::Protocol { ref condition, .. } if condition == conditions::ILLEGAL_STATE
    ));
    assert_eq!(engine.connection_state(), ConnectionState::Failed);
}

#[test]
fn decode_error_closes_connection_once() {
    let calls = Rc::new(Cell::new(0));
    let mut engine = create_engine(config("server")).unwrap();
    let seen = Rc::clone(&calls);
    engine.error_handler(move |_| seen.set(seen.get() + 1));
    engine.start().unwrap().open().unwrap();
    let mut wire = Wire::default();
    wire.read(engine.take_output());

    let mut input = wire.header().to_vec();
    // data offset below the minimum of 2
    input.extend_from_slice(&[0, 0, 0, 8, 1, 0, 0, 0]);
    let err = engine.ingest(input).err().unwrap();

    assert!(matches!(
        err,
        EngineError::Frame(FrameError::InvalidDataOffset { doff: 1, .. })
    ));
    let close = bodies(wire.read_frames(engine.take_output()))
        .into_iter()
        .find_map(|body| match body {
            Performative::Close(close) => Some(close),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        close.error.map(|e| e.condition.as_str().to_string()),
        Some(conditions::FRAMING_ERROR.to_string())
    );

    assert!(matches!(
        engine.ingest(Bytes::from_static(b"more")),
        Err(EngineError::NotWritable(_))
    ));
    assert_eq!(calls.get(), 1);
    assert!(engine.failure().is_some());
    assert!(engine.take_output().is_empty());
}

#[test]
fn oversized_attach_reports_performative() {
    let server = EngineConfiguration {
        max_frame_size: 512,
        ..config("server")
    };
    let (mut pair, session) = Pair::open(config("client"), server);
    let name = "n".repeat(1024);

    let err = {
        let mut session = pair.client.session(session).unwrap();
        let mut sender = session.sender(name).unwrap();
        sender.open().err().unwrap()
    };

    assert!(matches!(
        err,
        EngineError::Frame(FrameError::PayloadTooLarge {
            performative: "Attach",
            ..
        })
    ));
    assert!(pair.client.is_shutdown());
    assert_eq!(pair.client.frames_in_use(), 0);
}

#[test]
fn shutdown_releases_everything() {
    let (mut pair, session) = Pair::open(config("client"), config("server"));
    pair.link(session, "l");
    drain_events(&mut pair.server);

    pair.client.shutdown();

    assert!(pair.client.is_shutdown());
    assert_eq!(pair.client.state(), EngineState::Shutdown);
    assert_eq!(pair.client.frames_in_use(), 0);
    assert!(pair.client.poll_event().is_none());
    assert!(matches!(
        pair.client.ingest(Bytes::from_static(b"x")),
        Err(EngineError::Closed)
    ));
    assert!(matches!(
        pair.client.connection().close(None),
        Err(EngineError::Closed)
    ));
    assert!(pair.client.take_output().is_empty());
}

#[test]
fn output_handler_receives_bytes() {
    let seen = Rc::new(Cell::new(0usize));
    let mut engine = create_engine(config("client")).unwrap();
    let counter = Rc::clone(&seen);
    engine.output_handler(move |bytes| counter.set(counter.get() + bytes.len()));
    engine.start().unwrap().open().unwrap();

    assert!(seen.get() > 8);
    assert!(engine.take_output().is_empty());
}
