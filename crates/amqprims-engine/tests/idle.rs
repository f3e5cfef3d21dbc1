mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use amqprims_codec::conditions;
use amqprims_engine::{EngineConfiguration, EngineError, EngineEvent, TickDriver};
use bytes::Bytes;

use common::{config, events, Pair};

fn open_pair(client: EngineConfiguration, server: EngineConfiguration) -> Pair {
    let mut pair = Pair::new(client, server);
    pair.client.connection().open().unwrap();
    pair.server.connection().open().unwrap();
    pair.pump().unwrap();
    events(&mut pair.client);
    events(&mut pair.server);
    pair
}

#[test]
fn silent_peer_times_out() {
    let client = EngineConfiguration {
        idle_timeout_ms: 1000,
        ..config("client")
    };
    let mut pair = open_pair(client, config("server"));

    assert_eq!(pair.client.tick(0).unwrap(), 1000);
    assert_eq!(pair.client.tick(999).unwrap(), 1000);
    let err = pair.client.tick(1000).unwrap_err();
    assert!(matches!(err, EngineError::IdleTimeout(1000)));
    assert!(pair.client.is_failed());

    pair.pump().unwrap();
    let closed = events(&mut pair.server)
        .into_iter()
        .find_map(|event| match event {
            EngineEvent::ConnectionRemotelyClosed { error } => Some(error),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        closed.map(|e| e.condition.as_str().to_string()),
        Some(conditions::RESOURCE_LIMIT_EXCEEDED.to_string())
    );
}

#[test]
fn input_restarts_idle_deadline() {
    let client = EngineConfiguration {
        idle_timeout_ms: 1000,
        ..config("client")
    };
    let mut pair = open_pair(client, config("server"));

    assert_eq!(pair.client.tick(0).unwrap(), 1000);
    pair.server.connection().session().unwrap().open().unwrap();
    pair.pump().unwrap();
    assert_eq!(pair.client.tick(800).unwrap(), 1800);
    assert!(pair.client.tick(1000).is_ok());
}

#[test]
fn heartbeat_sent_at_half_remote_timeout() {
    let server = EngineConfiguration {
        idle_timeout_ms: 1000,
        ..config("server")
    };
    let mut pair = open_pair(config("client"), server);

    assert_eq!(pair.client.tick(0).unwrap(), 500);
    assert!(pair.client.take_output().is_empty());
    assert_eq!(pair.client.tick(500).unwrap(), 1000);
    assert_eq!(
        pair.client.take_output(),
        Bytes::from_static(&[0, 0, 0, 8, 2, 0, 0, 0])
    );
}

#[test]
fn heartbeat_keeps_peer_alive() {
    let server = EngineConfiguration {
        idle_timeout_ms: 1000,
        ..config("server")
    };
    let mut pair = open_pair(config("client"), server);

    pair.server.tick(0).unwrap();
    pair.client.tick(0).unwrap();
    for now in [500, 1000, 1500, 2000] {
        pair.client.tick(now).unwrap();
        pair.pump().unwrap();
        pair.server.tick(now).unwrap();
    }
    assert!(pair.server.is_writable());
    assert!(events(&mut pair.server).is_empty());
}

#[derive(Clone, Default)]
struct ManualClock {
    now: Rc<Cell<u64>>,
    scheduled: Rc<RefCell<Vec<u64>>>,
}

impl TickDriver for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.get()
    }

    fn schedule(&mut self, deadline: u64) {
        self.scheduled.borrow_mut().push(deadline);
    }
}

#[test]
fn automatic_ticking_follows_deadlines() {
    let client = EngineConfiguration {
        idle_timeout_ms: 1000,
        ..config("client")
    };
    let mut pair = Pair::new(client, config("server"));
    let clock = ManualClock::default();
    pair.client.tick_auto(clock.clone()).unwrap();
    assert!(clock.scheduled.borrow().is_empty());

    pair.client.connection().open().unwrap();
    pair.server.connection().open().unwrap();
    pair.pump().unwrap();
    assert_eq!(clock.scheduled.borrow().first(), Some(&1000));

    clock.now.set(1000);
    pair.client.auto_tick().unwrap();
    assert_eq!(clock.scheduled.borrow().last(), Some(&2000));

    clock.now.set(2000);
    assert!(matches!(
        pair.client.auto_tick(),
        Err(EngineError::IdleTimeout(1000))
    ));
}

#[test]
fn tick_styles_are_exclusive() {
    let mut pair = Pair::new(config("client"), config("server"));
    pair.client.tick(0).unwrap();
    assert!(matches!(
        pair.client.tick_auto(ManualClock::default()),
        Err(EngineError::State(_))
    ));
    assert!(matches!(pair.client.auto_tick(), Err(EngineError::State(_))));

    pair.server.tick_auto(ManualClock::default()).unwrap();
    assert!(matches!(pair.server.tick(0), Err(EngineError::State(_))));
    assert!(matches!(
        pair.server.tick_auto(ManualClock::default()),
        Err(EngineError::State(_))
    ));
}
