//! Two engines wired back-to-back in memory: a client sends one message and
//! the server accepts it.
//!
//! Run with:
//!   RUST_LOG=amqprims_engine=debug cargo run --example loopback

use amqprims::codec::DeliveryState;
use amqprims::engine::{create_engine, Engine, EngineConfiguration, EngineEvent};
use bytes::Bytes;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Move bytes both ways until both engines go quiet.
fn pump(client: &mut Engine, server: &mut Engine) -> amqprims::engine::Result<()> {
    loop {
        let to_server = client.take_output();
        let to_client = server.take_output();
        if to_server.is_empty() && to_client.is_empty() {
            return Ok(());
        }
        if !to_server.is_empty() {
            server.ingest(to_server)?;
        }
        if !to_client.is_empty() {
            client.ingest(to_client)?;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let mut client = create_engine(EngineConfiguration {
        container_id: "loopback-client".to_string(),
        ..EngineConfiguration::default()
    })?;
    let mut server = create_engine(EngineConfiguration {
        container_id: "loopback-server".to_string(),
        ..EngineConfiguration::default()
    })?;

    client.start()?.open()?;
    server.start()?.open()?;
    pump(&mut client, &mut server)?;

    let session = {
        let mut connection = client.connection();
        let mut session = connection.session()?;
        session.open()?;
        session.id()
    };
    let sender = {
        let mut session = client.session(session)?;
        let mut sender = session.sender("greetings")?;
        sender.open()?;
        sender.id()
    };
    pump(&mut client, &mut server)?;

    // answer whatever the client opened
    while let Some(event) = server.poll_event() {
        match event {
            EngineEvent::SessionRemotelyBegun(id) => server.session(id)?.open()?,
            EngineEvent::LinkRemotelyAttached(id) => {
                let mut receiver = server.receiver(id)?;
                receiver.open()?;
                receiver.add_credit(10)?;
            }
            other => info!(?other, "server event"),
        }
        pump(&mut client, &mut server)?;
    }

    {
        let mut sender = client.sender(sender)?;
        let mut delivery = sender.next_delivery()?;
        delivery.write_bytes(Bytes::from_static(b"hello, amqp"))?;
    }
    pump(&mut client, &mut server)?;

    while let Some(event) = server.poll_event() {
        if let EngineEvent::DeliveryRead(key) = event {
            let mut delivery = server.incoming(key)?;
            if delivery.is_partial() {
                continue;
            }
            let body = delivery.read_all()?;
            info!(body = %String::from_utf8_lossy(&body), "server received");
            delivery.disposition(Some(DeliveryState::Accepted), true)?;
        }
    }
    pump(&mut client, &mut server)?;

    while let Some(event) = client.poll_event() {
        if let EngineEvent::DeliveryUpdated(key) = event {
            let mut delivery = client.outgoing(key)?;
            info!(state = ?delivery.remote_state(), "client saw outcome");
            delivery.settle()?;
        }
    }

    client.connection().close(None)?;
    pump(&mut client, &mut server)?;
    server.connection().close(None)?;
    pump(&mut client, &mut server)?;
    info!(
        client = ?client.connection_state(),
        server = ?server.connection_state(),
        "connections closed"
    );
    client.shutdown();
    server.shutdown();
    Ok(())
}
