mod support;

use std::thread;
use std::time::Duration;

use mqtt_client::{Client, ClientConfig, ClientError, ConnectionState};
use mqtt_core::{ConnectAck, ConnectReturnCode};

use support::TestBroker;

#[test]
fn connects_and_reaches_connected_state() {
    let broker = TestBroker::bind();
    let addr = broker.addr;

    let server = thread::spawn(move || {
        let mut conn = broker.accept();
        let _ = conn.read_packet();
        conn.write_packet(mqtt_core::Packet::ConnectAck(ConnectAck {
            session_present: false,
            return_code: ConnectReturnCode::ConnectionAccepted,
        }));
    });

    let mut config = ClientConfig::new(addr.ip().to_string(), "test-client-1");
    config.port = Some(addr.port());

    let client = Client::connect(&config, None, None).expect("handshake should succeed");
    assert_eq!(client.state(), ConnectionState::Connected);

    server.join().unwrap();
}

#[test]
fn refused_connection_surfaces_the_return_code() {
    let broker = TestBroker::bind();
    let addr = broker.addr;

    let server = thread::spawn(move || {
        let mut conn = broker.accept();
        let _ = conn.read_packet();
        conn.write_packet(mqtt_core::Packet::ConnectAck(ConnectAck {
            session_present: false,
            return_code: ConnectReturnCode::NotAuthorized,
        }));
    });

    let mut config = ClientConfig::new(addr.ip().to_string(), "test-client-2");
    config.port = Some(addr.port());

    match Client::connect(&config, None, None) {
        Err(ClientError::ConnectionRefused(ConnectReturnCode::NotAuthorized)) => {}
        Err(other) => panic!("expected ConnectionRefused(NotAuthorized), got {}", other),
        Ok(_) => panic!("broker refused the connection but connect() succeeded"),
    }

    server.join().unwrap();
}

#[test]
fn handshake_times_out_when_broker_never_answers() {
    let broker = TestBroker::bind();
    let addr = broker.addr;

    let server = thread::spawn(move || {
        let conn = broker.accept();
        thread::sleep(Duration::from_millis(200));
        conn
    });

    let mut config = ClientConfig::new(addr.ip().to_string(), "test-client-3");
    config.port = Some(addr.port());
    config.handshake_timeout = Duration::from_millis(50);

    match Client::connect(&config, None, None) {
        Err(ClientError::HandshakeTimeout) => {}
        Err(other) => panic!("expected HandshakeTimeout, got {}", other),
        Ok(_) => panic!("broker never answered but connect() succeeded"),
    }

    server.join().unwrap();
}
