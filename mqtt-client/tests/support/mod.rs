use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use bytes::BytesMut;
use mqtt_core::{decode, ConnectAck, ConnectReturnCode, DecodeError, Packet, PacketId, QoS};

use mqtt_client::{Client, ClientConfig};

/// A minimal single-connection broker stub: accepts one TCP connection and
/// lets the test read/write raw MQTT packets against it.
pub struct TestBroker {
    listener: TcpListener,
    pub addr: SocketAddr,
}

impl TestBroker {
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let addr = listener.local_addr().unwrap();
        TestBroker { listener, addr }
    }

    pub fn accept(&self) -> BrokerConn {
        let (stream, _) = self.listener.accept().expect("accept client connection");
        BrokerConn {
            stream,
            buffer: BytesMut::new(),
        }
    }
}

/// An owned snapshot of the packet kinds the test suite needs to assert on;
/// decoded packets borrow from the connection's scratch buffer, which the
/// next `read_packet` call reuses, so callers get owned data instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        packet_id: Option<PacketId>,
        dup: bool,
    },
    PublishAck(PacketId),
    PublishReceived(PacketId),
    PublishRelease(PacketId),
    PublishComplete(PacketId),
    Subscribe {
        packet_id: PacketId,
        subscriptions: Vec<(String, QoS)>,
    },
    Unsubscribe {
        packet_id: PacketId,
        topic_filters: Vec<String>,
    },
    Ping,
    Disconnect,
}

pub struct BrokerConn {
    stream: TcpStream,
    buffer: BytesMut,
}

impl BrokerConn {
    pub fn write_packet(&mut self, packet: Packet) {
        let mut buf = BytesMut::with_capacity(packet.size().unwrap());
        packet.write_to(&mut buf);
        self.stream.write_all(&buf).expect("write packet to client");
    }

    /// Blocks until a full packet has been read off the wire.
    pub fn read_packet(&mut self) -> Received {
        loop {
            match decode(&self.buffer) {
                Ok((remaining, packet)) => {
                    let consumed = self.buffer.len() - remaining.len();
                    let received = to_received(packet);
                    let _ = self.buffer.split_to(consumed);
                    return received;
                }
                Err(DecodeError::Truncated) => {
                    let mut chunk = [0u8; 4096];
                    let n = self.stream.read(&mut chunk).expect("read from client socket");
                    assert!(n > 0, "client closed the connection mid-packet");
                    self.buffer.extend_from_slice(&chunk[..n]);
                }
                Err(err) => panic!("malformed packet from client: {}", err),
            }
        }
    }
}

fn to_received(packet: Packet<'_>) -> Received {
    match packet {
        Packet::Publish(p) => Received::Publish {
            topic: p.topic.to_owned(),
            payload: p.payload.to_vec(),
            qos: p.qos,
            retain: p.retain,
            packet_id: p.packet_id,
            dup: p.dup,
        },
        Packet::PublishAck(a) => Received::PublishAck(a.packet_id),
        Packet::PublishReceived(a) => Received::PublishReceived(a.packet_id),
        Packet::PublishRelease(a) => Received::PublishRelease(a.packet_id),
        Packet::PublishComplete(a) => Received::PublishComplete(a.packet_id),
        Packet::Subscribe(s) => Received::Subscribe {
            packet_id: s.packet_id,
            subscriptions: s
                .subscriptions
                .into_iter()
                .map(|(filter, qos)| (filter.to_owned(), qos))
                .collect(),
        },
        Packet::Unsubscribe(u) => Received::Unsubscribe {
            packet_id: u.packet_id,
            topic_filters: u.topic_filters.into_iter().map(|f| f.to_owned()).collect(),
        },
        Packet::Ping => Received::Ping,
        Packet::Disconnect => Received::Disconnect,
        other => panic!("test broker received unexpected packet type: {:?}", other.packet_type()),
    }
}

/// Spawns a broker stub, completes a successful handshake on a background
/// thread, and hands back the connected `Client` plus the broker-side
/// connection so the test can keep scripting the rest of the exchange.
pub fn connected_client(client_id: &str) -> (Client, BrokerConn) {
    let broker = TestBroker::bind();
    let addr = broker.addr;

    let server = thread::spawn(move || {
        let mut conn = broker.accept();
        let _ = conn.read_packet();
        conn.write_packet(Packet::ConnectAck(ConnectAck {
            session_present: false,
            return_code: ConnectReturnCode::ConnectionAccepted,
        }));
        conn
    });

    let mut config = ClientConfig::new(addr.ip().to_string(), client_id);
    config.port = Some(addr.port());

    let client = Client::connect(&config, None, None).expect("handshake should succeed");
    let conn = server.join().unwrap();
    (client, conn)
}
