use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, error};
use mqtt_core::{
    Packet, PacketId, ProtocolLevel, Publish, PublishAck, PublishComplete, PublishReceived,
    PublishRelease, QoS, SubscribeAck, SubscribeReturnCode, Type, UnsubscribeAck,
};

use crate::connect_builder::ConnectBuilder;
use crate::connection::{Connection, ConnectionState};
use crate::dispatcher::HandlerRegistry;
use crate::error::ClientError;
use crate::publish::{PendingPublish, Qos2SendState};
use crate::state::State;
use crate::subscription::{Subscription, SubscriptionStatus};
use crate::topic::{validate_topic_filter, validate_topic_name};
use crate::transport::tcp::Tcp;
use crate::transport::tls::{Tls, TlsConfig};
use crate::transport::ws::Ws;
use crate::transport::AnyTransport;

const DEFAULT_TCP_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;
const ACK_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configures a [`Client`] before it connects.
pub struct ClientConfig {
    pub server: String,
    pub port: Option<u16>,
    pub client_id: String,
    pub use_websocket: bool,
    pub secure: bool,
    pub tls: TlsConfig,
    pub keep_alive: u16,
    pub handshake_timeout: Duration,
    pub on_disconnected: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl ClientConfig {
    pub fn new(server: impl Into<String>, client_id: impl Into<String>) -> Self {
        ClientConfig {
            server: server.into(),
            port: None,
            client_id: client_id.into(),
            use_websocket: false,
            secure: false,
            tls: TlsConfig::default(),
            keep_alive: 60,
            handshake_timeout: Duration::from_secs(5),
            on_disconnected: None,
        }
    }

    fn resolve_port(&self) -> u16 {
        self.port
            .unwrap_or(if self.secure { DEFAULT_TLS_PORT } else { DEFAULT_TCP_PORT })
    }

    fn open_transport(&self) -> Result<AnyTransport, ClientError> {
        let addr = (self.server.as_str(), self.resolve_port());

        if self.use_websocket {
            let scheme = if self.secure { "wss" } else { "ws" };
            let url = format!("{}://{}:{}/mqtt", scheme, self.server, self.resolve_port());
            Ws::connect(addr, &url).map(AnyTransport::Ws).map_err(ClientError::Io)
        } else if self.secure {
            Tls::connect(addr, &self.server, &self.tls)
                .map(AnyTransport::Tls)
                .map_err(ClientError::Io)
        } else {
            Tcp::connect(addr).map(AnyTransport::Tcp).map_err(ClientError::Io)
        }
    }
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

/// A connected MQTT client: the `Connection`/`KeepAlive` pair driving the
/// wire protocol, plus the QoS and subscription state every ack handler
/// mutates through a single mutex.
pub struct Client {
    connection: Connection<AnyTransport>,
    shared: Arc<Shared>,
}

impl Client {
    /// Opens the configured transport and runs the connect handshake.
    /// `credentials` is `(username, password)`, both optional;
    /// `connect_message` overrides the default Connect this builds.
    pub fn connect(
        config: &ClientConfig,
        credentials: Option<(&str, &[u8])>,
        connect_message: Option<mqtt_core::Connect>,
    ) -> Result<Self, ClientError> {
        if config.client_id.is_empty() || config.client_id.len() > 23 {
            return Err(ClientError::InvalidClientId(format!(
                "client identifier must be 1..23 bytes, got {}",
                config.client_id.len()
            )));
        }

        let mut builder = ConnectBuilder::new(&config.client_id)
            .protocol_level(ProtocolLevel::V311)
            .keep_alive(config.keep_alive);
        if let Some((username, password)) = credentials {
            builder = builder.credentials(username, password);
        }
        let connect_packet = connect_message.unwrap_or_else(|| builder.build());

        let transport = config.open_transport()?;
        let ack_writer = Arc::new(Mutex::new(transport.try_clone().map_err(ClientError::Io)?));

        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        });

        let register_shared = shared.clone();
        let register_handlers =
            move |registry: &mut HandlerRegistry| register_publish_handlers(registry, register_shared, ack_writer);

        let on_disconnected = config.on_disconnected.clone();
        let (connection, _ack) = Connection::connect(
            transport,
            connect_packet,
            Some(config.handshake_timeout),
            register_handlers,
            move || {
                debug!("unsolicited disconnect");
                if let Some(callback) = &on_disconnected {
                    callback();
                }
            },
        )?;

        Ok(Client { connection, shared })
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribes to `topic` at the requested QoS, blocking until the
    /// broker's SubAck arrives. A repeated call for an already
    /// active/pending filter returns the same `Subscription` handle it
    /// returned the first time, without writing a second Subscribe packet.
    pub fn subscribe(&self, topic: &str, qos: QoS) -> Result<Subscription, ClientError> {
        validate_topic_filter(topic)?;

        let mut state = self.shared.state.lock().unwrap();
        if let Some(subscription) = state.subscriptions.add_observer(topic) {
            return Ok(subscription);
        }

        let id = state.next_packet_id();
        let subscription = state.subscriptions.begin_subscribe(id, topic.to_string());
        drop(state);

        self.connection.send(Packet::Subscribe(mqtt_core::Subscribe {
            packet_id: id,
            subscriptions: vec![(topic, qos)],
        }))?;

        let state = self.shared.state.lock().unwrap();
        let (state, timed_out) = self
            .shared
            .changed
            .wait_timeout_while(state, ACK_WAIT_TIMEOUT, |s| {
                matches!(s.subscriptions.status(topic), Some(SubscriptionStatus::Pending))
            })
            .unwrap();

        if timed_out.timed_out() {
            return Err(ClientError::ConnectionFailed(format!("SubAck for {} timed out", topic)));
        }

        match state.subscriptions.status(topic) {
            Some(SubscriptionStatus::Active(_)) => Ok(subscription),
            _ => Err(ClientError::ConnectionFailed(format!("subscribe to {} rejected", topic))),
        }
    }

    /// Sends Unsubscribe and blocks for UnsubAck.
    pub fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        let mut state = self.shared.state.lock().unwrap();
        let id = state.next_packet_id();
        state.subscriptions.begin_unsubscribe(id, topic.to_string());
        drop(state);

        self.connection.send(Packet::Unsubscribe(mqtt_core::Unsubscribe {
            packet_id: id,
            topic_filters: vec![topic],
        }))?;

        let state = self.shared.state.lock().unwrap();
        let _ = self
            .shared
            .changed
            .wait_timeout_while(state, ACK_WAIT_TIMEOUT, |s| s.subscriptions.status(topic).is_some())
            .unwrap();

        Ok(())
    }

    pub fn subscription_status(&self, topic: &str) -> Option<SubscriptionStatus> {
        self.shared.state.lock().unwrap().subscriptions.status(topic)
    }

    /// Publishes `payload` to `topic`, returning the allocated packet id
    /// (0 for QoS 0, which isn't tracked). Blocks for the broker's ack at
    /// QoS 1/2.
    pub fn publish(&self, topic: &str, qos: QoS, payload: &[u8], retain: bool) -> Result<PacketId, ClientError> {
        validate_topic_name(topic)?;

        if qos == QoS::AtMostOnce {
            self.connection.send(Packet::Publish(Publish {
                dup: false,
                qos,
                retain,
                topic,
                packet_id: None,
                payload,
            }))?;
            return Ok(0);
        }

        let mut state = self.shared.state.lock().unwrap();
        let id = state.next_packet_id();
        let pending = PendingPublish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
        };
        if qos == QoS::AtLeastOnce {
            state.publish.send_qos1.insert(id, pending);
        } else {
            state.publish.send_qos2.insert(id, (pending, Qos2SendState::WaitingPubRec));
        }
        drop(state);

        self.connection.send(Packet::Publish(Publish {
            dup: false,
            qos,
            retain,
            topic,
            packet_id: Some(id),
            payload,
        }))?;

        let state = self.shared.state.lock().unwrap();
        let _ = self
            .shared
            .changed
            .wait_timeout_while(state, ACK_WAIT_TIMEOUT, |s| {
                s.publish.send_qos1.contains_key(&id) || s.publish.send_qos2.contains_key(&id)
            })
            .unwrap();

        Ok(id)
    }

    /// Retransmits every message still in a send table with DUP=1, for use
    /// right after reconnecting.
    pub fn retransmit_in_flight(&self) -> Result<(), ClientError> {
        let pending = self.shared.state.lock().unwrap().publish.drain_for_retransmit();
        for (id, qos, message) in pending {
            self.connection.send(Packet::Publish(Publish {
                dup: true,
                qos,
                retain: message.retain,
                topic: &message.topic,
                packet_id: Some(id),
                payload: &message.payload,
            }))?;
        }
        Ok(())
    }

    /// Sends Disconnect, closes the transport.
    pub fn disconnect(&mut self) -> Result<(), ClientError> {
        self.connection.disconnect()
    }
}

fn write_ack(writer: &Mutex<AnyTransport>, packet: Packet) {
    let mut buf = BytesMut::new();
    packet.write_to(&mut buf);
    if let Err(err) = writer.lock().unwrap().write_all(&buf) {
        error!("failed to write acknowledgement: {}", err);
    }
}

/// Registers the handlers the publishing and subscriptions managers need
/// before Connect is sent, so acks can never arrive to an empty registry.
fn register_publish_handlers(registry: &mut HandlerRegistry, shared: Arc<Shared>, writer: Arc<Mutex<AnyTransport>>) {
    {
        let shared = shared.clone();
        registry.register(
            Type::PUBACK,
            Box::new(move |packet| {
                if let Packet::PublishAck(PublishAck { packet_id }) = packet {
                    let mut state = shared.state.lock().unwrap();
                    state.publish.send_qos1.remove(packet_id);
                    drop(state);
                    shared.changed.notify_all();
                }
            }),
        );
    }

    {
        let shared = shared.clone();
        let writer = writer.clone();
        registry.register(
            Type::PUBREC,
            Box::new(move |packet| {
                if let Packet::PublishReceived(PublishReceived { packet_id }) = packet {
                    let mut state = shared.state.lock().unwrap();
                    if let Some((_, flow)) = state.publish.send_qos2.get_mut(packet_id) {
                        *flow = Qos2SendState::WaitingPubComp;
                        drop(state);
                        write_ack(&writer, Packet::PublishRelease(PublishRelease { packet_id: *packet_id }));
                    }
                }
            }),
        );
    }

    {
        let shared = shared.clone();
        registry.register(
            Type::PUBCOMP,
            Box::new(move |packet| {
                if let Packet::PublishComplete(PublishComplete { packet_id }) = packet {
                    let mut state = shared.state.lock().unwrap();
                    state.publish.send_qos2.remove(packet_id);
                    drop(state);
                    shared.changed.notify_all();
                }
            }),
        );
    }

    {
        let shared = shared.clone();
        let writer = writer.clone();
        registry.register(
            Type::PUBLISH,
            Box::new(move |packet| {
                if let Packet::Publish(publish) = packet {
                    handle_received_publish(&shared, &writer, publish);
                }
            }),
        );
    }

    {
        let shared = shared.clone();
        let writer = writer.clone();
        registry.register(
            Type::PUBREL,
            Box::new(move |packet| {
                if let Packet::PublishRelease(PublishRelease { packet_id }) = packet {
                    let mut state = shared.state.lock().unwrap();
                    let was_live = state.publish.recv_qos2.remove(packet_id);
                    drop(state);
                    // A PubRel for an id we never PubRec'd (or already
                    // PubComp'd) is dropped rather than acknowledged.
                    if was_live {
                        write_ack(&writer, Packet::PublishComplete(PublishComplete { packet_id: *packet_id }));
                    }
                }
            }),
        );
    }

    {
        let shared = shared.clone();
        registry.register(
            Type::SUBACK,
            Box::new(move |packet| {
                if let Packet::SubscribeAck(SubscribeAck { packet_id, status }) = packet {
                    let result = status.first().map(|code| match code {
                        SubscribeReturnCode::Success(qos) => Some(*qos),
                        SubscribeReturnCode::Failure => None,
                    });
                    let mut state = shared.state.lock().unwrap();
                    state.subscriptions.confirm_subscribe(*packet_id, result.flatten());
                    drop(state);
                    shared.changed.notify_all();
                }
            }),
        );
    }

    {
        registry.register(
            Type::UNSUBACK,
            Box::new(move |packet| {
                if let Packet::UnsubscribeAck(UnsubscribeAck { packet_id }) = packet {
                    let mut state = shared.state.lock().unwrap();
                    state.subscriptions.confirm_unsubscribe(*packet_id);
                    drop(state);
                    shared.changed.notify_all();
                }
            }),
        );
    }
}

fn handle_received_publish(shared: &Arc<Shared>, writer: &Mutex<AnyTransport>, publish: &Publish) {
    match publish.qos {
        QoS::AtMostOnce => {
            shared
                .state
                .lock()
                .unwrap()
                .subscriptions
                .dispatch(publish.topic, publish.payload, publish.qos, publish.retain);
        }
        QoS::AtLeastOnce => {
            let packet_id = publish.packet_id.expect("QoS 1 publish carries a packet id");
            shared
                .state
                .lock()
                .unwrap()
                .subscriptions
                .dispatch(publish.topic, publish.payload, publish.qos, publish.retain);
            write_ack(writer, Packet::PublishAck(PublishAck { packet_id }));
        }
        QoS::ExactlyOnce => {
            let packet_id = publish.packet_id.expect("QoS 2 publish carries a packet id");
            let mut state = shared.state.lock().unwrap();
            let first_delivery = state.publish.recv_qos2.insert(packet_id);
            if first_delivery {
                state
                    .subscriptions
                    .dispatch(publish.topic, publish.payload, publish.qos, publish.retain);
            }
            drop(state);
            write_ack(writer, Packet::PublishReceived(PublishReceived { packet_id }));
        }
    }
}
