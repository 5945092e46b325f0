use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use log::warn;
use mqtt_core::{Connect, ConnectAck, Packet, Type};

use crate::dispatcher::{Dispatcher, HandlerRegistry};
use crate::error::ClientError;
use crate::framed::Framed;
use crate::keepalive::KeepAlive;
use crate::transport::{Transport, TryClone};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Faulted,
}

struct HandshakeResult {
    ack: Mutex<Option<ConnectAck>>,
    cv: Condvar,
}

/// Drives the connect handshake and owns the send path for a single
/// connected session. `Connection` is the single writer of the transport;
/// the dispatcher is its single reader.
pub struct Connection<T> {
    state: Arc<Mutex<ConnectionState>>,
    writer: Mutex<T>,
    dispatcher: Dispatcher,
    registry: Arc<Mutex<HandlerRegistry>>,
    keep_alive: Option<KeepAlive<T>>,
}

impl<T> Connection<T>
where
    T: Transport,
{
    /// Runs the full connect handshake: opens no transport itself (the
    /// caller already has one), starts the dispatcher, registers the
    /// internal ConnectAck handler, sends `connect_packet`, and blocks for
    /// up to `timeout` for the broker's reply.
    pub fn connect(
        transport: T,
        connect_packet: Connect,
        timeout: Option<Duration>,
        register_handlers: impl FnOnce(&mut HandlerRegistry),
        on_unsolicited_disconnect: impl FnMut() + Send + 'static,
    ) -> Result<(Self, ConnectAck), ClientError> {
        let keep_alive_secs = connect_packet.keep_alive;
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let registry = Arc::new(Mutex::new(HandlerRegistry::default()));

        let handshake = Arc::new(HandshakeResult {
            ack: Mutex::new(None),
            cv: Condvar::new(),
        });
        {
            let handshake = handshake.clone();
            let mut registry = registry.lock().unwrap();
            registry.register(
                Type::CONNACK,
                Box::new(move |packet| {
                    if let Packet::ConnectAck(ack) = packet {
                        *handshake.ack.lock().unwrap() = Some(ack.clone());
                        handshake.cv.notify_all();
                    }
                }),
            );
            register_handlers(&mut registry);
        }

        let writer_stream = transport.try_clone().map_err(ClientError::Io)?;
        let framed = Framed::new(transport);

        let dispatcher_state = state.clone();
        let dispatcher = Dispatcher::spawn(framed, registry.clone(), move |cause| {
            let mut state = dispatcher_state.lock().unwrap();
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                drop(state);
                if let Some(err) = cause {
                    warn!("connection closed: {}", err);
                }
            }
        });

        let mut connection = Connection {
            state,
            writer: Mutex::new(writer_stream),
            dispatcher,
            registry,
            keep_alive: None,
        };

        connection.write_packet(&Packet::Connect(connect_packet))?;

        let outcome = {
            let guard = handshake.ack.lock().unwrap();
            let (guard, timed_out) = handshake
                .cv
                .wait_timeout_while(guard, timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT), |o| o.is_none())
                .unwrap();
            if timed_out.timed_out() {
                None
            } else {
                guard.clone()
            }
        };

        let ack = match outcome {
            None => {
                *connection.state.lock().unwrap() = ConnectionState::Faulted;
                // `connection` drops here, which closes the transport and
                // joins the dispatcher thread (see `Drop for Connection`).
                return Err(ClientError::HandshakeTimeout);
            }
            Some(ack) if ack.return_code.ok().is_some() => ack,
            Some(ack) => {
                *connection.state.lock().unwrap() = ConnectionState::Faulted;
                return Err(ClientError::ConnectionRefused(ack.return_code));
            }
        };

        *connection.state.lock().unwrap() = ConnectionState::Connected;

        let keep_alive_stream = connection.writer.lock().unwrap().try_clone().map_err(ClientError::Io)?;
        let mut on_unsolicited_disconnect = on_unsolicited_disconnect;
        let keep_alive_state = connection.state.clone();
        let keep_alive = KeepAlive::new(keep_alive_stream, keep_alive_secs, move || {
            let mut state = keep_alive_state.lock().unwrap();
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                drop(state);
                on_unsolicited_disconnect();
            }
        });

        // No PingReq can have been sent before this point, so there's no
        // race between registering this handler and a PingResp arriving.
        let pong_handle = keep_alive.pong_handle();
        connection.register(
            Type::PINGRESP,
            Box::new(move |packet| {
                if let Packet::Pong = packet {
                    pong_handle.note_pong();
                }
            }),
        );
        connection.keep_alive = Some(keep_alive);

        Ok((connection, ack))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn register(&self, packet_type: Type, handler: crate::dispatcher::Handler) {
        self.registry.lock().unwrap().register(packet_type, handler);
    }

    fn write_packet(&self, packet: &Packet) -> Result<(), ClientError> {
        let mut buf = BytesMut::with_capacity(packet.size()?);
        packet.write_to(&mut buf);
        self.writer.lock().unwrap().write_all(&buf)?;
        if let Some(keep_alive) = &self.keep_alive {
            keep_alive.note_sent();
        }
        Ok(())
    }

    /// Writes a packet to the broker. Valid only while **connected**, except
    /// that the handshake itself bypasses this check.
    pub fn send(&self, packet: Packet) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        self.write_packet(&packet)
    }

    /// Sends Disconnect best-effort, closes the transport, and resets state.
    pub fn disconnect(&mut self) -> Result<(), ClientError> {
        *self.state.lock().unwrap() = ConnectionState::Disconnecting;
        let _ = self.write_packet(&Packet::Disconnect);
        let result = self.writer.lock().unwrap().close();
        self.dispatcher.join();
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
        result.map_err(ClientError::Io)
    }
}

impl<T> Drop for Connection<T>
where
    T: Transport,
{
    /// Closes the transport so the dispatcher thread's blocked read
    /// unblocks, whether or not the caller called `disconnect` first —
    /// `close`/`join` are both safe to run twice.
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.close();
        }
        self.dispatcher.join();
    }
}
