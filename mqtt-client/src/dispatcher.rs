use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use mqtt_core::{Packet, Type};

use crate::error::ClientError;
use crate::framed::Framed;
use crate::transport::Transport;

/// A callback invoked with each packet of its registered type, in
/// registration order.
pub type Handler = Box<dyn Fn(&Packet) + Send>;

/// Packet-type -> ordered callback list. Registration happens during
/// `Connection` construction, before `connect` sends anything, so the
/// ConnectAck handler is always present before it could possibly fire.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Type, Vec<Handler>>,
}

impl HandlerRegistry {
    pub fn register(&mut self, packet_type: Type, handler: Handler) {
        self.handlers.entry(packet_type).or_default().push(handler);
    }

    fn dispatch(&self, packet: &Packet) {
        if let Some(handlers) = self.handlers.get(&packet.packet_type()) {
            for handler in handlers {
                handler(packet);
            }
        }
    }
}

/// Owns the background receive loop: reads whole packets off a `Framed`
/// transport and routes them through the shared `HandlerRegistry`. Runs
/// until the transport errors or is closed, at which point it calls
/// `on_close` exactly once — the hook `Connection` uses to detect an
/// unsolicited disconnect.
pub struct Dispatcher {
    join_handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn<T>(
        mut framed: Framed<T>,
        registry: Arc<Mutex<HandlerRegistry>>,
        on_close: impl FnOnce(Option<ClientError>) + Send + 'static,
    ) -> Self
    where
        T: Transport,
    {
        let join_handle = thread::spawn(move || {
            let cause = loop {
                match framed.receive() {
                    Ok(packet) => registry.lock().unwrap().dispatch(&packet),
                    Err(err) => break Some(err),
                }
            };
            on_close(cause);
        });

        Dispatcher {
            join_handle: Some(join_handle),
        }
    }

    /// Blocks until the receive loop has exited, e.g. after the transport
    /// was closed by `disconnect`.
    pub fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use mqtt_core::Packet;

    use super::*;

    #[test]
    fn dispatches_in_registration_order() {
        let mut registry = HandlerRegistry::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let order = order.clone();
            registry.register(
                Type::PINGRESP,
                Box::new(move |_packet| order.lock().unwrap().push(tag)),
            );
        }

        registry.dispatch(&Packet::Pong);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn ignores_packet_types_with_no_handler() {
        let registry = HandlerRegistry::default();
        registry.dispatch(&Packet::Ping);
    }
}
