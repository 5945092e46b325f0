#[macro_use]
extern crate log;

mod client;
mod connect_builder;
mod connection;
mod dispatcher;
mod error;
mod framed;
mod keepalive;
mod publish;
mod state;
mod subscription;
mod topic;
mod transport;

pub use client::{Client, ClientConfig};
pub use connect_builder::ConnectBuilder;
pub use connection::ConnectionState;
pub use dispatcher::{Handler, HandlerRegistry};
pub use error::ClientError;
pub use subscription::{Message, Subscription, SubscriptionStatus};
pub use topic::{validate_topic_filter, validate_topic_name};
pub use transport::tls::TlsConfig;
pub use transport::{AnyTransport, Transport, TryClone};

pub use mqtt_core::{Connect, LastWill, ProtocolLevel, QoS};
