#[macro_use]
extern crate bitflags;

mod decode;
mod encode;
mod error;
mod packet;

pub use decode::decode;
pub use encode::WriteTo;
pub use error::{DecodeError, EncodeError};
pub use packet::{
    Connect, ConnectAck, ConnectAckFlags, ConnectFlags, ConnectReturnCode, FixedHeader, LastWill,
    Packet, PacketId, ProtocolLevel, Publish, PublishAck, PublishComplete, PublishFlags,
    PublishReceived, PublishRelease, QoS, Subscribe, SubscribeAck, SubscribeReturnCode,
    Unsubscribe, UnsubscribeAck, Type, MAX_REMAINING_LENGTH,
};
