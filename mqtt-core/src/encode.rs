use core::mem;

use bytes::BufMut;

use crate::error::EncodeError;
use crate::packet::*;

const LENGTH_FIELD_SIZE: usize = mem::size_of::<u16>();

trait BufMutExt: BufMut {
    fn put_utf8_str(&mut self, s: &str) {
        self.put_binary(s.as_bytes())
    }

    fn put_binary(&mut self, s: &[u8]) {
        self.put_u16(s.len() as u16);
        self.put_slice(s)
    }

    fn put_varint(&mut self, mut n: usize) {
        loop {
            let b = (n % 0x80) as u8;
            n >>= 7;
            if n > 0 {
                self.put_u8(0x80 | b);
            } else {
                self.put_u8(b);
                break;
            }
        }
    }
}

impl<T: BufMut> BufMutExt for T {}

fn size_of_varint(n: usize) -> Result<usize, EncodeError> {
    match n {
        n if n <= 127 => Ok(1),
        n if n <= 16_383 => Ok(2),
        n if n <= 2_097_151 => Ok(3),
        n if n <= MAX_REMAINING_LENGTH => Ok(4),
        n => Err(EncodeError::InvalidPayloadSize(n)),
    }
}

/// A trait for objects which can be written to byte-oriented sinks.
pub trait WriteTo {
    /// Gets the size of this object's encoding, not including any fixed
    /// header.
    fn size(&self) -> usize;

    /// Writes this object to the given byte-oriented sink.
    fn write_to<T: BufMut>(&self, buf: &mut T);
}

impl FixedHeader {
    fn size(&self) -> Result<usize, EncodeError> {
        Ok(mem::size_of::<u8>() + size_of_varint(self.remaining_length)?)
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(((self.packet_type as u8) << 4) | self.packet_flags);
        buf.put_varint(self.remaining_length);
    }
}

impl Packet<'_> {
    fn packet_flags(&self) -> u8 {
        match self {
            Packet::Publish(publish) => publish.flags().bits(),
            Packet::PublishRelease(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => 0b0010,
            _ => 0,
        }
    }

    fn remaining_length(&self) -> usize {
        match self {
            Packet::Connect(connect) => connect.size(),
            Packet::ConnectAck(connect_ack) => connect_ack.size(),
            Packet::Publish(publish) => publish.size(),
            Packet::PublishAck(ack) => ack.size(),
            Packet::PublishReceived(ack) => ack.size(),
            Packet::PublishRelease(ack) => ack.size(),
            Packet::PublishComplete(ack) => ack.size(),
            Packet::Subscribe(subscribe) => subscribe.size(),
            Packet::SubscribeAck(ack) => ack.size(),
            Packet::Unsubscribe(unsubscribe) => unsubscribe.size(),
            Packet::UnsubscribeAck(ack) => ack.size(),
            Packet::Ping | Packet::Pong | Packet::Disconnect => 0,
        }
    }

    fn fixed_header(&self) -> FixedHeader {
        FixedHeader {
            packet_type: self.packet_type(),
            packet_flags: self.packet_flags(),
            remaining_length: self.remaining_length(),
        }
    }

    /// The number of bytes `write_to` will emit for this packet, or an error
    /// if the remaining length can't be encoded in the 4-byte varint.
    pub fn size(&self) -> Result<usize, EncodeError> {
        let fixed_header = self.fixed_header();

        Ok(fixed_header.size()? + fixed_header.remaining_length)
    }

    /// Encodes this packet into `buf`.
    ///
    /// Callers that need to size a buffer up front should call [`size`]
    /// first; `write_to` itself assumes the remaining length already fits.
    ///
    /// [`size`]: Packet::size
    pub fn write_to<T: BufMut>(&self, buf: &mut T) {
        self.fixed_header().write_to(buf);

        match self {
            Packet::Connect(connect) => connect.write_to(buf),
            Packet::ConnectAck(connect_ack) => connect_ack.write_to(buf),
            Packet::Publish(publish) => publish.write_to(buf),
            Packet::PublishAck(ack) => ack.write_to(buf),
            Packet::PublishReceived(ack) => ack.write_to(buf),
            Packet::PublishRelease(ack) => ack.write_to(buf),
            Packet::PublishComplete(ack) => ack.write_to(buf),
            Packet::Subscribe(subscribe) => subscribe.write_to(buf),
            Packet::SubscribeAck(ack) => ack.write_to(buf),
            Packet::Unsubscribe(unsubscribe) => unsubscribe.write_to(buf),
            Packet::UnsubscribeAck(ack) => ack.write_to(buf),
            Packet::Ping | Packet::Pong | Packet::Disconnect => {}
        }
    }
}

impl WriteTo for Connect<'_> {
    fn size(&self) -> usize {
        let protocol_name = self.protocol_level.protocol_name();

        LENGTH_FIELD_SIZE
            + protocol_name.len()
            + mem::size_of::<u8>() // protocol level
            + mem::size_of::<u8>() // flags
            + mem::size_of::<u16>() // keep_alive
            + LENGTH_FIELD_SIZE
            + self.client_id.len()
            + self.last_will.as_ref().map_or(0, |will| {
                LENGTH_FIELD_SIZE + will.topic.len() + LENGTH_FIELD_SIZE + will.message.len()
            })
            + self.username.map_or(0, |s| LENGTH_FIELD_SIZE + s.len())
            + self.password.map_or(0, |s| LENGTH_FIELD_SIZE + s.len())
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_utf8_str(self.protocol_level.protocol_name());
        buf.put_u8(self.protocol_level as u8);
        buf.put_u8(self.flags().bits());
        buf.put_u16(self.keep_alive);
        buf.put_utf8_str(self.client_id);
        if let Some(will) = &self.last_will {
            buf.put_utf8_str(will.topic);
            buf.put_binary(will.message);
        }
        if let Some(username) = self.username {
            buf.put_utf8_str(username);
        }
        if let Some(password) = self.password {
            buf.put_binary(password);
        }
    }
}

impl WriteTo for ConnectAck {
    fn size(&self) -> usize {
        mem::size_of::<u8>() + mem::size_of::<u8>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(if self.session_present {
            ConnectAckFlags::SESSION_PRESENT.bits()
        } else {
            0
        });
        buf.put_u8(self.return_code as u8);
    }
}

impl WriteTo for Publish<'_> {
    fn size(&self) -> usize {
        LENGTH_FIELD_SIZE
            + self.topic.len()
            + self.packet_id.map_or(0, |_| mem::size_of::<PacketId>())
            + self.payload.len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_utf8_str(self.topic);
        if let Some(packet_id) = self.packet_id {
            buf.put_u16(packet_id);
        }
        buf.put_slice(self.payload)
    }
}

macro_rules! packet_id_only_codec {
    ($ty:ident) => {
        impl WriteTo for $ty {
            fn size(&self) -> usize {
                mem::size_of::<PacketId>()
            }

            fn write_to<T: BufMut>(&self, buf: &mut T) {
                buf.put_u16(self.packet_id);
            }
        }
    };
}

packet_id_only_codec!(PublishAck);
packet_id_only_codec!(PublishReceived);
packet_id_only_codec!(PublishRelease);
packet_id_only_codec!(PublishComplete);
packet_id_only_codec!(UnsubscribeAck);

impl WriteTo for Subscribe<'_> {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>()
            + self
                .subscriptions
                .iter()
                .map(|(topic_filter, _)| LENGTH_FIELD_SIZE + topic_filter.len() + mem::size_of::<u8>())
                .sum::<usize>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
        for (topic_filter, qos) in &self.subscriptions {
            buf.put_utf8_str(topic_filter);
            buf.put_u8(*qos as u8);
        }
    }
}

impl WriteTo for SubscribeAck {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>() + mem::size_of::<u8>() * self.status.len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
        for &return_code in &self.status {
            buf.put_u8(return_code.into());
        }
    }
}

impl WriteTo for Unsubscribe<'_> {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>()
            + self
                .topic_filters
                .iter()
                .map(|topic_filter| LENGTH_FIELD_SIZE + topic_filter.len())
                .sum::<usize>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
        for topic_filter in &self.topic_filters {
            buf.put_utf8_str(topic_filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_varint_and_strings() {
        let mut v = Vec::new();

        v.put_utf8_str("hello");
        v.put_binary(b"world");
        v.put_varint(123);
        v.put_varint(129);
        v.put_varint(16383);
        v.put_varint(2097151);
        v.put_varint(268435455);

        assert_eq!(
            v,
            b"\x00\x05hello\x00\x05world\x7b\x81\x01\xff\x7f\xff\xff\x7f\xff\xff\xff\x7f"
        );
    }

    macro_rules! assert_packet {
        ($packet:expr, $right:expr) => {{
            let packet = $packet;
            assert_eq!(packet.size().unwrap(), $right.len(), "packet size");

            let mut v = Vec::new();
            packet.write_to(&mut v);
            assert_eq!(v, &$right[..], "packet content: {:#?}", packet);
        }};
    }

    #[test]
    fn encodes_bare_connect() {
        assert_packet!(
            Packet::Connect(Connect {
                protocol_level: ProtocolLevel::V311,
                clean_session: true,
                keep_alive: 30,
                client_id: "c1",
                last_will: None,
                username: None,
                password: None,
            }),
            b"\x10\x1A\x00\x04MQTT\x04\x02\x00\x1E\x00\x02c1"
        );
    }

    #[test]
    fn encodes_connect_with_will_and_credentials() {
        assert_packet!(
            Packet::Connect(Connect {
                protocol_level: ProtocolLevel::V311,
                clean_session: false,
                keep_alive: 60,
                client_id: "12345",
                last_will: Some(LastWill {
                    qos: QoS::ExactlyOnce,
                    retain: false,
                    topic: "topic",
                    message: b"message",
                }),
                username: Some("user"),
                password: Some(b"pass"),
            }),
            b"\x10\x2F\x00\x04MQTT\x04\x34\x00\x3C\x00\x0512345\x00\x05topic\x00\x07message\x00\x04user\x00\x04pass"
        );
    }

    #[test]
    fn encodes_qos1_publish_and_puback() {
        assert_packet!(
            Packet::Publish(Publish {
                dup: false,
                qos: QoS::AtLeastOnce,
                retain: false,
                topic: "a/b",
                packet_id: Some(1),
                payload: b"hi",
            }),
            b"\x32\x09\x00\x03a/b\x00\x01hi"
        );

        assert_packet!(
            Packet::PublishAck(PublishAck { packet_id: 1 }),
            b"\x40\x02\x00\x01"
        );
    }

    #[test]
    fn encodes_subscribe_and_suback() {
        assert_packet!(
            Packet::Subscribe(Subscribe {
                packet_id: 0x1234,
                subscriptions: vec![("test", QoS::AtLeastOnce), ("filter", QoS::ExactlyOnce)],
            }),
            b"\x82\x12\x12\x34\x00\x04test\x01\x00\x06filter\x02"
        );

        assert_packet!(
            Packet::SubscribeAck(SubscribeAck {
                packet_id: 0x1234,
                status: vec![
                    SubscribeReturnCode::Success(QoS::AtLeastOnce),
                    SubscribeReturnCode::Failure,
                    SubscribeReturnCode::Success(QoS::ExactlyOnce),
                ],
            }),
            b"\x90\x05\x12\x34\x01\x80\x02"
        );
    }

    #[test]
    fn encodes_ping_pong_disconnect() {
        assert_packet!(Packet::Ping, b"\xc0\x00");
        assert_packet!(Packet::Pong, b"\xd0\x00");
        assert_packet!(Packet::Disconnect, b"\xe0\x00");
    }
}
