use core::convert::TryFrom;
use core::str;

use nom::bytes::streaming::take;
use nom::number::streaming::{be_u16, be_u8};

use crate::error::DecodeError;
use crate::packet::*;

type NomError<'a> = (&'a [u8], nom::error::ErrorKind);

fn from_nom(err: nom::Err<NomError<'_>>) -> DecodeError {
    match err {
        nom::Err::Incomplete(_) => DecodeError::Truncated,
        nom::Err::Error((_, kind)) | nom::Err::Failure((_, kind)) => {
            DecodeError::MalformedBody(format!("{:?}", kind))
        }
    }
}

type PResult<'a, O> = Result<(&'a [u8], O), DecodeError>;

fn u8(input: &[u8]) -> PResult<u8> {
    be_u8::<NomError<'_>>(input).map_err(from_nom)
}

fn u16(input: &[u8]) -> PResult<u16> {
    be_u16::<NomError<'_>>(input).map_err(from_nom)
}

fn slice(input: &[u8], n: usize) -> PResult<&[u8]> {
    take::<_, _, NomError<'_>>(n)(input).map_err(from_nom)
}

/// A length-prefixed UTF-8 string, as used throughout the variable header and
/// payload (MQTT v3.1.1 §1.5.3).
fn mqtt_string(input: &[u8]) -> PResult<&str> {
    let (input, len) = u16(input)?;
    let (input, bytes) = slice(input, len as usize)?;
    let s = str::from_utf8(bytes)
        .map_err(|e| DecodeError::MalformedBody(format!("invalid UTF-8 string: {}", e)))?;
    Ok((input, s))
}

const CONTINUATION_BIT: u8 = 0x80;

/// The remaining-length field: 1-4 bytes, 7 bits of value per byte, top bit
/// as a continuation marker. A 5th continuation byte is a malformed header,
/// not a truncated one.
fn variable_length(input: &[u8]) -> PResult<usize> {
    let mut value = 0usize;
    let mut rest = input;

    for i in 0..4 {
        let (next, byte) = u8(rest)?;
        rest = next;
        value += ((byte & !CONTINUATION_BIT) as usize) << (7 * i);

        if byte & CONTINUATION_BIT == 0 {
            return Ok((rest, value));
        }
    }

    Err(DecodeError::MalformedHeader(
        "remaining length used a 5th continuation byte".into(),
    ))
}

impl FixedHeader {
    fn parse(input: &[u8]) -> PResult<FixedHeader> {
        let (input, b) = u8(input)?;
        let packet_type = Type::try_from(b >> 4)
            .map_err(|_| DecodeError::UnrecognizedField(format!("packet type {}", b >> 4)))?;
        let packet_flags = b & 0x0F;
        let (input, remaining_length) = variable_length(input)?;

        Ok((
            input,
            FixedHeader {
                packet_type,
                packet_flags,
                remaining_length,
            },
        ))
    }
}

impl<'a> Connect<'a> {
    fn parse(input: &'a [u8]) -> PResult<'a, Connect<'a>> {
        let (input, name) = mqtt_string(input)?;
        let (input, level) = u8(input)?;
        let protocol_level = ProtocolLevel::try_from(level)
            .ok()
            .filter(|lvl| lvl.protocol_name() == name)
            .ok_or_else(|| {
                DecodeError::MalformedBody(format!(
                    "unsupported protocol {:?} level {}",
                    name, level
                ))
            })?;

        let (input, flags_byte) = u8(input)?;
        let flags = ConnectFlags::from_bits_truncate(flags_byte);

        let (input, keep_alive) = u16(input)?;
        let (input, client_id) = mqtt_string(input)?;

        let (input, last_will) = if flags.contains(ConnectFlags::LAST_WILL) {
            let (input, topic) = mqtt_string(input)?;
            let (input, len) = u16(input)?;
            let (input, message) = slice(input, len as usize)?;
            (
                input,
                Some(LastWill {
                    qos: flags.qos(),
                    retain: flags.contains(ConnectFlags::WILL_RETAIN),
                    topic,
                    message,
                }),
            )
        } else {
            (input, None)
        };

        let (input, username) = if flags.contains(ConnectFlags::USERNAME) {
            let (input, s) = mqtt_string(input)?;
            (input, Some(s))
        } else {
            (input, None)
        };

        let (input, password) = if flags.contains(ConnectFlags::PASSWORD) {
            let (input, len) = u16(input)?;
            let (input, bytes) = slice(input, len as usize)?;
            (input, Some(bytes))
        } else {
            (input, None)
        };

        Ok((
            input,
            Connect {
                protocol_level,
                clean_session: flags.contains(ConnectFlags::CLEAN_SESSION),
                keep_alive,
                client_id,
                last_will,
                username,
                password,
            },
        ))
    }
}

impl ConnectAck {
    fn parse(input: &[u8]) -> PResult<ConnectAck> {
        let (input, flags) = u8(input)?;
        let (input, code) = u8(input)?;
        let return_code = ConnectReturnCode::try_from(code)
            .map_err(|_| DecodeError::UnrecognizedField(format!("connect return code {}", code)))?;

        Ok((
            input,
            ConnectAck {
                session_present: ConnectAckFlags::from_bits_truncate(flags)
                    .contains(ConnectAckFlags::SESSION_PRESENT),
                return_code,
            },
        ))
    }
}

impl<'a> Publish<'a> {
    fn parse(packet_flags: u8, input: &'a [u8]) -> PResult<'a, Publish<'a>> {
        let flags = PublishFlags::from_bits_truncate(packet_flags);
        let qos = flags.qos();

        let (input, topic) = mqtt_string(input)?;
        let (input, packet_id) = if qos == QoS::AtMostOnce {
            (input, None)
        } else {
            let (input, id) = u16(input)?;
            (input, Some(id))
        };

        Ok((
            &[],
            Publish {
                dup: flags.dup(),
                qos,
                retain: flags.retain(),
                topic,
                packet_id,
                payload: input,
            },
        ))
    }
}

macro_rules! packet_id_only {
    ($ty:ident) => {
        impl $ty {
            fn parse(input: &[u8]) -> PResult<$ty> {
                let (input, packet_id) = u16(input)?;
                Ok((input, $ty { packet_id }))
            }
        }
    };
}

packet_id_only!(PublishAck);
packet_id_only!(PublishReceived);
packet_id_only!(PublishRelease);
packet_id_only!(UnsubscribeAck);
packet_id_only!(PublishComplete);

impl<'a> Subscribe<'a> {
    fn parse(input: &'a [u8]) -> PResult<'a, Subscribe<'a>> {
        let (mut input, packet_id) = u16(input)?;
        let mut subscriptions = Vec::new();

        while !input.is_empty() {
            let (rest, topic) = mqtt_string(input)?;
            let (rest, qos_byte) = u8(rest)?;
            let qos = QoS::try_from(qos_byte & 0x03)
                .map_err(|_| DecodeError::UnrecognizedField(format!("QoS {}", qos_byte)))?;

            subscriptions.push((topic, qos));
            input = rest;
        }

        if subscriptions.is_empty() {
            return Err(DecodeError::MalformedBody(
                "SUBSCRIBE with no topic filters".into(),
            ));
        }

        Ok((
            input,
            Subscribe {
                packet_id,
                subscriptions,
            },
        ))
    }
}

impl SubscribeAck {
    fn parse(input: &[u8]) -> PResult<SubscribeAck> {
        let (mut input, packet_id) = u16(input)?;
        let mut status = Vec::new();

        while !input.is_empty() {
            let (rest, code) = u8(input)?;
            let return_code = if code == SubscribeReturnCode::FAILURE {
                SubscribeReturnCode::Failure
            } else {
                let qos = QoS::try_from(code & 0x03)
                    .map_err(|_| DecodeError::UnrecognizedField(format!("suback code {}", code)))?;
                SubscribeReturnCode::Success(qos)
            };

            status.push(return_code);
            input = rest;
        }

        Ok((input, SubscribeAck { packet_id, status }))
    }
}

impl<'a> Unsubscribe<'a> {
    fn parse(input: &'a [u8]) -> PResult<'a, Unsubscribe<'a>> {
        let (mut input, packet_id) = u16(input)?;
        let mut topic_filters = Vec::new();

        while !input.is_empty() {
            let (rest, topic) = mqtt_string(input)?;
            topic_filters.push(topic);
            input = rest;
        }

        if topic_filters.is_empty() {
            return Err(DecodeError::MalformedBody(
                "UNSUBSCRIBE with no topic filters".into(),
            ));
        }

        Ok((
            input,
            Unsubscribe {
                packet_id,
                topic_filters,
            },
        ))
    }
}

/// Decodes a single packet from the front of `input`, returning the bytes
/// left over after it.
///
/// `DecodeError::Truncated` means the caller should read more bytes from the
/// transport and retry with a longer buffer; every other variant is fatal to
/// the connection.
pub fn decode(input: &[u8]) -> Result<(&[u8], Packet), DecodeError> {
    let (rest, fixed_header) = FixedHeader::parse(input)?;
    let (rest, body) = slice(rest, fixed_header.remaining_length)?;

    let (leftover, packet) = match fixed_header.packet_type {
        Type::CONNECT => {
            let (leftover, connect) = Connect::parse(body)?;
            (leftover, Packet::Connect(connect))
        }
        Type::CONNACK => {
            let (leftover, ack) = ConnectAck::parse(body)?;
            (leftover, Packet::ConnectAck(ack))
        }
        Type::PUBLISH => {
            let (leftover, publish) = Publish::parse(fixed_header.packet_flags, body)?;
            (leftover, Packet::Publish(publish))
        }
        Type::PUBACK => {
            let (leftover, ack) = PublishAck::parse(body)?;
            (leftover, Packet::PublishAck(ack))
        }
        Type::PUBREC => {
            let (leftover, ack) = PublishReceived::parse(body)?;
            (leftover, Packet::PublishReceived(ack))
        }
        Type::PUBREL => {
            if fixed_header.packet_flags != 0b0010 {
                return Err(DecodeError::MalformedHeader(
                    "PUBREL reserved flags must be 0b0010".into(),
                ));
            }
            let (leftover, release) = PublishRelease::parse(body)?;
            (leftover, Packet::PublishRelease(release))
        }
        Type::PUBCOMP => {
            let (leftover, ack) = PublishComplete::parse(body)?;
            (leftover, Packet::PublishComplete(ack))
        }
        Type::SUBSCRIBE => {
            let (leftover, subscribe) = Subscribe::parse(body)?;
            (leftover, Packet::Subscribe(subscribe))
        }
        Type::SUBACK => {
            let (leftover, ack) = SubscribeAck::parse(body)?;
            (leftover, Packet::SubscribeAck(ack))
        }
        Type::UNSUBSCRIBE => {
            let (leftover, unsubscribe) = Unsubscribe::parse(body)?;
            (leftover, Packet::Unsubscribe(unsubscribe))
        }
        Type::UNSUBACK => {
            let (leftover, ack) = UnsubscribeAck::parse(body)?;
            (leftover, Packet::UnsubscribeAck(ack))
        }
        Type::PINGREQ => (body, Packet::Ping),
        Type::PINGRESP => (body, Packet::Pong),
        Type::DISCONNECT => (body, Packet::Disconnect),
    };

    if !leftover.is_empty() {
        return Err(DecodeError::MalformedBody(format!(
            "{} unconsumed byte(s) in packet body",
            leftover.len()
        )));
    }

    Ok((rest, packet))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_connect() {
        let bytes: &[u8] = &[
            0x10, 0x1A, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x1E, 0x00, 0x02,
            b'c', b'1',
        ];

        let (rest, packet) = decode(bytes).expect("decode");
        assert!(rest.is_empty());

        match packet {
            Packet::Connect(connect) => {
                assert_eq!(connect.protocol_level, ProtocolLevel::V311);
                assert!(connect.clean_session);
                assert_eq!(connect.keep_alive, 30);
                assert_eq!(connect.client_id, "c1");
                assert_eq!(connect.last_will, None);
                assert_eq!(connect.username, None);
                assert_eq!(connect.password, None);
            }
            other => panic!("expected Connect, got {:?}", other),
        }
    }

    #[test]
    fn decodes_qos1_publish_and_puback() {
        let publish: &[u8] = &[
            0x32, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x01, b'h', b'i',
        ];
        let (rest, packet) = decode(publish).expect("decode publish");
        assert!(rest.is_empty());
        match packet {
            Packet::Publish(p) => {
                assert_eq!(p.topic, "a/b");
                assert_eq!(p.qos, QoS::AtLeastOnce);
                assert!(!p.dup);
                assert!(!p.retain);
                assert_eq!(p.packet_id, Some(1));
                assert_eq!(p.payload, b"hi");
            }
            other => panic!("expected Publish, got {:?}", other),
        }

        let puback: &[u8] = &[0x40, 0x02, 0x00, 0x01];
        let (rest, packet) = decode(puback).expect("decode puback");
        assert!(rest.is_empty());
        assert_eq!(packet, Packet::PublishAck(PublishAck { packet_id: 1 }));
    }

    #[test]
    fn truncated_packet_asks_for_more_bytes() {
        let bytes: &[u8] = &[0x40, 0x02, 0x00];
        assert!(matches!(decode(bytes), Err(DecodeError::Truncated)));
    }

    #[test]
    fn fifth_continuation_byte_is_malformed_header() {
        let bytes: &[u8] = &[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(matches!(
            decode(bytes),
            Err(DecodeError::MalformedHeader(_))
        ));
    }

    #[test]
    fn unrecognized_packet_type_nibble() {
        let bytes: &[u8] = &[0x00, 0x00];
        assert!(matches!(
            decode(bytes),
            Err(DecodeError::UnrecognizedField(_))
        ));
    }

    #[test]
    fn decodes_suback_with_mixed_results() {
        let bytes: &[u8] = &[0x90, 0x05, 0x00, 0x07, 0x01, 0x80, 0x00];
        let (rest, packet) = decode(bytes).expect("decode");
        assert!(rest.is_empty());
        match packet {
            Packet::SubscribeAck(ack) => {
                assert_eq!(ack.packet_id, 7);
                assert_eq!(
                    ack.status,
                    vec![
                        SubscribeReturnCode::Success(QoS::AtLeastOnce),
                        SubscribeReturnCode::Failure,
                        SubscribeReturnCode::Success(QoS::AtMostOnce),
                    ]
                );
            }
            other => panic!("expected SubscribeAck, got {:?}", other),
        }
    }

    #[test]
    fn decodes_ping_request() {
        let bytes: &[u8] = &[0xC0, 0x00];
        let (rest, packet) = decode(bytes).expect("decode");
        assert!(rest.is_empty());
        assert_eq!(packet, Packet::Ping);
    }
}
