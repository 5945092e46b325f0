use mqtt_core::{Connect, LastWill, ProtocolLevel, QoS};

/// Builds a `Connect` packet, defaulting to clean-session / at-most-once
/// will QoS / the 60s keep-alive a client normally negotiates. Exposed so a
/// caller can override the handshake or attach a will message.
pub struct ConnectBuilder<'a> {
    client_id: &'a str,
    clean_session: bool,
    keep_alive: u16,
    protocol_level: ProtocolLevel,
    last_will: Option<LastWill<'a>>,
    username: Option<&'a str>,
    password: Option<&'a [u8]>,
}

impl<'a> ConnectBuilder<'a> {
    pub fn new(client_id: &'a str) -> Self {
        ConnectBuilder {
            client_id,
            clean_session: true,
            keep_alive: 60,
            protocol_level: ProtocolLevel::default(),
            last_will: None,
            username: None,
            password: None,
        }
    }

    pub fn protocol_level(mut self, level: ProtocolLevel) -> Self {
        self.protocol_level = level;
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive = secs;
        self
    }

    pub fn credentials(mut self, username: &'a str, password: &'a [u8]) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    pub fn with_will(mut self, topic: &'a str, message: &'a [u8], qos: QoS, retain: bool) -> Self {
        self.last_will = Some(LastWill {
            topic,
            message,
            qos,
            retain,
        });
        self
    }

    pub fn build(self) -> Connect<'a> {
        Connect {
            protocol_level: self.protocol_level,
            clean_session: self.clean_session,
            keep_alive: self.keep_alive,
            client_id: self.client_id,
            last_will: self.last_will,
            username: self.username,
            password: self.password,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_handshake_fallback() {
        let connect = ConnectBuilder::new("c1").build();
        assert!(connect.clean_session);
        assert_eq!(connect.keep_alive, 60);
        assert_eq!(connect.protocol_level, ProtocolLevel::V311);
        assert!(connect.last_will.is_none());
    }

    #[test]
    fn attaches_a_will_message() {
        let connect = ConnectBuilder::new("c1")
            .with_will("status/c1", b"offline", QoS::AtLeastOnce, true)
            .build();
        let will = connect.last_will.expect("will");
        assert_eq!(will.topic, "status/c1");
        assert_eq!(will.message, b"offline");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
    }
}
