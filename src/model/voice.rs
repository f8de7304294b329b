//! Wire events for the voice gateway's own opcode set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw voice gateway frame, before opcode interpretation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RawVoiceEvent {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

/// A decoded voice gateway event, inbound or outbound.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum VoiceEvent {
    /// Op 0, client-sent.
    Identify(Identify),
    /// Op 1, client-sent after IP discovery.
    SelectProtocol(SelectProtocol),
    /// Op 2, carries the ssrc and UDP host candidate.
    Ready(Ready),
    /// Op 3, client-sent keepalive carrying a nonce.
    Heartbeat(u64),
    /// Op 4, carries the negotiated mode and secret key.
    SessionDescription(SessionDescription),
    /// Op 5, bidirectional speech signalling.
    Speaking(Speaking),
    /// Op 6, echoes the heartbeat nonce.
    HeartbeatAck(u64),
    /// Op 8, carries the heartbeat interval.
    Hello(Hello),
    /// Op 9, resume acknowledgement.
    Resumed,
    /// Any opcode this library does not interpret.
    Unknown(u8, Value),
}

impl VoiceEvent {
    /// Interprets a raw frame. Unknown or malformed payloads collapse into
    /// [`VoiceEvent::Unknown`] so callers can ignore them uniformly.
    #[must_use]
    pub fn from_raw(raw: RawVoiceEvent) -> Self {
        fn parse<T: serde::de::DeserializeOwned>(op: u8, d: Value, f: impl FnOnce(T) -> VoiceEvent) -> VoiceEvent {
            match serde_json::from_value(d.clone()) {
                Ok(v) => f(v),
                Err(_) => VoiceEvent::Unknown(op, d),
            }
        }

        match raw.op {
            0 => parse(raw.op, raw.d, VoiceEvent::Identify),
            1 => parse(raw.op, raw.d, VoiceEvent::SelectProtocol),
            2 => parse(raw.op, raw.d, VoiceEvent::Ready),
            3 => match raw.d.as_u64() {
                Some(n) => VoiceEvent::Heartbeat(n),
                None => VoiceEvent::Unknown(raw.op, raw.d),
            },
            4 => parse(raw.op, raw.d, VoiceEvent::SessionDescription),
            5 => parse(raw.op, raw.d, VoiceEvent::Speaking),
            6 => match raw.d.as_u64() {
                Some(n) => VoiceEvent::HeartbeatAck(n),
                None => VoiceEvent::Unknown(raw.op, raw.d),
            },
            8 => parse(raw.op, raw.d, VoiceEvent::Hello),
            9 => VoiceEvent::Resumed,
            op => VoiceEvent::Unknown(op, raw.d),
        }
    }

    /// Converts an outbound event back into its raw frame.
    pub fn into_raw(self) -> Result<RawVoiceEvent, serde_json::Error> {
        let (op, d) = match self {
            Self::Identify(v) => (0, serde_json::to_value(v)?),
            Self::SelectProtocol(v) => (1, serde_json::to_value(v)?),
            Self::Ready(v) => (2, serde_json::to_value(v)?),
            Self::Heartbeat(n) => (3, Value::from(n)),
            Self::SessionDescription(v) => (4, serde_json::to_value(v)?),
            Self::Speaking(v) => (5, serde_json::to_value(v)?),
            Self::HeartbeatAck(n) => (6, Value::from(n)),
            Self::Hello(v) => (8, serde_json::to_value(v)?),
            Self::Resumed => (9, Value::Null),
            Self::Unknown(op, d) => (op, d),
        };

        Ok(RawVoiceEvent { op, d })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Identify {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: ProtocolData,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Ready {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Speaking {
    pub speaking: u8,
    pub delay: u8,
    pub ssrc: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Hello {
    pub heartbeat_interval: f64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ready_parses_from_raw() {
        let raw: RawVoiceEvent = serde_json::from_str(
            r#"{"op":2,"d":{"ssrc":7,"ip":"203.0.113.4","port":4000,"modes":["xsalsa20_poly1305"]}}"#,
        )
        .unwrap();

        match VoiceEvent::from_raw(raw) {
            VoiceEvent::Ready(r) => {
                assert_eq!(r.ssrc, 7);
                assert_eq!(r.port, 4000);
                assert_eq!(r.modes, vec!["xsalsa20_poly1305".to_owned()]);
            },
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn unlisted_opcode_becomes_unknown() {
        let raw = RawVoiceEvent {
            op: 13,
            d: Value::Null,
        };

        assert!(matches!(VoiceEvent::from_raw(raw), VoiceEvent::Unknown(13, _)));
    }
}
