//! Wire-level types for the main and voice gateways.

mod channel;
mod guild;
mod message;
pub mod payload;
mod user;
pub mod voice;

pub use channel::Channel;
pub use guild::{Emoji, Guild, Member, Role, UnavailableGuild, VoiceState};
pub use message::{Attachment, Message};
pub use user::{Activity, Presence, User};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded gateway frame: `{op, d, s, t}`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Envelope {
    /// Control opcode.
    pub op: u8,
    /// Opcode- or event-specific payload.
    #[serde(default)]
    pub d: Value,
    /// Sequence number, set on DISPATCH frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name, set on DISPATCH frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Envelope {
    pub(crate) fn new<T: Serialize>(op: Opcode, d: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op: op as u8,
            d: serde_json::to_value(d)?,
            s: None,
            t: None,
        })
    }

    pub(crate) fn heartbeat(sequence: Option<u64>) -> Self {
        Self {
            op: Opcode::Heartbeat as u8,
            d: sequence.map_or(Value::Null, Value::from),
            s: None,
            t: None,
        }
    }

    pub(crate) fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.op)
    }
}

/// Main gateway control opcodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
#[repr(u8)]
pub enum Opcode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    PresenceUpdate = 3,
    VoiceStateUpdate = 4,
    Resume = 6,
    Reconnect = 7,
    RequestGuildMembers = 8,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl Opcode {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_roundtrip_preserves_sequence() {
        let text = r#"{"op":0,"d":{"key":1},"s":42,"t":"MESSAGE_CREATE"}"#;
        let env: Envelope = serde_json::from_str(text).unwrap();

        assert_eq!(env.opcode(), Some(Opcode::Dispatch));
        assert_eq!(env.s, Some(42));
        assert_eq!(env.t.as_deref(), Some("MESSAGE_CREATE"));
    }

    #[test]
    fn control_frames_omit_sequence_fields() {
        let hb = Envelope::heartbeat(Some(12));
        let text = serde_json::to_string(&hb).unwrap();

        assert_eq!(text, r#"{"op":1,"d":12}"#);
    }

    #[test]
    fn unknown_opcode_is_none() {
        assert_eq!(Opcode::from_u8(5), None);
        assert_eq!(Opcode::from_u8(200), None);
    }
}
