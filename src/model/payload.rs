//! Control payloads exchanged with the main gateway.

use super::{Presence, UnavailableGuild, User};
use crate::{constants::LARGE_THRESHOLD, id::{ChannelId, GuildId}, intents::Intents};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Hello {
    pub heartbeat_interval: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct Identify {
    pub token: String,
    pub properties: IdentifyProperties,
    pub large_threshold: u64,
    pub intents: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<Presence>,
}

impl Identify {
    pub(crate) fn new(token: &str, intents: Intents, presence: Option<Presence>) -> Self {
        Self {
            token: token.to_owned(),
            properties: IdentifyProperties::default(),
            large_threshold: LARGE_THRESHOLD,
            intents: intents.bits(),
            presence,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            browser: "lorikeet".to_owned(),
            device: "lorikeet".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// Payload of the READY dispatch.
#[derive(Clone, Debug, Deserialize)]
pub struct Ready {
    pub session_id: String,
    pub user: User,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RequestGuildMembers {
    pub guild_id: GuildId,
    pub query: String,
    pub limit: u64,
    pub presences: bool,
}

/// Outbound op 4, requesting a voice session from the gateway.
#[derive(Clone, Debug, Serialize)]
pub struct UpdateVoiceState {
    pub guild_id: GuildId,
    pub channel_id: Option<ChannelId>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// Payload of the VOICE_SERVER_UPDATE dispatch.
#[derive(Clone, Debug, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: GuildId,
    pub endpoint: Option<String>,
}
