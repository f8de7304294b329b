use crate::id::{ChannelId, GuildId};
use serde::{Deserialize, Serialize};

/// A guild channel or thread.
///
/// Thread payloads share this shape; the cache keeps them in a separate
/// collection on the owning guild.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub parent_id: Option<ChannelId>,
    #[serde(default)]
    pub nsfw: bool,
}
