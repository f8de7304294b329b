use super::{Channel, Presence, User};
use crate::id::{ChannelId, EmojiId, GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};

/// An authoritative in-memory copy of a guild and its aggregates.
///
/// Members, channels, threads, and roles referenced by incoming events must
/// resolve against this object before those events are dispatched.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Guild {
    pub id: GuildId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub member_count: u64,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub threads: Vec<Channel>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    #[serde(default, skip_serializing)]
    pub members: Vec<Member>,
}

impl Guild {
    /// Looks up a channel or thread owned by this guild.
    #[must_use]
    pub fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.channels
            .iter()
            .chain(self.threads.iter())
            .find(|c| &c.id == id)
    }

    /// Looks up a role by id.
    #[must_use]
    pub fn role(&self, id: &RoleId) -> Option<&Role> {
        self.roles.iter().find(|r| &r.id == id)
    }

    /// Looks up a member by the owning user's id.
    #[must_use]
    pub fn member(&self, id: &UserId) -> Option<&Member> {
        self.members.iter().find(|m| &m.user.id == id)
    }

    pub(crate) fn member_mut(&mut self, id: &UserId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| &m.user.id == id)
    }

    /// Looks up a member by username or display name, ignoring case.
    ///
    /// Convenience only; event correlation always goes through ids.
    #[must_use]
    pub fn member_named(&self, name: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.user.named(name) || m.nick.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }
}

/// A guild role.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Role {
    pub id: RoleId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub permissions: String,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub mentionable: bool,
}

/// A user's guild-specific profile.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub joined_at: Option<String>,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default, skip_serializing)]
    pub presence: Option<Presence>,
    #[serde(default, skip_serializing)]
    pub voice_state: Option<VoiceState>,
}

/// A custom emoji, guild-owned or application-owned.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Emoji {
    // Unicode emoji in reaction payloads carry a null id.
    pub id: Option<EmojiId>,
    pub name: Option<String>,
    #[serde(default)]
    pub animated: bool,
}

/// A member's voice connection state.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
    #[serde(default)]
    pub self_mute: bool,
}

/// Stub for a guild advertised during READY but not yet hydrated.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct UnavailableGuild {
    pub id: GuildId,
    #[serde(default)]
    pub unavailable: bool,
}
