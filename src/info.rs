use crate::id::{ChannelId, GuildId, UserId};
use std::fmt;

/// Parameters and information needed to start communicating with a voice
/// server, assembled from the gateway's voice state/server dispatches.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct ConnectionInfo {
    /// ID of the voice channel being joined, if it is known.
    ///
    /// This is not needed to establish a connection, but can be useful
    /// for book-keeping.
    pub channel_id: Option<ChannelId>,
    /// URL of the voice websocket gateway server assigned to this call.
    pub endpoint: String,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: String,
    /// Ephemeral secret used to validate the above session.
    pub token: String,
    /// User ID of this bot.
    pub user_id: UserId,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// A join handshake in flight: completes once both the session id and the
/// server endpoint/token have arrived.
#[derive(Clone)]
pub(crate) struct Partial {
    pub channel_id: ChannelId,
    pub endpoint: Option<String>,
    pub guild_id: GuildId,
    pub session_id: Option<String>,
    pub token: Option<String>,
    pub user_id: UserId,
}

impl fmt::Debug for Partial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partial")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token_is_some", &self.token.is_some())
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl Partial {
    pub(crate) fn new(guild_id: GuildId, channel_id: ChannelId, user_id: UserId) -> Self {
        Self {
            channel_id,
            endpoint: None,
            guild_id,
            session_id: None,
            token: None,
            user_id,
        }
    }

    fn finalise(&mut self) -> Option<ConnectionInfo> {
        if self.endpoint.is_some() && self.session_id.is_some() && self.token.is_some() {
            let endpoint = self.endpoint.take().unwrap();
            let session_id = self.session_id.take().unwrap();
            let token = self.token.take().unwrap();

            Some(ConnectionInfo {
                channel_id: Some(self.channel_id.clone()),
                endpoint,
                session_id,
                token,
                guild_id: self.guild_id.clone(),
                user_id: self.user_id.clone(),
            })
        } else {
            None
        }
    }

    pub(crate) fn apply_state_update(
        &mut self,
        session_id: String,
        channel_id: ChannelId,
    ) -> Option<ConnectionInfo> {
        if self.channel_id != channel_id {
            // Likely that the bot was moved to a different channel by an admin.
            self.endpoint = None;
            self.token = None;
        }

        self.channel_id = channel_id;
        self.session_id = Some(session_id);

        self.finalise()
    }

    pub(crate) fn apply_server_update(
        &mut self,
        endpoint: String,
        token: String,
    ) -> Option<ConnectionInfo> {
        self.endpoint = Some(endpoint);
        self.token = Some(token);

        self.finalise()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn join_completes_only_with_both_updates() {
        let mut partial = Partial::new(
            GuildId::from("g"),
            ChannelId::from("c"),
            UserId::from("u"),
        );

        assert!(partial
            .apply_state_update("sess".into(), ChannelId::from("c"))
            .is_none());

        let info = partial
            .apply_server_update("eu-west77.example".into(), "tok".into())
            .expect("both halves present");

        assert_eq!(info.session_id, "sess");
        assert_eq!(info.endpoint, "eu-west77.example");
        assert_eq!(info.guild_id, GuildId::from("g"));
    }

    #[test]
    fn moving_channel_invalidates_the_server_half() {
        let mut partial = Partial::new(
            GuildId::from("g"),
            ChannelId::from("c1"),
            UserId::from("u"),
        );

        partial.apply_server_update("host".into(), "tok".into());
        assert!(partial
            .apply_state_update("sess".into(), ChannelId::from("c2"))
            .is_none());
    }
}
