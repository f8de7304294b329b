//! The local object cache and its change-detection engine.

pub(crate) mod diff;

use crate::{
    id::{ChannelId, EmojiId, GuildId, MessageId, UserId},
    model::{Channel, Emoji, Guild, Member, Message, User},
};

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

/// Authoritative in-memory copies of server-side entities.
///
/// Mutated only from the session's cooperative task; the lock exists so other
/// tasks can take consistent read snapshots.
pub(crate) struct Cache {
    pub guilds: Vec<Guild>,
    pub users: HashMap<UserId, User>,
    pub messages: VecDeque<Message>,
    pub emojis: Vec<Emoji>,
    pub bot_user: Option<User>,
    messages_limit: usize,
}

impl Cache {
    pub(crate) fn new(messages_limit: usize) -> Self {
        Self {
            guilds: Vec::new(),
            users: HashMap::new(),
            messages: VecDeque::new(),
            emojis: Vec::new(),
            bot_user: None,
            messages_limit,
        }
    }

    /// Clears guild and user state ahead of a fresh identify.
    pub(crate) fn reset(&mut self) {
        self.guilds.clear();
        self.users.clear();
    }

    pub(crate) fn guild(&self, id: &GuildId) -> Option<&Guild> {
        self.guilds.iter().find(|g| &g.id == id)
    }

    pub(crate) fn guild_mut(&mut self, id: &GuildId) -> Option<&mut Guild> {
        self.guilds.iter_mut().find(|g| &g.id == id)
    }

    pub(crate) fn guild_by_channel(&self, channel_id: &ChannelId) -> Option<&Guild> {
        self.guilds
            .iter()
            .find(|g| g.channels.iter().any(|c| &c.id == channel_id))
    }

    pub(crate) fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.guilds.iter().find_map(|g| g.channel(id))
    }

    /// Inserts into the bounded message FIFO, evicting the oldest entry once
    /// the configured capacity is exceeded.
    pub(crate) fn cache_message(&mut self, message: Message) {
        self.messages.push_back(message);

        if self.messages.len() > self.messages_limit {
            self.messages.pop_front();
        }
    }

    pub(crate) fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub(crate) fn message_position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    /// Resolves a cached user by id, or by name/display name ignoring case.
    pub(crate) fn user_named(&self, query: &str) -> Option<&User> {
        self.users
            .values()
            .find(|u| u.id == *query || u.named(query))
    }

    pub(crate) fn emoji(&self, id: &EmojiId) -> Option<&Emoji> {
        self.emojis
            .iter()
            .find(|e| e.id.as_ref() == Some(id))
    }

    pub(crate) fn emoji_named(&self, name: &str) -> Option<&Emoji> {
        self.emojis
            .iter()
            .find(|e| e.name.as_deref() == Some(name))
    }
}

/// Shared, read-oriented view over the session cache.
///
/// Queries return owned clones so no lock is held across user code.
pub struct SharedCache {
    inner: RwLock<Cache>,
}

impl SharedCache {
    pub(crate) fn new(messages_limit: usize) -> Self {
        Self {
            inner: RwLock::new(Cache::new(messages_limit)),
        }
    }

    pub(crate) fn read(&self) -> parking_lot::RwLockReadGuard<'_, Cache> {
        self.inner.read()
    }

    pub(crate) fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Cache> {
        self.inner.write()
    }

    /// The bot's own user, known once READY has been processed.
    #[must_use]
    pub fn bot_user(&self) -> Option<User> {
        self.inner.read().bot_user.clone()
    }

    #[must_use]
    pub fn guild(&self, id: &GuildId) -> Option<Guild> {
        self.inner.read().guild(id).cloned()
    }

    /// Number of currently cached guilds.
    #[must_use]
    pub fn guild_count(&self) -> usize {
        self.inner.read().guilds.len()
    }

    #[must_use]
    pub fn channel(&self, id: &ChannelId) -> Option<Channel> {
        self.inner.read().channel(id).cloned()
    }

    #[must_use]
    pub fn guild_by_channel(&self, channel_id: &ChannelId) -> Option<Guild> {
        self.inner.read().guild_by_channel(channel_id).cloned()
    }

    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.inner.read().message(id).cloned()
    }

    #[must_use]
    pub fn user(&self, id: &UserId) -> Option<User> {
        self.inner.read().users.get(id).cloned()
    }

    /// Case-insensitive convenience lookup over cached users.
    #[must_use]
    pub fn user_named(&self, query: &str) -> Option<User> {
        self.inner.read().user_named(query).cloned()
    }

    /// Case-insensitive convenience lookup over one guild's members.
    #[must_use]
    pub fn member_named(&self, guild_id: &GuildId, name: &str) -> Option<Member> {
        self.inner
            .read()
            .guild(guild_id)
            .and_then(|g| g.member_named(name))
            .cloned()
    }

    /// Application emojis, refreshed on READY.
    #[must_use]
    pub fn emojis(&self) -> Vec<Emoji> {
        self.inner.read().emojis.clone()
    }

    #[must_use]
    pub fn emoji(&self, id: &EmojiId) -> Option<Emoji> {
        self.inner.read().emoji(id).cloned()
    }

    #[must_use]
    pub fn emoji_named(&self, name: &str) -> Option<Emoji> {
        self.inner.read().emoji_named(name).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::MessageId;

    fn message(id: &str) -> Message {
        Message {
            id: MessageId::from(id),
            ..Default::default()
        }
    }

    #[test]
    fn message_fifo_never_exceeds_limit() {
        let mut cache = Cache::new(3);

        for id in ["1", "2", "3"] {
            cache.cache_message(message(id));
        }
        assert_eq!(cache.messages.len(), 3);

        // The (limit+1)-th insert evicts exactly the oldest entry.
        cache.cache_message(message("4"));

        assert_eq!(cache.messages.len(), 3);
        assert!(cache.message(&MessageId::from("1")).is_none());
        assert!(cache.message(&MessageId::from("2")).is_some());
        assert!(cache.message(&MessageId::from("4")).is_some());
    }

    #[test]
    fn reset_clears_guilds_and_users_only() {
        let mut cache = Cache::new(10);
        cache.guilds.push(Guild::default());
        cache.users.insert(UserId::from("1"), User::default());
        cache.cache_message(message("1"));

        cache.reset();

        assert!(cache.guilds.is_empty());
        assert!(cache.users.is_empty());
        assert_eq!(cache.messages.len(), 1);
    }
}
