//! The top-level client: shared state, public API surface, and the voice
//! join flow over the main gateway.

use crate::{
    cache::SharedCache,
    config::Config,
    driver::Driver,
    error::{EmojiError, JoinError, JoinResult, StartError},
    events::{Dispatcher, Event, EventHandler, WaitError},
    gateway::{GatewayCommand, LatencyInfo, Session},
    http::Http,
    id::{ChannelId, EmojiId, GuildId},
    info::{ConnectionInfo, Partial},
    model::{payload, Emoji, Presence, User},
};

use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::instrument;

/// A voice join handshake awaiting its gateway answers.
pub(crate) struct PendingJoin {
    pub(crate) progress: Partial,
    pub(crate) tx: flume::Sender<ConnectionInfo>,
}

/// State shared between the session task, event handlers, and user calls.
pub(crate) struct Shared {
    pub(crate) token: String,
    pub(crate) config: Config,
    pub(crate) http: Arc<Http>,
    pub(crate) cache: SharedCache,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) gateway_tx: flume::Sender<GatewayCommand>,
    pub(crate) latency: Mutex<LatencyInfo>,
    pub(crate) pending_joins: Mutex<HashMap<GuildId, PendingJoin>>,
}

impl Shared {
    /// Requests a voice session for `channel_id` and drives the voice
    /// driver's handshake once the gateway answers.
    async fn join_voice(
        self: &Arc<Self>,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> JoinResult<Driver> {
        let bot_user = self.cache.bot_user().ok_or(JoinError::NotReady)?;

        let (tx, rx) = flume::bounded(1);
        {
            let mut pending = self.pending_joins.lock();
            // A newer join for the same guild replaces (and so cancels) the
            // older one.
            pending.insert(
                guild_id.clone(),
                PendingJoin {
                    progress: Partial::new(guild_id.clone(), channel_id.clone(), bot_user.id),
                    tx,
                },
            );
        }

        self.gateway_tx
            .send(GatewayCommand::UpdateVoiceState(payload::UpdateVoiceState {
                guild_id: guild_id.clone(),
                channel_id: Some(channel_id),
                self_mute: false,
                self_deaf: false,
            }))
            .map_err(|_| JoinError::NoSession)?;

        let info = match self.config.join_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx.recv_async()).await {
                Ok(Ok(info)) => info,
                Ok(Err(_)) => {
                    self.pending_joins.lock().remove(&guild_id);
                    return Err(JoinError::Dropped);
                },
                Err(_) => {
                    self.pending_joins.lock().remove(&guild_id);
                    return Err(JoinError::TimedOut);
                },
            },
            None => rx
                .recv_async()
                .await
                .map_err(|_| JoinError::Dropped)?,
        };

        let mut driver = Driver::new(self.config.clone());
        driver.connect(info).await?;

        Ok(driver)
    }

    fn leave_voice(&self, guild_id: GuildId) -> JoinResult<()> {
        self.pending_joins.lock().remove(&guild_id);

        self.gateway_tx
            .send(GatewayCommand::UpdateVoiceState(payload::UpdateVoiceState {
                guild_id,
                channel_id: None,
                self_mute: false,
                self_deaf: false,
            }))
            .map_err(|_| JoinError::NoSession)
    }

    /// Creates an application emoji and caches it.
    async fn create_emoji(&self, name: &str, image: &[u8]) -> Result<Emoji, EmojiError> {
        let app = self.cache.bot_user().ok_or(EmojiError::NotReady)?;

        let emoji = self.http.create_application_emoji(&app.id, name, image).await?;
        self.cache.write().emojis.push(emoji.clone());

        Ok(emoji)
    }

    /// Edits an application emoji, replacing the cached copy in place.
    async fn edit_emoji(
        &self,
        emoji_id: &EmojiId,
        name: Option<&str>,
        image: Option<&[u8]>,
    ) -> Result<Emoji, EmojiError> {
        let app = self.cache.bot_user().ok_or(EmojiError::NotReady)?;

        let emoji = self
            .http
            .edit_application_emoji(&app.id, emoji_id, name, image)
            .await?;

        let mut cache = self.cache.write();
        match cache
            .emojis
            .iter()
            .position(|e| e.id.as_ref() == Some(emoji_id))
        {
            Some(index) => cache.emojis[index] = emoji.clone(),
            None => cache.emojis.push(emoji.clone()),
        }

        Ok(emoji)
    }

    /// Deletes an application emoji and uncaches it.
    async fn delete_emoji(&self, emoji_id: &EmojiId) -> Result<(), EmojiError> {
        let app = self.cache.bot_user().ok_or(EmojiError::NotReady)?;

        self.http.delete_application_emoji(&app.id, emoji_id).await?;
        self.cache
            .write()
            .emojis
            .retain(|e| e.id.as_ref() != Some(emoji_id));

        Ok(())
    }

    /// Resolves a user from the cache (by id, name, or display name), falling
    /// back to a REST fetch by id.
    async fn get_user(&self, query: &str) -> crate::http::error::Result<User> {
        if let Some(user) = self.cache.user_named(query) {
            return Ok(user);
        }

        let user = self.http.fetch_user(&query.into()).await?;
        self.cache
            .write()
            .users
            .insert(user.id.clone(), user.clone());

        Ok(user)
    }
}

/// A client for the gateway, cache, HTTP, and voice APIs.
///
/// Construct one, register handlers, then [`start`](Client::start) it; the
/// session reconnects on its own until [`shutdown`](Client::shutdown).
pub struct Client {
    pub(crate) shared: Arc<Shared>,
    pub(crate) cmd_rx: Option<flume::Receiver<GatewayCommand>>,
}

impl Client {
    /// Creates a client around a bot token.
    #[must_use]
    pub fn new(token: &str, config: Config) -> Self {
        let (gateway_tx, cmd_rx) = flume::unbounded();

        let shared = Arc::new(Shared {
            token: token.to_owned(),
            http: Arc::new(Http::new(token)),
            cache: SharedCache::new(config.messages_limit),
            dispatcher: Dispatcher::default(),
            gateway_tx,
            latency: Mutex::new(LatencyInfo::default()),
            pending_joins: Mutex::new(HashMap::new()),
            config,
        });

        Self {
            shared,
            cmd_rx: Some(cmd_rx),
        }
    }

    /// Connects to the gateway and runs the session until shutdown.
    ///
    /// Transport failures are absorbed by reconnecting; this only returns
    /// once [`shutdown`](Client::shutdown) is called.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<(), StartError> {
        let cmd_rx = self.cmd_rx.take().ok_or(StartError::AlreadyStarted)?;

        Session::new(Arc::clone(&self.shared), cmd_rx).run().await;

        Ok(())
    }

    /// Asks the running session to tear down and return from `start`.
    pub fn shutdown(&self) {
        let _ = self.shared.gateway_tx.send(GatewayCommand::Shutdown);
    }

    /// Registers an event handler. Handlers added after `start` still
    /// receive subsequent events.
    pub fn add_handler(&self, handler: impl EventHandler + 'static) {
        self.shared.dispatcher.add_handler(Arc::new(handler));
    }

    /// Waits for the next event with `name` satisfying `predicate`.
    pub async fn wait_for(
        &self,
        name: &str,
        predicate: impl Fn(&Event) -> bool + Send + Sync + 'static,
        timeout: Option<Duration>,
    ) -> Result<Event, WaitError> {
        self.shared.dispatcher.wait_for(name, predicate, timeout).await
    }

    /// Subscribes to verbatim payloads of one lower-cased event name.
    pub fn raw_events(&self, name: &str) -> flume::Receiver<Value> {
        self.shared.dispatcher.subscribe_raw(name)
    }

    /// The shared object cache.
    #[must_use]
    pub fn cache(&self) -> &SharedCache {
        &self.shared.cache
    }

    /// The rate-limited request client.
    #[must_use]
    pub fn http(&self) -> &Arc<Http> {
        &self.shared.http
    }

    /// Round-trip time of the most recent acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.shared.latency.lock().latency
    }

    /// Previous round-trip readings, oldest first.
    #[must_use]
    pub fn latencies(&self) -> Vec<Duration> {
        self.shared.latency.lock().history.iter().copied().collect()
    }

    /// Stores and advertises a new presence.
    pub fn set_presence(&self, presence: Presence) {
        let _ = self
            .shared
            .gateway_tx
            .send(GatewayCommand::SetPresence(presence));
    }

    /// Joins a voice channel, returning a connected [`Driver`].
    pub async fn join_voice(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> JoinResult<Driver> {
        self.shared.join_voice(guild_id, channel_id).await
    }

    /// Leaves a guild's voice channel, if any.
    pub fn leave_voice(&self, guild_id: GuildId) -> JoinResult<()> {
        self.shared.leave_voice(guild_id)
    }

    /// Resolves a user from the cache, falling back to a REST fetch.
    pub async fn get_user(&self, query: &str) -> crate::http::error::Result<User> {
        self.shared.get_user(query).await
    }

    /// Creates an application emoji and caches it.
    pub async fn create_emoji(&self, name: &str, image: &[u8]) -> Result<Emoji, EmojiError> {
        self.shared.create_emoji(name, image).await
    }

    /// Edits an application emoji, replacing the cached copy.
    pub async fn edit_emoji(
        &self,
        emoji_id: &EmojiId,
        name: Option<&str>,
        image: Option<&[u8]>,
    ) -> Result<Emoji, EmojiError> {
        self.shared.edit_emoji(emoji_id, name, image).await
    }

    /// Deletes an application emoji and uncaches it.
    pub async fn delete_emoji(&self, emoji_id: &EmojiId) -> Result<(), EmojiError> {
        self.shared.delete_emoji(emoji_id).await
    }
}

/// Capability handle given to event handlers.
#[derive(Clone)]
pub struct Context {
    pub(crate) shared: Arc<Shared>,
}

impl Context {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// The shared object cache.
    #[must_use]
    pub fn cache(&self) -> &SharedCache {
        &self.shared.cache
    }

    /// The rate-limited request client.
    #[must_use]
    pub fn http(&self) -> &Arc<Http> {
        &self.shared.http
    }

    /// Waits for the next event with `name` satisfying `predicate`.
    pub async fn wait_for(
        &self,
        name: &str,
        predicate: impl Fn(&Event) -> bool + Send + Sync + 'static,
        timeout: Option<Duration>,
    ) -> Result<Event, WaitError> {
        self.shared.dispatcher.wait_for(name, predicate, timeout).await
    }

    /// Stores and advertises a new presence.
    pub fn set_presence(&self, presence: Presence) {
        let _ = self
            .shared
            .gateway_tx
            .send(GatewayCommand::SetPresence(presence));
    }

    /// Joins a voice channel, returning a connected [`Driver`].
    pub async fn join_voice(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> JoinResult<Driver> {
        self.shared.join_voice(guild_id, channel_id).await
    }

    /// Leaves a guild's voice channel, if any.
    pub fn leave_voice(&self, guild_id: GuildId) -> JoinResult<()> {
        self.shared.leave_voice(guild_id)
    }

    /// Resolves a user from the cache, falling back to a REST fetch.
    pub async fn get_user(&self, query: &str) -> crate::http::error::Result<User> {
        self.shared.get_user(query).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Channel;
    use crate::id::ChannelId;

    fn test_client() -> Client {
        Client::new("token", Config::default())
    }

    #[tokio::test]
    async fn wait_for_sees_only_matching_events() {
        let client = test_client();
        let shared = Arc::clone(&client.shared);

        let waiter = tokio::spawn(async move {
            shared
                .dispatcher
                .wait_for(
                    "channel_create",
                    |e| matches!(e, Event::ChannelCreate(c) if c.id == "C2"),
                    Some(Duration::from_secs(2)),
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;

        let ctx = Context::new(Arc::clone(&client.shared));
        for id in ["C1", "C2"] {
            client.shared.dispatcher.dispatch(
                &ctx,
                Event::ChannelCreate(Channel {
                    id: ChannelId::from(id),
                    ..Default::default()
                }),
            );
        }

        match waiter.await.unwrap() {
            Ok(Event::ChannelCreate(c)) => assert_eq!(c.id, ChannelId::from("C2")),
            other => panic!("expected the C2 event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_waiters_are_removed() {
        let client = test_client();

        let result = client
            .wait_for("message_create", |_| true, Some(Duration::from_millis(20)))
            .await;

        assert_eq!(result.unwrap_err(), WaitError::TimedOut);
        assert_eq!(client.shared.dispatcher.waiter_count(), 0);
    }

    #[tokio::test]
    async fn raw_subscribers_receive_independent_copies() {
        let client = test_client();

        let first = client.raw_events("message_create");
        let second = client.raw_events("message_create");

        let payload = serde_json::json!({"id": "1", "content": "hi"});
        client
            .shared
            .dispatcher
            .dispatch_raw("message_create", &payload);

        assert_eq!(first.try_recv().unwrap(), payload);
        assert_eq!(second.try_recv().unwrap(), payload);
    }
}
