//! Dispatched events and the listener/waiter fan-out machinery.

use crate::{
    client::Context,
    id::{GuildId, MessageId},
    model::{Channel, Emoji, Guild, Member, Message, Role, User, VoiceState},
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tracing::debug;

/// A fully resolved cache event, carrying owned before/after values where the
/// underlying change replaced cached state.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event {
    /// The session finished hydrating and will now forward events.
    Ready,
    /// The session re-identified or resumed after a connection loss.
    Reconnect,
    GuildCreate(Box<Guild>),
    GuildUpdate { old: Box<Guild>, new: Box<Guild> },
    GuildDelete(Box<Guild>),
    ChannelCreate(Channel),
    ChannelUpdate { old: Channel, new: Channel },
    ChannelDelete(Channel),
    ThreadCreate(Channel),
    ThreadUpdate { old: Channel, new: Channel },
    ThreadDelete(Channel),
    RoleCreate { guild_id: GuildId, role: Role },
    RoleUpdate { guild_id: GuildId, old: Role, new: Role },
    RoleDelete { guild_id: GuildId, role: Role },
    EmojisUpdate { guild_id: GuildId, old: Vec<Emoji>, new: Vec<Emoji> },
    MemberAdd { guild_id: GuildId, member: Member },
    MemberUpdate { guild_id: GuildId, old: Option<Member>, new: Member },
    MemberRemove { guild_id: GuildId, user: User },
    MemberChunk { guild_id: GuildId, count: usize },
    BanAdd { guild_id: GuildId, user: User },
    BanRemove { guild_id: GuildId, user: User },
    PresenceUpdate { guild_id: GuildId, member: Box<Member> },
    MessageCreate(Box<Message>),
    MessageUpdate { old: Box<Message>, new: Box<Message> },
    MessageDelete(MessageRef),
    MessageDeleteBulk(Vec<MessageRef>),
    VoiceStateUpdate { old: Option<VoiceState>, new: VoiceState },
}

/// A message involved in a deletion, which may never have been cached.
#[derive(Clone, Debug)]
pub enum MessageRef {
    Cached(Box<Message>),
    Id(MessageId),
}

impl Event {
    /// The lower-cased wire name this event dispatches under.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Event::Ready => "ready",
            Event::Reconnect => "reconnect",
            Event::GuildCreate(_) => "guild_create",
            Event::GuildUpdate { .. } => "guild_update",
            Event::GuildDelete(_) => "guild_delete",
            Event::ChannelCreate(_) => "channel_create",
            Event::ChannelUpdate { .. } => "channel_update",
            Event::ChannelDelete(_) => "channel_delete",
            Event::ThreadCreate(_) => "thread_create",
            Event::ThreadUpdate { .. } => "thread_update",
            Event::ThreadDelete(_) => "thread_delete",
            Event::RoleCreate { .. } => "guild_role_create",
            Event::RoleUpdate { .. } => "guild_role_update",
            Event::RoleDelete { .. } => "guild_role_delete",
            Event::EmojisUpdate { .. } => "guild_emojis_update",
            Event::MemberAdd { .. } => "guild_member_add",
            Event::MemberUpdate { .. } => "guild_member_update",
            Event::MemberRemove { .. } => "guild_member_remove",
            Event::MemberChunk { .. } => "guild_members_chunk",
            Event::BanAdd { .. } => "guild_ban_add",
            Event::BanRemove { .. } => "guild_ban_remove",
            Event::PresenceUpdate { .. } => "presence_update",
            Event::MessageCreate(_) => "message_create",
            Event::MessageUpdate { .. } => "message_update",
            Event::MessageDelete(_) => "message_delete",
            Event::MessageDeleteBulk(_) => "message_delete_bulk",
            Event::VoiceStateUpdate { .. } => "voice_state_update",
        }
    }
}

/// Receives dispatched events.
///
/// Handlers run as their own cooperative tasks; they must not block the
/// executor.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn event(&self, ctx: Context, event: Event);
}

/// Error raised when a wait-for-event deadline passes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitError {
    /// The timeout expired; the waiter has been removed.
    TimedOut,
    /// The dispatcher shut down before a matching event arrived.
    Dropped,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::TimedOut => write!(f, "timed out waiting for a matching event"),
            WaitError::Dropped => write!(f, "dispatcher dropped before a matching event arrived"),
        }
    }
}

impl std::error::Error for WaitError {}

type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;

struct Waiter {
    id: u64,
    name: String,
    predicate: Predicate,
    tx: flume::Sender<Event>,
}

/// Fans out (event-name, payload) pairs to listeners, one-shot waiters, and
/// raw subscribers.
#[derive(Default)]
pub(crate) struct Dispatcher {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    waiters: Mutex<Vec<Waiter>>,
    next_waiter: Mutex<u64>,
    raw: DashMap<String, Vec<flume::Sender<Value>>>,
}

impl Dispatcher {
    pub(crate) fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Delivers `event` to at most one matching waiter, then to every
    /// registered handler on its own task.
    pub(crate) fn dispatch(&self, ctx: &Context, event: Event) {
        let name = event.name();

        let matched = {
            let mut waiters = self.waiters.lock();
            waiters
                .iter()
                .position(|w| w.name == name && (w.predicate)(&event))
                .map(|pos| waiters.remove(pos))
        };

        if let Some(waiter) = matched {
            // A lapsed waiter (timed out between match and send) is fine.
            let _ = waiter.tx.send(event.clone());
        }

        let handlers = self.handlers.read().clone();
        for handler in handlers {
            let ctx = ctx.clone();
            let event = event.clone();
            tokio::spawn(async move {
                handler.event(ctx, event).await;
            });
        }
    }

    /// Re-emits an unprocessed payload to subscribers of `name`.
    pub(crate) fn dispatch_raw(&self, name: &str, data: &Value) {
        if let Some(mut senders) = self.raw.get_mut(name) {
            senders.retain(|tx| tx.send(data.clone()).is_ok());
        }
    }

    /// Subscribes to verbatim payloads of one lower-cased event name.
    pub(crate) fn subscribe_raw(&self, name: &str) -> flume::Receiver<Value> {
        let (tx, rx) = flume::unbounded();
        self.raw.entry(name.to_lowercase()).or_default().push(tx);
        rx
    }

    /// Waits for the next event named `name` for which `predicate` holds.
    pub(crate) async fn wait_for(
        &self,
        name: &str,
        predicate: impl Fn(&Event) -> bool + Send + Sync + 'static,
        timeout: Option<Duration>,
    ) -> Result<Event, WaitError> {
        let (tx, rx) = flume::bounded(1);
        let id = {
            let mut next = self.next_waiter.lock();
            *next += 1;
            *next
        };

        self.waiters.lock().push(Waiter {
            id,
            name: name.to_lowercase(),
            predicate: Box::new(predicate),
            tx,
        });

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx.recv_async()).await {
                Ok(Ok(event)) => Ok(event),
                Ok(Err(_)) => Err(WaitError::Dropped),
                Err(_) => {
                    self.waiters.lock().retain(|w| w.id != id);
                    debug!("Waiter for {name} expired after {limit:?}.");
                    Err(WaitError::TimedOut)
                },
            },
            None => rx.recv_async().await.map_err(|_| WaitError::Dropped),
        }
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}
