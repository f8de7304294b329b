//! Translation of dispatch payloads into cache mutations and before/after
//! event pairs.
//!
//! Every handler resolves its owning aggregate first; an unresolved reference
//! suppresses the event rather than erroring, which keeps the session alive
//! across out-of-order or pre-hydration payloads. Suppressed events are
//! dropped, not queued for replay.

use crate::{
    client::Shared,
    events::{Event, MessageRef},
    gateway::GatewayCommand,
    id::{ChannelId, GuildId, MessageId, RoleId, UserId},
    intents::Intents,
    model::{Channel, Emoji, Guild, Member, Message, Presence, Role, User, VoiceState},
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Applies one dispatch to the cache, returning the event to fan out.
///
/// `None` means the event was suppressed (unknown name, malformed payload, or
/// an unresolvable reference).
pub(crate) async fn update(shared: &Arc<Shared>, name: &str, data: Value) -> Option<Event> {
    let event = match name {
        "channel_create" => channel_create(shared, data),
        "channel_update" => channel_update(shared, data),
        "channel_delete" => channel_delete(shared, data),
        "thread_create" => thread_create(shared, data),
        "thread_update" => thread_update(shared, data),
        "thread_delete" => thread_delete(shared, data),
        "guild_create" => guild_create(shared, data),
        "guild_update" => guild_update(shared, data),
        "guild_delete" => guild_delete(shared, data),
        "guild_ban_add" | "guild_ban_remove" => ban_change(shared, name, data),
        "guild_emojis_update" => emojis_update(shared, data),
        "guild_member_add" => member_add(shared, data),
        "guild_member_update" => member_update(shared, data),
        "guild_member_remove" => member_remove(shared, data),
        "guild_members_chunk" => members_chunk(shared, data),
        "guild_role_create" => role_create(shared, data),
        "guild_role_update" => role_update(shared, data),
        "guild_role_delete" => role_delete(shared, data),
        "presence_update" => presence_update(shared, data),
        "message_create" => message_create(shared, data),
        "message_update" => message_update(shared, data),
        "message_delete" => message_delete(shared, data),
        "message_delete_bulk" => message_delete_bulk(shared, data),
        "voice_state_update" => voice_state_update(shared, data),
        _ => None,
    };

    if event.is_none() {
        trace!("Suppressed or unhandled dispatch: {name}.");
    }

    event
}

fn parse<T: DeserializeOwned>(data: &Value) -> Option<T> {
    match serde_json::from_value(data.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Malformed payload: {e}.");
            None
        },
    }
}

fn field_id<T: From<String>>(data: &Value, key: &str) -> Option<T> {
    data.get(key)
        .and_then(Value::as_str)
        .map(|s| T::from(s.to_owned()))
}

fn channel_create(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let channel: Channel = parse(&data)?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    guild.channels.push(channel.clone());

    Some(Event::ChannelCreate(channel))
}

fn channel_update(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let channel: Channel = parse(&data)?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    let index = guild.channels.iter().position(|c| c.id == channel.id)?;

    // The live entry is replaced wholesale; the displaced value becomes the
    // "before" half of the pair.
    let old = std::mem::replace(&mut guild.channels[index], channel.clone());

    Some(Event::ChannelUpdate { old, new: channel })
}

fn channel_delete(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let channel_id: ChannelId = field_id(&data, "id")?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    let index = guild.channels.iter().position(|c| c.id == channel_id)?;

    Some(Event::ChannelDelete(guild.channels.remove(index)))
}

fn thread_create(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let thread: Channel = parse(&data)?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    guild.threads.push(thread.clone());

    Some(Event::ThreadCreate(thread))
}

fn thread_update(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let thread: Channel = parse(&data)?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    let index = guild.threads.iter().position(|t| t.id == thread.id)?;

    let old = std::mem::replace(&mut guild.threads[index], thread.clone());

    Some(Event::ThreadUpdate { old, new: thread })
}

fn thread_delete(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let thread_id: ChannelId = field_id(&data, "id")?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    let index = guild.threads.iter().position(|t| t.id == thread_id)?;

    Some(Event::ThreadDelete(guild.threads.remove(index)))
}

fn guild_create(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let presences = data
        .get("presences")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let guild: Guild = parse(&data)?;

    {
        let mut cache = shared.cache.write();

        for member in &guild.members {
            cache
                .users
                .insert(member.user.id.clone(), member.user.clone());
        }

        cache.guilds.push(guild.clone());

        let guild = cache
            .guilds
            .last_mut()
            .expect("guild was pushed immediately above");
        apply_presences(guild, &presences);
    }

    // A mismatch between the advertised count and the snapshot means the
    // gateway withheld members; ask for the rest.
    if guild.member_count as usize != guild.members.len() {
        let presences = shared.config.intents.contains(Intents::GUILD_PRESENCES);
        let _ = shared.gateway_tx.send(GatewayCommand::RequestGuildMembers {
            guild_id: guild.id.clone(),
            presences,
        });
    }

    Some(Event::GuildCreate(Box::new(guild)))
}

fn apply_presences(guild: &mut Guild, presences: &[Value]) {
    for presence in presences {
        let Some(user_id) = presence
            .pointer("/user/id")
            .and_then(Value::as_str)
            .map(|s| UserId::from(s.to_owned()))
        else {
            continue;
        };

        if let (Some(member), Some(parsed)) = (
            guild.member_mut(&user_id),
            serde_json::from_value::<Presence>(presence.clone()).ok(),
        ) {
            member.presence = Some(parsed);
        }
    }
}

fn guild_update(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "id")?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    let old = guild.clone();

    // Guild updates mutate the live aggregate in place; its collections
    // (channels, members, roles) are owned by separate events.
    if let Some(name) = data.get("name").and_then(Value::as_str) {
        guild.name = name.to_owned();
    }
    if let Some(icon) = data.get("icon") {
        guild.icon = icon.as_str().map(ToOwned::to_owned);
    }
    if let Some(owner) = data.get("owner_id").and_then(Value::as_str) {
        guild.owner_id = Some(UserId::from(owner.to_owned()));
    }

    Some(Event::GuildUpdate {
        old: Box::new(old),
        new: Box::new(guild.clone()),
    })
}

fn guild_delete(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "id")?;

    let mut cache = shared.cache.write();
    let index = cache.guilds.iter().position(|g| g.id == guild_id)?;

    Some(Event::GuildDelete(Box::new(cache.guilds.remove(index))))
}

fn ban_change(shared: &Arc<Shared>, name: &str, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let user: User = parse(data.get("user")?)?;

    let mut cache = shared.cache.write();
    cache.guild(&guild_id)?;
    cache.users.insert(user.id.clone(), user.clone());

    Some(if name == "guild_ban_add" {
        Event::BanAdd { guild_id, user }
    } else {
        Event::BanRemove { guild_id, user }
    })
}

fn emojis_update(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let new: Vec<Emoji> = parse(data.get("emojis")?)?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    let old = std::mem::replace(&mut guild.emojis, new.clone());

    Some(Event::EmojisUpdate { guild_id, old, new })
}

fn member_add(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let member: Member = parse(&data)?;

    let mut cache = shared.cache.write();
    cache
        .users
        .insert(member.user.id.clone(), member.user.clone());
    let guild = cache.guild_mut(&guild_id)?;
    guild.members.push(member.clone());
    guild.member_count += 1;

    Some(Event::MemberAdd { guild_id, member })
}

fn member_update(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let member: Member = parse(&data)?;

    let mut cache = shared.cache.write();
    cache
        .users
        .insert(member.user.id.clone(), member.user.clone());
    let guild = cache.guild_mut(&guild_id)?;

    let old = match guild
        .members
        .iter()
        .position(|m| m.user.id == member.user.id)
    {
        Some(index) => Some(std::mem::replace(&mut guild.members[index], member.clone())),
        None => {
            // Early member events can precede hydration; treat as an insert
            // with no before-state.
            guild.members.push(member.clone());
            None
        },
    };

    Some(Event::MemberUpdate {
        guild_id,
        old,
        new: member,
    })
}

fn member_remove(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let user: User = parse(data.get("user")?)?;

    let mut cache = shared.cache.write();
    cache.users.insert(user.id.clone(), user.clone());
    let guild = cache.guild_mut(&guild_id)?;

    if let Some(index) = guild.members.iter().position(|m| m.user.id == user.id) {
        guild.members.remove(index);
        guild.member_count = guild.member_count.saturating_sub(1);
    }

    Some(Event::MemberRemove { guild_id, user })
}

fn members_chunk(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    shared.cache.read().guild(&guild_id)?;

    let members = data
        .get("members")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let presences = data
        .get("presences")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let count = members.len();

    // Hydration is a separate cooperative task: large chunks interleave with
    // unrelated work instead of stalling the envelope loop.
    let task_shared = Arc::clone(shared);
    let task_guild = guild_id.clone();
    tokio::spawn(async move {
        add_members(&task_shared, &task_guild, members, &presences).await;
    });

    Some(Event::MemberChunk { guild_id, count })
}

pub(crate) async fn add_members(
    shared: &Arc<Shared>,
    guild_id: &GuildId,
    members: Vec<Value>,
    presences: &[Value],
) {
    for raw in members {
        {
            let mut cache = shared.cache.write();
            let Some(member) = serde_json::from_value::<Member>(raw).ok() else {
                continue;
            };

            cache
                .users
                .insert(member.user.id.clone(), member.user.clone());

            if let Some(guild) = cache.guild_mut(guild_id) {
                match guild
                    .members
                    .iter()
                    .position(|m| m.user.id == member.user.id)
                {
                    Some(index) => guild.members[index] = member,
                    None => guild.members.push(member),
                }
            }
        }

        tokio::task::yield_now().await;
    }

    let mut cache = shared.cache.write();
    if let Some(guild) = cache.guild_mut(guild_id) {
        apply_presences(guild, presences);
    }
}

fn role_create(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let role: Role = parse(data.get("role")?)?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    guild.roles.push(role.clone());

    Some(Event::RoleCreate { guild_id, role })
}

fn role_update(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let role: Role = parse(data.get("role")?)?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    let index = guild.roles.iter().position(|r| r.id == role.id)?;

    let old = std::mem::replace(&mut guild.roles[index], role.clone());

    Some(Event::RoleUpdate {
        guild_id,
        old,
        new: role,
    })
}

fn role_delete(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let role_id: RoleId = field_id(&data, "role_id")?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    let index = guild.roles.iter().position(|r| r.id == role_id)?;

    Some(Event::RoleDelete {
        guild_id,
        role: guild.roles.remove(index),
    })
}

fn presence_update(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let guild_id: GuildId = field_id(&data, "guild_id")?;
    let user_id: UserId = data
        .pointer("/user/id")
        .and_then(Value::as_str)
        .map(|s| UserId::from(s.to_owned()))?;
    let presence: Presence = parse(&data)?;

    let mut cache = shared.cache.write();
    let guild = cache.guild_mut(&guild_id)?;
    let member = guild.member_mut(&user_id)?;
    member.presence = Some(presence);
    let member = member.clone();

    Some(Event::PresenceUpdate {
        guild_id,
        member: Box::new(member),
    })
}

fn message_create(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let message: Message = parse(&data)?;

    let mut cache = shared.cache.write();
    if let Some(author) = &message.author {
        cache.users.insert(author.id.clone(), author.clone());
    }
    cache.cache_message(message.clone());

    Some(Event::MessageCreate(Box::new(message)))
}

fn message_update(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let message_id: MessageId = field_id(&data, "id")?;

    let mut cache = shared.cache.write();
    let index = cache.message_position(&message_id)?;

    let old = cache.messages[index].clone();
    let mut new = old.clone();

    if let Some(content) = data.get("content").and_then(Value::as_str) {
        new.content = content.to_owned();
    }
    if let Some(edited) = data.get("edited_timestamp") {
        new.edited_timestamp = edited.as_str().map(ToOwned::to_owned);
    }
    if let Some(attachments) = data.get("attachments") {
        if let Some(parsed) = parse(attachments) {
            new.attachments = parsed;
        }
    }

    cache.messages[index] = new.clone();

    Some(Event::MessageUpdate {
        old: Box::new(old),
        new: Box::new(new),
    })
}

fn message_delete(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let message_id: MessageId = field_id(&data, "id")?;

    let mut cache = shared.cache.write();
    let removed = match cache.message_position(&message_id) {
        Some(index) => MessageRef::Cached(Box::new(
            cache
                .messages
                .remove(index)
                .expect("index originates from message_position"),
        )),
        None => MessageRef::Id(message_id),
    };

    Some(Event::MessageDelete(removed))
}

fn message_delete_bulk(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let ids = data.get("ids").and_then(Value::as_array)?;

    let mut cache = shared.cache.write();
    let mut removed = Vec::with_capacity(ids.len());

    for id in ids {
        let Some(message_id) = id.as_str().map(|s| MessageId::from(s.to_owned())) else {
            continue;
        };

        removed.push(match cache.message_position(&message_id) {
            Some(index) => MessageRef::Cached(Box::new(
                cache
                    .messages
                    .remove(index)
                    .expect("index originates from message_position"),
            )),
            None => MessageRef::Id(message_id),
        });
    }

    Some(Event::MessageDeleteBulk(removed))
}

fn voice_state_update(shared: &Arc<Shared>, data: Value) -> Option<Event> {
    let state: VoiceState = parse(&data)?;

    let mut cache = shared.cache.write();
    let guild_index = match &state.guild_id {
        Some(id) => cache.guilds.iter().position(|g| &g.id == id),
        None => state.channel_id.as_ref().and_then(|c| {
            cache
                .guilds
                .iter()
                .position(|g| g.channels.iter().any(|ch| &ch.id == c))
        }),
    }?;
    let guild = &mut cache.guilds[guild_index];

    let member = guild.member_mut(&state.user_id)?;
    let old = member.voice_state.take();
    member.voice_state = Some(state.clone());

    Some(Event::VoiceStateUpdate { old, new: state })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{client::Client, config::Config};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn client_with_guild() -> Client {
        let client = Client::new("token", Config::default());

        client.shared.cache.write().guilds.push(Guild {
            id: GuildId::from("G1"),
            name: "guild".into(),
            channels: vec![Channel {
                id: ChannelId::from("C1"),
                guild_id: Some(GuildId::from("G1")),
                name: Some("old-name".into()),
                ..Default::default()
            }],
            members: vec![Member {
                user: User {
                    id: UserId::from("U1"),
                    username: "someone".into(),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        });

        client
    }

    #[tokio::test]
    async fn channel_update_replaces_entry_and_reports_before_state() {
        let client = client_with_guild();
        let shared = Arc::clone(&client.shared);

        let before = shared.cache.channel(&ChannelId::from("C1")).unwrap();

        let event = update(
            &shared,
            "channel_update",
            json!({"id": "C1", "guild_id": "G1", "type": 0, "name": "new-name"}),
        )
        .await
        .expect("resolvable update dispatches");

        match event {
            Event::ChannelUpdate { old, new } => {
                assert_eq!(old, before);
                assert_eq!(old.id, ChannelId::from("C1"));
                assert_eq!(new.name.as_deref(), Some("new-name"));
            },
            other => panic!("expected a channel update pair, got {other:?}"),
        }

        // The live collection entry was replaced, not patched.
        let live = shared.cache.channel(&ChannelId::from("C1")).unwrap();
        assert_eq!(live.name.as_deref(), Some("new-name"));
    }

    #[tokio::test]
    async fn unresolvable_references_suppress_the_event() {
        let client = client_with_guild();
        let shared = Arc::clone(&client.shared);

        let event = update(
            &shared,
            "channel_update",
            json!({"id": "C1", "guild_id": "G404", "type": 0}),
        )
        .await;
        assert!(event.is_none());

        let event = update(
            &shared,
            "guild_role_update",
            json!({"guild_id": "G1", "role": {"id": "R404", "name": "r"}}),
        )
        .await;
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn message_update_snapshots_then_replaces() {
        let client = client_with_guild();
        let shared = Arc::clone(&client.shared);

        update(
            &shared,
            "message_create",
            json!({"id": "M1", "channel_id": "C1", "content": "first"}),
        )
        .await
        .unwrap();

        let event = update(
            &shared,
            "message_update",
            json!({"id": "M1", "channel_id": "C1", "content": "second"}),
        )
        .await
        .unwrap();

        match event {
            Event::MessageUpdate { old, new } => {
                assert_eq!(old.content, "first");
                assert_eq!(new.content, "second");
            },
            other => panic!("expected a message update pair, got {other:?}"),
        }

        let cached = shared.cache.message(&MessageId::from("M1")).unwrap();
        assert_eq!(cached.content, "second");
    }

    #[tokio::test]
    async fn uncached_message_deletion_reports_the_bare_id() {
        let client = client_with_guild();
        let shared = Arc::clone(&client.shared);

        let event = update(&shared, "message_delete", json!({"id": "M404"}))
            .await
            .unwrap();

        assert!(
            matches!(event, Event::MessageDelete(MessageRef::Id(id)) if id == MessageId::from("M404"))
        );
    }

    #[tokio::test]
    async fn short_member_snapshot_requests_the_remainder() {
        let client = client_with_guild();
        let shared = Arc::clone(&client.shared);

        update(
            &shared,
            "guild_create",
            json!({
                "id": "G2",
                "name": "big",
                "member_count": 5,
                "members": [{"user": {"id": "U2", "username": "only-one"}}],
            }),
        )
        .await
        .unwrap();

        let command = client
            .cmd_rx
            .as_ref()
            .unwrap()
            .try_recv()
            .expect("a member request was queued");

        match command {
            GatewayCommand::RequestGuildMembers { guild_id, .. } => {
                assert_eq!(guild_id, GuildId::from("G2"));
            },
            _ => panic!("expected a guild member request"),
        }

        // The partial snapshot still hydrated what it had.
        assert!(shared.cache.user(&UserId::from("U2")).is_some());
    }

    #[tokio::test]
    async fn voice_state_updates_pair_old_and_new() {
        let client = client_with_guild();
        let shared = Arc::clone(&client.shared);

        let first = update(
            &shared,
            "voice_state_update",
            json!({"guild_id": "G1", "channel_id": "C1", "user_id": "U1", "session_id": "s1"}),
        )
        .await
        .unwrap();

        assert!(matches!(
            &first,
            Event::VoiceStateUpdate { old: None, new } if new.session_id == "s1"
        ));

        let second = update(
            &shared,
            "voice_state_update",
            json!({"guild_id": "G1", "channel_id": null, "user_id": "U1", "session_id": "s1"}),
        )
        .await
        .unwrap();

        match second {
            Event::VoiceStateUpdate { old: Some(old), new } => {
                assert_eq!(old.channel_id, Some(ChannelId::from("C1")));
                assert_eq!(new.channel_id, None);
            },
            other => panic!("expected an old/new voice state pair, got {other:?}"),
        }
    }
}
