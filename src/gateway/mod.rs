//! The main gateway session: connection lifecycle, control opcodes, and
//! dispatch gating.

pub(crate) mod decoder;
mod heartbeat;

use crate::{
    client::{Context, Shared},
    constants::{GATEWAY_URL, GATEWAY_VERSION, INVALID_SESSION_GRACE},
    events::Event,
    id::GuildId,
    model::{payload, Envelope, Opcode, Presence},
    ws::{self, WsSink, WsStream},
};
use decoder::StreamDecoder;
use heartbeat::Heartbeat;

use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

/// Commands accepted by a running session from the rest of the library.
pub(crate) enum GatewayCommand {
    SetPresence(Presence),
    UpdateVoiceState(payload::UpdateVoiceState),
    RequestGuildMembers { guild_id: GuildId, presences: bool },
    Shutdown,
}

/// Round-trip measurements, readable while the session runs.
#[derive(Default)]
pub(crate) struct LatencyInfo {
    pub latency: Option<Duration>,
    pub history: VecDeque<Duration>,
}

impl LatencyInfo {
    /// Rotates in a freshly measured latency: the previous reading moves to
    /// the bounded history (oldest evicted at capacity) before the new one
    /// is recorded.
    pub(crate) fn record(&mut self, latency: Duration, limit: usize) {
        if let Some(previous) = self.latency.take() {
            if self.history.len() == limit {
                self.history.pop_front();
            }
            self.history.push_back(previous);
        }

        self.latency = Some(latency);
    }
}

enum LoopExit {
    Reconnect,
    Shutdown,
}

/// Owns the control-protocol state machine on top of the stream decoder.
pub(crate) struct Session {
    shared: Arc<Shared>,
    cmd_rx: flume::Receiver<GatewayCommand>,

    sequence: Arc<Mutex<Option<u64>>>,
    session_id: Option<String>,
    resuming: bool,
    last_sequence: Option<u64>,

    heartbeat: Option<Heartbeat>,
    writer_tx: Option<flume::Sender<Envelope>>,

    ready: bool,
    dispatched_ready: bool,
    unavailable_guilds: usize,
    presence: Option<Presence>,
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>, cmd_rx: flume::Receiver<GatewayCommand>) -> Self {
        let presence = shared.config.presence.clone();

        Self {
            shared,
            cmd_rx,
            sequence: Arc::new(Mutex::new(None)),
            session_id: None,
            resuming: false,
            last_sequence: None,
            heartbeat: None,
            writer_tx: None,
            ready: false,
            dispatched_ready: false,
            unavailable_guilds: 0,
            presence,
        }
    }

    /// Drives the session until shutdown.
    ///
    /// Transport loss is never fatal: the socket is reconnected from scratch,
    /// indefinitely, pacing attempts with the configured retry strategy.
    #[instrument(skip(self))]
    pub(crate) async fn run(&mut self) {
        let mut last_wait = None;

        loop {
            match self.connect_and_drive().await {
                Ok(LoopExit::Shutdown) => break,
                Ok(LoopExit::Reconnect) => {
                    last_wait = None;
                },
                Err(e) => {
                    debug!("Gateway connection lost: {e}.");
                },
            }

            self.teardown_for_reconnect();

            let wait = self.shared.config.gateway_retry.retry_in(last_wait);
            last_wait = Some(wait);
            info!("Reconnecting to the gateway in {wait:?}.");
            sleep(wait).await;
        }

        self.teardown_for_reconnect();
        info!("Session shut down.");
    }

    async fn connect_and_drive(&mut self) -> ws::Result<LoopExit> {
        let url = format!(
            "{GATEWAY_URL}/?v={GATEWAY_VERSION}&encoding=json&compress=zlib-stream"
        );
        let url = Url::parse(&url).expect("static gateway URL is valid");

        let ws = WsStream::connect(url).await?;
        let (sink, mut source) = ws.split();

        let (writer_tx, writer_rx) = flume::unbounded();
        let writer = tokio::spawn(writer(sink, writer_rx));
        self.writer_tx = Some(writer_tx);

        let mut decoder = StreamDecoder::new();

        let exit = loop {
            tokio::select! {
                frame = source.recv_binary() => match frame {
                    Ok(Some(bytes)) => match decoder.feed(&bytes) {
                        Ok(Some(envelope)) => {
                            if let Some(exit) = self.handle_envelope(envelope).await {
                                break exit;
                            }
                        },
                        Ok(None) => {},
                        Err(e) => {
                            warn!("Stream decoding failed, resynchronising: {e}.");
                            break LoopExit::Reconnect;
                        },
                    },
                    Ok(None) => break LoopExit::Reconnect,
                    Err(e) => {
                        debug!("Gateway read failed: {e}.");
                        break LoopExit::Reconnect;
                    },
                },
                command = self.cmd_rx.recv_async() => match command {
                    Ok(command) => {
                        if let Some(exit) = self.handle_command(command) {
                            break exit;
                        }
                    },
                    Err(_) => break LoopExit::Shutdown,
                },
            }
        };

        writer.abort();
        Ok(exit)
    }

    /// Forgets per-connection state while keeping what resume needs.
    fn teardown_for_reconnect(&mut self) {
        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }

        self.ready = false;
        self.last_sequence = *self.sequence.lock();
        self.resuming = true;
        self.writer_tx = None;
    }

    fn send(&self, envelope: Envelope) {
        if let Some(tx) = &self.writer_tx {
            let _ = tx.send(envelope);
        }
    }

    fn send_payload<T: serde::Serialize>(&self, op: Opcode, payload: &T) {
        match Envelope::new(op, payload) {
            Ok(envelope) => self.send(envelope),
            Err(e) => warn!("Could not serialize op {:?}: {e}.", op),
        }
    }

    fn dispatch(&self, event: Event) {
        let ctx = Context::new(Arc::clone(&self.shared));
        self.shared.dispatcher.dispatch(&ctx, event);
    }

    async fn handle_envelope(&mut self, envelope: Envelope) -> Option<LoopExit> {
        if let Some(s) = envelope.s {
            *self.sequence.lock() = Some(s);
        }

        match envelope.opcode() {
            Some(Opcode::Hello) => {
                let Ok(hello) = serde_json::from_value::<payload::Hello>(envelope.d) else {
                    return None;
                };

                let interval = Duration::from_secs_f64(hello.heartbeat_interval / 1000.0);
                info!("Gateway heartbeat interval {}ms.", hello.heartbeat_interval);

                if let Some(tx) = self.writer_tx.clone() {
                    self.heartbeat = Some(Heartbeat::start(
                        interval,
                        tx,
                        Arc::clone(&self.sequence),
                    ));
                }

                if self.resuming {
                    // Before-state copies are owned by already-dispatched
                    // events; there is nothing retained to discard.
                    self.dispatch(Event::Reconnect);
                    self.resume();
                } else {
                    self.identify();
                }
            },
            Some(Opcode::InvalidSession) => {
                sleep(INVALID_SESSION_GRACE).await;
                self.identify();
                self.dispatch(Event::Reconnect);
            },
            Some(Opcode::HeartbeatAck) => {
                if let Some(sent_at) = self.heartbeat.as_ref().and_then(Heartbeat::sent_at) {
                    let limit = self.shared.config.latency_history_limit;
                    self.shared
                        .latency
                        .lock()
                        .record(sent_at.elapsed(), limit);
                }
            },
            Some(Opcode::Heartbeat) => {
                self.send(Envelope::heartbeat(*self.sequence.lock()));
            },
            Some(Opcode::Reconnect) => {
                info!("Gateway requested a reconnect.");
                return Some(LoopExit::Reconnect);
            },
            Some(Opcode::Dispatch) => {
                if let Some(name) = envelope.t {
                    self.handle_dispatch(&name, envelope.d).await;
                }
            },
            _ => {
                trace!("Ignoring unexpected opcode {}.", envelope.op);
            },
        }

        None
    }

    fn identify(&mut self) {
        self.shared.cache.write().reset();

        let identify = payload::Identify::new(
            &self.shared.token,
            self.shared.config.intents,
            self.presence.clone(),
        );
        self.send_payload(Opcode::Identify, &identify);
    }

    fn resume(&mut self) {
        match (self.session_id.clone(), self.last_sequence) {
            (Some(session_id), Some(seq)) => {
                self.send_payload(
                    Opcode::Resume,
                    &payload::Resume {
                        token: self.shared.token.clone(),
                        session_id,
                        seq,
                    },
                );
            },
            // Nothing to resume onto; fall back to a fresh session.
            _ => self.identify(),
        }

        self.resuming = false;
        self.last_sequence = None;
    }

    fn handle_command(&mut self, command: GatewayCommand) -> Option<LoopExit> {
        match command {
            GatewayCommand::SetPresence(presence) => {
                self.presence = Some(presence.clone());
                if self.ready {
                    self.send_payload(Opcode::PresenceUpdate, &presence);
                }
            },
            GatewayCommand::UpdateVoiceState(payload) => {
                self.send_payload(Opcode::VoiceStateUpdate, &payload);
            },
            GatewayCommand::RequestGuildMembers { guild_id, presences } => {
                self.send_payload(
                    Opcode::RequestGuildMembers,
                    &payload::RequestGuildMembers {
                        guild_id,
                        query: String::new(),
                        limit: 0,
                        presences,
                    },
                );
            },
            GatewayCommand::Shutdown => return Some(LoopExit::Shutdown),
        }

        None
    }

    async fn handle_dispatch(&mut self, name: &str, data: Value) {
        match name {
            "READY" => self.handle_ready(data).await,
            "RESUMED" => {
                self.ready = true;
                self.dispatched_ready = true;
                info!("Session resumed.");
            },
            _ => {
                let lower = name.to_lowercase();

                if self.dispatched_ready {
                    // Verbatim copy for raw-channel consumers.
                    self.shared.dispatcher.dispatch_raw(&lower, &data);
                } else {
                    // During hydration, only GUILD_CREATE advances state.
                    if lower == "guild_create" {
                        let _ = crate::cache::diff::update(&self.shared, &lower, data).await;

                        if self.unavailable_guilds <= self.shared.cache.guild_count() {
                            self.dispatched_ready = true;
                            self.dispatch(Event::Ready);
                        }
                    }
                    return;
                }

                if lower == "voice_state_update" {
                    self.apply_voice_state(&data);
                }
                if lower == "voice_server_update" {
                    self.apply_voice_server(&data);
                    return;
                }

                if let Some(event) = crate::cache::diff::update(&self.shared, &lower, data).await {
                    self.dispatch(event);
                }
            },
        }
    }

    async fn handle_ready(&mut self, data: Value) {
        let ready = match serde_json::from_value::<payload::Ready>(data) {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Malformed READY payload: {e}.");
                return;
            },
        };

        self.session_id = Some(ready.session_id);
        self.unavailable_guilds = ready.guilds.len();

        {
            let mut cache = self.shared.cache.write();
            cache.users.insert(ready.user.id.clone(), ready.user.clone());
            cache.bot_user = Some(ready.user.clone());
        }

        match self.shared.http.application_emojis(&ready.user.id).await {
            Ok(emojis) => self.shared.cache.write().emojis = emojis,
            Err(e) => debug!("Could not refresh application emojis: {e}."),
        }

        self.ready = true;
        info!(
            "Identified as {} with {} guilds to hydrate.",
            ready.user.username, self.unavailable_guilds
        );

        if self.unavailable_guilds == 0 && !self.dispatched_ready {
            self.dispatched_ready = true;
            self.dispatch(Event::Ready);
        }
    }

    /// Feeds our own voice-state dispatches into pending join handshakes.
    fn apply_voice_state(&self, data: &Value) {
        let Some(bot_user) = self.shared.cache.bot_user() else {
            return;
        };
        let Some(user_id) = data.get("user_id").and_then(Value::as_str) else {
            return;
        };
        if bot_user.id != user_id {
            return;
        }

        let (Some(guild_id), Some(session_id)) = (
            data.get("guild_id").and_then(Value::as_str),
            data.get("session_id").and_then(Value::as_str),
        ) else {
            return;
        };

        let guild_id = GuildId::from(guild_id);
        let channel_id = data.get("channel_id").and_then(Value::as_str);

        let mut pending = self.shared.pending_joins.lock();
        let Some(join) = pending.get_mut(&guild_id) else {
            return;
        };

        let Some(channel_id) = channel_id else {
            // Kicked from (or never entered) the channel; the join cannot
            // complete.
            pending.remove(&guild_id);
            return;
        };

        if let Some(info) =
            join.progress
                .apply_state_update(session_id.to_owned(), channel_id.into())
        {
            let _ = join.tx.send(info);
            pending.remove(&guild_id);
        }
    }

    fn apply_voice_server(&self, data: &Value) {
        let Ok(update) = serde_json::from_value::<payload::VoiceServerUpdate>(data.clone()) else {
            return;
        };
        let Some(endpoint) = update.endpoint else {
            // A null endpoint means the allocated server was lost; a new
            // VOICE_SERVER_UPDATE will follow.
            return;
        };

        let mut pending = self.shared.pending_joins.lock();
        if let Some(join) = pending.get_mut(&update.guild_id) {
            if let Some(info) = join.progress.apply_server_update(endpoint, update.token) {
                let _ = join.tx.send(info);
                pending.remove(&update.guild_id);
            }
        }
    }
}

async fn writer(mut sink: WsSink, rx: flume::Receiver<Envelope>) {
    while let Ok(envelope) = rx.recv_async().await {
        if let Err(e) = sink.send_json(&envelope).await {
            debug!("Gateway write failed: {e}.");
            break;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{client::Client, config::Config};

    #[tokio::test]
    async fn sequence_tracks_the_last_non_null_s() {
        let mut client = Client::new("token", Config::default());
        let cmd_rx = client.cmd_rx.take().unwrap();
        let mut session = Session::new(Arc::clone(&client.shared), cmd_rx);

        for (op, s) in [(11u8, Some(5)), (11, None), (0, Some(9)), (11, None)] {
            session
                .handle_envelope(Envelope {
                    op,
                    d: Value::Null,
                    s,
                    t: None,
                })
                .await;
        }

        assert_eq!(*session.sequence.lock(), Some(9));
    }

    #[test]
    fn latency_history_is_bounded_and_fifo() {
        let mut info = LatencyInfo::default();

        for ms in 1..=5u64 {
            info.record(Duration::from_millis(ms), 3);
        }

        // Current reading is 5ms; history holds the previous three, oldest
        // first.
        assert_eq!(info.latency, Some(Duration::from_millis(5)));
        assert_eq!(
            info.history.iter().copied().collect::<Vec<_>>(),
            vec![
                Duration::from_millis(2),
                Duration::from_millis(3),
                Duration::from_millis(4),
            ]
        );
    }

    #[test]
    fn first_record_has_no_history() {
        let mut info = LatencyInfo::default();
        info.record(Duration::from_millis(9), 3);

        assert_eq!(info.latency, Some(Duration::from_millis(9)));
        assert!(info.history.is_empty());
    }
}
