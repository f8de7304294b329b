//! The voice websocket's cooperative task: heartbeat, speaking state, and
//! inbound event handling.

use super::message::{CoreMessage, WsMessage};
use crate::{
    model::voice::{self, VoiceEvent},
    ws::{Error as WsError, WsStream},
};

use rand::random;
use std::time::Duration;
use tokio::{
    select,
    time::{sleep_until, Instant},
};
use tracing::{debug, instrument, trace, warn};

pub(crate) struct AuxNetwork {
    rx: flume::Receiver<WsMessage>,
    ws_client: WsStream,
    core: flume::Sender<CoreMessage>,

    ssrc: u32,
    heartbeat_interval: Duration,

    speaking: bool,
    last_heartbeat_nonce: Option<u64>,
}

impl AuxNetwork {
    pub(crate) fn new(
        evt_rx: flume::Receiver<WsMessage>,
        ws_client: WsStream,
        core: flume::Sender<CoreMessage>,
        ssrc: u32,
        heartbeat_interval: f64,
    ) -> Self {
        Self {
            rx: evt_rx,
            ws_client,
            core,
            ssrc,
            heartbeat_interval: Duration::from_secs_f64(heartbeat_interval / 1000.0),
            speaking: false,
            last_heartbeat_nonce: None,
        }
    }

    #[instrument(skip(self))]
    async fn run(&mut self) {
        let mut next_heartbeat = Instant::now() + self.heartbeat_interval;

        loop {
            let mut ws_error = false;

            let hb = sleep_until(next_heartbeat);

            select! {
                () = hb => {
                    ws_error = self.send_heartbeat().await.is_err();
                    next_heartbeat = Instant::now() + self.heartbeat_interval;
                }
                ws_msg = self.ws_client.recv_voice_no_timeout() => {
                    match ws_msg {
                        Ok(Some(event)) => self.process_ws(event),
                        Ok(None) => {},
                        Err(e) => {
                            debug!("Voice websocket receive failed: {e}.");
                            ws_error = true;
                        },
                    }
                }
                inner_msg = self.rx.recv_async() => {
                    match inner_msg {
                        Ok(WsMessage::Speaking(is_speaking)) => {
                            if self.speaking != is_speaking {
                                self.speaking = is_speaking;
                                trace!("Changing speaking state to {is_speaking}.");

                                ws_error = self
                                    .send(VoiceEvent::Speaking(voice::Speaking {
                                        speaking: u8::from(is_speaking),
                                        delay: 0,
                                        ssrc: self.ssrc,
                                    }))
                                    .await
                                    .is_err();
                            }
                        },
                        Ok(WsMessage::Poison) | Err(flume::RecvError::Disconnected) => {
                            break;
                        },
                    }
                }
            }

            if ws_error {
                // Transport loss is recovered by a full re-handshake.
                let _ = self.core.send(CoreMessage::Reconnect);
                break;
            }
        }
    }

    async fn send(&mut self, event: VoiceEvent) -> Result<(), WsError> {
        let raw = event.into_raw()?;
        self.ws_client.send_json(&raw).await
    }

    async fn send_heartbeat(&mut self) -> Result<(), WsError> {
        let nonce = random::<u64>();
        self.last_heartbeat_nonce = Some(nonce);

        trace!("Sent voice heartbeat.");
        self.send(VoiceEvent::Heartbeat(nonce)).await
    }

    fn process_ws(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::HeartbeatAck(nonce) => {
                if let Some(expected) = self.last_heartbeat_nonce.take() {
                    if expected == nonce {
                        trace!("Voice heartbeat ACK received.");
                    } else {
                        warn!("Heartbeat nonce mismatch! Expected {expected}, saw {nonce}.");
                    }
                }
            },
            VoiceEvent::Speaking(ev) => {
                trace!("Speaking update for ssrc {}.", ev.ssrc);
            },
            other => {
                trace!("Received other voice websocket data: {other:?}.");
            },
        }
    }
}

#[instrument(skip(aux))]
pub(crate) async fn runner(mut aux: AuxNetwork) {
    trace!("Voice WS task started.");
    aux.run().await;
    trace!("Voice WS task finished.");
}
