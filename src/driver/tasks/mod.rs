pub(crate) mod message;
pub(crate) mod player;
pub(crate) mod udp_rx;
pub(crate) mod ws;

use super::connection::Connection;
use crate::{config::Config, input::AudioSource};
use message::{CoreMessage, PlayerMessage};
use player::AudioPlayer;

use std::sync::Arc;
use tokio::spawn;
use tracing::{error, instrument, trace, warn};

pub(crate) fn start(config: Config, rx: flume::Receiver<CoreMessage>, tx: flume::Sender<CoreMessage>) {
    spawn(async move {
        trace!("Driver started.");
        runner(config, rx, tx).await;
        trace!("Driver finished.");
    });
}

#[instrument(skip(config, rx, tx))]
async fn runner(config: Config, rx: flume::Receiver<CoreMessage>, tx: flume::Sender<CoreMessage>) {
    let mut connection: Option<Connection> = None;
    let mut player: Option<flume::Sender<PlayerMessage>> = None;

    loop {
        match rx.recv_async().await {
            Ok(CoreMessage::ConnectWithResult(info, result_tx)) => {
                stop_player(&mut player);

                connection = match Connection::new(info, &tx, &config).await {
                    Ok(connection) => {
                        // Other side may not be listening: this is fine.
                        let _ = result_tx.send(Ok(()));
                        Some(connection)
                    },
                    Err(why) => {
                        let _ = result_tx.send(Err(why));
                        None
                    },
                };
            },
            Ok(CoreMessage::Disconnect) => {
                stop_player(&mut player);
                connection = None;
            },
            Ok(CoreMessage::Play(source)) => {
                stop_player(&mut player);

                match &connection {
                    Some(conn) => player = start_player(conn, source),
                    None => warn!("Playback requested without a live voice connection."),
                }
            },
            Ok(CoreMessage::SetPause(paused)) => {
                if let Some(control) = &player {
                    let _ = control.send(PlayerMessage::SetPause(paused));
                }
            },
            Ok(CoreMessage::Stop) => {
                stop_player(&mut player);
            },
            Ok(CoreMessage::Reconnect) => {
                // The old cipher and socket die with the connection; any
                // running player would be transmitting garbage.
                stop_player(&mut player);

                if let Some(conn) = connection.take() {
                    let info = conn.info.clone();
                    drop(conn);

                    connection = Connection::new(info, &tx, &config)
                        .await
                        .map_err(|e| {
                            error!("Catastrophic connection failure. Stopping. {e}");
                            e
                        })
                        .ok();
                }
            },
            Err(flume::RecvError::Disconnected) | Ok(CoreMessage::Poison) => {
                break;
            },
        }
    }

    stop_player(&mut player);
    trace!("Main driver task exited.");
}

fn start_player(
    conn: &Connection,
    source: Box<dyn AudioSource>,
) -> Option<flume::Sender<PlayerMessage>> {
    let (control_tx, control_rx) = flume::unbounded();

    let player = AudioPlayer::new(
        source,
        Arc::clone(&conn.udp),
        conn.cipher.clone(),
        conn.ssrc,
        conn.ws.clone(),
        control_rx,
    );

    match player {
        Ok(player) => {
            std::thread::Builder::new()
                .name("lorikeet audio".into())
                .spawn(move || player.run())
                .ok()?;

            Some(control_tx)
        },
        Err(e) => {
            error!("Failed to create opus encoder: {e:?}.");
            None
        },
    }
}

fn stop_player(player: &mut Option<flume::Sender<PlayerMessage>>) {
    if let Some(control) = player.take() {
        let _ = control.send(PlayerMessage::Stop);
    }
}
