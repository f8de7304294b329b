//! Messages passed between the driver's tasks and threads.

use crate::{driver::connection::error::Result, info::ConnectionInfo, input::AudioSource};

/// Control messages for the driver's core task.
pub(crate) enum CoreMessage {
    ConnectWithResult(ConnectionInfo, flume::Sender<Result<()>>),
    Disconnect,
    Play(Box<dyn AudioSource>),
    SetPause(bool),
    Stop,
    Reconnect,
    Poison,
}

/// Control messages for the voice websocket task.
pub(crate) enum WsMessage {
    Speaking(bool),
    Poison,
}

/// Control messages for the real-time audio thread.
pub(crate) enum PlayerMessage {
    SetPause(bool),
    Stop,
}
