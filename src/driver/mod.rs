//! Runner for a voice connection.
//!
//! The driver is a mixed-sync system:
//!  * asynchronous connection management and voice gateway signalling on the
//!    cooperative scheduler;
//!  * synchronous packet generation, encryption, and pacing on dedicated
//!    threads, so audio timing is never subject to executor jitter.

pub(crate) mod connection;
mod crypto;
pub mod retry;
pub(crate) mod tasks;

pub use crypto::ENCRYPTION_MODE;

use crate::{config::Config, info::ConnectionInfo, input::AudioSource};
use connection::error::{Error, Result};
use tasks::message::CoreMessage;

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use flume::{r#async::RecvFut, SendError, Sender};
use tracing::instrument;

/// The control object for one voice connection, handling handshaking,
/// encryption, and audio transmission.
#[derive(Clone, Debug)]
pub struct Driver {
    config: Config,
    sender: Sender<CoreMessage>,
}

impl Driver {
    /// Creates a new voice driver, spawning its core task in the background.
    #[inline]
    #[must_use]
    pub fn new(config: Config) -> Self {
        let sender = Self::start_inner(config.clone());

        Driver { config, sender }
    }

    fn start_inner(config: Config) -> Sender<CoreMessage> {
        let (tx, rx) = flume::unbounded();

        tasks::start(config, rx, tx.clone());

        tx
    }

    fn restart_inner(&mut self) {
        self.sender = Self::start_inner(self.config.clone());
    }

    /// Connects to a voice channel using the given handshake parameters.
    ///
    /// The driver tasks are contacted immediately; the returned future
    /// resolves with the handshake's outcome.
    #[instrument(skip(self))]
    pub fn connect(&mut self, info: ConnectionInfo) -> Connect {
        let (tx, rx) = flume::bounded(1);

        self.send(CoreMessage::ConnectWithResult(info, tx));

        Connect {
            inner: rx.into_recv_async(),
        }
    }

    /// Leaves the current voice channel, disconnecting from it.
    #[instrument(skip(self))]
    pub fn leave(&mut self) {
        self.send(CoreMessage::Disconnect);
    }

    /// Plays audio from a source, replacing any current playback.
    ///
    /// Playback stops on its own when the source runs dry.
    #[instrument(skip(self, source))]
    pub fn play(&mut self, source: Box<dyn AudioSource>) {
        self.send(CoreMessage::Play(source));
    }

    /// Pauses playback; silence frames are transmitted in the interim.
    #[instrument(skip(self))]
    pub fn pause(&mut self) {
        self.send(CoreMessage::SetPause(true));
    }

    /// Resumes paused playback.
    #[instrument(skip(self))]
    pub fn resume(&mut self) {
        self.send(CoreMessage::SetPause(false));
    }

    /// Stops playback entirely, dropping the current source.
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        self.send(CoreMessage::Stop);
    }

    /// Sends a message to the inner tasks, restarting them if necessary.
    fn send(&mut self, status: CoreMessage) {
        // Restart the task if it errored.
        if let Err(SendError(status)) = self.sender.send(status) {
            self.restart_inner();

            self.sender
                .send(status)
                .expect("Driver core task was just restarted");
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for Driver {
    /// Leaves any connected voice channel and ends the inner tasks.
    fn drop(&mut self) {
        self.leave();
        let _ = self.sender.send(CoreMessage::Poison);
    }
}

/// Future for a call to [`Driver::connect`].
///
/// This future awaits the *result* of a connection; the driver
/// is messaged at the time of the call.
pub struct Connect {
    inner: RecvFut<'static, Result<()>>,
}

impl Future for Connect {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(r) => Poll::Ready(r.map_err(|_| Error::AttemptDiscarded).and_then(|x| x)),
            Poll::Pending => Poll::Pending,
        }
    }
}
