use crate::model::voice::{RawVoiceEvent, VoiceEvent};

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use serde::Serialize;
use tokio::{
    net::TcpStream,
    time::{timeout, Duration},
};
use tokio_tungstenite::{
    tungstenite::{
        error::Error as TungsteniteError,
        protocol::{CloseFrame, WebSocketConfig as Config},
        Message,
    },
    MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, instrument};
use url::Url;

pub struct WsStream(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl WsStream {
    #[instrument]
    pub(crate) async fn connect(url: Url) -> Result<Self> {
        let mut config = Config::default();
        config.max_message_size = None;
        config.max_frame_size = None;

        let (stream, _) =
            tokio_tungstenite::connect_async_with_config(url.as_str(), Some(config), true).await?;

        Ok(Self(stream))
    }

    /// Splits this stream for independent reader/writer tasks.
    pub(crate) fn split(self) -> (WsSink, WsSource) {
        let (sink, stream) = self.0.split();
        (WsSink(sink), WsSource(stream))
    }

    pub(crate) async fn recv_voice(&mut self) -> Result<Option<VoiceEvent>> {
        const TIMEOUT: Duration = Duration::from_millis(500);

        let ws_message = match timeout(TIMEOUT, self.0.next()).await {
            Ok(Some(Ok(v))) => Some(v),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) | Err(_) => None,
        };

        convert_voice_message(ws_message)
    }

    pub(crate) async fn recv_voice_no_timeout(&mut self) -> Result<Option<VoiceEvent>> {
        match self.0.next().await {
            Some(Ok(v)) => convert_voice_message(Some(v)),
            Some(Err(e)) => Err(e.into()),
            None => convert_voice_message(None),
        }
    }

    pub(crate) async fn send_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.0.send(Message::Text(text)).await?;

        Ok(())
    }
}

/// Write half of a split gateway connection.
pub struct WsSink(SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>);

impl WsSink {
    pub(crate) async fn send_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.0.send(Message::Text(text)).await?;

        Ok(())
    }
}

/// Read half of a split gateway connection.
pub struct WsSource(SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>);

impl WsSource {
    /// Receives the next binary frame, skipping control traffic.
    ///
    /// `Ok(None)` signals an orderly end of stream.
    pub(crate) async fn recv_binary(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(bytes)),
                Some(Ok(Message::Close(frame))) => return Err(Error::WsClosed(frame)),
                // Ping/Pong behaviour is internally handled by tungstenite.
                Some(Ok(other)) => {
                    debug!("Unexpected non-binary gateway frame: {other:?}");
                },
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Json(serde_json::Error),

    Ws(TungsteniteError),

    WsClosed(Option<CloseFrame<'static>>),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Json(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        Error::Ws(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Json(e) => write!(f, "json handling failed: {e}"),
            Error::Ws(e) => write!(f, "websocket error: {e}"),
            Error::WsClosed(frame) => write!(f, "websocket closed: {frame:?}"),
        }
    }
}

impl std::error::Error for Error {}

#[inline]
pub(crate) fn convert_voice_message(message: Option<Message>) -> Result<Option<VoiceEvent>> {
    Ok(match message {
        Some(Message::Text(payload)) => match serde_json::from_str::<RawVoiceEvent>(&payload) {
            Ok(raw) => Some(VoiceEvent::from_raw(raw)),
            Err(e) => {
                // The voice gateway is uncompressed; anything unparseable is
                // noise rather than a framing problem.
                debug!("Unexpected JSON: {e}. Payload: {payload}");
                None
            },
        },
        Some(Message::Close(frame)) => {
            return Err(Error::WsClosed(frame));
        },
        // Ping/Pong message behaviour is internally handled by tungstenite.
        _ => None,
    })
}
