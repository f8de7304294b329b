pub mod error;

use super::{
    crypto::ENCRYPTION_MODE,
    tasks::{
        message::{CoreMessage, WsMessage},
        udp_rx::{CallbackRegistry, SocketReader},
        ws as ws_task,
        ws::AuxNetwork,
    },
};
use crate::{
    config::Config,
    constants::VOICE_GATEWAY_VERSION,
    info::ConnectionInfo,
    model::voice::{self, VoiceEvent},
    ws::WsStream,
};

use crypto_secretbox::{KeyInit, XSalsa20Poly1305 as Cipher};
use discortp::discord::{IpDiscoveryPacket, IpDiscoveryType, MutableIpDiscoveryPacket};
use error::{Error, Result};
use std::{net::UdpSocket as StdUdpSocket, sync::Arc};
use tokio::{net::UdpSocket, spawn, time::timeout};
use tracing::{debug, info};
use url::Url;

pub(crate) struct Connection {
    pub(crate) info: ConnectionInfo,
    pub(crate) ssrc: u32,
    pub(crate) cipher: Cipher,
    pub(crate) udp: Arc<StdUdpSocket>,
    pub(crate) ws: flume::Sender<WsMessage>,
    reader: SocketReader,
}

impl Connection {
    pub(crate) async fn new(
        info: ConnectionInfo,
        core: &flume::Sender<CoreMessage>,
        config: &Config,
    ) -> Result<Connection> {
        if let Some(t) = config.driver_timeout {
            timeout(t, Connection::new_inner(info, core, config)).await?
        } else {
            Connection::new_inner(info, core, config).await
        }
    }

    async fn new_inner(
        mut info: ConnectionInfo,
        core: &flume::Sender<CoreMessage>,
        _config: &Config,
    ) -> Result<Connection> {
        let url = generate_url(&mut info.endpoint)?;

        let mut client = WsStream::connect(url).await?;

        client
            .send_json(
                &VoiceEvent::Identify(voice::Identify {
                    server_id: info.guild_id.0.clone(),
                    user_id: info.user_id.0.clone(),
                    session_id: info.session_id.clone(),
                    token: info.token.clone(),
                })
                .into_raw()?,
            )
            .await?;

        let mut hello = None;
        let mut ready = None;

        loop {
            let Some(value) = client.recv_voice().await? else {
                continue;
            };

            match value {
                VoiceEvent::Ready(r) => {
                    ready = Some(r);
                    if hello.is_some() {
                        break;
                    }
                },
                VoiceEvent::Hello(h) => {
                    hello = Some(h);
                    if ready.is_some() {
                        break;
                    }
                },
                other => {
                    debug!("Expected ready/hello; got: {:?}", other);
                },
            }
        }

        let hello =
            hello.expect("Hello packet expected in connection initialisation, but not found.");
        let ready =
            ready.expect("Ready packet expected in connection initialisation, but not found.");

        if !ready.modes.iter().any(|s| s == ENCRYPTION_MODE) {
            return Err(Error::CryptoModeUnavailable);
        }

        let udp = UdpSocket::bind("0.0.0.0:0").await?;
        udp.connect((ready.ip.as_str(), ready.port)).await?;

        // The real-time threads own the socket from here: a blocking clone
        // for the reader, the original for packet transmission.
        let udp = udp.into_std()?;
        udp.set_nonblocking(false)?;

        let registry = CallbackRegistry::default();
        let reader = SocketReader::start(udp.try_clone()?, registry.clone())?;

        // Follow the platform's IP discovery procedure, in case NAT
        // tunnelling is needed.
        let mut bytes = [0; IpDiscoveryPacket::const_packet_size()];
        {
            let mut view = MutableIpDiscoveryPacket::new(&mut bytes[..]).expect(
                "Too few bytes in 'bytes' for IPDiscovery packet.\
                    (Blame: IpDiscoveryPacket::const_packet_size()?)",
            );
            view.set_pkt_type(IpDiscoveryType::Request);
            view.set_length(70);
            view.set_ssrc(ready.ssrc);
        }

        // One-shot waiter: the reader thread hands the matching reply back
        // into this task over the channel, then forgets the registration.
        let (discovery_tx, discovery_rx) = flume::bounded::<Vec<u8>>(1);
        let expected_ssrc = ready.ssrc;
        registry.register(Box::new(move |data| {
            if data.len() == IpDiscoveryPacket::const_packet_size() {
                if let Some(view) = IpDiscoveryPacket::new(data) {
                    if view.get_pkt_type() == IpDiscoveryType::Response
                        && view.get_ssrc() == expected_ssrc
                    {
                        let _ = discovery_tx.send(data.to_vec());
                        return true;
                    }
                }
            }
            false
        }));

        udp.send(&bytes)?;

        let reply = discovery_rx
            .recv_async()
            .await
            .map_err(|_| Error::IllegalDiscoveryResponse)?;

        let (address, port) = {
            let view =
                IpDiscoveryPacket::new(&reply).ok_or(Error::IllegalDiscoveryResponse)?;

            // We could do something clever like binary search,
            // but possibility of UDP spoofing precludes us from
            // making the assumption we can find a "left edge" of '\0's.
            let nul_byte_index = view
                .get_address_raw()
                .iter()
                .position(|&b| b == 0)
                .ok_or(Error::IllegalIp)?;

            let address = std::str::from_utf8(&view.get_address_raw()[..nul_byte_index])
                .map_err(|_| Error::IllegalIp)?
                .to_owned();

            (address, view.get_port())
        };

        client
            .send_json(
                &VoiceEvent::SelectProtocol(voice::SelectProtocol {
                    protocol: "udp".into(),
                    data: voice::ProtocolData {
                        address,
                        port,
                        mode: ENCRYPTION_MODE.into(),
                    },
                })
                .into_raw()?,
            )
            .await?;

        let cipher = init_cipher(&mut client).await?;

        info!("Connected to: {}", info.endpoint);
        info!("WS heartbeat duration {}ms.", hello.heartbeat_interval);

        let (ws_msg_tx, ws_msg_rx) = flume::unbounded();
        let aux = AuxNetwork::new(
            ws_msg_rx,
            client,
            core.clone(),
            ready.ssrc,
            hello.heartbeat_interval,
        );
        spawn(ws_task::runner(aux));

        Ok(Connection {
            info,
            ssrc: ready.ssrc,
            cipher,
            udp: Arc::new(udp),
            ws: ws_msg_tx,
            reader,
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.stop();
        let _ = self.ws.send(WsMessage::Poison);
        info!("Disconnected");
    }
}

fn generate_url(endpoint: &mut String) -> Result<Url> {
    if endpoint.ends_with(":80") {
        let len = endpoint.len();

        endpoint.truncate(len - 3);
    }

    Url::parse(&format!("wss://{endpoint}/?v={VOICE_GATEWAY_VERSION}")).or(Err(Error::EndpointUrl))
}

#[inline]
async fn init_cipher(client: &mut WsStream) -> Result<Cipher> {
    loop {
        let Some(value) = client.recv_voice().await? else {
            continue;
        };

        match value {
            VoiceEvent::SessionDescription(desc) => {
                if desc.mode != ENCRYPTION_MODE {
                    return Err(Error::CryptoModeInvalid);
                }

                return Cipher::new_from_slice(&desc.secret_key)
                    .map_err(Error::InvalidLength);
            },
            other => {
                debug!("Expected session description for key; got: {:?}", other);
            },
        }
    }
}
