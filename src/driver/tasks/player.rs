//! The real-time audio pacing thread.
//!
//! Runs outside the cooperative scheduler so that frame timing is never
//! subject to executor jitter. Each cycle reads one 20 ms PCM frame,
//! encodes, encrypts, transmits, then sleeps to the next deadline.

use super::message::{PlayerMessage, WsMessage};
use crate::{constants::*, driver::crypto, input::AudioSource};

use audiopus::{coder::Encoder as OpusEncoder, Application as CodingMode, Channels, SampleRate};
use crypto_secretbox::XSalsa20Poly1305 as Cipher;
use discortp::{
    discord::MutableKeepalivePacket,
    rtp::{MutableRtpPacket, RtpPacket},
    MutablePacket,
};
use std::{net::UdpSocket, sync::Arc, time::Instant};
use tracing::{error, trace};

/// Sequence and timestamp counters for outbound RTP.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RtpState {
    pub sequence: u16,
    pub timestamp: u32,
}

impl RtpState {
    pub(crate) fn new() -> Self {
        Self {
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Advances past one transmitted frame.
    ///
    /// The sequence wraps at 65535; the timestamp moves by the frame's
    /// sample count and resets to zero once it can no longer fit another
    /// full frame below 2^32−1.
    pub(crate) fn advance(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = match self.timestamp.checked_add(MONO_FRAME_SIZE as u32) {
            Some(t) => t,
            None => 0,
        };
    }
}

pub(crate) struct AudioPlayer {
    source: Box<dyn AudioSource>,
    udp: Arc<UdpSocket>,
    cipher: Cipher,
    ssrc: u32,
    ws: flume::Sender<WsMessage>,
    rx: flume::Receiver<PlayerMessage>,

    encoder: OpusEncoder,
    rtp: RtpState,
    packet: [u8; VOICE_PACKET_MAX],

    deadline: Instant,
    keepalive_at: Instant,
    paused: bool,
    silence_frames: usize,
}

impl AudioPlayer {
    pub(crate) fn new(
        source: Box<dyn AudioSource>,
        udp: Arc<UdpSocket>,
        cipher: Cipher,
        ssrc: u32,
        ws: flume::Sender<WsMessage>,
        rx: flume::Receiver<PlayerMessage>,
    ) -> Result<Self, audiopus::Error> {
        let mut encoder =
            OpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, CodingMode::Audio)?;
        encoder.set_bitrate(DEFAULT_BITRATE)?;

        let mut packet = [0u8; VOICE_PACKET_MAX];
        let mut rtp = MutableRtpPacket::new(&mut packet[..]).expect(
            "FATAL: Too few bytes in self.packet for RTP header.\
                (Blame: VOICE_PACKET_MAX?)",
        );
        rtp.set_version(RTP_VERSION);
        rtp.set_payload_type(RTP_PROFILE_TYPE);
        rtp.set_ssrc(ssrc);

        Ok(Self {
            source,
            udp,
            cipher,
            ssrc,
            ws,
            rx,
            encoder,
            rtp: RtpState::new(),
            packet,
            deadline: Instant::now(),
            keepalive_at: Instant::now() + UDP_KEEPALIVE_GAP,
            paused: false,
            silence_frames: SILENCE_TAIL,
        })
    }

    pub(crate) fn run(mut self) {
        self.deadline = Instant::now();
        let _ = self.ws.send(WsMessage::Speaking(true));

        let mut frame = [0i16; STEREO_FRAME_SIZE];

        loop {
            match self.drain_control() {
                ControlFlow::Continue => {},
                ControlFlow::Stop => break,
            }

            self.check_keepalive();

            let sent = if self.paused {
                // Substitute silence while paused, keeping cadence.
                self.send_frame(None)
            } else if self.source.read_frame(&mut frame) {
                self.silence_frames = SILENCE_TAIL;
                self.send_frame(Some(&frame))
            } else if self.silence_frames > 0 {
                // A short silent run lets the far end's decoder settle
                // before we stop speaking.
                self.silence_frames -= 1;
                self.send_frame(None)
            } else {
                break;
            };

            if let Err(e) = sent {
                error!("Fatal voice packet error: {e}.");
                break;
            }

            self.march_deadline();
        }

        let _ = self.ws.send(WsMessage::Speaking(false));
        trace!("Audio player finished.");
    }

    fn drain_control(&mut self) -> ControlFlow {
        loop {
            match self.rx.try_recv() {
                Ok(PlayerMessage::SetPause(paused)) => self.paused = paused,
                Ok(PlayerMessage::Stop) | Err(flume::TryRecvError::Disconnected) => {
                    return ControlFlow::Stop;
                },
                Err(flume::TryRecvError::Empty) => return ControlFlow::Continue,
            }
        }
    }

    /// Encodes (or substitutes silence), encrypts, and transmits one frame.
    fn send_frame(&mut self, pcm: Option<&[i16; STEREO_FRAME_SIZE]>) -> Result<(), PlayerError> {
        let mut rtp = MutableRtpPacket::new(&mut self.packet[..]).expect(
            "FATAL: Too few bytes in self.packet for RTP header.\
                (Blame: VOICE_PACKET_MAX?)",
        );
        rtp.set_sequence(self.rtp.sequence.into());
        rtp.set_timestamp(self.rtp.timestamp.into());

        let payload = rtp.payload_mut();
        let payload_len = match pcm {
            Some(frame) => self
                .encoder
                .encode(&frame[..], &mut payload[crypto::TAG_SIZE..])?,
            None => {
                payload[crypto::TAG_SIZE..crypto::TAG_SIZE + SILENT_FRAME.len()]
                    .copy_from_slice(&SILENT_FRAME[..]);
                SILENT_FRAME.len()
            },
        };

        crypto::encrypt_in_place(&mut rtp, &self.cipher, payload_len)?;

        let total = RtpPacket::minimum_packet_size() + crypto::TAG_SIZE + payload_len;
        self.udp.send(&self.packet[..total])?;

        self.rtp.advance();
        Ok(())
    }

    fn check_keepalive(&mut self) {
        if Instant::now() < self.keepalive_at {
            return;
        }

        let mut bytes = [0u8; MutableKeepalivePacket::minimum_packet_size()];
        let mut ka = MutableKeepalivePacket::new(&mut bytes[..])
            .expect("FATAL: Insufficient bytes given to keepalive packet.");
        ka.set_ssrc(self.ssrc);

        trace!("Sending UDP keepalive.");
        let _ = self.udp.send(&bytes[..]);
        self.keepalive_at += UDP_KEEPALIVE_GAP;
    }

    /// Sleeps out the remainder of the current timestep.
    ///
    /// The deadline marches in fixed steps from the loop's start time, so
    /// per-frame encode/send latency never accumulates as drift.
    #[inline]
    fn march_deadline(&mut self) {
        std::thread::sleep(self.deadline.saturating_duration_since(Instant::now()));
        self.deadline += TIMESTEP_LENGTH;
    }
}

enum ControlFlow {
    Continue,
    Stop,
}

#[derive(Debug)]
enum PlayerError {
    Opus(audiopus::Error),
    Crypto(crypto_secretbox::Error),
    Io(std::io::Error),
}

impl From<audiopus::Error> for PlayerError {
    fn from(e: audiopus::Error) -> Self {
        PlayerError::Opus(e)
    }
}

impl From<crypto_secretbox::Error> for PlayerError {
    fn from(e: crypto_secretbox::Error) -> Self {
        PlayerError::Crypto(e)
    }
}

impl From<std::io::Error> for PlayerError {
    fn from(e: std::io::Error) -> Self {
        PlayerError::Io(e)
    }
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::Opus(e) => write!(f, "opus encode failed: {e}"),
            PlayerError::Crypto(_) => write!(f, "packet encryption failed"),
            PlayerError::Io(e) => write!(f, "udp send failed: {e}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sequence_wraps_to_zero() {
        let mut state = RtpState::new();
        state.sequence = u16::MAX;

        state.advance();

        assert_eq!(state.sequence, 0);
    }

    #[test]
    fn timestamp_wraps_to_zero_at_limit() {
        let mut state = RtpState::new();
        state.timestamp = u32::MAX;

        state.advance();

        assert_eq!(state.timestamp, 0);
    }

    #[test]
    fn timestamp_advances_by_one_frame_of_samples() {
        let mut state = RtpState::new();

        state.advance();
        state.advance();

        assert_eq!(state.timestamp, 2 * MONO_FRAME_SIZE as u32);
        assert_eq!(state.sequence, 2);
    }
}
