//! Constants affecting gateway, HTTP, and voice driver function.

use audiopus::Bitrate;
use discortp::rtp::RtpType;
use std::time::Duration;

/// The main gateway version spoken by the library.
pub const GATEWAY_VERSION: u8 = 9;

/// The voice gateway version spoken by the library.
pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// Fixed URL of the main gateway, before version/encoding parameters.
pub const GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Base URL for all REST calls.
pub const API_URL: &str = "https://discord.com/api/v10";

/// Base URL of the CDN.
pub const CDN_URL: &str = "https://cdn.discordapp.com";

/// User agent sent with every REST call.
pub const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/lorikeet-rs/lorikeet, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Trailing byte sequence marking a complete zlib-stream frame.
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Member count threshold sent during IDENTIFY.
pub const LARGE_THRESHOLD: u64 = 250;

/// Grace period observed after an invalid session before re-identifying.
pub const INVALID_SESSION_GRACE: Duration = Duration::from_secs(5);

/// Sample rate of audio to be sent over a voice connection.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Number of audio frames/packets to be sent per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Length of time between any two audio frames.
pub const TIMESTEP_LENGTH: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Number of samples in one complete frame of audio per channel.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Number of individual samples in one complete frame of stereo audio.
pub const STEREO_FRAME_SIZE: usize = 2 * MONO_FRAME_SIZE;

/// Number of bytes in one complete frame of raw 16-bit stereo audio.
pub const STEREO_FRAME_BYTE_SIZE: usize = STEREO_FRAME_SIZE * std::mem::size_of::<i16>();

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Delay between sends of UDP keepalive frames.
pub const UDP_KEEPALIVE_GAP: Duration = Duration::from_millis(5_000);

/// Opus silent frame, used to signal speech start and end (and prevent audio glitching).
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Number of silent frames sent before the driver stops speaking.
pub const SILENCE_TAIL: usize = 5;

/// Default bitrate for encoded audio.
pub const DEFAULT_BITRATE: Bitrate = Bitrate::BitsPerSecond(128_000);

/// The one (and only) RTP version.
pub const RTP_VERSION: u8 = 2;

/// Profile type used by Opus audio traffic.
pub const RTP_PROFILE_TYPE: RtpType = RtpType::Dynamic(120);
