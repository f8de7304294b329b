//! Encryption of outbound RTP packets.
//!
//! The driver negotiates the `xsalsa20_poly1305` mode: the 12-byte RTP
//! header, zero-padded to the full 24-byte nonce width, keys each packet, and
//! the authentication tag is prepended to the ciphertext.

use crypto_secretbox::{
    AeadInPlace,
    Error as CryptoError,
    Nonce,
    SecretBox,
    XSalsa20Poly1305 as Cipher,
};
use discortp::MutablePacket;

/// Bytes occupied by the authentication tag, ahead of the opus payload.
pub const TAG_SIZE: usize = SecretBox::<()>::TAG_SIZE;

/// Full nonce width of the negotiated mode.
pub const NONCE_SIZE: usize = SecretBox::<()>::NONCE_SIZE;

/// Name of the mode as it appears during protocol negotiation.
pub const ENCRYPTION_MODE: &str = "xsalsa20_poly1305";

/// Encrypts a packet's payload in place using the given key.
///
/// The packet must hold `TAG_SIZE` spare bytes ahead of the `payload_len`
/// bytes of plaintext; the tag is written into them.
#[inline]
pub(crate) fn encrypt_in_place(
    packet: &mut impl MutablePacket,
    cipher: &Cipher,
    payload_len: usize,
) -> Result<(), CryptoError> {
    let header_len = packet.packet().len() - packet.payload().len();
    let (header, body) = packet.packet_mut().split_at_mut(header_len);

    let mut nonce = Nonce::default();
    nonce[..header_len.min(NONCE_SIZE)].copy_from_slice(&header[..header_len.min(NONCE_SIZE)]);

    let body = body
        .get_mut(..TAG_SIZE + payload_len)
        .ok_or(CryptoError)?;

    let tag = cipher.encrypt_in_place_detached(&nonce, b"", &mut body[TAG_SIZE..])?;
    body[..TAG_SIZE].copy_from_slice(&tag[..]);

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crypto_secretbox::{KeyInit, Tag};
    use discortp::rtp::MutableRtpPacket;
    use discortp::Packet;

    pub const KEY_SIZE: usize = SecretBox::<()>::KEY_SIZE;

    fn decrypt_in_place(
        packet: &mut impl MutablePacket,
        cipher: &Cipher,
    ) -> Result<(), CryptoError> {
        let header_len = packet.packet().len() - packet.payload().len();
        let (header, body) = packet.packet_mut().split_at_mut(header_len);

        let mut nonce = Nonce::default();
        nonce[..header_len].copy_from_slice(header);

        let (tag_bytes, data) = body.split_at_mut(TAG_SIZE);
        let tag = Tag::from_slice(tag_bytes);

        cipher.decrypt_in_place_detached(&nonce, b"", data, tag)
    }

    #[test]
    fn payload_too_large_for_buffer_errors() {
        let mut buf = [0u8; MutableRtpPacket::minimum_packet_size() + TAG_SIZE];
        let mut pkt = MutableRtpPacket::new(&mut buf[..]).unwrap();
        let cipher = Cipher::new_from_slice(&[1u8; KEY_SIZE]).unwrap();

        // AIM: should error, and not panic.
        assert!(encrypt_in_place(&mut pkt, &cipher, 64).is_err());
    }

    #[test]
    fn symmetric_encrypt_decrypt() {
        const TRUE_PAYLOAD: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut buf =
            [0u8; MutableRtpPacket::minimum_packet_size() + TAG_SIZE + TRUE_PAYLOAD.len()];
        let cipher = Cipher::new_from_slice(&[7u8; KEY_SIZE]).unwrap();

        let mut pkt = MutableRtpPacket::new(&mut buf[..]).unwrap();
        pkt.payload_mut()[TAG_SIZE..TAG_SIZE + TRUE_PAYLOAD.len()]
            .copy_from_slice(&TRUE_PAYLOAD[..]);

        encrypt_in_place(&mut pkt, &cipher, TRUE_PAYLOAD.len()).unwrap();
        assert_ne!(&pkt.payload()[TAG_SIZE..], &TRUE_PAYLOAD[..]);

        decrypt_in_place(&mut pkt, &cipher).unwrap();
        assert_eq!(&pkt.payload()[TAG_SIZE..], &TRUE_PAYLOAD[..]);
    }
}
