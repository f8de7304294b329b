//! Audio sources feeding the pacing pipeline.

use crate::constants::STEREO_FRAME_SIZE;

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// Produces fixed-duration frames of signed 16-bit interleaved stereo PCM at
/// 48 kHz.
///
/// Called from the real-time audio thread: implementations should avoid
/// blocking beyond ordinary buffered reads.
pub trait AudioSource: Send {
    /// Fills `buf` with one 20 ms frame.
    ///
    /// Returning `false` ends playback; a partial frame counts as the end of
    /// the stream.
    fn read_frame(&mut self, buf: &mut [i16; STEREO_FRAME_SIZE]) -> bool;
}

/// An [`AudioSource`] over any reader yielding raw little-endian PCM.
pub struct PcmSource<R> {
    reader: R,
}

impl<R: Read + Send> PcmSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read + Send> AudioSource for PcmSource<R> {
    fn read_frame(&mut self, buf: &mut [i16; STEREO_FRAME_SIZE]) -> bool {
        self.reader.read_i16_into::<LittleEndian>(buf).is_ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::STEREO_FRAME_BYTE_SIZE;
    use std::io::Cursor;

    #[test]
    fn short_reads_end_the_stream() {
        // One full frame and a half.
        let data = vec![0u8; STEREO_FRAME_BYTE_SIZE + STEREO_FRAME_BYTE_SIZE / 2];
        let mut source = PcmSource::new(Cursor::new(data));
        let mut frame = [0i16; STEREO_FRAME_SIZE];

        assert!(source.read_frame(&mut frame));
        assert!(!source.read_frame(&mut frame));
    }
}
