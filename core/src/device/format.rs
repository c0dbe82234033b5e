//! Sample encodings and access patterns

use serde::{Deserialize, Serialize};

/// Sample encoding, fixed once per stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// 8-bit unsigned, silence at 0x80
    #[default]
    U8,
    /// 16-bit signed little-endian
    S16Le,
    /// 32-bit float little-endian, nominal range -1.0..=1.0
    F32Le,
}

impl SampleFormat {
    /// Bytes per single-channel sample
    pub const fn width(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
            SampleFormat::F32Le => 4,
        }
    }

    /// Bytes per interleaved frame
    pub const fn frame_bytes(self, channels: u32) -> usize {
        self.width() * channels as usize
    }

    /// Encode a normalized sample (-1.0..=1.0) into `out`, which must be
    /// exactly [`width`](Self::width) bytes long.
    pub fn encode(self, sample: f32, out: &mut [u8]) {
        let sample = sample.clamp(-1.0, 1.0);
        match self {
            SampleFormat::U8 => out[0] = ((sample + 1.0) * 127.5) as u8,
            SampleFormat::S16Le => {
                out.copy_from_slice(&((sample * 32767.0) as i16).to_le_bytes());
            }
            SampleFormat::F32Le => out.copy_from_slice(&sample.to_le_bytes()),
        }
    }

    /// Decode one sample back to the normalized range
    pub fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::U8 => bytes[0] as f32 / 127.5 - 1.0,
            SampleFormat::S16Le => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32767.0,
            SampleFormat::F32Le => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Fill `buf` with the encoding's silence
    pub fn fill_silence(self, buf: &mut [u8]) {
        match self {
            SampleFormat::U8 => buf.fill(0x80),
            SampleFormat::S16Le | SampleFormat::F32Le => buf.fill(0),
        }
    }

    /// Bits per sample, as written to WAV headers
    pub const fn bits(self) -> u16 {
        (self.width() * 8) as u16
    }
}

/// How samples of different channels are laid out in a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    /// Frames of consecutive channel samples (L R L R ...)
    #[default]
    Interleaved,
    /// One plane per channel
    NonInterleaved,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_encoding_centers_on_0x80() {
        let mut b = [0u8];
        SampleFormat::U8.encode(0.0, &mut b);
        assert_eq!(b[0], 127);
        SampleFormat::U8.encode(1.0, &mut b);
        assert_eq!(b[0], 255);
        SampleFormat::U8.encode(-1.0, &mut b);
        assert_eq!(b[0], 0);
    }

    #[test]
    fn test_s16_encoding_is_little_endian() {
        let mut b = [0u8; 2];
        SampleFormat::S16Le.encode(1.0, &mut b);
        assert_eq!(i16::from_le_bytes(b), 32767);
        assert!((SampleFormat::S16Le.decode(&b) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(SampleFormat::U8.frame_bytes(2), 2);
        assert_eq!(SampleFormat::S16Le.frame_bytes(2), 4);
        assert_eq!(SampleFormat::F32Le.frame_bytes(1), 4);
    }

    #[test]
    fn test_silence() {
        let mut buf = [1u8; 4];
        SampleFormat::U8.fill_silence(&mut buf);
        assert_eq!(buf, [0x80; 4]);
        SampleFormat::F32Le.fill_silence(&mut buf);
        assert_eq!(SampleFormat::F32Le.decode(&buf), 0.0);
    }
}
