use serde::{Deserialize, Serialize};

/// Sample formats understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    MuLaw,
    ALaw,
    ImaAdpcm,
    U8,
    S16Le,
    S16Be,
    S8,
    U16Le,
    U16Be,
    Mpeg,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 10] = [
        SampleFormat::MuLaw,
        SampleFormat::ALaw,
        SampleFormat::ImaAdpcm,
        SampleFormat::U8,
        SampleFormat::S16Le,
        SampleFormat::S16Be,
        SampleFormat::S8,
        SampleFormat::U16Le,
        SampleFormat::U16Be,
        SampleFormat::Mpeg,
    ];

    /// Significant bits per sample.
    pub const fn width(self) -> u32 {
        match self {
            SampleFormat::ImaAdpcm => 4,
            SampleFormat::S16Le
            | SampleFormat::S16Be
            | SampleFormat::U16Le
            | SampleFormat::U16Be => 16,
            _ => 8,
        }
    }

    /// Bits a sample occupies in memory.
    pub const fn physical_width(self) -> u32 {
        self.width()
    }

    /// Bytes per frame of `channels` samples, never less than one.
    pub fn frame_bytes(self, channels: u32) -> usize {
        let bits = self.physical_width() as usize * channels as usize;
        bits.div_ceil(8).max(1)
    }

    pub const fn name(self) -> &'static str {
        match self {
            SampleFormat::MuLaw => "MU_LAW",
            SampleFormat::ALaw => "A_LAW",
            SampleFormat::ImaAdpcm => "IMA_ADPCM",
            SampleFormat::U8 => "U8",
            SampleFormat::S16Le => "S16_LE",
            SampleFormat::S16Be => "S16_BE",
            SampleFormat::S8 => "S8",
            SampleFormat::U16Le => "U16_LE",
            SampleFormat::U16Be => "U16_BE",
            SampleFormat::Mpeg => "MPEG",
        }
    }

    /// Fill `buf` with the format's silence pattern.
    pub fn fill_silence(self, buf: &mut [u8]) {
        match self {
            SampleFormat::U16Le => fill_pattern(buf, &[0x00, 0x80]),
            SampleFormat::U16Be => fill_pattern(buf, &[0x80, 0x00]),
            SampleFormat::U8 => buf.fill(0x80),
            SampleFormat::MuLaw => buf.fill(0x7f),
            SampleFormat::ALaw => buf.fill(0x55),
            _ => buf.fill(0),
        }
    }
}

fn fill_pattern(buf: &mut [u8], pattern: &[u8]) {
    for (byte, value) in buf.iter_mut().zip(pattern.iter().cycle()) {
        *byte = *value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_rounds_sub_byte_formats_up() {
        assert_eq!(SampleFormat::U8.frame_bytes(1), 1);
        assert_eq!(SampleFormat::S16Le.frame_bytes(2), 4);
        assert_eq!(SampleFormat::ImaAdpcm.frame_bytes(1), 1);
        assert_eq!(SampleFormat::ImaAdpcm.frame_bytes(3), 2);
    }

    #[test]
    fn unsigned_16_bit_silence_is_midpoint() {
        let mut buf = [0u8; 4];
        SampleFormat::U16Le.fill_silence(&mut buf);
        assert_eq!(buf, [0x00, 0x80, 0x00, 0x80]);
        SampleFormat::U16Be.fill_silence(&mut buf);
        assert_eq!(buf, [0x80, 0x00, 0x80, 0x00]);
    }
}
