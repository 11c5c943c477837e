//! Legacy `AFMT_*` sample format codes.

use pcm_engine::SampleFormat;

pub const AFMT_QUERY: i32 = 0x0000_0000;
pub const AFMT_MU_LAW: i32 = 0x0000_0001;
pub const AFMT_A_LAW: i32 = 0x0000_0002;
pub const AFMT_IMA_ADPCM: i32 = 0x0000_0004;
pub const AFMT_U8: i32 = 0x0000_0008;
pub const AFMT_S16_LE: i32 = 0x0000_0010;
pub const AFMT_S16_BE: i32 = 0x0000_0020;
pub const AFMT_S8: i32 = 0x0000_0040;
pub const AFMT_U16_LE: i32 = 0x0000_0080;
pub const AFMT_U16_BE: i32 = 0x0000_0100;
pub const AFMT_MPEG: i32 = 0x0000_0200;

/// Formats reported by `SNDCTL_DSP_GETFMTS`.
pub const SUPPORTED_FORMATS: i32 = AFMT_MU_LAW
    | AFMT_A_LAW
    | AFMT_IMA_ADPCM
    | AFMT_U8
    | AFMT_S16_LE
    | AFMT_S16_BE
    | AFMT_S8
    | AFMT_U16_LE
    | AFMT_U16_BE;

/// Engine format for a legacy code. Unknown codes fall back to unsigned 8 bit.
pub fn to_sample_format(afmt: i32) -> SampleFormat {
    match afmt {
        AFMT_MU_LAW => SampleFormat::MuLaw,
        AFMT_A_LAW => SampleFormat::ALaw,
        AFMT_IMA_ADPCM => SampleFormat::ImaAdpcm,
        AFMT_U8 => SampleFormat::U8,
        AFMT_S16_LE => SampleFormat::S16Le,
        AFMT_S16_BE => SampleFormat::S16Be,
        AFMT_S8 => SampleFormat::S8,
        AFMT_U16_LE => SampleFormat::U16Le,
        AFMT_U16_BE => SampleFormat::U16Be,
        AFMT_MPEG => SampleFormat::Mpeg,
        _ => SampleFormat::U8,
    }
}

pub fn to_afmt(format: SampleFormat) -> i32 {
    match format {
        SampleFormat::MuLaw => AFMT_MU_LAW,
        SampleFormat::ALaw => AFMT_A_LAW,
        SampleFormat::ImaAdpcm => AFMT_IMA_ADPCM,
        SampleFormat::U8 => AFMT_U8,
        SampleFormat::S16Le => AFMT_S16_LE,
        SampleFormat::S16Be => AFMT_S16_BE,
        SampleFormat::S8 => AFMT_S8,
        SampleFormat::U16Le => AFMT_U16_LE,
        SampleFormat::U16Be => AFMT_U16_BE,
        SampleFormat::Mpeg => AFMT_MPEG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_engine_format_has_a_legacy_code() {
        for format in SampleFormat::ALL {
            assert_eq!(to_sample_format(to_afmt(format)), format);
        }
    }

    #[test]
    fn unknown_code_falls_back_to_u8() {
        assert_eq!(to_sample_format(0x4000), SampleFormat::U8);
        assert_eq!(to_sample_format(AFMT_S16_LE | AFMT_U8), SampleFormat::U8);
    }

    #[test]
    fn mpeg_is_not_advertised() {
        assert_eq!(SUPPORTED_FORMATS & AFMT_MPEG, 0);
        assert_eq!(SUPPORTED_FORMATS.count_ones(), 9);
    }
}
