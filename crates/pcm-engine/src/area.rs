//! Channel-area addressing and copies between mapped buffers.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::format::SampleFormat;
use crate::Frames;

/// Location of one channel inside a buffer, in bits: sample `n` of the channel
/// starts at `first + n * step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelArea {
    pub first: usize,
    pub step: usize,
}

/// Areas for an interleaved buffer of `channels` samples per frame.
pub fn interleaved(channels: u32, format: SampleFormat) -> Vec<ChannelArea> {
    let bits = format.physical_width() as usize;
    let step = bits * channels as usize;
    (0..channels as usize)
        .map(|channel| ChannelArea {
            first: bits * channel,
            step,
        })
        .collect()
}

fn is_interleaved(areas: &[ChannelArea], bits: usize) -> bool {
    let step = bits * areas.len();
    areas
        .iter()
        .enumerate()
        .all(|(channel, area)| area.first == bits * channel && area.step == step)
}

/// Copy `frames` frames from `src` (starting at frame `src_offset`) into `dst`
/// (starting at frame `dst_offset`).
#[allow(clippy::too_many_arguments)]
pub fn copy_areas(
    dst: &mut [u8],
    dst_areas: &[ChannelArea],
    dst_offset: Frames,
    src: &[u8],
    src_areas: &[ChannelArea],
    src_offset: Frames,
    frames: Frames,
    format: SampleFormat,
) -> EngineResult<()> {
    if dst_areas.len() != src_areas.len() {
        return Err(EngineError::invalid(format!(
            "channel count mismatch: {} vs {}",
            dst_areas.len(),
            src_areas.len()
        )));
    }
    if frames == 0 || dst_areas.is_empty() {
        return Ok(());
    }
    let bits = format.physical_width() as usize;
    let frames = frames as usize;
    let dst_offset = dst_offset as usize;
    let src_offset = src_offset as usize;

    if bits % 8 == 0 && dst_areas == src_areas && is_interleaved(dst_areas, bits) {
        let frame_bytes = dst_areas[0].step / 8;
        let len = frames * frame_bytes;
        let from = src_offset * frame_bytes;
        let to = dst_offset * frame_bytes;
        let source = src
            .get(from..from + len)
            .ok_or_else(|| EngineError::invalid("source area out of range"))?;
        let target = dst
            .get_mut(to..to + len)
            .ok_or_else(|| EngineError::invalid("destination area out of range"))?;
        target.copy_from_slice(source);
        return Ok(());
    }

    for (dst_area, src_area) in dst_areas.iter().zip(src_areas) {
        for frame in 0..frames {
            let src_bit = src_area.first + (src_offset + frame) * src_area.step;
            let dst_bit = dst_area.first + (dst_offset + frame) * dst_area.step;
            if bits % 8 == 0 {
                let len = bits / 8;
                let (from, to) = (src_bit / 8, dst_bit / 8);
                let source = src
                    .get(from..from + len)
                    .ok_or_else(|| EngineError::invalid("source area out of range"))?;
                dst.get_mut(to..to + len)
                    .ok_or_else(|| EngineError::invalid("destination area out of range"))?
                    .copy_from_slice(source);
            } else {
                let value = read_nibble(src, src_bit)?;
                write_nibble(dst, dst_bit, value)?;
            }
        }
    }
    Ok(())
}

// A nibble starting on a byte boundary is the high half of that byte.
fn read_nibble(buf: &[u8], bit: usize) -> EngineResult<u8> {
    let byte = *buf
        .get(bit / 8)
        .ok_or_else(|| EngineError::invalid("source area out of range"))?;
    Ok(if bit % 8 == 0 { byte >> 4 } else { byte & 0x0f })
}

fn write_nibble(buf: &mut [u8], bit: usize, value: u8) -> EngineResult<()> {
    let byte = buf
        .get_mut(bit / 8)
        .ok_or_else(|| EngineError::invalid("destination area out of range"))?;
    if bit % 8 == 0 {
        *byte = (*byte & 0x0f) | (value << 4);
    } else {
        *byte = (*byte & 0xf0) | (value & 0x0f);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_copy_moves_whole_frames() {
        let areas = interleaved(2, SampleFormat::S16Le);
        let src: Vec<u8> = (0..16).collect();
        let mut dst = vec![0u8; 16];
        copy_areas(&mut dst, &areas, 1, &src, &areas, 2, 2, SampleFormat::S16Le).unwrap();
        assert_eq!(&dst[4..12], &src[8..16]);
        assert!(dst[..4].iter().all(|b| *b == 0));
    }

    #[test]
    fn planar_to_interleaved_copy() {
        let planar = [
            ChannelArea { first: 0, step: 8 },
            ChannelArea { first: 32, step: 8 },
        ];
        let src = [1, 2, 3, 4, 11, 12, 13, 14];
        let mut dst = [0u8; 8];
        let areas = interleaved(2, SampleFormat::U8);
        copy_areas(&mut dst, &areas, 0, &src, &planar, 0, 4, SampleFormat::U8).unwrap();
        assert_eq!(dst, [1, 11, 2, 12, 3, 13, 4, 14]);
    }

    #[test]
    fn nibble_copy_keeps_neighbouring_sample() {
        let areas = interleaved(2, SampleFormat::ImaAdpcm);
        let src = [0xab];
        let mut dst = [0x00];
        let left = &areas[..1];
        copy_areas(&mut dst, left, 0, &src, left, 0, 1, SampleFormat::ImaAdpcm).unwrap();
        assert_eq!(dst, [0xa0]);
    }

    #[test]
    fn out_of_range_copy_is_rejected() {
        let areas = interleaved(1, SampleFormat::U8);
        let src = [0u8; 4];
        let mut dst = [0u8; 4];
        assert!(copy_areas(&mut dst, &areas, 3, &src, &areas, 0, 2, SampleFormat::U8).is_err());
    }
}
