//! Shadow buffers standing in for legacy mapped device memory.
//!
//! The application reads and writes a private buffer laid out like the legacy
//! ring. On every status query (and when a mapped stream is started) the
//! buffer is synchronized with the engine through its begin/commit protocol:
//! playback keeps a fixed lead of fresh frames queued ahead of the hardware
//! pointer, capture pulls whatever the hardware has recorded.

use bitflags::bitflags;
use pcm_engine::{
    area, copy_areas, ChannelArea, EngineResult, Frames, HwConfig, PcmBackend, SFrames,
    SampleFormat,
};
use serde::Serialize;
use tracing::trace;

use crate::error::{DspError, DspResult};
use crate::geometry::{pow2_floor, LegacyGeometry, PositionModel};

bitflags! {
    /// `mmap(2)` protection bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: i32 {
        const READ = libc::PROT_READ;
        const WRITE = libc::PROT_WRITE;
    }
}

/// Identifies one live mapping, the way a legacy caller identifies it by
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MapId(pub usize);

/// Engine geometry a mapping pins, in bytes of the format it was mapped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShadowPin {
    pub period_bytes: usize,
    pub buffer_bytes: usize,
}

pub struct ShadowBuffer {
    bytes: Vec<u8>,
    areas: Vec<ChannelArea>,
    format: SampleFormat,
    pin: ShadowPin,
}

impl std::fmt::Debug for ShadowBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowBuffer")
            .field("len", &self.bytes.len())
            .field("format", &self.format)
            .field("pin", &self.pin)
            .finish()
    }
}

impl ShadowBuffer {
    /// Allocate `len` bytes of silence and pin the current legacy geometry.
    /// A mapping shorter than the legacy ring shrinks the pinned ring to the
    /// largest power of two that fits.
    pub(crate) fn new(len: usize, legacy: &LegacyGeometry, hw: &HwConfig) -> DspResult<Self> {
        if len == 0 {
            return Err(DspError::invalid("zero-length mapping"));
        }
        let frame_bytes = hw.frame_bytes();
        let fit = (len / frame_bytes) as Frames;
        if fit == 0 {
            return Err(DspError::invalid(format!(
                "mapping of {len} bytes is smaller than one frame"
            )));
        }
        let (period, buffer) = if fit < legacy.buffer_size {
            let buffer = pow2_floor(fit);
            (legacy.period_size.min(buffer / 2).max(1), buffer)
        } else {
            (legacy.period_size, legacy.buffer_size)
        };
        let mut bytes = vec![0; len];
        hw.format.fill_silence(&mut bytes);
        Ok(Self {
            bytes,
            areas: area::interleaved(hw.channels, hw.format),
            format: hw.format,
            pin: ShadowPin {
                period_bytes: period as usize * frame_bytes,
                buffer_bytes: buffer as usize * frame_bytes,
            },
        })
    }

    pub fn id(&self) -> MapId {
        MapId(self.bytes.as_ptr() as usize)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn pin(&self) -> ShadowPin {
        self.pin
    }

    /// Recompute channel addressing after a renegotiation.
    pub(crate) fn relayout(&mut self, hw: &HwConfig) {
        self.areas = area::interleaved(hw.channels, hw.format);
        self.format = hw.format;
    }

    /// Queue a full engine buffer taken from the start of the shadow ring.
    pub(crate) fn prime(
        &self,
        engine: &mut dyn PcmBackend,
        position: &mut PositionModel,
    ) -> EngineResult<Frames> {
        self.push(engine, position, position.engine.buffer_size)
    }

    /// Refresh the playback lead. A negative `delay` means the hardware ran
    /// past what was queued: the lead grows by the deficit (up to `cap`) and
    /// the engine skips the lost frames.
    pub(crate) fn sync_playback(
        &self,
        engine: &mut dyn PcmBackend,
        position: &mut PositionModel,
        lead: &mut Frames,
        delay: SFrames,
        cap: Frames,
    ) -> EngineResult<()> {
        if delay < 0 {
            let deficit = delay.unsigned_abs();
            *lead = (*lead + deficit).min(cap);
            let skipped = engine.forward(deficit)?;
            position.advance_appl(skipped);
            trace!(deficit, lead = *lead, "mapped playback ran dry");
        }
        let rewound = engine.rewind(position.engine.buffer_size)?;
        position.rewind_appl(rewound);
        self.push(engine, position, *lead)?;
        Ok(())
    }

    /// Pull recorded frames into the shadow ring, dropping anything older than
    /// one buffer.
    pub(crate) fn sync_capture(
        &mut self,
        engine: &mut dyn PcmBackend,
        position: &mut PositionModel,
        delay: SFrames,
    ) -> EngineResult<()> {
        let buffer = position.engine.buffer_size;
        let mut pending = delay.max(0) as Frames;
        if pending > buffer {
            let skipped = engine.forward(pending - buffer)?;
            position.advance_appl(skipped);
            pending = buffer;
        }
        let ring = position.legacy.buffer_size.max(1);
        while pending > 0 {
            let dst = position.appl_offset();
            let grant = engine.mmap_begin(pending)?;
            let frames = grant.frames.min(ring - dst);
            if frames == 0 {
                break;
            }
            copy_areas(
                &mut self.bytes,
                &self.areas,
                dst,
                grant.buffer,
                grant.areas,
                grant.offset,
                frames,
                self.format,
            )?;
            let offset = grant.offset;
            let committed = engine.mmap_commit(offset, frames)?;
            position.advance_appl(committed);
            pending -= committed.min(pending);
            trace!(offset, committed, "mapped capture pulled");
        }
        Ok(())
    }

    fn push(
        &self,
        engine: &mut dyn PcmBackend,
        position: &mut PositionModel,
        mut frames: Frames,
    ) -> EngineResult<Frames> {
        let ring = position.legacy.buffer_size.max(1);
        let mut pushed = 0;
        while frames > 0 {
            let src = position.appl_offset();
            let grant = engine.mmap_begin(frames)?;
            let count = grant.frames.min(ring - src);
            if count == 0 {
                break;
            }
            copy_areas(
                grant.buffer,
                grant.areas,
                grant.offset,
                &self.bytes,
                &self.areas,
                src,
                count,
                self.format,
            )?;
            let offset = grant.offset;
            let committed = engine.mmap_commit(offset, count)?;
            position.advance_appl(committed);
            pushed += committed;
            frames -= committed.min(frames);
            trace!(offset, committed, "mapped playback pushed");
        }
        Ok(pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcm_engine::{Access, SampleFormat};

    fn hw(period: Frames, buffer: Frames) -> HwConfig {
        HwConfig {
            format: SampleFormat::S16Le,
            channels: 2,
            rate: 48_000,
            access: Access::RwInterleaved,
            period_size: period,
            buffer_size: buffer,
        }
    }

    #[test]
    fn pin_follows_legacy_geometry() {
        let config = hw(441, 1764);
        let legacy = LegacyGeometry::derive(441, 1764, 4, 0x7fff_ffff, 0);
        let shadow = ShadowBuffer::new(2048 * 4, &legacy, &config).unwrap();
        assert_eq!(
            shadow.pin(),
            ShadowPin {
                period_bytes: 512 * 4,
                buffer_bytes: 2048 * 4,
            }
        );
        assert!(shadow.as_slice().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn short_mapping_shrinks_the_ring() {
        let config = hw(1024, 4096);
        let legacy = LegacyGeometry::derive(1024, 4096, 4, 0x7fff_ffff, 0);
        let shadow = ShadowBuffer::new(3000 * 4, &legacy, &config).unwrap();
        assert_eq!(shadow.pin().buffer_bytes, 2048 * 4);
        assert_eq!(shadow.pin().period_bytes, 1024 * 4);
        assert_eq!(shadow.len(), 3000 * 4);
    }

    #[test]
    fn degenerate_mappings_are_rejected() {
        let config = hw(1024, 4096);
        let legacy = LegacyGeometry::derive(1024, 4096, 4, 0x7fff_ffff, 0);
        assert!(matches!(
            ShadowBuffer::new(0, &legacy, &config),
            Err(DspError::Invalid(_))
        ));
        assert!(matches!(
            ShadowBuffer::new(3, &legacy, &config),
            Err(DspError::Invalid(_))
        ));
    }

    #[test]
    fn protection_ignores_unknown_bits() {
        let prot = Protection::from_bits_truncate(libc::PROT_READ | libc::PROT_EXEC);
        assert_eq!(prot, Protection::READ);
    }
}
