//! Parameter negotiation between the legacy request and the engine.
//!
//! Legacy devices expose one parameter set shared by both directions, so the
//! session keeps a single [`DspParams`] and runs [`commit_hw`] for every
//! stream whenever it changes.

use pcm_engine::{
    Access, EngineResult, Frames, HwConfig, HwParams, PcmBackend, SampleFormat, SwParams,
};
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::device::DeviceClass;
use crate::format::to_afmt;
use crate::geometry::pow2_floor;
use crate::shadow::ShadowPin;

const BUFFER_FLOOR: Frames = 1024;
const PERIOD_FLOOR: Frames = 256;
const MIN_PERIODS: u64 = 2;
/// Fragment shifts above this are clamped.
pub(crate) const MAX_FRAGSHIFT: u32 = 31;
/// The buffer search starts this many target periods large.
const BUFFER_PERIODS: Frames = 16;
const MMAP_ACCESS: [Access; 3] = [
    Access::MmapInterleaved,
    Access::MmapNoninterleaved,
    Access::MmapComplex,
];

/// The parameter set a legacy caller sees, shared by both streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DspParams {
    pub channels: u32,
    /// Committed rate once negotiated, the requested one before.
    pub rate: u32,
    /// `AFMT_*` code reported back to the caller.
    pub legacy_format: i32,
    pub format: SampleFormat,
    /// log2 of the requested fragment size in bytes; 0 lets the rate decide.
    pub fragshift: u32,
    /// Maximum fragment count; 0 means unbounded.
    pub maxfrags: u32,
    pub subdivision: u32,
}

impl DspParams {
    pub fn initial(class: DeviceClass, config: &SessionConfig) -> Self {
        let format = class.default_format();
        Self {
            channels: config.channels,
            rate: config.rate,
            legacy_format: to_afmt(format),
            format,
            fragshift: 0,
            maxfrags: 0,
            subdivision: 1,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.format.frame_bytes(self.channels)
    }

    /// Target period in frames for the rw search.
    pub(crate) fn target_period(&self, rate: u32) -> Frames {
        if self.fragshift > 0 {
            let bytes = 1u64 << self.fragshift.min(MAX_FRAGSHIFT);
            (bytes / self.frame_bytes().max(1) as u64).max(1)
        } else {
            pow2_floor(u64::from(rate) / 4).max(1)
        }
    }
}

/// Commit hardware parameters for one stream.
pub(crate) fn commit_hw(
    engine: &mut dyn PcmBackend,
    params: &DspParams,
    pin: Option<ShadowPin>,
) -> EngineResult<HwConfig> {
    let mut hw = HwParams::any(&engine.capabilities());
    hw.set_format(params.format)?;
    hw.set_channels(params.channels)?;
    let rate = hw.set_rate_near(params.rate)?;
    let frame_bytes = params.frame_bytes().max(1);

    match pin {
        Some(pin) => {
            hw.set_access_mask(&MMAP_ACCESS)?;
            hw.set_period_size(pin.period_bytes as Frames / frame_bytes as Frames)?;
            hw.set_buffer_size(pin.buffer_bytes as Frames / frame_bytes as Frames)?;
            hw.set_access(Access::MmapInterleaved)?;
        }
        None => {
            hw.set_access(Access::RwInterleaved)?;
            hw.set_periods_min(MIN_PERIODS)?;
            if params.maxfrags > 0 {
                hw.set_periods_max(u64::from(params.maxfrags))?;
            }
            search_sizes(&mut hw, params.target_period(rate))?;
        }
    }

    let config = engine.commit_hw(&hw)?;
    debug!(
        name = engine.name(),
        direction = ?engine.direction(),
        rate = config.rate,
        channels = config.channels,
        format = config.format.name(),
        period = config.period_size,
        buffer = config.buffer_size,
        mapped = pin.is_some(),
        "hw params committed"
    );
    Ok(config)
}

fn search_sizes(hw: &mut HwParams, target: Frames) -> EngineResult<()> {
    let mut buffer = target.saturating_mul(BUFFER_PERIODS);
    while buffer >= BUFFER_FLOOR {
        if hw.set_buffer_size(buffer).is_ok() {
            break;
        }
        buffer /= 2;
    }

    let mut period = target;
    while period >= PERIOD_FLOOR {
        if hw.set_period_size(period).is_ok() {
            return Ok(());
        }
        period /= 2;
    }
    let chosen = hw.set_period_size_near(target)?;
    trace!(target, chosen, "period fell back to nearest size");
    Ok(())
}

/// Software parameters for a stream in the given transport mode.
pub(crate) fn sw_params(hw: &HwConfig, stopped: bool, mapped: bool) -> SwParams {
    SwParams {
        start_threshold: if stopped {
            hw.buffer_size + 1
        } else {
            hw.period_size
        },
        stop_threshold: if mapped {
            SwParams::NEVER
        } else {
            hw.buffer_size
        },
        avail_min: hw.period_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcm_engine::sim::{SimConfig, SimOpener};
    use pcm_engine::{Direction, HwCapabilities, Interval, PcmOpener};

    fn params(rate: u32, format: SampleFormat, channels: u32) -> DspParams {
        DspParams {
            channels,
            rate,
            legacy_format: to_afmt(format),
            format,
            fragshift: 0,
            maxfrags: 0,
            subdivision: 1,
        }
    }

    fn engine(caps: HwCapabilities) -> Box<dyn PcmBackend> {
        SimOpener::new(SimConfig::default().with_capabilities(caps))
            .open("dsp0", Direction::Playback, false)
            .unwrap()
    }

    #[test]
    fn quarter_second_target_without_fragment_shift() {
        let mut pcm = engine(HwCapabilities::default());
        let config = commit_hw(pcm.as_mut(), &params(8_000, SampleFormat::U8, 1), None).unwrap();
        assert_eq!(config.rate, 8_000);
        assert_eq!(config.period_size, 1024);
        assert_eq!(config.buffer_size, 16_384);
        assert_eq!(config.access, Access::RwInterleaved);
    }

    #[test]
    fn committed_rate_is_nearest_supported() {
        let mut pcm = engine(HwCapabilities::default());
        let config = commit_hw(pcm.as_mut(), &params(44_000, SampleFormat::S16Le, 2), None).unwrap();
        assert_eq!(config.rate, 44_100);
    }

    #[test]
    fn fragment_shift_sets_target_period() {
        let mut pcm = engine(HwCapabilities::default());
        let mut request = params(48_000, SampleFormat::S16Le, 2);
        request.fragshift = 12;
        let config = commit_hw(pcm.as_mut(), &request, None).unwrap();
        assert_eq!(config.period_size, 1024);
        assert_eq!(config.buffer_size, 16_384);
    }

    #[test]
    fn oversized_fragment_shift_is_clamped() {
        let mut request = params(8_000, SampleFormat::S16Le, 2);
        request.fragshift = 64;
        assert_eq!(request.target_period(8_000), 1 << 29);
        let mut pcm = engine(HwCapabilities::default());
        let config = commit_hw(pcm.as_mut(), &request, None).unwrap();
        assert_eq!(config.buffer_size, 65_536);
        assert_eq!(config.period_size, 16_384);
    }

    #[test]
    fn awkward_granularity_falls_back_to_nearest_period() {
        let caps = HwCapabilities {
            granularity: 147,
            period_size: Interval::new(147, 14_700),
            buffer_size: Interval::new(294, 58_800),
            ..HwCapabilities::default()
        };
        let mut pcm = engine(caps);
        let config = commit_hw(pcm.as_mut(), &params(44_100, SampleFormat::U8, 1), None).unwrap();
        assert_eq!(config.period_size % 147, 0);
        assert!(config.buffer_size >= config.period_size * 2);
    }

    #[test]
    fn fragment_count_cap_wins_over_period_target() {
        let mut pcm = engine(HwCapabilities::default());
        let mut request = params(8_000, SampleFormat::U8, 1);
        request.fragshift = 8;
        request.maxfrags = 4;
        let config = commit_hw(pcm.as_mut(), &request, None).unwrap();
        // 16 * 256 frames of buffer in at most 4 periods.
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.period_size, 1024);
        assert_eq!(config.periods(), 4);
    }

    #[test]
    fn pinned_geometry_uses_mapped_access() {
        let mut pcm = engine(HwCapabilities::default());
        let pin = ShadowPin {
            period_bytes: 512 * 4,
            buffer_bytes: 2048 * 4,
        };
        let config = commit_hw(
            pcm.as_mut(),
            &params(48_000, SampleFormat::S16Le, 2),
            Some(pin),
        )
        .unwrap();
        assert_eq!(config.access, Access::MmapInterleaved);
        assert_eq!(config.period_size, 512);
        assert_eq!(config.buffer_size, 2048);
    }

    #[test]
    fn thresholds_follow_transport_mode() {
        let hw = HwConfig {
            format: SampleFormat::U8,
            channels: 1,
            rate: 8_000,
            access: Access::RwInterleaved,
            period_size: 256,
            buffer_size: 1024,
        };
        let armed = sw_params(&hw, false, false);
        assert_eq!(armed.start_threshold, 256);
        assert_eq!(armed.stop_threshold, 1024);
        let stopped = sw_params(&hw, true, true);
        assert_eq!(stopped.start_threshold, 1025);
        assert_eq!(stopped.stop_threshold, SwParams::NEVER);
    }
}
