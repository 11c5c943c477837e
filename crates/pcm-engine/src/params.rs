//! Hardware/software parameter spaces.
//!
//! [`HwParams`] starts as the full capability space of a device and is narrowed
//! by the `set_*` calls. A refinement that would leave no valid configuration is
//! rejected and leaves the space untouched, so callers can probe candidates
//! (e.g. halving a buffer size) without having to snapshot the space first.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::format::SampleFormat;
use crate::Frames;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    RwInterleaved,
    MmapInterleaved,
    MmapNoninterleaved,
    MmapComplex,
}

impl Access {
    pub const fn is_mmap(self) -> bool {
        !matches!(self, Access::RwInterleaved)
    }
}

/// Closed integer interval. `min > max` denotes the empty interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub min: u64,
    pub max: u64,
}

impl Interval {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub const fn exact(value: u64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub const fn contains(&self, value: u64) -> bool {
        self.min <= value && value <= self.max
    }

    pub const fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn intersect(self, other: Interval) -> Interval {
        Interval::new(self.min.max(other.min), self.max.min(other.max))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RateSupport {
    List { rates: Vec<u32> },
    Range { min: u32, max: u32 },
}

impl RateSupport {
    /// Supported rate closest to `rate`; ties resolve to the lower rate.
    pub fn nearest(&self, rate: u32) -> Option<u32> {
        match self {
            RateSupport::List { rates } => rates
                .iter()
                .copied()
                .min_by_key(|candidate| (candidate.abs_diff(rate), *candidate)),
            RateSupport::Range { min, max } if min <= max => Some(rate.clamp(*min, *max)),
            RateSupport::Range { .. } => None,
        }
    }

    fn lowest(&self) -> Option<u32> {
        match self {
            RateSupport::List { rates } => rates.iter().copied().min(),
            RateSupport::Range { min, max } if min <= max => Some(*min),
            RateSupport::Range { .. } => None,
        }
    }
}

/// What a device is able to do, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwCapabilities {
    pub formats: Vec<SampleFormat>,
    pub channels: Interval,
    pub rates: RateSupport,
    pub access: Vec<Access>,
    pub period_size: Interval,
    pub buffer_size: Interval,
    pub periods: Interval,
    /// Period and buffer sizes must be multiples of this many frames.
    pub granularity: Frames,
}

impl Default for HwCapabilities {
    fn default() -> Self {
        Self {
            formats: vec![
                SampleFormat::MuLaw,
                SampleFormat::ALaw,
                SampleFormat::U8,
                SampleFormat::S8,
                SampleFormat::S16Le,
                SampleFormat::S16Be,
                SampleFormat::U16Le,
                SampleFormat::U16Be,
            ],
            channels: Interval::new(1, 8),
            rates: RateSupport::List {
                rates: vec![
                    8_000, 11_025, 16_000, 22_050, 32_000, 44_100, 48_000, 88_200, 96_000,
                ],
            },
            access: vec![Access::RwInterleaved, Access::MmapInterleaved],
            period_size: Interval::new(32, 16_384),
            buffer_size: Interval::new(64, 65_536),
            periods: Interval::new(2, 1_024),
            granularity: 1,
        }
    }
}

/// Committed hardware configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwConfig {
    pub format: SampleFormat,
    pub channels: u32,
    pub rate: u32,
    pub access: Access,
    pub period_size: Frames,
    pub buffer_size: Frames,
}

impl HwConfig {
    pub fn frame_bytes(&self) -> usize {
        self.format.frame_bytes(self.channels)
    }

    pub fn periods(&self) -> Frames {
        self.buffer_size / self.period_size.max(1)
    }
}

/// Software parameters. A `stop_threshold` at or above the boundary disables
/// automatic stop on xrun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwParams {
    pub start_threshold: Frames,
    pub stop_threshold: Frames,
    pub avail_min: Frames,
}

impl SwParams {
    pub const NEVER: Frames = Frames::MAX;

    pub fn for_config(config: &HwConfig) -> Self {
        Self {
            start_threshold: 1,
            stop_threshold: config.buffer_size,
            avail_min: config.period_size,
        }
    }
}

/// A narrowing hardware parameter space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwParams {
    formats: Vec<SampleFormat>,
    channels: Interval,
    rates: RateSupport,
    rate: Option<u32>,
    access: Vec<Access>,
    period_size: Interval,
    buffer_size: Interval,
    periods: Interval,
    granularity: Frames,
}

impl HwParams {
    pub fn any(caps: &HwCapabilities) -> Self {
        Self {
            formats: caps.formats.clone(),
            channels: caps.channels,
            rates: caps.rates.clone(),
            rate: None,
            access: caps.access.clone(),
            period_size: caps.period_size,
            buffer_size: caps.buffer_size,
            periods: Interval::new(caps.periods.min.max(1), caps.periods.max),
            granularity: caps.granularity.max(1),
        }
    }

    pub fn set_format(&mut self, format: SampleFormat) -> EngineResult<()> {
        if !self.formats.contains(&format) {
            return Err(EngineError::invalid(format!(
                "format {} not supported",
                format.name()
            )));
        }
        self.formats = vec![format];
        Ok(())
    }

    pub fn set_channels(&mut self, channels: u32) -> EngineResult<()> {
        if !self.channels.contains(channels as u64) {
            return Err(EngineError::invalid(format!(
                "{channels} channels not supported"
            )));
        }
        self.channels = Interval::exact(channels as u64);
        Ok(())
    }

    /// Narrow the rate to the supported value nearest `rate` and return it.
    pub fn set_rate_near(&mut self, rate: u32) -> EngineResult<u32> {
        let chosen = self
            .rates
            .nearest(rate)
            .ok_or_else(|| EngineError::invalid("no sample rate available"))?;
        self.rate = Some(chosen);
        Ok(chosen)
    }

    pub fn set_access(&mut self, access: Access) -> EngineResult<()> {
        if !self.access.contains(&access) {
            return Err(EngineError::invalid(format!("access {access:?} not supported")));
        }
        self.access = vec![access];
        Ok(())
    }

    pub fn set_access_mask(&mut self, mask: &[Access]) -> EngineResult<()> {
        let allowed: Vec<Access> = self
            .access
            .iter()
            .copied()
            .filter(|access| mask.contains(access))
            .collect();
        if allowed.is_empty() {
            return Err(EngineError::invalid("no access mode in mask is supported"));
        }
        self.access = allowed;
        Ok(())
    }

    pub fn set_periods_min(&mut self, periods: u64) -> EngineResult<()> {
        self.refine("periods_min", |space| {
            space.periods.min = space.periods.min.max(periods)
        })
    }

    pub fn set_periods_max(&mut self, periods: u64) -> EngineResult<()> {
        self.refine("periods_max", |space| {
            space.periods.max = space.periods.max.min(periods)
        })
    }

    pub fn set_buffer_size(&mut self, frames: Frames) -> EngineResult<()> {
        if frames % self.granularity != 0 {
            return Err(EngineError::invalid(format!(
                "buffer size {frames} is not a multiple of {}",
                self.granularity
            )));
        }
        self.refine("buffer_size", |space| {
            space.buffer_size = space.buffer_size.intersect(Interval::exact(frames))
        })
    }

    pub fn set_period_size(&mut self, frames: Frames) -> EngineResult<()> {
        if frames % self.granularity != 0 {
            return Err(EngineError::invalid(format!(
                "period size {frames} is not a multiple of {}",
                self.granularity
            )));
        }
        self.refine("period_size", |space| {
            space.period_size = space.period_size.intersect(Interval::exact(frames))
        })
    }

    /// Narrow the period to the satisfiable size nearest `frames` and return it.
    pub fn set_period_size_near(&mut self, frames: Frames) -> EngineResult<Frames> {
        let window = self.period_window();
        if window.is_empty() {
            return Err(EngineError::invalid("no period size satisfiable"));
        }
        let target = frames.clamp(window.min, window.max);
        let down = align_down(target, self.granularity).max(window.min);
        let up = align_up(target, self.granularity).min(window.max);
        let mut candidates = [down, up];
        candidates.sort_by_key(|candidate| (candidate.abs_diff(frames), *candidate));
        for candidate in candidates {
            if self.set_period_size(candidate).is_ok() {
                return Ok(candidate);
            }
        }
        Err(EngineError::invalid(format!(
            "no period size near {frames} satisfiable"
        )))
    }

    pub fn period_size(&self) -> Interval {
        self.period_size
    }

    pub fn buffer_size(&self) -> Interval {
        self.buffer_size
    }

    pub fn periods(&self) -> Interval {
        self.periods
    }

    /// Pick a single configuration out of the space: smallest satisfiable
    /// period, then the largest buffer that period allows.
    pub fn choose(&self) -> EngineResult<HwConfig> {
        let format = *self
            .formats
            .first()
            .ok_or_else(|| EngineError::invalid("no sample format available"))?;
        let access = *self
            .access
            .first()
            .ok_or_else(|| EngineError::invalid("no access mode available"))?;
        if self.channels.is_empty() {
            return Err(EngineError::invalid("no channel count available"));
        }
        let rate = match self.rate {
            Some(rate) => rate,
            None => self
                .rates
                .lowest()
                .ok_or_else(|| EngineError::invalid("no sample rate available"))?,
        };
        let window = self.period_window();
        let period_size = [window.min, window.max]
            .into_iter()
            .find(|period| !window.is_empty() && !self.buffer_window(*period).is_empty())
            .ok_or_else(|| EngineError::invalid("no period/buffer geometry satisfiable"))?;
        let buffer_size = self.buffer_window(period_size).max;
        Ok(HwConfig {
            format,
            channels: self.channels.min as u32,
            rate,
            access,
            period_size,
            buffer_size,
        })
    }

    fn refine(&mut self, what: &str, apply: impl FnOnce(&mut HwParams)) -> EngineResult<()> {
        let mut next = self.clone();
        apply(&mut next);
        if !next.is_satisfiable() {
            return Err(EngineError::invalid(format!("{what} not satisfiable")));
        }
        *self = next;
        Ok(())
    }

    fn is_satisfiable(&self) -> bool {
        if self.periods.is_empty() || self.period_size.is_empty() || self.buffer_size.is_empty() {
            return false;
        }
        let window = self.period_window();
        !window.is_empty()
            && [window.min, window.max]
                .into_iter()
                .any(|period| !self.buffer_window(period).is_empty())
    }

    /// Period sizes compatible with the buffer and period-count constraints.
    fn period_window(&self) -> Interval {
        let periods_max = self.periods.max.max(1);
        let periods_min = self.periods.min.max(1);
        let lo = self
            .period_size
            .min
            .max(self.buffer_size.min.div_ceil(periods_max));
        let hi = self.period_size.max.min(self.buffer_size.max / periods_min);
        Interval::new(align_up(lo.max(1), self.granularity), align_down(hi, self.granularity))
    }

    /// Buffer sizes compatible with a fixed `period`.
    fn buffer_window(&self, period: Frames) -> Interval {
        let lo = self
            .buffer_size
            .min
            .max(period.saturating_mul(self.periods.min));
        let hi = self
            .buffer_size
            .max
            .min(period.saturating_mul(self.periods.max));
        Interval::new(align_up(lo, self.granularity), align_down(hi, self.granularity))
    }
}

fn align_up(value: u64, step: u64) -> u64 {
    value.div_ceil(step).saturating_mul(step)
}

fn align_down(value: u64, step: u64) -> u64 {
    value / step * step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_refinement_leaves_space_untouched() {
        let mut space = HwParams::any(&HwCapabilities::default());
        let before = space.clone();
        assert!(space.set_buffer_size(1 << 20).is_err());
        assert_eq!(space, before);
    }

    #[test]
    fn period_count_bounds_constrain_period() {
        let mut space = HwParams::any(&HwCapabilities::default());
        space.set_buffer_size(4096).unwrap();
        space.set_periods_min(2).unwrap();
        assert!(space.set_period_size(4096).is_err());
        space.set_period_size(2048).unwrap();
        let config = space.choose().unwrap();
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.period_size, 2048);
    }

    #[test]
    fn nearest_rate_prefers_lower_on_tie() {
        let rates = RateSupport::List {
            rates: vec![8_000, 16_000],
        };
        assert_eq!(rates.nearest(12_000), Some(8_000));
        assert_eq!(rates.nearest(15_000), Some(16_000));
    }

    #[test]
    fn period_near_respects_granularity() {
        let caps = HwCapabilities {
            granularity: 48,
            ..HwCapabilities::default()
        };
        let mut space = HwParams::any(&caps);
        let period = space.set_period_size_near(2048).unwrap();
        assert_eq!(period % 48, 0);
        assert_eq!(period, 2064);
    }
}
