//! Dual ring-buffer bookkeeping.
//!
//! The engine negotiates arbitrary period and buffer sizes and wraps its
//! pointers at its own boundary. Legacy callers expect power-of-two sizes and a
//! byte counter that wraps at a multiple of the (power-of-two) buffer. The
//! [`PositionModel`] keeps both views and folds engine pointer movement into
//! the legacy counter.

use pcm_engine::Frames;
use serde::Serialize;

/// Smallest power of two that is `>= value` (1 for 0).
pub fn pow2_ceil(value: Frames) -> Frames {
    value.max(1).next_power_of_two()
}

/// Largest power of two that is `<= value` (0 for 0).
pub fn pow2_floor(value: Frames) -> Frames {
    if value == 0 {
        0
    } else {
        1 << (Frames::BITS - 1 - value.leading_zeros())
    }
}

/// Engine-side geometry, in engine frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineGeometry {
    pub period_size: Frames,
    pub buffer_size: Frames,
    pub boundary: Frames,
    /// Application pointer, modulo `boundary`.
    pub appl_ptr: Frames,
    /// Hardware pointer seen by the last refresh.
    pub old_hw_ptr: Frames,
}

/// Legacy-visible geometry, in frames of the negotiated format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LegacyGeometry {
    pub period_size: Frames,
    pub period_count: Frames,
    pub buffer_size: Frames,
    pub boundary: Frames,
    /// Monotonic hardware counter, modulo `boundary`.
    pub hw_frames: Frames,
}

impl LegacyGeometry {
    /// Round the engine sizes up to powers of two and pick the largest
    /// boundary whose byte size stays within `ceiling_bytes`.
    pub fn derive(
        engine_period: Frames,
        engine_buffer: Frames,
        frame_bytes: usize,
        ceiling_bytes: u64,
        hw_frames: Frames,
    ) -> Self {
        let buffer_size = pow2_ceil(engine_buffer);
        let period_size = pow2_ceil(engine_period).min(buffer_size);
        let ceiling_frames = ceiling_bytes / frame_bytes.max(1) as u64;
        let boundary = (ceiling_frames / buffer_size).max(1) * buffer_size;
        Self {
            period_size,
            period_count: buffer_size / period_size,
            buffer_size,
            boundary,
            hw_frames: hw_frames % boundary,
        }
    }
}

/// Result of folding one engine pointer reading into the legacy counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Advance {
    /// Engine frames elapsed since the previous reading.
    pub diff: Frames,
    /// Legacy period boundaries crossed.
    pub crossings: Frames,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PositionModel {
    pub engine: EngineGeometry,
    pub legacy: LegacyGeometry,
    /// Period crossings not yet reported through a pointer query.
    elapsed_periods: Frames,
}

impl PositionModel {
    pub fn new(engine: EngineGeometry, legacy: LegacyGeometry) -> Self {
        Self {
            engine,
            legacy,
            elapsed_periods: 0,
        }
    }

    pub fn advance(&mut self, hw_ptr: Frames) -> Advance {
        let engine_boundary = self.engine.boundary.max(1);
        let hw_ptr = hw_ptr % engine_boundary;
        let diff = (hw_ptr + engine_boundary - self.engine.old_hw_ptr % engine_boundary)
            % engine_boundary;
        self.engine.old_hw_ptr = hw_ptr;

        let period = self.legacy.period_size.max(1);
        let total = self.legacy.hw_frames + diff;
        let crossings = total / period - self.legacy.hw_frames / period;
        self.legacy.hw_frames = total % self.legacy.boundary.max(1);
        self.elapsed_periods += crossings;
        Advance { diff, crossings }
    }

    /// Hand out the period crossings accumulated since the last call.
    pub fn take_elapsed(&mut self) -> Frames {
        std::mem::take(&mut self.elapsed_periods)
    }

    /// Legacy ring offset of the hardware pointer, in frames.
    pub fn ring_offset(&self) -> Frames {
        self.legacy.hw_frames % self.legacy.buffer_size.max(1)
    }

    /// Legacy ring offset of the application pointer, in frames.
    pub fn appl_offset(&self) -> Frames {
        self.engine.appl_ptr % self.legacy.buffer_size.max(1)
    }

    /// The engine restarted its pointers from zero.
    pub fn rebase(&mut self) {
        self.engine.appl_ptr = 0;
        self.engine.old_hw_ptr = 0;
    }

    /// Forget everything, including the legacy counter.
    pub fn reset(&mut self) {
        self.rebase();
        self.legacy.hw_frames = 0;
        self.elapsed_periods = 0;
    }

    pub fn advance_appl(&mut self, frames: Frames) {
        let boundary = self.engine.boundary.max(1);
        self.engine.appl_ptr = (self.engine.appl_ptr + frames % boundary) % boundary;
    }

    pub fn rewind_appl(&mut self, frames: Frames) {
        let boundary = self.engine.boundary.max(1);
        self.engine.appl_ptr = (self.engine.appl_ptr + boundary - frames % boundary) % boundary;
    }
}
