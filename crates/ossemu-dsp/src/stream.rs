//! One direction of a session.

use pcm_engine::{Direction, Frames, HwConfig, PcmBackend, PcmState, SFrames, SwParams};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::error::{DspError, DspResult};
use crate::geometry::{EngineGeometry, LegacyGeometry, PositionModel};
use crate::negotiate::{self, DspParams};
use crate::recovery::{retry_once, Recovered, RecoveryPolicy};
use crate::shadow::ShadowBuffer;

/// `audio_buf_info`: space available for a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[repr(C)]
pub struct BufferInfo {
    pub fragments: i32,
    pub fragstotal: i32,
    pub fragsize: i32,
    pub bytes: i32,
}

impl BufferInfo {
    pub fn to_ne_bytes(&self) -> [u8; 16] {
        let mut out = [0; 16];
        for (chunk, value) in out
            .chunks_exact_mut(4)
            .zip([self.fragments, self.fragstotal, self.fragsize, self.bytes])
        {
            chunk.copy_from_slice(&value.to_ne_bytes());
        }
        out
    }
}

/// `count_info`: transfer progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[repr(C)]
pub struct CountInfo {
    pub bytes: i32,
    pub blocks: i32,
    pub ptr: i32,
}

impl CountInfo {
    pub fn to_ne_bytes(&self) -> [u8; 12] {
        let mut out = [0; 12];
        for (chunk, value) in out
            .chunks_exact_mut(4)
            .zip([self.bytes, self.blocks, self.ptr])
        {
            chunk.copy_from_slice(&value.to_ne_bytes());
        }
        out
    }
}

fn to_c_int(value: impl TryInto<i32>) -> i32 {
    value.try_into().unwrap_or(i32::MAX)
}

pub struct Stream {
    direction: Direction,
    pub(crate) engine: Box<dyn PcmBackend>,
    hw: Option<HwConfig>,
    sw: Option<SwParams>,
    frame_bytes: usize,
    pub(crate) position: PositionModel,
    /// Explicit-start mode: nothing auto-starts until a trigger enables it.
    pub(crate) stopped: bool,
    pub(crate) shadow: Option<ShadowBuffer>,
    /// Frames kept queued ahead of the hardware pointer while mapped.
    mmap_advance: Frames,
    /// Bytes moved through read/write since open or the last reset.
    pub(crate) transferred: u64,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("direction", &self.direction)
            .field("engine", &self.engine.name())
            .field("hw", &self.hw)
            .field("position", &self.position)
            .field("stopped", &self.stopped)
            .field("shadow", &self.shadow)
            .finish()
    }
}

impl Stream {
    pub(crate) fn new(engine: Box<dyn PcmBackend>) -> Self {
        Self {
            direction: engine.direction(),
            engine,
            hw: None,
            sw: None,
            frame_bytes: 1,
            position: PositionModel::default(),
            stopped: false,
            shadow: None,
            mmap_advance: 0,
            transferred: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn hw_config(&self) -> Option<HwConfig> {
        self.hw
    }

    pub fn sw_params(&self) -> Option<SwParams> {
        self.sw
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn position(&self) -> &PositionModel {
        &self.position
    }

    pub fn legacy(&self) -> &LegacyGeometry {
        &self.position.legacy
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_mapped(&self) -> bool {
        self.shadow.is_some()
    }

    pub fn shadow(&self) -> Option<&ShadowBuffer> {
        self.shadow.as_ref()
    }

    pub fn mmap_advance(&self) -> Frames {
        self.mmap_advance
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Legacy bytes the hardware has consumed or produced, modulo the legacy
    /// boundary.
    pub fn hw_bytes(&self) -> u64 {
        self.position.legacy.hw_frames * self.frame_bytes as u64
    }

    /// Commit hardware parameters and rebuild both geometries. The legacy
    /// byte counter survives renegotiation.
    pub(crate) fn configure(&mut self, params: &DspParams, config: &SessionConfig) -> DspResult<HwConfig> {
        let pin = self.shadow.as_ref().map(ShadowBuffer::pin);
        let hw = negotiate::commit_hw(self.engine.as_mut(), params, pin).map_err(DspError::Config)?;
        self.frame_bytes = hw.frame_bytes();
        let legacy = LegacyGeometry::derive(
            hw.period_size,
            hw.buffer_size,
            self.frame_bytes,
            config.boundary_ceiling,
            self.position.legacy.hw_frames,
        );
        let engine = EngineGeometry {
            period_size: hw.period_size,
            buffer_size: hw.buffer_size,
            boundary: hw.buffer_size,
            appl_ptr: 0,
            old_hw_ptr: 0,
        };
        self.position = PositionModel::new(engine, legacy);
        self.mmap_advance = hw
            .period_size
            .min(config.mmap_advance_cap(hw.rate))
            .min(hw.buffer_size);
        if let Some(shadow) = self.shadow.as_mut() {
            shadow.relayout(&hw);
        }
        self.hw = Some(hw);
        Ok(hw)
    }

    /// Commit software parameters for the current transport mode.
    pub(crate) fn commit_sw(&mut self) -> DspResult<()> {
        let hw = self.require_hw()?;
        self.commit_sw_params(negotiate::sw_params(&hw, self.stopped, self.is_mapped()))
    }

    pub(crate) fn commit_sw_params(&mut self, sw: SwParams) -> DspResult<()> {
        let boundary = self.engine.commit_sw(&sw).map_err(DspError::Config)?;
        self.position.engine.boundary = boundary.max(1);
        self.sw = Some(sw);
        trace!(
            direction = ?self.direction,
            start = sw.start_threshold,
            stop = sw.stop_threshold,
            avail_min = sw.avail_min,
            boundary,
            "sw params committed"
        );
        Ok(())
    }

    pub(crate) fn require_hw(&self) -> DspResult<HwConfig> {
        self.hw
            .ok_or_else(|| DspError::bad_descriptor(format!("{:?} stream not configured", self.direction)))
    }

    /// Status query: read the engine delay (only while transferring), keep a
    /// mapped shadow in sync and fold hardware movement into the legacy
    /// counter.
    pub(crate) fn refresh(&mut self, policy: &RecoveryPolicy, advance_cap: Frames) -> DspResult<SFrames> {
        let delay = if self.engine.state().is_active() {
            let delay = retry_once(self.engine.as_mut(), policy, |engine| engine.delay())?;
            self.settle(&delay);
            delay.value
        } else {
            0
        };
        if let Some(shadow) = self.shadow.as_mut() {
            if self.engine.state().is_active() {
                let synced = match self.direction {
                    Direction::Playback => shadow.sync_playback(
                        self.engine.as_mut(),
                        &mut self.position,
                        &mut self.mmap_advance,
                        delay,
                        advance_cap,
                    ),
                    Direction::Capture => {
                        shadow.sync_capture(self.engine.as_mut(), &mut self.position, delay)
                    }
                };
                if let Err(err) = synced {
                    warn!(direction = ?self.direction, %err, "shadow sync failed");
                    return Err(err.into());
                }
            }
        }
        self.position.advance(self.engine.hw_ptr());
        Ok(delay)
    }

    pub(crate) fn space(&mut self, policy: &RecoveryPolicy, advance_cap: Frames) -> DspResult<BufferInfo> {
        self.refresh(policy, advance_cap)?;
        let buffer = self.position.legacy.buffer_size;
        let avail = match (self.direction, self.engine.avail_update()) {
            (Direction::Playback, Ok(avail)) if avail >= 0 && avail as Frames <= buffer => {
                avail as Frames
            }
            (Direction::Playback, _) => buffer,
            (Direction::Capture, Ok(avail)) => avail.clamp(0, buffer as SFrames) as Frames,
            (Direction::Capture, Err(err)) => {
                trace!(%err, "capture avail unavailable");
                0
            }
        };
        let period = self.position.legacy.period_size.max(1);
        let frame_bytes = self.frame_bytes as u64;
        Ok(BufferInfo {
            fragments: to_c_int(avail / period),
            fragstotal: to_c_int(self.position.legacy.period_count),
            fragsize: to_c_int(period * frame_bytes),
            bytes: to_c_int(avail * frame_bytes),
        })
    }

    pub(crate) fn pointer(&mut self, policy: &RecoveryPolicy, advance_cap: Frames) -> DspResult<CountInfo> {
        let delay = self.refresh(policy, advance_cap)?;
        let elapsed = self.position.take_elapsed();
        let blocks = if self.is_mapped() {
            elapsed
        } else {
            delay.max(0) as Frames / self.position.legacy.period_size.max(1)
        };
        let frame_bytes = self.frame_bytes as u64;
        Ok(CountInfo {
            bytes: to_c_int(self.position.legacy.hw_frames * frame_bytes),
            blocks: to_c_int(blocks),
            ptr: to_c_int(self.position.ring_offset() * frame_bytes),
        })
    }

    pub(crate) fn delay_bytes(&mut self, policy: &RecoveryPolicy, advance_cap: Frames) -> DspResult<i32> {
        let delay = self.refresh(policy, advance_cap)?;
        Ok(to_c_int(delay.max(0) as u64 * self.frame_bytes as u64))
    }

    pub(crate) fn write(&mut self, buf: &[u8], policy: &RecoveryPolicy) -> DspResult<usize> {
        let frames = (buf.len() / self.frame_bytes.max(1)) as Frames;
        if frames == 0 {
            return Ok(0);
        }
        let written = retry_once(self.engine.as_mut(), policy, |engine| engine.writei(buf, frames))?;
        self.settle(&written);
        self.position.advance_appl(written.value);
        let bytes = written.value as usize * self.frame_bytes;
        self.transferred += bytes as u64;
        trace!(direction = ?self.direction, frames = written.value, "write");
        Ok(bytes)
    }

    pub(crate) fn read(&mut self, buf: &mut [u8], policy: &RecoveryPolicy) -> DspResult<usize> {
        let frames = (buf.len() / self.frame_bytes.max(1)) as Frames;
        if frames == 0 {
            return Ok(0);
        }
        let read = retry_once(self.engine.as_mut(), policy, |engine| engine.readi(buf, frames))?;
        self.settle(&read);
        self.position.advance_appl(read.value);
        let bytes = read.value as usize * self.frame_bytes;
        self.transferred += bytes as u64;
        trace!(direction = ?self.direction, frames = read.value, "read");
        Ok(bytes)
    }

    /// Fold what the hardware moved before a re-prepare into the legacy
    /// counter, then follow the engine pointers back to zero.
    fn settle<T>(&mut self, result: &Recovered<T>) {
        if !result.rebased() {
            return;
        }
        if let Some(hw_ptr) = result.stalled_at {
            self.position.advance(hw_ptr);
        }
        self.position.rebase();
    }

    /// Engine `prepare` restarts its pointers from zero.
    pub(crate) fn prepare(&mut self) -> DspResult<()> {
        self.engine.prepare()?;
        self.position.rebase();
        Ok(())
    }

    pub(crate) fn close(self) -> DspResult<()> {
        let Stream {
            direction,
            mut engine,
            ..
        } = self;
        let mut result = Ok(());
        if direction == Direction::Playback && engine.state() != PcmState::Open {
            if let Err(err) = engine.drain() {
                warn!(name = engine.name(), %err, "drain on close failed");
                result = Err(DspError::Engine(err));
            }
        }
        let name = engine.name().to_string();
        if let Err(err) = engine.close() {
            warn!(%name, %err, "close failed");
            if result.is_ok() {
                result = Err(DspError::Engine(err));
            }
        }
        debug!(%name, ?direction, "stream released");
        result
    }
}
