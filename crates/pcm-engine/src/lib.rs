//! PCM engine handle surface.
//!
//! A [`PcmBackend`] is one direction of an opened device on the modern audio
//! engine: flexible hardware parameter negotiation, monotonic application and
//! hardware pointers that wrap at a boundary, and a begin/commit protocol for
//! mapped buffer access. The [`sim`] module provides a deterministic software
//! implementation whose hardware clock only moves when told to.

pub mod area;
pub mod error;
pub mod format;
pub mod params;
pub mod poll;
pub mod sim;

use serde::{Deserialize, Serialize};

pub use area::{copy_areas, ChannelArea};
pub use error::{EngineError, EngineResult};
pub use format::SampleFormat;
pub use params::{Access, HwCapabilities, HwConfig, HwParams, Interval, RateSupport, SwParams};
pub use poll::{PollEvents, PollFd, RawFd};

/// Unsigned frame count or position.
pub type Frames = u64;
/// Signed frame count (delays may be negative after an underrun).
pub type SFrames = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Playback,
    Capture,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Playback, Direction::Capture];

    pub const fn index(self) -> usize {
        match self {
            Direction::Playback => 0,
            Direction::Capture => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcmState {
    Open,
    Setup,
    Prepared,
    Running,
    Xrun,
    Draining,
    Paused,
    Suspended,
    Disconnected,
}

impl PcmState {
    /// Transfer is in progress and the hardware pointer is moving.
    pub const fn is_active(self) -> bool {
        matches!(self, PcmState::Running | PcmState::Draining)
    }
}

/// A contiguous window of the engine's mapped ring handed out by
/// [`PcmBackend::mmap_begin`].
pub struct MmapGrant<'a> {
    pub buffer: &'a mut [u8],
    pub areas: &'a [ChannelArea],
    /// Frame offset of the window inside the ring.
    pub offset: Frames,
    pub frames: Frames,
}

/// One opened direction of an engine device.
pub trait PcmBackend: Send {
    fn name(&self) -> &str;
    fn direction(&self) -> Direction;
    fn state(&self) -> PcmState;
    fn capabilities(&self) -> HwCapabilities;

    /// Commit hardware parameters; the stream is left prepared.
    fn commit_hw(&mut self, params: &HwParams) -> EngineResult<HwConfig>;
    /// Commit software parameters and return the pointer boundary.
    fn commit_sw(&mut self, params: &SwParams) -> EngineResult<Frames>;

    fn prepare(&mut self) -> EngineResult<()>;
    fn start(&mut self) -> EngineResult<()>;
    /// Stop immediately, discarding pending frames.
    fn drop_stream(&mut self) -> EngineResult<()>;
    /// Stop after pending frames have been played.
    fn drain(&mut self) -> EngineResult<()>;
    fn reset(&mut self) -> EngineResult<()>;
    fn resume(&mut self) -> EngineResult<()>;
    fn set_nonblock(&mut self, nonblock: bool) -> EngineResult<()>;

    fn delay(&mut self) -> EngineResult<SFrames>;
    fn avail_update(&mut self) -> EngineResult<SFrames>;
    /// Hardware pointer, wrapped at the boundary.
    fn hw_ptr(&self) -> Frames;

    fn writei(&mut self, buf: &[u8], frames: Frames) -> EngineResult<Frames>;
    fn readi(&mut self, buf: &mut [u8], frames: Frames) -> EngineResult<Frames>;
    fn rewind(&mut self, frames: Frames) -> EngineResult<Frames>;
    fn forward(&mut self, frames: Frames) -> EngineResult<Frames>;

    fn mmap_begin(&mut self, frames: Frames) -> EngineResult<MmapGrant<'_>>;
    fn mmap_commit(&mut self, offset: Frames, frames: Frames) -> EngineResult<Frames>;

    fn poll_descriptors(&self) -> Vec<PollFd>;
    /// Translate raw poll results for this stream's descriptors.
    fn poll_revents(&self, fds: &[PollFd]) -> EngineResult<PollEvents>;

    fn close(self: Box<Self>) -> EngineResult<()>;
}

/// Opens engine devices by name.
pub trait PcmOpener: Send + Sync {
    fn open(
        &self,
        name: &str,
        direction: Direction,
        nonblock: bool,
    ) -> EngineResult<Box<dyn PcmBackend>>;
}
