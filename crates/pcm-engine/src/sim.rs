//! Deterministic software engine.
//!
//! The hardware clock of a [`SimPcm`] only moves when [`SimControl::advance`]
//! is called, or when a blocking transfer has to wait for room. Every stream
//! opened through a [`SimOpener`] gets a [`SimControl`] twin that can drive the
//! clock, inject xruns and suspends, and inspect what the stream was asked to
//! do.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::area::{self, ChannelArea};
use crate::error::{EngineError, EngineResult};
use crate::params::{HwCapabilities, HwConfig, HwParams, SwParams};
use crate::poll::{PollEvents, PollFd, RawFd};
use crate::{Direction, Frames, MmapGrant, PcmBackend, PcmOpener, PcmState, SFrames};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub capabilities: HwCapabilities,
    /// Upper bound for the pointer boundary, in frames.
    pub boundary_ceiling: Frames,
    /// Device names that can be opened. Empty accepts any name.
    pub devices: Vec<String>,
    pub first_fd: RawFd,
    /// Whether a suspended stream can be resumed or must be re-prepared.
    pub resumable: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            capabilities: HwCapabilities::default(),
            boundary_ceiling: 1 << 30,
            devices: Vec::new(),
            first_fd: 100,
            resumable: true,
        }
    }
}

impl SimConfig {
    pub fn with_capabilities(mut self, capabilities: HwCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_boundary_ceiling(mut self, frames: Frames) -> Self {
        self.boundary_ceiling = frames;
        self
    }

    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }
}

/// A condition reported by the next `delay`, `writei` or `readi` call, or by
/// the next `mmap_begin` for [`Fault::Mmap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    Xrun,
    /// The first `busy` resume attempts report `WouldBlock`.
    Suspend { busy: u32 },
    /// The stream is found draining.
    Drain,
    /// The next mmap window request fails with a device error. Other calls
    /// pass over it.
    Mmap,
}

/// What a simulated stream was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Opened { nonblock: bool },
    HwCommitted(HwConfig),
    SwCommitted(SwParams),
    Prepared,
    Started,
    Dropped,
    Drained,
    Reset,
    Resumed,
    Rewound(Frames),
    Forwarded(Frames),
    Written { position: Frames, data: Vec<u8> },
    Read { position: Frames, frames: Frames },
    Committed {
        position: Frames,
        frames: Frames,
        data: Vec<u8>,
    },
    Closed,
}

/// Byte the simulated capture hardware records for every sample of the frame
/// at `position`.
pub fn capture_pattern(position: Frames) -> u8 {
    (position % 251) as u8
}

#[derive(Debug)]
struct SimCore {
    name: String,
    direction: Direction,
    fd: RawFd,
    state: PcmState,
    resume_state: PcmState,
    busy: u32,
    resumable: bool,
    nonblock: bool,
    boundary_ceiling: Frames,
    hw_config: Option<HwConfig>,
    sw: SwParams,
    boundary: Frames,
    // Positions are kept unwrapped; `hw_ptr` exposes them modulo the boundary.
    hw: Frames,
    appl: Frames,
    faults: VecDeque<Fault>,
    events: Vec<SimEvent>,
}

impl SimCore {
    fn config(&self) -> EngineResult<HwConfig> {
        self.hw_config.ok_or(EngineError::BadState(self.state))
    }

    fn buffer_size(&self) -> Frames {
        self.hw_config.map_or(0, |config| config.buffer_size)
    }

    fn avail(&self) -> SFrames {
        let (hw, appl) = (self.hw as SFrames, self.appl as SFrames);
        match self.direction {
            Direction::Playback => self.buffer_size() as SFrames + hw - appl,
            Direction::Capture => hw - appl,
        }
    }

    fn delay(&self) -> SFrames {
        let (hw, appl) = (self.hw as SFrames, self.appl as SFrames);
        match self.direction {
            Direction::Playback => appl - hw,
            Direction::Capture => hw - appl,
        }
    }

    fn queued(&self) -> Frames {
        self.appl.saturating_sub(self.hw)
    }

    fn advance(&mut self, frames: Frames) {
        if frames == 0 {
            return;
        }
        match (self.state, self.direction) {
            (PcmState::Running, direction) => {
                let mut hw = self.hw + frames;
                if self.sw.stop_threshold < self.boundary {
                    let limit = match direction {
                        Direction::Playback => (self.appl + self.sw.stop_threshold)
                            .saturating_sub(self.buffer_size()),
                        Direction::Capture => self.appl + self.sw.stop_threshold,
                    };
                    if hw >= limit {
                        hw = limit.max(self.hw);
                        self.state = PcmState::Xrun;
                        trace!(name = %self.name, hw, "simulated xrun");
                    }
                }
                self.hw = hw;
            }
            (PcmState::Draining, Direction::Playback) => {
                self.hw = (self.hw + frames).min(self.appl);
                if self.hw >= self.appl {
                    self.state = PcmState::Setup;
                }
            }
            _ => {}
        }
    }

    fn take_fault(&mut self) -> EngineResult<()> {
        if matches!(self.faults.front(), Some(Fault::Mmap)) {
            return Ok(());
        }
        match self.faults.pop_front() {
            None | Some(Fault::Mmap) => Ok(()),
            Some(Fault::Xrun) => {
                self.state = PcmState::Xrun;
                Err(EngineError::Xrun)
            }
            Some(Fault::Suspend { busy }) => {
                self.resume_state = self.state;
                self.busy = busy;
                self.state = PcmState::Suspended;
                Err(EngineError::Suspended)
            }
            Some(Fault::Drain) => {
                self.state = PcmState::Draining;
                Err(EngineError::BadState(PcmState::Draining))
            }
        }
    }

    fn check_transfer(&self) -> EngineResult<()> {
        match self.state {
            PcmState::Prepared | PcmState::Running => Ok(()),
            PcmState::Xrun => Err(EngineError::Xrun),
            PcmState::Suspended => Err(EngineError::Suspended),
            other => Err(EngineError::BadState(other)),
        }
    }

    fn check_configured(&self) -> EngineResult<()> {
        match self.state {
            PcmState::Open | PcmState::Disconnected => Err(EngineError::BadState(self.state)),
            _ => Ok(()),
        }
    }

    fn start_running(&mut self) {
        self.state = PcmState::Running;
        self.events.push(SimEvent::Started);
    }

    fn poll_ready(&self) -> PollEvents {
        if matches!(self.state, PcmState::Xrun | PcmState::Suspended) {
            return PollEvents::ERR;
        }
        let avail = self.avail();
        if avail > 0 && avail as Frames >= self.sw.avail_min {
            match self.direction {
                Direction::Playback => PollEvents::OUT,
                Direction::Capture => PollEvents::IN,
            }
        } else {
            PollEvents::empty()
        }
    }
}

/// One simulated stream handle.
pub struct SimPcm {
    name: String,
    direction: Direction,
    capabilities: HwCapabilities,
    core: Arc<Mutex<SimCore>>,
    ring: Vec<u8>,
    areas: Vec<ChannelArea>,
}

fn ring_write(ring: &mut [u8], start: usize, data: &[u8]) {
    let first = data.len().min(ring.len() - start);
    ring[start..start + first].copy_from_slice(&data[..first]);
    ring[..data.len() - first].copy_from_slice(&data[first..]);
}

fn fill_capture(buf: &mut [u8], position: Frames, frame_bytes: usize) {
    for (index, frame) in buf.chunks_mut(frame_bytes).enumerate() {
        frame.fill(capture_pattern(position + index as Frames));
    }
}

impl PcmBackend for SimPcm {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn state(&self) -> PcmState {
        self.core.lock().state
    }

    fn capabilities(&self) -> HwCapabilities {
        self.capabilities.clone()
    }

    fn commit_hw(&mut self, params: &HwParams) -> EngineResult<HwConfig> {
        let mut core = self.core.lock();
        if matches!(
            core.state,
            PcmState::Running | PcmState::Draining | PcmState::Disconnected
        ) {
            return Err(EngineError::BadState(core.state));
        }
        let config = params.choose()?;
        let frame_bytes = config.frame_bytes();
        self.ring = vec![0; config.buffer_size as usize * frame_bytes];
        config.format.fill_silence(&mut self.ring);
        self.areas = area::interleaved(config.channels, config.format);

        let mut boundary = config.buffer_size.max(1);
        while boundary.saturating_mul(2) <= core.boundary_ceiling {
            boundary *= 2;
        }
        core.boundary = boundary;
        core.hw_config = Some(config);
        core.sw = SwParams::for_config(&config);
        core.hw = 0;
        core.appl = 0;
        core.state = PcmState::Prepared;
        core.events.push(SimEvent::HwCommitted(config));
        debug!(
            name = %self.name,
            rate = config.rate,
            period = config.period_size,
            buffer = config.buffer_size,
            boundary,
            "simulated hw params committed"
        );
        Ok(config)
    }

    fn commit_sw(&mut self, params: &SwParams) -> EngineResult<Frames> {
        let mut core = self.core.lock();
        core.config()?;
        core.sw = *params;
        core.events.push(SimEvent::SwCommitted(*params));
        Ok(core.boundary)
    }

    fn prepare(&mut self) -> EngineResult<()> {
        let mut core = self.core.lock();
        core.check_configured()?;
        if core.state == PcmState::Running {
            return Err(EngineError::BadState(core.state));
        }
        core.config()?;
        core.hw = 0;
        core.appl = 0;
        core.state = PcmState::Prepared;
        core.events.push(SimEvent::Prepared);
        Ok(())
    }

    fn start(&mut self) -> EngineResult<()> {
        let mut core = self.core.lock();
        if core.state != PcmState::Prepared {
            return Err(EngineError::BadState(core.state));
        }
        core.start_running();
        Ok(())
    }

    fn drop_stream(&mut self) -> EngineResult<()> {
        let mut core = self.core.lock();
        core.check_configured()?;
        core.state = PcmState::Setup;
        core.events.push(SimEvent::Dropped);
        Ok(())
    }

    fn drain(&mut self) -> EngineResult<()> {
        let mut core = self.core.lock();
        core.check_configured()?;
        core.events.push(SimEvent::Drained);
        if core.direction == Direction::Playback
            && core.state == PcmState::Running
            && core.appl > core.hw
        {
            core.state = PcmState::Draining;
            if !core.nonblock {
                let pending = core.queued();
                core.advance(pending);
            }
        } else {
            core.state = PcmState::Setup;
        }
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<()> {
        let mut core = self.core.lock();
        match core.state {
            PcmState::Prepared | PcmState::Running | PcmState::Paused => {
                core.appl = core.hw;
                core.events.push(SimEvent::Reset);
                Ok(())
            }
            other => Err(EngineError::BadState(other)),
        }
    }

    fn resume(&mut self) -> EngineResult<()> {
        let mut core = self.core.lock();
        if core.state != PcmState::Suspended {
            return Err(EngineError::BadState(core.state));
        }
        if !core.resumable {
            return Err(EngineError::Unsupported("resume"));
        }
        if core.busy > 0 {
            core.busy -= 1;
            return Err(EngineError::WouldBlock);
        }
        core.state = core.resume_state;
        core.events.push(SimEvent::Resumed);
        Ok(())
    }

    fn set_nonblock(&mut self, nonblock: bool) -> EngineResult<()> {
        self.core.lock().nonblock = nonblock;
        Ok(())
    }

    fn delay(&mut self) -> EngineResult<SFrames> {
        let mut core = self.core.lock();
        core.take_fault()?;
        match core.state {
            PcmState::Prepared | PcmState::Running | PcmState::Draining | PcmState::Paused => {
                Ok(core.delay())
            }
            PcmState::Xrun => Err(EngineError::Xrun),
            PcmState::Suspended => Err(EngineError::Suspended),
            other => Err(EngineError::BadState(other)),
        }
    }

    fn avail_update(&mut self) -> EngineResult<SFrames> {
        let core = self.core.lock();
        match core.state {
            PcmState::Xrun => Err(EngineError::Xrun),
            PcmState::Suspended => Err(EngineError::Suspended),
            PcmState::Open | PcmState::Disconnected => Err(EngineError::BadState(core.state)),
            _ => Ok(core.avail()),
        }
    }

    fn hw_ptr(&self) -> Frames {
        let core = self.core.lock();
        core.hw % core.boundary.max(1)
    }

    fn writei(&mut self, buf: &[u8], frames: Frames) -> EngineResult<Frames> {
        if self.direction != Direction::Playback {
            return Err(EngineError::Unsupported("write on a capture stream"));
        }
        let mut core = self.core.lock();
        core.take_fault()?;
        core.check_transfer()?;
        let config = core.config()?;
        let frame_bytes = config.frame_bytes();
        if buf.len() < frames as usize * frame_bytes {
            return Err(EngineError::invalid("buffer shorter than frame count"));
        }
        let buffer = config.buffer_size;
        let mut written: Frames = 0;
        while written < frames {
            let space = core.avail().clamp(0, buffer as SFrames) as Frames;
            if space == 0 {
                if core.state == PcmState::Running && !core.nonblock {
                    core.advance((frames - written).min(config.period_size).max(1));
                    core.check_transfer()?;
                    continue;
                }
                if written > 0 {
                    break;
                }
                return Err(EngineError::WouldBlock);
            }
            let chunk = space.min(frames - written);
            let from = written as usize * frame_bytes;
            let data = &buf[from..from + chunk as usize * frame_bytes];
            let position = core.appl;
            ring_write(
                &mut self.ring,
                (position % buffer) as usize * frame_bytes,
                data,
            );
            core.appl += chunk;
            written += chunk;
            core.events.push(SimEvent::Written {
                position,
                data: data.to_vec(),
            });
            if core.state == PcmState::Prepared && core.queued() >= core.sw.start_threshold {
                core.start_running();
            }
        }
        trace!(name = %self.name, written, appl = core.appl, "simulated write");
        Ok(written)
    }

    fn readi(&mut self, buf: &mut [u8], frames: Frames) -> EngineResult<Frames> {
        if self.direction != Direction::Capture {
            return Err(EngineError::Unsupported("read on a playback stream"));
        }
        let mut core = self.core.lock();
        core.take_fault()?;
        core.check_transfer()?;
        let config = core.config()?;
        let frame_bytes = config.frame_bytes();
        if buf.len() < frames as usize * frame_bytes {
            return Err(EngineError::invalid("buffer shorter than frame count"));
        }
        if core.state == PcmState::Prepared && frames >= core.sw.start_threshold {
            core.start_running();
        }
        let mut read: Frames = 0;
        while read < frames {
            let avail = core.avail().max(0) as Frames;
            if avail == 0 {
                if core.state == PcmState::Running && !core.nonblock {
                    core.advance((frames - read).min(config.period_size).max(1));
                    core.check_transfer()?;
                    continue;
                }
                if read > 0 {
                    break;
                }
                return Err(EngineError::WouldBlock);
            }
            let chunk = avail.min(frames - read);
            let position = core.appl;
            let from = read as usize * frame_bytes;
            fill_capture(
                &mut buf[from..from + chunk as usize * frame_bytes],
                position,
                frame_bytes,
            );
            core.appl += chunk;
            read += chunk;
            core.events.push(SimEvent::Read {
                position,
                frames: chunk,
            });
        }
        trace!(name = %self.name, read, appl = core.appl, "simulated read");
        Ok(read)
    }

    fn rewind(&mut self, frames: Frames) -> EngineResult<Frames> {
        let mut core = self.core.lock();
        core.check_configured()?;
        core.config()?;
        let limit = match core.direction {
            Direction::Playback => core.queued(),
            Direction::Capture => (core.buffer_size() as SFrames - core.avail())
                .clamp(0, core.appl as SFrames) as Frames,
        };
        let rewound = frames.min(limit);
        core.appl -= rewound;
        core.events.push(SimEvent::Rewound(rewound));
        Ok(rewound)
    }

    fn forward(&mut self, frames: Frames) -> EngineResult<Frames> {
        let mut core = self.core.lock();
        core.check_configured()?;
        core.config()?;
        let forwarded = frames.min(core.avail().max(0) as Frames);
        core.appl += forwarded;
        core.events.push(SimEvent::Forwarded(forwarded));
        Ok(forwarded)
    }

    fn mmap_begin(&mut self, frames: Frames) -> EngineResult<MmapGrant<'_>> {
        let (offset, granted) = {
            let mut core = self.core.lock();
            core.check_configured()?;
            if matches!(core.faults.front(), Some(Fault::Mmap)) {
                core.faults.pop_front();
                return Err(EngineError::Device("simulated mmap failure".into()));
            }
            let config = core.config()?;
            let buffer = config.buffer_size;
            let avail = core.avail().clamp(0, buffer as SFrames) as Frames;
            let offset = core.appl % buffer;
            let granted = frames.min(avail).min(buffer - offset);
            if self.direction == Direction::Capture {
                let frame_bytes = config.frame_bytes();
                let from = offset as usize * frame_bytes;
                fill_capture(
                    &mut self.ring[from..from + granted as usize * frame_bytes],
                    core.appl,
                    frame_bytes,
                );
            }
            (offset, granted)
        };
        Ok(MmapGrant {
            buffer: &mut self.ring,
            areas: &self.areas,
            offset,
            frames: granted,
        })
    }

    fn mmap_commit(&mut self, offset: Frames, frames: Frames) -> EngineResult<Frames> {
        let mut core = self.core.lock();
        let config = core.config()?;
        let buffer = config.buffer_size;
        if offset != core.appl % buffer || offset + frames > buffer {
            return Err(EngineError::invalid(format!(
                "commit of {frames} frames at {offset} does not match the granted window"
            )));
        }
        let position = core.appl;
        let data = match self.direction {
            Direction::Playback => {
                let frame_bytes = config.frame_bytes();
                let from = offset as usize * frame_bytes;
                self.ring[from..from + frames as usize * frame_bytes].to_vec()
            }
            Direction::Capture => Vec::new(),
        };
        core.appl += frames;
        core.events.push(SimEvent::Committed {
            position,
            frames,
            data,
        });
        trace!(name = %self.name, position, frames, "simulated mmap commit");
        Ok(frames)
    }

    fn poll_descriptors(&self) -> Vec<PollFd> {
        let core = self.core.lock();
        let events = match core.direction {
            Direction::Playback => PollEvents::OUT,
            Direction::Capture => PollEvents::IN,
        };
        vec![PollFd::new(core.fd, events)]
    }

    fn poll_revents(&self, fds: &[PollFd]) -> EngineResult<PollEvents> {
        let core = self.core.lock();
        let mut revents = fds
            .iter()
            .filter(|pfd| pfd.fd == core.fd)
            .fold(PollEvents::empty(), |acc, pfd| acc | pfd.revents);
        if matches!(core.state, PcmState::Xrun | PcmState::Suspended) {
            revents |= PollEvents::ERR;
        }
        Ok(revents)
    }

    fn close(self: Box<Self>) -> EngineResult<()> {
        let mut core = self.core.lock();
        core.state = PcmState::Disconnected;
        core.events.push(SimEvent::Closed);
        debug!(name = %self.name, "simulated pcm closed");
        Ok(())
    }
}

/// Test-side handle onto a simulated stream.
#[derive(Debug, Clone)]
pub struct SimControl {
    core: Arc<Mutex<SimCore>>,
}

impl SimControl {
    pub fn name(&self) -> String {
        self.core.lock().name.clone()
    }

    pub fn direction(&self) -> Direction {
        self.core.lock().direction
    }

    pub fn fd(&self) -> RawFd {
        self.core.lock().fd
    }

    /// Move the hardware clock forward by `frames`.
    pub fn advance(&self, frames: Frames) {
        self.core.lock().advance(frames);
    }

    pub fn inject(&self, fault: Fault) {
        self.core.lock().faults.push_back(fault);
    }

    pub fn state(&self) -> PcmState {
        self.core.lock().state
    }

    /// Unwrapped hardware position.
    pub fn hw_pos(&self) -> Frames {
        self.core.lock().hw
    }

    /// Unwrapped application position.
    pub fn appl_pos(&self) -> Frames {
        self.core.lock().appl
    }

    pub fn delay(&self) -> SFrames {
        self.core.lock().delay()
    }

    pub fn hw_config(&self) -> Option<HwConfig> {
        self.core.lock().hw_config
    }

    pub fn sw_params(&self) -> SwParams {
        self.core.lock().sw
    }

    pub fn boundary(&self) -> Frames {
        self.core.lock().boundary
    }

    pub fn nonblock(&self) -> bool {
        self.core.lock().nonblock
    }

    pub fn is_closed(&self) -> bool {
        self.core.lock().state == PcmState::Disconnected
    }

    /// Events a real `poll` would currently report for this stream.
    pub fn poll_ready(&self) -> PollEvents {
        self.core.lock().poll_ready()
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.core.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.core.lock().events.clear();
    }
}

#[derive(Debug)]
struct Registry {
    config: SimConfig,
    next_fd: RawFd,
    opened: Vec<SimControl>,
}

/// Opens [`SimPcm`] streams and keeps their controls.
#[derive(Debug, Clone)]
pub struct SimOpener {
    registry: Arc<Mutex<Registry>>,
}

impl Default for SimOpener {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimOpener {
    pub fn new(config: SimConfig) -> Self {
        let next_fd = config.first_fd;
        Self {
            registry: Arc::new(Mutex::new(Registry {
                config,
                next_fd,
                opened: Vec::new(),
            })),
        }
    }

    pub fn config(&self) -> SimConfig {
        self.registry.lock().config.clone()
    }

    /// The most recently opened stream in `direction`.
    pub fn control(&self, direction: Direction) -> Option<SimControl> {
        self.registry
            .lock()
            .opened
            .iter()
            .rev()
            .find(|control| control.direction() == direction)
            .cloned()
    }

    /// Every stream opened so far, oldest first.
    pub fn opened(&self) -> Vec<SimControl> {
        self.registry.lock().opened.clone()
    }
}

impl PcmOpener for SimOpener {
    fn open(
        &self,
        name: &str,
        direction: Direction,
        nonblock: bool,
    ) -> EngineResult<Box<dyn PcmBackend>> {
        let mut registry = self.registry.lock();
        let known = registry.config.devices.is_empty()
            || registry.config.devices.iter().any(|device| device == name);
        if !known {
            return Err(EngineError::NotFound(name.to_string()));
        }
        let fd = registry.next_fd;
        registry.next_fd += 1;
        let core = Arc::new(Mutex::new(SimCore {
            name: name.to_string(),
            direction,
            fd,
            state: PcmState::Open,
            resume_state: PcmState::Open,
            busy: 0,
            resumable: registry.config.resumable,
            nonblock,
            boundary_ceiling: registry.config.boundary_ceiling,
            hw_config: None,
            sw: SwParams {
                start_threshold: 1,
                stop_threshold: 0,
                avail_min: 1,
            },
            boundary: 0,
            hw: 0,
            appl: 0,
            faults: VecDeque::new(),
            events: vec![SimEvent::Opened { nonblock }],
        }));
        registry.opened.push(SimControl { core: core.clone() });
        debug!(name, ?direction, fd, "simulated pcm opened");
        Ok(Box::new(SimPcm {
            name: name.to_string(),
            direction,
            capabilities: registry.config.capabilities.clone(),
            core,
            ring: Vec::new(),
            areas: Vec::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;

    fn configured(direction: Direction) -> (Box<dyn PcmBackend>, SimControl) {
        let opener = SimOpener::default();
        let mut pcm = opener.open("sim", direction, false).unwrap();
        let mut params = HwParams::any(&pcm.capabilities());
        params.set_format(SampleFormat::U8).unwrap();
        params.set_channels(1).unwrap();
        params.set_rate_near(8_000).unwrap();
        params.set_buffer_size(1024).unwrap();
        params.set_period_size(256).unwrap();
        pcm.commit_hw(&params).unwrap();
        (pcm, opener.control(direction).unwrap())
    }

    #[test]
    fn boundary_is_buffer_times_power_of_two() {
        let (_pcm, control) = configured(Direction::Playback);
        let boundary = control.boundary();
        assert_eq!(boundary % 1024, 0);
        assert!((boundary / 1024).is_power_of_two());
        assert!(boundary <= 1 << 30);
    }

    #[test]
    fn playback_auto_starts_at_threshold() {
        let (mut pcm, control) = configured(Direction::Playback);
        pcm.writei(&[0x80; 16], 16).unwrap();
        assert_eq!(control.state(), PcmState::Running);
        control.advance(10);
        assert_eq!(pcm.delay().unwrap(), 6);
    }

    #[test]
    fn playback_underrun_stops_at_stop_threshold() {
        let (mut pcm, control) = configured(Direction::Playback);
        pcm.writei(&[0x80; 16], 16).unwrap();
        control.advance(100);
        assert_eq!(control.state(), PcmState::Xrun);
        assert_eq!(control.hw_pos(), 16);
        assert_eq!(pcm.delay(), Err(EngineError::Xrun));
    }

    #[test]
    fn resume_reports_busy_before_succeeding() {
        let (mut pcm, control) = configured(Direction::Playback);
        control.inject(Fault::Suspend { busy: 2 });
        assert_eq!(pcm.delay(), Err(EngineError::Suspended));
        assert_eq!(pcm.resume(), Err(EngineError::WouldBlock));
        assert_eq!(pcm.resume(), Err(EngineError::WouldBlock));
        pcm.resume().unwrap();
        assert_eq!(control.state(), PcmState::Prepared);
    }

    #[test]
    fn capture_reads_deterministic_pattern() {
        let (mut pcm, control) = configured(Direction::Capture);
        let mut buf = [0u8; 4];
        assert_eq!(pcm.readi(&mut buf, 4).unwrap(), 4);
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(control.state(), PcmState::Running);
    }
}
