//! A legacy DSP descriptor.
//!
//! A [`Session`] owns the playback and/or capture [`Stream`] selected by the
//! open mode and the single parameter set both of them share. Every parameter
//! change renegotiates both streams; a failed renegotiation restores the
//! previous parameters.

use pcm_engine::{Direction, EngineError, PcmOpener, PcmState};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::device::{AccessMode, DeviceNode};
use crate::error::{DspError, DspResult};
use crate::format::{to_afmt, to_sample_format, AFMT_QUERY};
use crate::negotiate::{DspParams, MAX_FRAGSHIFT};
use crate::recovery::RecoveryPolicy;
use crate::shadow::{MapId, Protection, ShadowBuffer};
use crate::stream::{BufferInfo, CountInfo, Stream};

pub const DSP_CAP_DUPLEX: i32 = 0x0000_0100;
pub const DSP_CAP_REALTIME: i32 = 0x0000_0200;
pub const DSP_CAP_TRIGGER: i32 = 0x0000_1000;
pub const DSP_CAP_MMAP: i32 = 0x0000_2000;

const MIN_FRAGSHIFT: u32 = 4;
const MIN_MAXFRAGS: u32 = 2;

pub struct Session {
    pub(crate) node: DeviceNode,
    pub(crate) mode: AccessMode,
    pub(crate) config: SessionConfig,
    pub(crate) policy: RecoveryPolicy,
    pub(crate) params: DspParams,
    pub(crate) nonblock: bool,
    pub(crate) streams: [Option<Stream>; 2],
    /// Mode of the last wait preparation.
    pub(crate) wait_mode: Option<AccessMode>,
    pub(crate) closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("node", &self.node)
            .field("mode", &self.mode)
            .field("params", &self.params)
            .field("nonblock", &self.nonblock)
            .field("streams", &self.streams)
            .field("closed", &self.closed)
            .finish()
    }
}

type Streams = [Option<Stream>; 2];

fn open_streams(
    opener: &dyn PcmOpener,
    name: &str,
    mode: AccessMode,
    nonblock: bool,
) -> Result<Streams, EngineError> {
    let mut streams: Streams = [None, None];
    for direction in mode.directions() {
        match opener.open(name, direction, nonblock) {
            Ok(engine) => streams[direction.index()] = Some(Stream::new(engine)),
            Err(err) => {
                release(&mut streams);
                return Err(err);
            }
        }
    }
    Ok(streams)
}

fn release(streams: &mut Streams) {
    for stream in streams.iter_mut().filter_map(Option::take) {
        if let Err(err) = stream.close() {
            debug!(%err, "release of partially opened stream failed");
        }
    }
}

impl Session {
    /// Open the engine streams for `node` and negotiate the initial
    /// parameters. Falls back to the generic engine device name when the
    /// node-specific one cannot be opened.
    pub fn open(
        opener: &dyn PcmOpener,
        node: DeviceNode,
        mode: AccessMode,
        nonblock: bool,
        config: SessionConfig,
    ) -> DspResult<Self> {
        let streams = match open_streams(opener, &node.engine_name(), mode, nonblock) {
            Ok(streams) => streams,
            Err(err) => {
                let fallback = node.fallback_name();
                debug!(name = %node.engine_name(), %err, %fallback, "falling back");
                open_streams(opener, &fallback, mode, nonblock).map_err(|err| match err {
                    EngineError::NotFound(name) => DspError::NoEntry(name),
                    other => DspError::Engine(other),
                })?
            }
        };
        let mut session = Self {
            node,
            mode,
            policy: RecoveryPolicy {
                resume_backoff: config.resume_backoff(),
            },
            params: DspParams::initial(node.class, &config),
            config,
            nonblock,
            streams,
            wait_mode: None,
            closed: false,
        };
        if let Err(err) = session.negotiate() {
            release(&mut session.streams);
            session.closed = true;
            return Err(err);
        }
        debug!(
            path = %node.path(),
            ?mode,
            nonblock,
            rate = session.params.rate,
            format = session.params.format.name(),
            "dsp opened"
        );
        Ok(session)
    }

    /// Open by legacy path and `open(2)` flags.
    pub fn open_path(
        opener: &dyn PcmOpener,
        path: &str,
        flags: i32,
        config: SessionConfig,
    ) -> DspResult<Self> {
        let node = DeviceNode::from_path(path)?;
        let mode = AccessMode::from_flags(flags)?;
        Self::open(opener, node, mode, flags & libc::O_NONBLOCK != 0, config)
    }

    /// Drain playback and release both streams. Every stream is released
    /// even when an earlier one fails; the first failure is returned.
    pub fn close(&mut self) -> DspResult<()> {
        self.ensure_open()?;
        self.closed = true;
        let mut result = Ok(());
        for direction in Direction::ALL {
            if let Some(stream) = self.streams[direction.index()].take() {
                if let Err(err) = stream.close() {
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        debug!(path = %self.node.path(), ok = result.is_ok(), "dsp closed");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn node(&self) -> DeviceNode {
        self.node
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn params(&self) -> &DspParams {
        &self.params
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblock
    }

    pub fn stream(&self, direction: Direction) -> Option<&Stream> {
        self.streams[direction.index()].as_ref()
    }

    pub(crate) fn ensure_open(&self) -> DspResult<()> {
        if self.closed {
            Err(DspError::bad_descriptor(format!("{} is closed", self.node.path())))
        } else {
            Ok(())
        }
    }

    /// Stream for a transfer or mapping: missing is a bad descriptor.
    pub(crate) fn transfer_stream(&mut self, direction: Direction) -> DspResult<&mut Stream> {
        self.ensure_open()?;
        let path = self.node.path();
        self.streams[direction.index()]
            .as_mut()
            .ok_or_else(|| DspError::bad_descriptor(format!("{path} has no {direction:?} stream")))
    }

    /// Stream for a control query: missing is an invalid argument.
    pub(crate) fn query_stream(&mut self, direction: Direction) -> DspResult<&mut Stream> {
        self.ensure_open()?;
        self.streams[direction.index()]
            .as_mut()
            .ok_or_else(|| DspError::invalid(format!("no {direction:?} stream")))
    }

    pub(crate) fn advance_cap(&self) -> u64 {
        self.config.mmap_advance_cap(self.params.rate)
    }

    /// Run parameter negotiation for every stream, capture first.
    pub(crate) fn negotiate(&mut self) -> DspResult<()> {
        let params = self.params;
        let mut committed = None;
        for direction in [Direction::Capture, Direction::Playback] {
            if let Some(stream) = self.streams[direction.index()].as_mut() {
                committed = Some(stream.configure(&params, &self.config)?);
            }
        }
        for stream in self.streams.iter_mut().flatten() {
            stream.commit_sw()?;
        }
        if let Some(hw) = committed {
            self.params.rate = hw.rate;
            self.params.format = hw.format;
            self.params.legacy_format = to_afmt(hw.format);
        }
        Ok(())
    }

    /// Change the shared parameters and renegotiate; on failure the previous
    /// parameters are restored.
    pub(crate) fn apply(&mut self, change: impl FnOnce(&mut DspParams)) -> DspResult<()> {
        self.ensure_open()?;
        let saved = self.params;
        change(&mut self.params);
        if let Err(err) = self.negotiate() {
            warn!(%err, requested = ?self.params, "negotiation failed, restoring parameters");
            self.params = saved;
            if let Err(restore) = self.negotiate() {
                warn!(err = %restore, "restoring previous parameters failed");
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn write(&mut self, buf: &[u8]) -> DspResult<usize> {
        let policy = self.policy;
        let result = self
            .transfer_stream(Direction::Playback)
            .and_then(|stream| stream.write(buf, &policy));
        debug!(len = buf.len(), ?result, "write");
        result
    }

    pub fn read(&mut self, buf: &mut [u8]) -> DspResult<usize> {
        let policy = self.policy;
        let len = buf.len();
        let result = self
            .transfer_stream(Direction::Capture)
            .and_then(|stream| stream.read(buf, &policy));
        debug!(len, ?result, "read");
        result
    }

    pub fn set_nonblock(&mut self, nonblock: bool) -> DspResult<()> {
        self.ensure_open()?;
        for stream in self.streams.iter_mut().flatten() {
            stream.engine.set_nonblock(nonblock)?;
        }
        self.nonblock = nonblock;
        debug!(nonblock, "nonblock");
        Ok(())
    }

    /// Hand out a shadow buffer of `len` bytes for the stream the protection
    /// bits select, pinning its geometry until [`munmap`](Self::munmap).
    pub fn mmap(&mut self, len: usize, prot: i32) -> DspResult<MapId> {
        self.ensure_open()?;
        let prot = Protection::from_bits_truncate(prot);
        let direction = if prot == Protection::READ {
            Direction::Capture
        } else if prot == Protection::WRITE {
            Direction::Playback
        } else if prot == Protection::READ | Protection::WRITE {
            if self.streams[Direction::Playback.index()].is_some() {
                Direction::Playback
            } else {
                Direction::Capture
            }
        } else {
            return Err(DspError::invalid(format!("protection {:#x}", prot.bits())));
        };

        let stream = self.transfer_stream(direction)?;
        if stream.is_mapped() {
            return Err(DspError::invalid(format!("{direction:?} stream already mapped")));
        }
        let hw = stream.require_hw()?;
        let shadow = ShadowBuffer::new(len, &stream.position.legacy, &hw)?;
        let id = shadow.id();
        let was_stopped = stream.stopped;
        if stream.engine.state() != PcmState::Running {
            stream.stopped = true;
        }
        stream.shadow = Some(shadow);

        if let Err(err) = self.negotiate() {
            if let Some(stream) = self.streams[direction.index()].as_mut() {
                stream.shadow = None;
                stream.stopped = was_stopped;
            }
            if let Err(restore) = self.negotiate() {
                warn!(err = %restore, "renegotiation after failed mmap failed");
            }
            debug!(len, %err, "mmap failed");
            return Err(err);
        }
        debug!(len, ?direction, id = id.0, "mmap");
        Ok(id)
    }

    /// Release a shadow buffer and renegotiate without the pinned geometry.
    pub fn munmap(&mut self, id: MapId) -> DspResult<()> {
        self.ensure_open()?;
        let stream = self
            .streams
            .iter_mut()
            .flatten()
            .find(|stream| stream.shadow().map(ShadowBuffer::id) == Some(id))
            .ok_or_else(|| DspError::bad_descriptor(format!("no mapping {:#x}", id.0)))?;
        stream.shadow = None;
        stream.stopped = false;
        debug!(id = id.0, "munmap");
        self.negotiate()
    }

    pub fn mapped(&self, id: MapId) -> Option<&[u8]> {
        self.streams
            .iter()
            .flatten()
            .filter_map(Stream::shadow)
            .find(|shadow| shadow.id() == id)
            .map(ShadowBuffer::as_slice)
    }

    pub fn mapped_mut(&mut self, id: MapId) -> Option<&mut [u8]> {
        self.streams
            .iter_mut()
            .flatten()
            .filter_map(|stream| stream.shadow.as_mut())
            .find(|shadow| shadow.id() == id)
            .map(ShadowBuffer::as_mut_slice)
    }

    pub fn mappings(&self) -> Vec<MapId> {
        self.streams
            .iter()
            .flatten()
            .filter_map(Stream::shadow)
            .map(ShadowBuffer::id)
            .collect()
    }

    pub fn set_rate(&mut self, rate: i32) -> DspResult<i32> {
        let rate = u32::try_from(rate)
            .ok()
            .filter(|rate| *rate > 0)
            .ok_or_else(|| DspError::invalid(format!("rate {rate}")))?;
        self.apply(|params| params.rate = rate)?;
        Ok(self.params.rate as i32)
    }

    pub fn set_channels(&mut self, channels: i32) -> DspResult<i32> {
        let channels = u32::try_from(channels)
            .ok()
            .filter(|channels| *channels > 0)
            .ok_or_else(|| DspError::invalid(format!("{channels} channels")))?;
        self.apply(|params| params.channels = channels)?;
        Ok(self.params.channels as i32)
    }

    /// Mono/stereo shorthand; returns 0 for mono, 1 for stereo.
    pub fn set_stereo(&mut self, stereo: i32) -> DspResult<i32> {
        let channels = if stereo != 0 { 2 } else { 1 };
        self.apply(|params| params.channels = channels)?;
        Ok(self.params.channels as i32 - 1)
    }

    pub fn set_format(&mut self, afmt: i32) -> DspResult<i32> {
        if afmt != AFMT_QUERY {
            let format = to_sample_format(afmt);
            self.apply(|params| params.format = format)?;
        } else {
            self.ensure_open()?;
        }
        Ok(self.params.legacy_format)
    }

    /// `0xMMMMSSSS`: max fragments `M` and fragment size `2^S` bytes.
    pub fn set_fragment(&mut self, arg: i32) -> DspResult<()> {
        let fragshift = ((arg as u32) & 0xffff).clamp(MIN_FRAGSHIFT, MAX_FRAGSHIFT);
        let maxfrags = (((arg as u32) >> 16) & 0xffff).max(MIN_MAXFRAGS);
        self.apply(|params| {
            params.fragshift = fragshift;
            params.maxfrags = maxfrags;
        })
    }

    pub fn set_subdivide(&mut self, subdivision: i32) -> DspResult<()> {
        let subdivision = u32::try_from(subdivision).unwrap_or(0).max(1);
        self.apply(|params| params.subdivision = subdivision)
    }

    pub fn rate(&self) -> i32 {
        self.params.rate as i32
    }

    pub fn channels(&self) -> i32 {
        self.params.channels as i32
    }

    pub fn bits(&self) -> i32 {
        self.params.format.width() as i32
    }

    pub fn caps(&self) -> i32 {
        let mut caps = DSP_CAP_REALTIME | DSP_CAP_TRIGGER | DSP_CAP_MMAP;
        if self.streams.iter().all(Option::is_some) {
            caps |= DSP_CAP_DUPLEX;
        }
        caps
    }

    /// Legacy fragment size in bytes, from playback when present.
    pub fn block_size(&self) -> DspResult<i32> {
        self.ensure_open()?;
        let stream = self
            .stream(Direction::Playback)
            .or_else(|| self.stream(Direction::Capture))
            .ok_or_else(|| DspError::invalid("no stream"))?;
        let bytes = stream.legacy().period_size * stream.frame_bytes() as u64;
        Ok(i32::try_from(bytes).unwrap_or(i32::MAX))
    }

    pub fn space(&mut self, direction: Direction) -> DspResult<BufferInfo> {
        let policy = self.policy;
        let cap = self.advance_cap();
        self.query_stream(direction)?.space(&policy, cap)
    }

    pub fn pointer(&mut self, direction: Direction) -> DspResult<CountInfo> {
        let policy = self.policy;
        let cap = self.advance_cap();
        self.query_stream(direction)?.pointer(&policy, cap)
    }

    /// Queued playback in bytes.
    pub fn output_delay(&mut self) -> DspResult<i32> {
        let policy = self.policy;
        let cap = self.advance_cap();
        self.query_stream(Direction::Playback)?
            .delay_bytes(&policy, cap)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close() {
                warn!(%err, "close on drop failed");
            }
        }
    }
}
