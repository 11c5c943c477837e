//! Legacy DSP control requests.
//!
//! Raw `ioctl` codes are decoded once into a [`DspRequest`]; the session
//! handles each variant in a single exhaustive match.

use std::os::raw::c_ulong;

use pcm_engine::Direction;
use serde::Serialize;
use tracing::debug;

use crate::error::{DspError, DspResult};
use crate::format::SUPPORTED_FORMATS;
use crate::session::Session;
use crate::stream::{BufferInfo, CountInfo};

/// Sound driver version reported by `OSS_GETVERSION`.
pub const SOUND_VERSION: i32 = 0x0003_0802;

const IOC_NONE: u32 = 0;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, group: u8, nr: u8, size: usize) -> c_ulong {
    ((dir << 30) | ((size as u32) << 16) | ((group as u32) << 8) | nr as u32) as c_ulong
}

const fn io(nr: u8) -> c_ulong {
    ioc(IOC_NONE, b'P', nr, 0)
}

const fn ior(nr: u8, size: usize) -> c_ulong {
    ioc(IOC_READ, b'P', nr, size)
}

const fn iow(nr: u8, size: usize) -> c_ulong {
    ioc(IOC_WRITE, b'P', nr, size)
}

const fn iowr(nr: u8, size: usize) -> c_ulong {
    ioc(IOC_READ | IOC_WRITE, b'P', nr, size)
}

const INT: usize = std::mem::size_of::<i32>();
const AUDIO_BUF_INFO: usize = std::mem::size_of::<BufferInfo>();
const COUNT_INFO: usize = std::mem::size_of::<CountInfo>();
/// `buffmem_desc`: a pointer and an int.
const BUFFMEM_DESC: usize = 2 * std::mem::size_of::<usize>();

pub const OSS_GETVERSION: c_ulong = ioc(IOC_READ, b'M', 118, INT);
pub const SNDCTL_DSP_RESET: c_ulong = io(0);
pub const SNDCTL_DSP_SYNC: c_ulong = io(1);
pub const SNDCTL_DSP_SPEED: c_ulong = iowr(2, INT);
pub const SNDCTL_DSP_STEREO: c_ulong = iowr(3, INT);
pub const SNDCTL_DSP_GETBLKSIZE: c_ulong = iowr(4, INT);
pub const SNDCTL_DSP_SETFMT: c_ulong = iowr(5, INT);
pub const SNDCTL_DSP_CHANNELS: c_ulong = iowr(6, INT);
pub const SOUND_PCM_WRITE_FILTER: c_ulong = iowr(7, INT);
pub const SNDCTL_DSP_POST: c_ulong = io(8);
pub const SNDCTL_DSP_SUBDIVIDE: c_ulong = iowr(9, INT);
pub const SNDCTL_DSP_SETFRAGMENT: c_ulong = iowr(10, INT);
pub const SNDCTL_DSP_GETFMTS: c_ulong = ior(11, INT);
pub const SNDCTL_DSP_GETOSPACE: c_ulong = ior(12, AUDIO_BUF_INFO);
pub const SNDCTL_DSP_GETISPACE: c_ulong = ior(13, AUDIO_BUF_INFO);
pub const SNDCTL_DSP_NONBLOCK: c_ulong = io(14);
pub const SNDCTL_DSP_GETCAPS: c_ulong = ior(15, INT);
pub const SNDCTL_DSP_GETTRIGGER: c_ulong = ior(16, INT);
pub const SNDCTL_DSP_SETTRIGGER: c_ulong = iow(16, INT);
pub const SNDCTL_DSP_GETIPTR: c_ulong = ior(17, COUNT_INFO);
pub const SNDCTL_DSP_GETOPTR: c_ulong = ior(18, COUNT_INFO);
pub const SNDCTL_DSP_MAPINBUF: c_ulong = ior(19, BUFFMEM_DESC);
pub const SNDCTL_DSP_MAPOUTBUF: c_ulong = ior(20, BUFFMEM_DESC);
pub const SNDCTL_DSP_SETSYNCRO: c_ulong = io(21);
pub const SNDCTL_DSP_SETDUPLEX: c_ulong = io(22);
pub const SNDCTL_DSP_GETODELAY: c_ulong = ior(23, INT);
pub const SOUND_PCM_READ_RATE: c_ulong = ior(2, INT);
pub const SOUND_PCM_READ_CHANNELS: c_ulong = ior(6, INT);
pub const SOUND_PCM_READ_BITS: c_ulong = ior(5, INT);
pub const SOUND_PCM_READ_FILTER: c_ulong = ior(7, INT);

/// One legacy control request with its typed argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "request", content = "arg")]
pub enum DspRequest {
    GetVersion,
    Reset,
    Sync,
    Post,
    Speed(i32),
    Stereo(i32),
    Channels(i32),
    SetFormat(i32),
    GetBlockSize,
    Subdivide(i32),
    SetFragment(i32),
    GetFormats,
    NonBlock,
    GetCaps,
    GetTrigger,
    SetTrigger(i32),
    GetSpace(Direction),
    GetPointer(Direction),
    GetOutputDelay,
    SetDuplex,
    ReadRate,
    ReadChannels,
    ReadBits,
    MapInputBuffer,
    MapOutputBuffer,
    SetSyncro,
    ReadFilter,
    WriteFilter,
}

impl DspRequest {
    /// Decode a raw request code. `arg` is the integer the caller passed by
    /// pointer; requests without an input ignore it.
    pub fn decode(code: c_ulong, arg: i32) -> DspResult<Self> {
        let request = match code {
            OSS_GETVERSION => DspRequest::GetVersion,
            SNDCTL_DSP_RESET => DspRequest::Reset,
            SNDCTL_DSP_SYNC => DspRequest::Sync,
            SNDCTL_DSP_POST => DspRequest::Post,
            SNDCTL_DSP_SPEED => DspRequest::Speed(arg),
            SNDCTL_DSP_STEREO => DspRequest::Stereo(arg),
            SNDCTL_DSP_CHANNELS => DspRequest::Channels(arg),
            SNDCTL_DSP_SETFMT => DspRequest::SetFormat(arg),
            SNDCTL_DSP_GETBLKSIZE => DspRequest::GetBlockSize,
            SNDCTL_DSP_SUBDIVIDE => DspRequest::Subdivide(arg),
            SNDCTL_DSP_SETFRAGMENT => DspRequest::SetFragment(arg),
            SNDCTL_DSP_GETFMTS => DspRequest::GetFormats,
            SNDCTL_DSP_NONBLOCK => DspRequest::NonBlock,
            SNDCTL_DSP_GETCAPS => DspRequest::GetCaps,
            SNDCTL_DSP_GETTRIGGER => DspRequest::GetTrigger,
            SNDCTL_DSP_SETTRIGGER => DspRequest::SetTrigger(arg),
            SNDCTL_DSP_GETOSPACE => DspRequest::GetSpace(Direction::Playback),
            SNDCTL_DSP_GETISPACE => DspRequest::GetSpace(Direction::Capture),
            SNDCTL_DSP_GETOPTR => DspRequest::GetPointer(Direction::Playback),
            SNDCTL_DSP_GETIPTR => DspRequest::GetPointer(Direction::Capture),
            SNDCTL_DSP_GETODELAY => DspRequest::GetOutputDelay,
            SNDCTL_DSP_SETDUPLEX => DspRequest::SetDuplex,
            SOUND_PCM_READ_RATE => DspRequest::ReadRate,
            SOUND_PCM_READ_CHANNELS => DspRequest::ReadChannels,
            SOUND_PCM_READ_BITS => DspRequest::ReadBits,
            SNDCTL_DSP_MAPINBUF => DspRequest::MapInputBuffer,
            SNDCTL_DSP_MAPOUTBUF => DspRequest::MapOutputBuffer,
            SNDCTL_DSP_SETSYNCRO => DspRequest::SetSyncro,
            SOUND_PCM_READ_FILTER => DspRequest::ReadFilter,
            SOUND_PCM_WRITE_FILTER => DspRequest::WriteFilter,
            other => return Err(DspError::NoSuchControl(other as u64)),
        };
        Ok(request)
    }
}

/// What a request hands back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reply", content = "value")]
pub enum DspReply {
    None,
    Value(i32),
    Space(BufferInfo),
    Pointer(CountInfo),
}

impl DspReply {
    pub fn value(&self) -> Option<i32> {
        match self {
            DspReply::Value(value) => Some(*value),
            _ => None,
        }
    }
}

impl Session {
    pub fn control(&mut self, request: DspRequest) -> DspResult<DspReply> {
        self.ensure_open()?;
        let reply = match request {
            DspRequest::GetVersion => Ok(DspReply::Value(SOUND_VERSION)),
            DspRequest::Reset => self.reset().map(|()| DspReply::None),
            DspRequest::Sync => self.sync().map(|()| DspReply::None),
            DspRequest::Post | DspRequest::SetDuplex => Ok(DspReply::None),
            DspRequest::Speed(rate) => self.set_rate(rate).map(DspReply::Value),
            DspRequest::Stereo(stereo) => self.set_stereo(stereo).map(DspReply::Value),
            DspRequest::Channels(channels) => self.set_channels(channels).map(DspReply::Value),
            DspRequest::SetFormat(afmt) => self.set_format(afmt).map(DspReply::Value),
            DspRequest::GetBlockSize => self.block_size().map(DspReply::Value),
            DspRequest::Subdivide(subdivision) => {
                self.set_subdivide(subdivision).map(|()| DspReply::None)
            }
            DspRequest::SetFragment(arg) => self.set_fragment(arg).map(|()| DspReply::None),
            DspRequest::GetFormats => Ok(DspReply::Value(SUPPORTED_FORMATS)),
            DspRequest::NonBlock => self.set_nonblock(true).map(|()| DspReply::None),
            DspRequest::GetCaps => Ok(DspReply::Value(self.caps())),
            DspRequest::GetTrigger => self.trigger().map(DspReply::Value),
            DspRequest::SetTrigger(bits) => self.set_trigger(bits).map(|()| DspReply::None),
            DspRequest::GetSpace(direction) => self.space(direction).map(DspReply::Space),
            DspRequest::GetPointer(direction) => self.pointer(direction).map(DspReply::Pointer),
            DspRequest::GetOutputDelay => self.output_delay().map(DspReply::Value),
            DspRequest::ReadRate => Ok(DspReply::Value(self.rate())),
            DspRequest::ReadChannels => Ok(DspReply::Value(self.channels())),
            DspRequest::ReadBits => Ok(DspReply::Value(self.bits())),
            DspRequest::MapInputBuffer
            | DspRequest::MapOutputBuffer
            | DspRequest::SetSyncro
            | DspRequest::ReadFilter
            | DspRequest::WriteFilter => Err(DspError::invalid(format!("{request:?} unsupported"))),
        };
        debug!(?request, ?reply, "ioctl");
        reply
    }

    /// Decode and run a raw request.
    pub fn ioctl(&mut self, code: c_ulong, arg: i32) -> DspResult<DspReply> {
        let request = DspRequest::decode(code, arg).map_err(|err| {
            debug!(code, %err, "ioctl");
            err
        })?;
        self.control(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_linux_encoding() {
        assert_eq!(SNDCTL_DSP_RESET, 0x5000);
        assert_eq!(SNDCTL_DSP_SPEED, 0xc004_5002);
        assert_eq!(SNDCTL_DSP_SETFRAGMENT, 0xc004_500a);
        assert_eq!(SNDCTL_DSP_GETOSPACE, 0x8010_500c);
        assert_eq!(SNDCTL_DSP_GETOPTR, 0x800c_5012);
        assert_eq!(SNDCTL_DSP_SETTRIGGER, 0x4004_5010);
        assert_eq!(OSS_GETVERSION, 0x8004_4d76);
    }

    #[test]
    fn read_only_queries_share_numbers_with_setters() {
        assert_eq!(SOUND_PCM_READ_RATE & 0xffff, SNDCTL_DSP_SPEED & 0xffff);
        assert_ne!(SOUND_PCM_READ_RATE, SNDCTL_DSP_SPEED);
        assert_eq!(
            DspRequest::decode(SOUND_PCM_READ_BITS, 0).unwrap(),
            DspRequest::ReadBits
        );
    }

    #[test]
    fn decode_carries_the_argument() {
        assert_eq!(
            DspRequest::decode(SNDCTL_DSP_SPEED, 44_100).unwrap(),
            DspRequest::Speed(44_100)
        );
        assert_eq!(
            DspRequest::decode(SNDCTL_DSP_GETISPACE, 0).unwrap(),
            DspRequest::GetSpace(Direction::Capture)
        );
    }

    #[test]
    fn unknown_code_is_no_such_control() {
        let err = DspRequest::decode(ioc(IOC_READ, b'M', 1, INT), 0).unwrap_err();
        assert!(matches!(err, DspError::NoSuchControl(_)));
        assert_eq!(err.errno(), libc::ENXIO);
    }
}
