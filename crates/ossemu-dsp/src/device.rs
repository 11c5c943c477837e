//! Legacy device nodes and open modes.

use pcm_engine::{Direction, SampleFormat};
use serde::{Deserialize, Serialize};

use crate::error::{DspError, DspResult};

/// Character-device major number of the legacy sound devices.
pub const OSS_MAJOR: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Dsp,
    DspW,
    Audio,
    Adsp,
}

impl DeviceClass {
    // Longer prefixes first so `/dev/dspW0` is not read as `/dev/dsp`.
    const BY_PREFIX: [DeviceClass; 4] = [
        DeviceClass::DspW,
        DeviceClass::Dsp,
        DeviceClass::Adsp,
        DeviceClass::Audio,
    ];

    /// Low nibble of the device minor.
    pub const fn minor_class(self) -> u32 {
        match self {
            DeviceClass::Dsp => 3,
            DeviceClass::Audio => 4,
            DeviceClass::DspW => 5,
            DeviceClass::Adsp => 12,
        }
    }

    pub fn from_minor_class(class: u32) -> Option<Self> {
        match class {
            3 => Some(DeviceClass::Dsp),
            4 => Some(DeviceClass::Audio),
            5 => Some(DeviceClass::DspW),
            12 => Some(DeviceClass::Adsp),
            _ => None,
        }
    }

    pub const fn prefix(self) -> &'static str {
        match self {
            DeviceClass::Dsp => "dsp",
            DeviceClass::DspW => "dspW",
            DeviceClass::Audio => "audio",
            DeviceClass::Adsp => "adsp",
        }
    }

    /// Format a freshly opened node starts with.
    pub const fn default_format(self) -> SampleFormat {
        match self {
            DeviceClass::Dsp | DeviceClass::Adsp => SampleFormat::U8,
            DeviceClass::DspW => SampleFormat::S16Le,
            DeviceClass::Audio => SampleFormat::MuLaw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceNode {
    pub card: u32,
    pub class: DeviceClass,
}

impl DeviceNode {
    pub const fn new(card: u32, class: DeviceClass) -> Self {
        Self { card, class }
    }

    /// Parse `/dev/dsp`, `/dev/dspW1`, `/dev/audio2`, ...
    pub fn from_path(path: &str) -> DspResult<Self> {
        let no_entry = || DspError::NoEntry(path.to_string());
        let name = path.strip_prefix("/dev/").ok_or_else(no_entry)?;
        for class in DeviceClass::BY_PREFIX {
            let Some(suffix) = name.strip_prefix(class.prefix()) else {
                continue;
            };
            let card = if suffix.is_empty() {
                0
            } else if suffix.bytes().all(|byte| byte.is_ascii_digit()) {
                suffix.parse().map_err(|_| no_entry())?
            } else {
                return Err(no_entry());
            };
            if card > 0x0f {
                return Err(no_entry());
            }
            return Ok(Self::new(card, class));
        }
        Err(no_entry())
    }

    /// Decode a raw device minor (`card << 4 | class`).
    pub fn from_minor(minor: u32) -> DspResult<Self> {
        DeviceClass::from_minor_class(minor & 0x0f)
            .map(|class| Self::new((minor >> 4) & 0x0f, class))
            .ok_or_else(|| DspError::NoEntry(format!("minor {minor}")))
    }

    /// Decode a raw `st_rdev`, rejecting anything outside the sound major.
    pub fn from_rdev(rdev: u64) -> DspResult<Self> {
        let major = ((rdev >> 8) & 0xff) as u32;
        if major != OSS_MAJOR {
            return Err(DspError::NoEntry(format!("device {major}:{}", rdev & 0xff)));
        }
        Self::from_minor((rdev & 0xff) as u32)
    }

    pub const fn minor(&self) -> u32 {
        (self.card << 4) | self.class.minor_class()
    }

    /// Engine device name tried first.
    pub fn engine_name(&self) -> String {
        format!("{}{}", self.class.prefix(), self.card)
    }

    /// Engine device name tried when [`engine_name`](Self::engine_name) fails.
    pub fn fallback_name(&self) -> String {
        if self.card == 0 && matches!(self.class, DeviceClass::Dsp | DeviceClass::Audio) {
            "default".to_string()
        } else {
            format!("plughw:{}", self.card)
        }
    }

    pub fn path(&self) -> String {
        if self.card == 0 {
            format!("/dev/{}", self.class.prefix())
        } else {
            format!("/dev/{}{}", self.class.prefix(), self.card)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Decode the `O_ACCMODE` bits of open flags.
    pub fn from_flags(flags: i32) -> DspResult<Self> {
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => Ok(AccessMode::ReadOnly),
            libc::O_WRONLY => Ok(AccessMode::WriteOnly),
            libc::O_RDWR => Ok(AccessMode::ReadWrite),
            other => Err(DspError::invalid(format!("access mode {other:#x}"))),
        }
    }

    pub const fn includes(self, direction: Direction) -> bool {
        match (self, direction) {
            (AccessMode::ReadWrite, _) => true,
            (AccessMode::ReadOnly, Direction::Capture) => true,
            (AccessMode::WriteOnly, Direction::Playback) => true,
            _ => false,
        }
    }

    /// Directions opened for this mode, playback first.
    pub fn directions(self) -> impl Iterator<Item = Direction> {
        Direction::ALL
            .into_iter()
            .filter(move |direction| self.includes(*direction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_dsp_path_is_not_mistaken_for_dsp() {
        assert_eq!(
            DeviceNode::from_path("/dev/dspW1").unwrap(),
            DeviceNode::new(1, DeviceClass::DspW)
        );
        assert_eq!(
            DeviceNode::from_path("/dev/dsp").unwrap(),
            DeviceNode::new(0, DeviceClass::Dsp)
        );
        assert_eq!(
            DeviceNode::from_path("/dev/adsp2").unwrap(),
            DeviceNode::new(2, DeviceClass::Adsp)
        );
    }

    #[test]
    fn unknown_paths_are_rejected() {
        for path in ["/dev/mixer", "/dev/dspX", "dsp", "/dev/audio99"] {
            assert!(matches!(
                DeviceNode::from_path(path),
                Err(DspError::NoEntry(_))
            ));
        }
    }

    #[test]
    fn minor_round_trip_and_names() {
        let node = DeviceNode::new(1, DeviceClass::Audio);
        assert_eq!(node.minor(), 0x14);
        assert_eq!(DeviceNode::from_minor(0x14).unwrap(), node);
        assert_eq!(node.engine_name(), "audio1");
        assert_eq!(node.fallback_name(), "plughw:1");
        assert_eq!(
            DeviceNode::new(0, DeviceClass::Dsp).fallback_name(),
            "default"
        );
        assert_eq!(
            DeviceNode::new(0, DeviceClass::DspW).fallback_name(),
            "plughw:0"
        );
        assert!(DeviceNode::from_rdev((3 << 8) | 0x03).is_err());
        assert_eq!(
            DeviceNode::from_rdev((14 << 8) | 0x03).unwrap(),
            DeviceNode::new(0, DeviceClass::Dsp)
        );
    }

    #[test]
    fn access_mode_selects_streams() {
        let mode = AccessMode::from_flags(libc::O_RDWR | libc::O_NONBLOCK).unwrap();
        assert_eq!(
            mode.directions().collect::<Vec<_>>(),
            vec![Direction::Playback, Direction::Capture]
        );
        let mode = AccessMode::from_flags(libc::O_RDONLY).unwrap();
        assert_eq!(mode.directions().collect::<Vec<_>>(), vec![Direction::Capture]);
    }
}
