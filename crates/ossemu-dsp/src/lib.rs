//! Legacy DSP device emulation on top of a [`pcm_engine`] backend.
//!
//! A [`Session`] is one opened legacy descriptor (`/dev/dsp`, `/dev/audio`,
//! ...). It translates the fixed power-of-two ring model, byte counters,
//! direct mapping and trigger semantics of the legacy interface onto an
//! engine with flexible buffer negotiation and a begin/commit mapped-access
//! protocol. Xruns and suspends are recovered transparently.

pub mod config;
pub mod device;
pub mod error;
pub mod format;
pub mod geometry;
pub mod ioctl;
pub mod multiplex;
pub mod negotiate;
pub mod recovery;
pub mod session;
pub mod shadow;
pub mod stream;
pub mod table;
pub mod trigger;

pub use config::SessionConfig;
pub use device::{AccessMode, DeviceClass, DeviceNode};
pub use error::{DspError, DspResult};
pub use geometry::{EngineGeometry, LegacyGeometry, PositionModel};
pub use ioctl::{DspReply, DspRequest};
pub use multiplex::{FdSets, WaitEvents};
pub use negotiate::DspParams;
pub use recovery::{retry_once, Recovered, Recovery, RecoveryPolicy};
pub use session::Session;
pub use shadow::{MapId, Protection};
pub use stream::{BufferInfo, CountInfo, Stream};
pub use table::{SessionTable, SharedSession};
pub use trigger::{PCM_ENABLE_INPUT, PCM_ENABLE_OUTPUT};
