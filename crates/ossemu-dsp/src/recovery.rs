//! Transparent xrun and suspend recovery.
//!
//! Every engine transfer or status call goes through [`retry_once`]: when the
//! engine reports an xrun or a suspend, the stream is brought back to a usable
//! state and the call is repeated exactly once.

use std::thread;
use std::time::Duration;

use pcm_engine::{Direction, EngineError, EngineResult, Frames, PcmBackend, PcmState};
use tracing::warn;

use crate::error::{DspError, DspResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub resume_backoff: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            resume_backoff: Duration::from_secs(1),
        }
    }
}

/// How a stream was brought back after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Re-prepared: engine pointers restarted from zero.
    Prepared,
    /// Resumed where it was suspended.
    Resumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovered<T> {
    pub value: T,
    pub recovery: Option<Recovery>,
    /// Engine hardware pointer at the failure, before any recovery ran.
    pub stalled_at: Option<Frames>,
}

impl<T> Recovered<T> {
    /// Whether engine pointers restarted from zero.
    pub fn rebased(&self) -> bool {
        self.recovery == Some(Recovery::Prepared)
    }
}

/// Run `op`, and if it fails with a recoverable condition, recover the stream
/// and run it once more. A second failure is returned as is.
pub fn retry_once<T>(
    engine: &mut dyn PcmBackend,
    policy: &RecoveryPolicy,
    mut op: impl FnMut(&mut dyn PcmBackend) -> EngineResult<T>,
) -> DspResult<Recovered<T>> {
    let err = match op(engine) {
        Ok(value) => {
            return Ok(Recovered {
                value,
                recovery: None,
                stalled_at: None,
            })
        }
        Err(err) => err,
    };
    let stalled_at = engine.hw_ptr();
    let recovery = match recover(engine, policy, &err)? {
        Some(recovery) => recovery,
        None => return Err(DspError::Engine(err)),
    };
    let value = op(engine)?;
    Ok(Recovered {
        value,
        recovery: Some(recovery),
        stalled_at: Some(stalled_at),
    })
}

/// Bring `engine` back after `err`. Returns `None` when `err` is not a
/// recoverable condition.
pub fn recover(
    engine: &mut dyn PcmBackend,
    policy: &RecoveryPolicy,
    err: &EngineError,
) -> DspResult<Option<Recovery>> {
    match err {
        EngineError::Xrun => {
            warn!(name = engine.name(), "xrun, re-preparing stream");
            engine.prepare()?;
            Ok(Some(Recovery::Prepared))
        }
        EngineError::BadState(PcmState::Draining)
            if engine.direction() == Direction::Capture =>
        {
            warn!(name = engine.name(), "capture stream draining, re-preparing");
            engine.prepare()?;
            Ok(Some(Recovery::Prepared))
        }
        EngineError::Suspended => {
            warn!(name = engine.name(), "stream suspended, resuming");
            let resumed = loop {
                match engine.resume() {
                    Err(EngineError::WouldBlock) => thread::sleep(policy.resume_backoff),
                    other => break other,
                }
            };
            match resumed {
                Ok(()) => Ok(Some(Recovery::Resumed)),
                Err(err) => {
                    warn!(name = engine.name(), %err, "resume failed, re-preparing stream");
                    engine.prepare()?;
                    Ok(Some(Recovery::Prepared))
                }
            }
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcm_engine::sim::{Fault, SimConfig, SimControl, SimOpener};
    use pcm_engine::{HwParams, PcmOpener, SampleFormat};

    fn playback(config: SimConfig) -> (Box<dyn PcmBackend>, SimControl) {
        let opener = SimOpener::new(config);
        let mut pcm = opener.open("dsp0", Direction::Playback, false).unwrap();
        let mut params = HwParams::any(&pcm.capabilities());
        params.set_format(SampleFormat::U8).unwrap();
        params.set_channels(1).unwrap();
        pcm.commit_hw(&params).unwrap();
        (pcm, opener.control(Direction::Playback).unwrap())
    }

    fn quick() -> RecoveryPolicy {
        RecoveryPolicy {
            resume_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn xrun_is_retried_after_prepare() {
        let (mut pcm, control) = playback(SimConfig::default());
        control.inject(Fault::Xrun);
        let written = retry_once(pcm.as_mut(), &quick(), |pcm| pcm.writei(&[0x80; 8], 8)).unwrap();
        assert_eq!(written.value, 8);
        assert!(written.rebased());
        assert_eq!(written.stalled_at, Some(0));
    }

    #[test]
    fn suspend_waits_for_resume() {
        let (mut pcm, control) = playback(SimConfig::default());
        control.inject(Fault::Suspend { busy: 3 });
        let written = retry_once(pcm.as_mut(), &quick(), |pcm| pcm.writei(&[0x80; 8], 8)).unwrap();
        assert_eq!(written.recovery, Some(Recovery::Resumed));
    }

    #[test]
    fn failed_resume_falls_back_to_prepare() {
        let (mut pcm, control) = playback(SimConfig::default().with_resumable(false));
        control.inject(Fault::Suspend { busy: 0 });
        let written = retry_once(pcm.as_mut(), &quick(), |pcm| pcm.writei(&[0x80; 8], 8)).unwrap();
        assert!(written.rebased());
    }

    #[test]
    fn second_failure_surfaces() {
        let (mut pcm, control) = playback(SimConfig::default());
        control.inject(Fault::Xrun);
        control.inject(Fault::Xrun);
        let err = retry_once(pcm.as_mut(), &quick(), |pcm| pcm.writei(&[0x80; 8], 8)).unwrap_err();
        assert_eq!(err, DspError::Engine(EngineError::Xrun));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let (mut pcm, _control) = playback(SimConfig::default());
        let mut calls = 0;
        let err = retry_once(pcm.as_mut(), &quick(), |_| {
            calls += 1;
            Err::<(), _>(EngineError::WouldBlock)
        })
        .unwrap_err();
        assert_eq!(err, DspError::Engine(EngineError::WouldBlock));
        assert_eq!(calls, 1);
    }
}
