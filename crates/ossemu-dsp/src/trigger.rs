//! Transport control: trigger bits, reset and sync.

use pcm_engine::{Direction, PcmState};
use tracing::debug;

use crate::error::{DspError, DspResult};
use crate::session::Session;
use crate::stream::Stream;

pub const PCM_ENABLE_INPUT: i32 = 0x0000_0001;
pub const PCM_ENABLE_OUTPUT: i32 = 0x0000_0002;

const fn enable_bit(direction: Direction) -> i32 {
    match direction {
        Direction::Playback => PCM_ENABLE_OUTPUT,
        Direction::Capture => PCM_ENABLE_INPUT,
    }
}

fn enable(stream: &mut Stream) -> DspResult<()> {
    stream.stopped = false;
    stream.commit_sw()?;
    if stream.engine.state() != PcmState::Prepared {
        stream.prepare()?;
    }
    if stream.direction() == Direction::Playback {
        if let Some(shadow) = stream.shadow.as_ref() {
            let primed = shadow.prime(stream.engine.as_mut(), &mut stream.position)?;
            debug!(primed, "mapped playback primed");
        }
    }
    stream.engine.start()?;
    Ok(())
}

fn disable(stream: &mut Stream) -> DspResult<()> {
    stream.stopped = true;
    let hw_ptr = stream.engine.hw_ptr();
    stream.position.advance(hw_ptr);
    stream.engine.drop_stream()?;
    stream.commit_sw()?;
    stream.prepare()
}

impl Session {
    /// Start or stop each stream according to its `PCM_ENABLE_*` bit.
    /// Streams already in the requested mode are left alone.
    pub fn set_trigger(&mut self, bits: i32) -> DspResult<()> {
        self.ensure_open()?;
        for direction in [Direction::Capture, Direction::Playback] {
            let Some(stream) = self.streams[direction.index()].as_mut() else {
                continue;
            };
            let wanted = bits & enable_bit(direction) != 0;
            if wanted && stream.stopped {
                enable(stream)?;
                debug!(?direction, "triggered");
            } else if !wanted && !stream.stopped {
                disable(stream)?;
                debug!(?direction, "stopped");
            }
        }
        Ok(())
    }

    /// `PCM_ENABLE_*` bits of the streams currently running.
    pub fn trigger(&self) -> DspResult<i32> {
        self.ensure_open()?;
        Ok(self
            .streams
            .iter()
            .flatten()
            .filter(|stream| stream.engine.state() == PcmState::Running)
            .fold(0, |bits, stream| bits | enable_bit(stream.direction())))
    }

    /// Drop and re-prepare every stream and zero all position counters.
    pub fn reset(&mut self) -> DspResult<()> {
        self.ensure_open()?;
        let mut result = Ok(());
        for stream in self.streams.iter_mut().flatten() {
            let outcome = stream
                .engine
                .drop_stream()
                .map_err(DspError::from)
                .and_then(|()| stream.prepare());
            stream.position.reset();
            stream.transferred = 0;
            if let Err(err) = outcome {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        debug!(ok = result.is_ok(), "reset");
        result
    }

    /// Drain every stream, then re-prepare it. Only engine-side pointers are
    /// rebased; the legacy counter keeps running.
    pub fn sync(&mut self) -> DspResult<()> {
        self.ensure_open()?;
        let mut result = Ok(());
        for stream in self.streams.iter_mut().flatten() {
            let outcome = stream.engine.drain().map_err(DspError::from).and_then(|()| {
                let hw_ptr = stream.engine.hw_ptr();
                stream.position.advance(hw_ptr);
                stream.prepare()
            });
            if let Err(err) = outcome {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        debug!(ok = result.is_ok(), "sync");
        result
    }
}
