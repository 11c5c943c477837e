//! Wait-descriptor translation.
//!
//! A legacy descriptor stands for one or two engine streams, each of which
//! may need several real descriptors. Preparation expands the legacy request
//! into engine descriptors; the result step folds what the real wait reported
//! back into one legacy event mask.

use std::collections::BTreeSet;

use bitflags::bitflags;
use pcm_engine::{PollEvents, PollFd, RawFd, SwParams};
use tracing::{debug, trace};

use crate::device::AccessMode;
use crate::error::DspResult;
use crate::negotiate;
use crate::session::Session;

bitflags! {
    /// `OSS_WAIT_EVENT_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WaitEvents: i32 {
        const READ = 1;
        const WRITE = 2;
        const ERROR = 4;
    }
}

impl WaitEvents {
    pub fn from_poll(revents: PollEvents) -> Self {
        let mut events = WaitEvents::empty();
        if revents.intersects(PollEvents::ERR | PollEvents::NVAL) {
            events |= WaitEvents::ERROR;
        }
        if revents.contains(PollEvents::IN) {
            events |= WaitEvents::READ;
        }
        if revents.contains(PollEvents::OUT) {
            events |= WaitEvents::WRITE;
        }
        events
    }
}

/// The three descriptor sets of a `select(2)` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdSets {
    pub read: BTreeSet<RawFd>,
    pub write: BTreeSet<RawFd>,
    pub except: BTreeSet<RawFd>,
}

impl Session {
    /// Number of engine descriptors behind this session.
    pub fn poll_fds(&self) -> usize {
        self.streams
            .iter()
            .flatten()
            .map(|stream| stream.engine.poll_descriptors().len())
            .sum()
    }

    /// Engine descriptors to wait on for `mode`. A mapped stream wakes up at
    /// the next legacy period boundary.
    pub fn poll_prepare(&mut self, mode: AccessMode) -> DspResult<Vec<PollFd>> {
        self.ensure_open()?;
        self.wait_mode = Some(mode);
        let mut fds = Vec::new();
        for direction in mode.directions() {
            let Some(stream) = self.streams[direction.index()].as_mut() else {
                continue;
            };
            if stream.is_mapped() {
                let hw = stream.require_hw()?;
                let period = stream.position.legacy.period_size.max(1);
                let avail_min = period - stream.position.engine.appl_ptr % period;
                let sw = SwParams {
                    avail_min,
                    ..negotiate::sw_params(&hw, stream.stopped, true)
                };
                stream.commit_sw_params(sw)?;
                trace!(?direction, avail_min, "mapped wakeup");
            }
            fds.extend(stream.engine.poll_descriptors());
        }
        debug!(?mode, count = fds.len(), "poll prepare");
        Ok(fds)
    }

    /// Fold the results of a real `poll` over the prepared descriptors.
    pub fn poll_result(&self, fds: &[PollFd]) -> DspResult<WaitEvents> {
        self.ensure_open()?;
        let mode = self.wait_mode.unwrap_or(self.mode);
        let mut revents = PollEvents::empty();
        for direction in mode.directions() {
            if let Some(stream) = self.stream(direction) {
                revents |= stream.engine.poll_revents(fds)?;
            }
        }
        let events = WaitEvents::from_poll(revents);
        debug!(?events, "poll result");
        Ok(events)
    }

    /// Add the engine descriptors for `mode` to `sets`. Returns the highest
    /// descriptor added, or -1.
    pub fn select_prepare(
        &mut self,
        mode: AccessMode,
        sets: &mut FdSets,
        watch_errors: bool,
    ) -> DspResult<RawFd> {
        let mut highest = -1;
        for pfd in self.poll_prepare(mode)? {
            if pfd.events.contains(PollEvents::IN) {
                sets.read.insert(pfd.fd);
            }
            if pfd.events.contains(PollEvents::OUT) {
                sets.write.insert(pfd.fd);
            }
            if watch_errors {
                sets.except.insert(pfd.fd);
            }
            highest = highest.max(pfd.fd);
        }
        Ok(highest)
    }

    /// Fold the sets a real `select` returned.
    pub fn select_result(&self, sets: &FdSets) -> DspResult<WaitEvents> {
        self.ensure_open()?;
        let mode = self.wait_mode.unwrap_or(self.mode);
        let mut fds = Vec::new();
        for direction in mode.directions() {
            let Some(stream) = self.stream(direction) else {
                continue;
            };
            for mut pfd in stream.engine.poll_descriptors() {
                if pfd.events.contains(PollEvents::IN) && sets.read.contains(&pfd.fd) {
                    pfd.revents |= PollEvents::IN;
                }
                if pfd.events.contains(PollEvents::OUT) && sets.write.contains(&pfd.fd) {
                    pfd.revents |= PollEvents::OUT;
                }
                if sets.except.contains(&pfd.fd) {
                    pfd.revents |= PollEvents::ERR;
                }
                fds.push(pfd);
            }
        }
        self.poll_result(&fds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_bits_map_onto_wait_events() {
        assert_eq!(
            WaitEvents::from_poll(PollEvents::IN | PollEvents::OUT),
            WaitEvents::READ | WaitEvents::WRITE
        );
        assert_eq!(WaitEvents::from_poll(PollEvents::NVAL), WaitEvents::ERROR);
        assert_eq!(WaitEvents::from_poll(PollEvents::HUP), WaitEvents::empty());
    }
}
