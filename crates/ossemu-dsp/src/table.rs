//! Caller-owned registry of open sessions.
//!
//! Lookups take a read lock on the map only; each session carries its own
//! mutex, so one descriptor can be used while others are opened or closed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use pcm_engine::RawFd;
use tracing::debug;

use crate::error::{DspError, DspResult};
use crate::session::Session;
use crate::shadow::MapId;

pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<RawFd, SharedSession>>,
    mappings: RwLock<HashMap<MapId, RawFd>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, fd: RawFd, session: Session) -> DspResult<SharedSession> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&fd) {
            return Err(DspError::invalid(format!("descriptor {fd} already registered")));
        }
        let shared = Arc::new(Mutex::new(session));
        sessions.insert(fd, Arc::clone(&shared));
        debug!(fd, "session registered");
        Ok(shared)
    }

    pub fn get(&self, fd: RawFd) -> DspResult<SharedSession> {
        self.sessions
            .read()
            .get(&fd)
            .cloned()
            .ok_or_else(|| DspError::bad_descriptor(format!("descriptor {fd}")))
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.sessions.read().contains_key(&fd)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Unregister `fd` and close its session. The descriptor is gone even
    /// when closing reports an error.
    pub fn close(&self, fd: RawFd) -> DspResult<()> {
        let session = self
            .sessions
            .write()
            .remove(&fd)
            .ok_or_else(|| DspError::bad_descriptor(format!("descriptor {fd}")))?;
        self.mappings.write().retain(|_, owner| *owner != fd);
        let result = session.lock().close();
        debug!(fd, ok = result.is_ok(), "session unregistered");
        result
    }

    pub fn mmap(&self, fd: RawFd, len: usize, prot: i32) -> DspResult<MapId> {
        let session = self.get(fd)?;
        let id = session.lock().mmap(len, prot)?;
        self.mappings.write().insert(id, fd);
        Ok(id)
    }

    /// Release a mapping by identifier, whichever descriptor owns it.
    pub fn munmap(&self, id: MapId) -> DspResult<()> {
        let fd = self
            .mappings
            .read()
            .get(&id)
            .copied()
            .ok_or_else(|| DspError::bad_descriptor(format!("no mapping {:#x}", id.0)))?;
        let session = self.get(fd)?;
        let mut session = session.lock();
        let result = session.munmap(id);
        if !session.mappings().contains(&id) {
            self.mappings.write().remove(&id);
        }
        result
    }

    /// Descriptor owning a mapping.
    pub fn mapping_owner(&self, id: MapId) -> Option<RawFd> {
        self.mappings.read().get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::device::{AccessMode, DeviceClass, DeviceNode};
    use pcm_engine::sim::SimOpener;

    fn session(opener: &SimOpener) -> Session {
        Session::open(
            opener,
            DeviceNode::new(0, DeviceClass::Dsp),
            AccessMode::WriteOnly,
            false,
            SessionConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn close_unregisters_even_twice() {
        let opener = SimOpener::default();
        let table = SessionTable::new();
        table.insert(3, session(&opener)).unwrap();
        assert!(table.insert(3, session(&opener)).is_err());
        assert!(table.contains(3));
        table.close(3).unwrap();
        assert!(table.is_empty());
        assert!(matches!(table.close(3), Err(DspError::BadDescriptor(_))));
    }

    #[test]
    fn unmap_finds_the_owning_descriptor() {
        let opener = SimOpener::default();
        let table = SessionTable::new();
        table.insert(5, session(&opener)).unwrap();
        let id = table.mmap(5, 4096, libc::PROT_WRITE).unwrap();
        assert_eq!(table.mapping_owner(id), Some(5));
        table.munmap(id).unwrap();
        assert_eq!(table.mapping_owner(id), None);
        assert!(matches!(table.munmap(id), Err(DspError::BadDescriptor(_))));
    }
}
