use std::collections::HashSet;
use std::net::SocketAddr;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::peer::{PeerError, PeerId};

/// The orchestrator's view of live sessions.
///
/// Addresses are reserved before dialing or accepting so the same peer is
/// never dialed twice, and handshaken peer-IDs are claimed so connections
/// to ourselves or to an already-connected peer close with `Duplicate`.
pub struct Registry {
    local_id: PeerId,
    max_sessions: usize,
    addrs: DashMap<SocketAddr, ()>,
    ids: Mutex<HashSet<[u8; 20]>>,
}

impl Registry {
    pub fn new(local_id: PeerId, max_sessions: usize) -> Self {
        Self {
            local_id,
            max_sessions,
            addrs: DashMap::new(),
            ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Reserves an address slot for a new session. False if the address
    /// is already connected or the session cap is reached.
    pub fn try_begin(&self, addr: SocketAddr) -> bool {
        if self.addrs.len() >= self.max_sessions || self.addrs.contains_key(&addr) {
            return false;
        }
        self.addrs.insert(addr, ()).is_none()
    }

    /// Releases an address slot when its session (or dial attempt) ends.
    pub fn end(&self, addr: SocketAddr) {
        self.addrs.remove(&addr);
    }

    pub fn is_connected(&self, addr: SocketAddr) -> bool {
        self.addrs.contains_key(&addr)
    }

    pub fn session_count(&self) -> usize {
        self.addrs.len()
    }

    /// Claims a handshaken peer-ID for the life of a session.
    ///
    /// # Errors
    ///
    /// [`PeerError::Duplicate`] if the ID is our own or already connected.
    pub fn claim_id(&self, id: PeerId) -> Result<(), PeerError> {
        if id == self.local_id || !self.ids.lock().insert(*id.as_bytes()) {
            return Err(PeerError::Duplicate);
        }
        Ok(())
    }

    pub fn release_id(&self, id: PeerId) {
        self.ids.lock().remove(id.as_bytes());
    }
}
