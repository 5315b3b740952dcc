use std::net::SocketAddr;

use super::error::TrackerError;
use crate::bencode::decode;
use crate::peer::PeerId;

/// Lifecycle event attached to an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Periodic announce, no event parameter.
    None,
    Started,
    Completed,
    Stopped,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Completed => "completed",
            TrackerEvent::Stopped => "stopped",
        }
    }
}

/// One peer from an announce response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub addr: SocketAddr,
    /// Present in the dictionary peer-list form.
    pub peer_id: Option<PeerId>,
}

/// A parsed announce response.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds until the next periodic announce.
    pub interval: u64,
    pub peers: Vec<PeerEntry>,
}

impl AnnounceResponse {
    /// Parses a bencoded announce response.
    ///
    /// # Errors
    ///
    /// Fails on malformed bencode, a missing `interval`, a `failure
    /// reason` from the tracker, or a compact (byte-string) `peers` value.
    /// Malformed entries within the peer list are skipped.
    pub fn from_bencode(data: &[u8]) -> Result<Self, TrackerError> {
        let root = decode(data)?;
        if root.as_dict().is_none() {
            return Err(TrackerError::InvalidResponse("expected dictionary".into()));
        }

        if let Some(reason) = root.get(b"failure reason").and_then(|v| v.as_str()) {
            return Err(TrackerError::Failure(reason.to_string()));
        }

        let interval = root
            .get(b"interval")
            .and_then(|v| v.as_integer())
            .filter(|&i| i >= 0)
            .ok_or_else(|| TrackerError::InvalidResponse("missing interval".into()))?
            as u64;

        let peers = match root.get(b"peers") {
            None => Vec::new(),
            Some(value) if value.as_bytes().is_some() => {
                return Err(TrackerError::CompactUnsupported);
            }
            Some(value) => {
                let list = value
                    .as_list()
                    .ok_or_else(|| TrackerError::InvalidResponse("peers not a list".into()))?;
                list.iter().filter_map(parse_peer).collect()
            }
        };

        Ok(Self { interval, peers })
    }
}

fn parse_peer(value: &crate::bencode::Value) -> Option<PeerEntry> {
    let ip = value.get(b"ip")?.as_str()?.parse().ok()?;
    let port = value
        .get(b"port")?
        .as_integer()
        .filter(|&p| (1..=u16::MAX as i64).contains(&p))? as u16;
    let peer_id = value
        .get(b"peer id")
        .and_then(|v| v.as_bytes())
        .filter(|b| b.len() == 20)
        .map(|b| {
            let mut id = [0u8; 20];
            id.copy_from_slice(b);
            PeerId::from_bytes(id)
        });
    Some(PeerEntry {
        addr: SocketAddr::new(ip, port),
        peer_id,
    })
}
