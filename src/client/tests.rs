use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tempfile::TempDir;

use super::*;
use crate::bencode::{encode, Value};
use crate::metainfo::Metainfo;
use crate::peer::{Bitfield, PeerId};
use crate::store::PieceStore;

const PIECE_LEN: u64 = 32;
const BLOCK_SIZE: u32 = 16;

fn make_metainfo(total: usize) -> Arc<Metainfo> {
    let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
    let mut hashes = Vec::new();
    for piece in data.chunks(PIECE_LEN as usize) {
        let mut hasher = Sha1::new();
        hasher.update(piece);
        hashes.extend_from_slice(&hasher.finalize());
    }

    let mut info = BTreeMap::new();
    info.insert(Bytes::from_static(b"length"), Value::Integer(total as i64));
    info.insert(Bytes::from_static(b"name"), Value::string("target.bin"));
    info.insert(
        Bytes::from_static(b"piece length"),
        Value::Integer(PIECE_LEN as i64),
    );
    info.insert(Bytes::from_static(b"pieces"), Value::Bytes(hashes.into()));

    let mut root = BTreeMap::new();
    root.insert(
        Bytes::from_static(b"announce"),
        Value::string("http://tracker.test/announce"),
    );
    root.insert(Bytes::from_static(b"info"), Value::Dict(info));

    Arc::new(Metainfo::from_bytes(&encode(&Value::Dict(root))).unwrap())
}

async fn make_scheduler(dir: &TempDir) -> (Arc<Scheduler>, Arc<PieceStore>) {
    // 96 bytes -> pieces 0..3, two 16-byte blocks each
    let metainfo = make_metainfo(96);
    let store = Arc::new(
        PieceStore::open(metainfo, dir.path(), BLOCK_SIZE)
            .await
            .unwrap(),
    );
    (Arc::new(Scheduler::new(store.clone())), store)
}

fn full_bitfield(pieces: usize) -> Bitfield {
    let mut bf = Bitfield::new(pieces);
    for i in 0..pieces as u32 {
        bf.set(i);
    }
    bf
}

#[tokio::test]
async fn availability_tracks_session_deltas() {
    let dir = TempDir::new().unwrap();
    let (scheduler, _store) = make_scheduler(&dir).await;

    let mut bf = Bitfield::new(3);
    bf.set(0);
    bf.set(2);
    scheduler.peer_joined(&bf);
    scheduler.peer_has(2);
    assert_eq!(scheduler.availability(0), 1);
    assert_eq!(scheduler.availability(1), 0);
    assert_eq!(scheduler.availability(2), 2);

    scheduler.peer_left(&bf);
    assert_eq!(scheduler.availability(0), 0);
    assert_eq!(scheduler.availability(2), 1);

    // Departures never underflow.
    scheduler.peer_left(&bf);
    assert_eq!(scheduler.availability(0), 0);
}

#[tokio::test]
async fn rarest_piece_is_requested_first() {
    let dir = TempDir::new().unwrap();
    let (scheduler, _store) = make_scheduler(&dir).await;

    // Two peers hold pieces 0 and 2; only one peer holds piece 1.
    let mut common = Bitfield::new(3);
    common.set(0);
    common.set(2);
    scheduler.peer_joined(&common);
    scheduler.peer_joined(&common);
    let all = full_bitfield(3);
    scheduler.peer_joined(&all);

    let first = scheduler.next_request(&all).unwrap();
    assert_eq!(first.piece, 1);
    assert_eq!((first.offset, first.length), (0, 16));

    // The partially reserved piece is finished before a fresh one opens.
    let second = scheduler.next_request(&all).unwrap();
    assert_eq!(second.piece, 1);
    assert_eq!((second.offset, second.length), (16, 16));

    let third = scheduler.next_request(&all).unwrap();
    assert_ne!(third.piece, 1);
}

#[tokio::test]
async fn requests_only_pieces_the_remote_has() {
    let dir = TempDir::new().unwrap();
    let (scheduler, _store) = make_scheduler(&dir).await;

    let mut only_two = Bitfield::new(3);
    only_two.set(2);
    scheduler.peer_joined(&only_two);

    for _ in 0..2 {
        let request = scheduler.next_request(&only_two).unwrap();
        assert_eq!(request.piece, 2);
    }
    // Both blocks of piece 2 reserved; nothing else is eligible.
    assert!(scheduler.next_request(&only_two).is_none());
    assert!(scheduler.next_request(&Bitfield::new(3)).is_none());
}

#[tokio::test]
async fn released_blocks_become_requestable_again() {
    let dir = TempDir::new().unwrap();
    let (scheduler, store) = make_scheduler(&dir).await;

    let all = full_bitfield(3);
    scheduler.peer_joined(&all);

    let mut requests = Vec::new();
    while let Some(request) = scheduler.next_request(&all) {
        requests.push(request);
    }
    assert_eq!(requests.len(), 6);

    // A dropped session returns its reservations to the pool.
    let lost = requests[0];
    store.release_block(lost.piece, lost.offset, lost.length);
    assert_eq!(scheduler.next_request(&all), Some(lost));
}

#[test]
fn registry_caps_sessions_and_dedupes() {
    let registry = Registry::new(PeerId::generate(), 2);
    let a: SocketAddr = "10.0.0.1:6881".parse().unwrap();
    let b: SocketAddr = "10.0.0.2:6881".parse().unwrap();
    let c: SocketAddr = "10.0.0.3:6881".parse().unwrap();

    assert!(registry.try_begin(a));
    assert!(!registry.try_begin(a));
    assert!(registry.try_begin(b));
    assert!(!registry.try_begin(c));
    assert_eq!(registry.session_count(), 2);

    registry.end(a);
    assert!(!registry.is_connected(a));
    assert!(registry.try_begin(c));
}

#[test]
fn registry_rejects_self_and_duplicate_ids() {
    let local = PeerId::generate();
    let registry = Registry::new(local, 8);

    assert!(registry.claim_id(local).is_err());

    let other = PeerId::from_bytes([0x55; 20]);
    assert!(registry.claim_id(other).is_ok());
    assert!(registry.claim_id(other).is_err());
    registry.release_id(other);
    assert!(registry.claim_id(other).is_ok());
}

#[test]
fn config_defaults_match_surface() {
    let config = Config::new("a.torrent");
    assert_eq!(config.listen_port, 6881);
    assert_eq!(config.pipeline_depth, 5);
    assert_eq!(config.block_size, 16384);
    assert_eq!(config.max_sessions, 50);
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.keepalive_interval, Duration::from_secs(120));
}
