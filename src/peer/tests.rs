use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;

use super::*;
use crate::bencode::{encode, Value};
use crate::client::{Registry, Scheduler};
use crate::metainfo::{InfoHash, Metainfo};
use crate::store::PieceStore;

#[test]
fn handshake_roundtrip() {
    let handshake = Handshake::new(InfoHash([0x42; 20]), PeerId::from_bytes([0x07; 20]));
    let encoded = handshake.encode();
    assert_eq!(encoded.len(), HANDSHAKE_LEN);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, InfoHash([0x42; 20]));
    assert_eq!(decoded.peer_id.as_bytes(), &[0x07; 20]);
}

#[test]
fn handshake_rejects_wrong_tag() {
    let handshake = Handshake::new(InfoHash([0x42; 20]), PeerId::from_bytes([0x07; 20]));
    let mut bytes = handshake.encode().to_vec();
    bytes[5] ^= 0xff;
    assert!(matches!(
        Handshake::decode(&bytes),
        Err(PeerError::BadHandshake)
    ));
    assert!(matches!(
        Handshake::decode(&bytes[..67]),
        Err(PeerError::BadHandshake)
    ));
}

#[test]
fn message_roundtrips() {
    let messages = [
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have(7),
        Message::Bitfield(Bytes::from_static(&[0b1010_0000])),
        Message::Request(BlockRequest::new(1, 16384, 16384)),
        Message::Piece {
            piece: 2,
            offset: 32768,
            data: Bytes::from_static(b"block data"),
        },
        Message::Cancel(BlockRequest::new(1, 16384, 16384)),
    ];
    for message in messages {
        let mut framed = message.encode();
        // Strip the length prefix the way the transport does.
        let _ = framed.split_to(4);
        assert_eq!(Message::decode(framed).unwrap(), message);
    }
}

#[test]
fn wire_layout_matches_protocol() {
    // request: length 13, id 6, three big-endian u32 fields
    let encoded = Message::Request(BlockRequest::new(1, 2, 3)).encode();
    assert_eq!(
        encoded.as_ref(),
        &[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]
    );
    // keepalive is a bare zero length
    assert_eq!(Message::KeepAlive.encode().as_ref(), &[0, 0, 0, 0]);
    // have: length 5, id 4
    assert_eq!(
        Message::Have(9).encode().as_ref(),
        &[0, 0, 0, 5, 4, 0, 0, 0, 9]
    );
}

#[test]
fn unknown_message_id_is_rejected() {
    assert!(matches!(
        Message::decode(Bytes::from_static(&[9])),
        Err(PeerError::UnknownMessageId(9))
    ));
    assert!(matches!(
        Message::decode(Bytes::from_static(&[20, 0])),
        Err(PeerError::UnknownMessageId(20))
    ));
}

#[test]
fn wrong_payload_lengths_are_rejected() {
    // have with 3 payload bytes
    assert!(matches!(
        Message::decode(Bytes::from_static(&[4, 0, 0, 1])),
        Err(PeerError::InvalidMessage(_))
    ));
    // choke with a payload
    assert!(matches!(
        Message::decode(Bytes::from_static(&[0, 1])),
        Err(PeerError::InvalidMessage(_))
    ));
    // request one byte short
    let mut request = Message::Request(BlockRequest::new(0, 0, 16384)).encode();
    let _ = request.split_to(4);
    let truncated = request.slice(..request.len() - 1);
    assert!(matches!(
        Message::decode(truncated),
        Err(PeerError::InvalidMessage(_))
    ));
}

#[test]
fn bitfield_bit_order_is_msb_first() {
    let mut bf = Bitfield::new(12);
    bf.set(0);
    bf.set(9);
    assert_eq!(bf.to_bytes().as_ref(), &[0b1000_0000, 0b0100_0000]);
    assert!(bf.has(0) && bf.has(9));
    assert!(!bf.has(1) && !bf.has(11));
    assert_eq!(bf.count(), 2);
}

#[test]
fn bitfield_wire_length_is_exact() {
    assert!(Bitfield::from_wire(&[0xff, 0xff], 12).is_some());
    assert!(Bitfield::from_wire(&[0xff], 12).is_none());
    assert!(Bitfield::from_wire(&[0xff, 0xff, 0x00], 12).is_none());

    // Spare bits beyond the piece count are dropped.
    let bf = Bitfield::from_wire(&[0xff, 0xff], 12).unwrap();
    assert_eq!(bf.count(), 12);
    assert_eq!(bf.to_bytes().as_ref(), &[0xff, 0xf0]);
}

#[test]
fn bitfield_missing_from() {
    let mut theirs = Bitfield::new(4);
    theirs.set(0);
    theirs.set(2);
    let mut ours = Bitfield::new(4);
    ours.set(0);
    let missing: Vec<u32> = theirs.missing_from(&ours).collect();
    assert_eq!(missing, vec![2]);
}

#[test]
fn peer_id_carries_client_prefix() {
    let id = PeerId::generate();
    assert_eq!(&id.as_bytes()[..8], b"-SH0001-");
    assert_ne!(PeerId::generate(), id);
}

// --- session integration over loopback TCP ---

const PIECE_LEN: u64 = 32;
const BLOCK_SIZE: u32 = 16;

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn make_metainfo(content: &[u8]) -> Arc<Metainfo> {
    let mut hashes = Vec::new();
    for piece in content.chunks(PIECE_LEN as usize) {
        let mut hasher = Sha1::new();
        hasher.update(piece);
        hashes.extend_from_slice(&hasher.finalize());
    }

    let mut info = BTreeMap::new();
    info.insert(
        Bytes::from_static(b"length"),
        Value::Integer(content.len() as i64),
    );
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

async fn make_context(
    metainfo: Arc<Metainfo>,
    dir: &TempDir,
) -> (SessionContext, Arc<PieceStore>, watch::Sender<bool>) {
    let store = Arc::new(
        PieceStore::open(metainfo.clone(), dir.path(), BLOCK_SIZE)
            .await
            .unwrap(),
    );
    let scheduler = Arc::new(Scheduler::new(store.clone()));
    let registry = Arc::new(Registry::new(PeerId::generate(), 8));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = SessionContext {
        metainfo,
        store: store.clone(),
        scheduler,
        registry,
        uploaded: Arc::new(AtomicU64::new(0)),
        pipeline_depth: 4,
        request_timeout: Duration::from_secs(5),
        keepalive_interval: Duration::from_secs(20),
        shutdown: shutdown_rx,
    };
    (ctx, store, shutdown_tx)
}

#[tokio::test]
async fn seed_to_leech_transfer_over_loopback() {
    let data = content(80);
    let metainfo = make_metainfo(&data);

    let seed_dir = TempDir::new().unwrap();
    std::fs::write(seed_dir.path().join("target.bin"), &data).unwrap();
    let (seed_ctx, seed_store, seed_shutdown) = make_context(metainfo.clone(), &seed_dir).await;
    assert!(seed_store.is_complete());

    let leech_dir = TempDir::new().unwrap();
    let (leech_ctx, leech_store, leech_shutdown) = make_context(metainfo, &leech_dir).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let seed_task = tokio::spawn(async move {
        let (stream, peer_addr) = listener.accept().await.unwrap();
        let session = PeerSession::accept(stream, peer_addr, seed_ctx).await.unwrap();
        session.run().await
    });

    let leech_session = PeerSession::connect(addr, leech_ctx).await.unwrap();
    let leech_task = tokio::spawn(leech_session.run());

    // Wait for the whole file to arrive and verify.
    let complete = timeout(Duration::from_secs(10), async {
        while !leech_store.is_complete() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(complete.is_ok(), "transfer did not finish in time");

    let received = std::fs::read(leech_dir.path().join("target.bin")).unwrap();
    assert_eq!(received, data);

    // Both sessions wind down cleanly on the shutdown signal.
    seed_shutdown.send(true).unwrap();
    leech_shutdown.send(true).unwrap();
    assert!(matches!(
        timeout(Duration::from_secs(5), leech_task).await,
        Ok(Ok(Ok(())))
    ));
    let _ = timeout(Duration::from_secs(5), seed_task).await;
}

#[tokio::test]
async fn pipeline_never_exceeds_configured_depth() {
    // 960 bytes -> 30 pieces of two blocks each: far more candidate
    // blocks than the pipeline may hold at once.
    let data = content(960);
    let metainfo = make_metainfo(&data);

    let seed_dir = TempDir::new().unwrap();
    std::fs::write(seed_dir.path().join("target.bin"), &data).unwrap();
    let (seed_ctx, _seed_store, _seed_shutdown) = make_context(metainfo.clone(), &seed_dir).await;

    let leech_dir = TempDir::new().unwrap();
    let (leech_ctx, _leech_store, _leech_shutdown) =
        make_context(metainfo.clone(), &leech_dir).await;
    let depth = leech_ctx.pipeline_depth;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepter = tokio::spawn(async move {
        let (stream, peer_addr) = listener.accept().await.unwrap();
        PeerSession::accept(stream, peer_addr, seed_ctx).await
    });
    let mut leech = PeerSession::connect(addr, leech_ctx).await.unwrap();
    // Keep the remote end alive so request frames have somewhere to go.
    let _seed = accepter.await.unwrap().unwrap();

    let mut remote = Bitfield::new(metainfo.piece_count());
    for i in 0..metainfo.piece_count() as u32 {
        remote.set(i);
    }
    leech.assume_unchoked(remote);

    // However often the pipeline is refilled, the bound holds.
    for _ in 0..5 {
        leech.fill_pipeline().await.unwrap();
        assert_eq!(leech.outstanding_len(), depth);
    }

    // An answered request frees exactly one slot, and a refill tops the
    // pipeline back up to the bound, never past it.
    let freed = leech.forget_one_outstanding().unwrap();
    assert_eq!(leech.outstanding_len(), depth - 1);
    leech.fill_pipeline().await.unwrap();
    assert_eq!(leech.outstanding_len(), depth);

    // The freed block's reservation is still held in the store, so the
    // refill must have drawn a different block.
    assert!(!_leech_store.reserve_block(freed.piece, freed.offset, freed.length));
}

#[tokio::test]
async fn sessions_reject_info_hash_mismatch() {
    let data = content(80);
    let metainfo_a = make_metainfo(&data);
    let metainfo_b = make_metainfo(&content(48));
    assert_ne!(metainfo_a.info_hash, metainfo_b.info_hash);

    let dir_a = TempDir::new().unwrap();
    let (ctx_a, _store_a, _shutdown_a) = make_context(metainfo_a, &dir_a).await;
    let dir_b = TempDir::new().unwrap();
    let (ctx_b, _store_b, _shutdown_b) = make_context(metainfo_b, &dir_b).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accepter = tokio::spawn(async move {
        let (stream, peer_addr) = listener.accept().await.unwrap();
        PeerSession::accept(stream, peer_addr, ctx_b).await.map(|_| ())
    });

    let dial = PeerSession::connect(addr, ctx_a).await;
    let accepted = accepter.await.unwrap();
    // The accepting side sees the mismatch; the dialing side sees either
    // the mismatch or the resulting close.
    assert!(matches!(accepted, Err(PeerError::BadHandshake)));
    assert!(dial.is_err());
}

#[tokio::test]
async fn connecting_to_self_is_rejected() {
    let data = content(80);
    let metainfo = make_metainfo(&data);
    let dir = TempDir::new().unwrap();
    let (ctx, _store, _shutdown) = make_context(metainfo, &dir).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let ctx_accept = ctx.clone();
    let accepter = tokio::spawn(async move {
        let (stream, peer_addr) = listener.accept().await.unwrap();
        PeerSession::accept(stream, peer_addr, ctx_accept).await.map(|_| ())
    });

    // Same registry on both ends means the same local peer-ID.
    let dial = PeerSession::connect(addr, ctx).await;
    let accepted = accepter.await.unwrap();
    assert!(
        matches!(dial, Err(PeerError::Duplicate)) || matches!(accepted, Err(PeerError::Duplicate))
    );
}
