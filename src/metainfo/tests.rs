use super::*;

// A descriptor for a 100000-byte file in 16384-byte pieces (7 pieces).
fn sample_descriptor() -> Vec<u8> {
    let hashes = vec![0xabu8; 7 * 20];
    let mut data = Vec::new();
    data.extend_from_slice(b"d8:announce28:http://tracker.test/announce4:infod");
    data.extend_from_slice(b"6:lengthi100000e");
    data.extend_from_slice(b"4:name8:file.bin");
    data.extend_from_slice(b"12:piece lengthi16384e");
    data.extend_from_slice(b"6:pieces140:");
    data.extend_from_slice(&hashes);
    data.extend_from_slice(b"ee");
    data
}

#[test]
fn parses_single_file_descriptor() {
    let metainfo = Metainfo::from_bytes(&sample_descriptor()).unwrap();
    assert_eq!(metainfo.announce, "http://tracker.test/announce");
    assert_eq!(metainfo.name, "file.bin");
    assert_eq!(metainfo.piece_length, 16384);
    assert_eq!(metainfo.total_length, 100000);
    assert_eq!(metainfo.piece_count(), 7);
    assert_eq!(metainfo.piece_hash(0), Some(&[0xab; 20]));
    assert_eq!(metainfo.piece_hash(7), None);
}

#[test]
fn last_piece_is_short() {
    let metainfo = Metainfo::from_bytes(&sample_descriptor()).unwrap();
    assert_eq!(metainfo.piece_length_of(0), 16384);
    assert_eq!(metainfo.piece_length_of(6), 100000 - 6 * 16384);
    assert_eq!(metainfo.piece_offset(6), 6 * 16384);
}

#[test]
fn info_hash_ignores_key_order() {
    // Same info dictionary, keys serialized in two different orders.
    let hashes = vec![0x11u8; 20];
    let mut sorted = Vec::new();
    sorted.extend_from_slice(b"d8:announce10:http://t/a4:infod");
    sorted.extend_from_slice(b"6:lengthi100e4:name1:f12:piece lengthi16384e6:pieces20:");
    sorted.extend_from_slice(&hashes);
    sorted.extend_from_slice(b"ee");

    let mut scrambled = Vec::new();
    scrambled.extend_from_slice(b"d4:infod");
    scrambled.extend_from_slice(b"6:pieces20:");
    scrambled.extend_from_slice(&hashes);
    scrambled.extend_from_slice(b"12:piece lengthi16384e4:name1:f6:lengthi100e");
    scrambled.extend_from_slice(b"e8:announce10:http://t/ae");

    let a = Metainfo::from_bytes(&sorted).unwrap();
    let b = Metainfo::from_bytes(&scrambled).unwrap();
    assert_eq!(a.info_hash, b.info_hash);
}

#[test]
fn rejects_missing_fields() {
    assert!(matches!(
        Metainfo::from_bytes(b"d4:infodee"),
        Err(MetainfoError::MissingField("announce"))
    ));
    assert!(matches!(
        Metainfo::from_bytes(b"d8:announce10:http://t/ae"),
        Err(MetainfoError::MissingField("info"))
    ));
}

#[test]
fn rejects_multi_file() {
    let data = b"d8:announce10:http://t/a4:infod5:filesle4:name1:f12:piece lengthi16384e6:pieces0:ee";
    assert!(matches!(
        Metainfo::from_bytes(data),
        Err(MetainfoError::MultiFile)
    ));
}

#[test]
fn rejects_wrong_hash_blob_length() {
    let mut data = Vec::new();
    data.extend_from_slice(b"d8:announce10:http://t/a4:infod");
    data.extend_from_slice(b"6:lengthi100000e4:name1:f12:piece lengthi16384e6:pieces20:");
    data.extend_from_slice(&[0u8; 20]);
    data.extend_from_slice(b"ee");
    // 100000 bytes at 16384 per piece needs 7 digests, not 1.
    assert!(matches!(
        Metainfo::from_bytes(&data),
        Err(MetainfoError::PieceHashMismatch { expected: 7, got: 1 })
    ));
}

#[test]
fn rejects_malformed_bencode() {
    assert!(matches!(
        Metainfo::from_bytes(b"d8:announce"),
        Err(MetainfoError::Bencode(_))
    ));
}

#[test]
fn info_hash_hex_display() {
    let hash = InfoHash([0xab; 20]);
    assert_eq!(hash.to_hex(), "ab".repeat(20));
    assert_eq!(format!("{}", hash), hash.to_hex());
}
