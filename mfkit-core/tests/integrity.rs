use std::io::Cursor;

use mfkit_core::compression;
use mfkit_core::error::Stage;
use mfkit_core::{
    ChunkGuid, ChunkInfo, ChunkPart, DecodeLimits, ErrorKind, FileManifest, Manifest, ManifestBuilder, ManifestHeader,
    StoreFlags, HEADER_LEN,
};
use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn encoded() -> Vec<u8> {
    let chunks: Vec<ChunkInfo> = (0..6u32)
        .map(|i| ChunkInfo { guid: ChunkGuid([i, i, i, i]), hash: i as u64, window_size: 1000, ..ChunkInfo::default() })
        .collect();
    let mut b = ManifestBuilder::new(18);
    for (i, c) in chunks.iter().enumerate() {
        b = b.chunk(c.clone()).file(FileManifest {
            filename: format!("data/file_{i}.pak"),
            install_tags: vec![format!("tag{}", i % 2)],
            chunk_parts: vec![ChunkPart { guid: c.guid, offset: 0, size: 1000 }],
            ..FileManifest::default()
        });
    }
    b.custom_field("k", "v").build().unwrap().to_bytes().unwrap()
}

/// Re-frame the same payload with store flags cleared (no compression).
fn stored_raw(bytes: &[u8]) -> Vec<u8> {
    let header = ManifestHeader::parse(&bytes[..HEADER_LEN]).unwrap();
    let payload = compression::decompress(
        &bytes[HEADER_LEN..],
        header.store_flags,
        header.size_uncompressed,
        &DecodeLimits::default(),
    )
    .unwrap();
    let raw = ManifestHeader {
        size_compressed: payload.len() as u32,
        store_flags: StoreFlags::empty(),
        ..header
    };
    let mut out = raw.to_bytes().to_vec();
    out.extend_from_slice(&payload);
    out
}

fn kind_of(bytes: &[u8]) -> ErrorKind {
    Manifest::from_bytes(bytes).unwrap_err().kind()
}

#[test]
fn flipped_hash_byte_fails_integrity() {
    let mut bytes = encoded();
    bytes[16] ^= 0x01;
    assert_eq!(kind_of(&bytes), ErrorKind::IntegrityCheckFailed);
}

#[test]
fn flipped_raw_payload_byte_fails_integrity() {
    let raw = stored_raw(&encoded());
    assert!(Manifest::from_bytes(&raw).is_ok(), "raw framing decodes unchanged");
    for pos in [HEADER_LEN, HEADER_LEN + 7, raw.len() / 2, raw.len() - 1] {
        let mut bad = raw.clone();
        bad[pos] ^= 0x80;
        assert_eq!(kind_of(&bad), ErrorKind::IntegrityCheckFailed, "flip at {pos}");
    }
}

#[test]
fn random_raw_payload_damage_fails_integrity() {
    let raw = stored_raw(&encoded());
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..64 {
        let mut bad = raw.clone();
        let pos = rng.gen_range(HEADER_LEN..raw.len());
        bad[pos] ^= rng.gen_range(1..=255u8);
        assert_eq!(kind_of(&bad), ErrorKind::IntegrityCheckFailed, "damage at {pos}");
    }
}

#[test]
fn flipped_deflate_byte_is_rejected() {
    let bytes = encoded();
    for pos in HEADER_LEN..bytes.len() {
        let mut bad = bytes.clone();
        bad[pos] ^= 0x10;
        let kind = kind_of(&bad);
        assert!(
            matches!(kind, ErrorKind::IntegrityCheckFailed | ErrorKind::CorruptPayload),
            "flip at {pos} gave {kind:?}"
        );
    }
}

#[test]
fn unknown_store_flags_are_unsupported() {
    let mut bytes = encoded();
    bytes[36] = (StoreFlags::DEFLATE | StoreFlags::ENCRYPTED).bits();
    let err = Manifest::from_bytes(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
    assert_eq!(err.stage(), Some(Stage::Decompression));
}

#[test]
fn header_padding_is_skipped() {
    let bytes = encoded();
    let mut header = ManifestHeader::parse(&bytes[..HEADER_LEN]).unwrap();
    header.header_size = HEADER_LEN as u32 + 11;
    let mut padded = header.to_bytes().to_vec();
    padded.extend_from_slice(&[0xEE; 11]);
    padded.extend_from_slice(&bytes[HEADER_LEN..]);

    let a = Manifest::from_bytes(&bytes).unwrap();
    let b = Manifest::from_bytes(&padded).unwrap();
    assert_eq!(a.files(), b.files());
    assert_eq!(a.chunks(), b.chunks());
    assert_eq!(b.header().unwrap().header_size, HEADER_LEN as u32 + 11);
}

#[test]
fn undersized_header_is_corrupt() {
    let mut bytes = encoded();
    bytes[4..8].copy_from_slice(&40u32.to_le_bytes());
    let err = Manifest::from_bytes(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptPayload);
    assert_eq!(err.stage(), Some(Stage::Header));
}

#[test]
fn limits_reject_before_allocating() {
    let bytes = encoded();
    let tight = DecodeLimits { max_compressed_bytes: 16, ..DecodeLimits::default() };
    let err = Manifest::read_with(&mut Cursor::new(&bytes), tight).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
    assert_eq!(err.stage(), Some(Stage::Payload));

    let tight = DecodeLimits { max_uncompressed_bytes: 16, ..DecodeLimits::default() };
    let err = Manifest::read_with(&mut Cursor::new(&bytes), tight).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    let tight = DecodeLimits { max_entries: 3, ..DecodeLimits::default() };
    let err = Manifest::read_with(&mut Cursor::new(&bytes), tight).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
    assert!(err.section().is_some());
}

#[test]
fn oversized_declared_payload_is_truncated() {
    let mut bytes = encoded();
    let declared = (bytes.len() - HEADER_LEN + 100) as u32;
    bytes[12..16].copy_from_slice(&declared.to_le_bytes());
    assert_eq!(kind_of(&bytes), ErrorKind::TruncatedData);
}

#[test]
fn partial_magic_is_truncated_not_json() {
    let bytes = encoded();
    for cut in 1..4 {
        let err = Manifest::from_bytes(&bytes[..cut]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TruncatedData, "cut at {cut}");
        assert_eq!(err.stage(), Some(Stage::Header));
    }
    // Short inputs that do not start like the magic still go to JSON.
    assert!(Manifest::from_bytes(b"{}").unwrap().files().is_empty());
    assert_eq!(kind_of(b"\x0C\xC0\x00"), ErrorKind::NotAManifest);
}

#[test]
fn garbage_is_not_a_manifest() {
    assert_eq!(kind_of(b""), ErrorKind::NotAManifest);
    assert_eq!(kind_of(b"PK\x03\x04 not a manifest"), ErrorKind::NotAManifest);
    assert_eq!(kind_of(b"[1, 2, 3]"), ErrorKind::NotAManifest);
}

proptest! {
    #[test]
    fn every_strict_prefix_fails_cleanly(cut in 0usize..10_000) {
        let bytes = encoded();
        let cut = cut % bytes.len();
        let kind = kind_of(&bytes[..cut]);
        if cut == 0 {
            prop_assert_eq!(kind, ErrorKind::NotAManifest);
        } else {
            prop_assert_eq!(kind, ErrorKind::TruncatedData);
        }
    }
}
