use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use mfkit_core::{ChunkGuid, ChunkInfo, ChunkPart, FileManifest, Manifest, ManifestBuilder, ManifestMeta};
use predicates::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::process::Command;

fn mfkit() -> Command {
    Command::cargo_bin("mfkit").unwrap()
}

fn random_manifest(seed: u64, files: usize) -> Manifest {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut b = ManifestBuilder::new(18).meta(ManifestMeta {
        feature_level: 18,
        app_name: format!("App{seed}"),
        build_version: "1.0".into(),
        ..ManifestMeta::default()
    });
    for i in 0..files {
        let guid = ChunkGuid([rng.gen(), rng.gen(), rng.gen(), i as u32]);
        let window = rng.gen_range(1..=1024 * 1024u32);
        b = b
            .chunk(ChunkInfo {
                guid,
                hash: rng.gen(),
                group_num: rng.gen_range(0..100),
                window_size: window,
                file_size: (window / 2) as i64,
                ..ChunkInfo::default()
            })
            .file(FileManifest {
                filename: format!("Content/file_{i:03}.pak"),
                install_tags: if i % 2 == 0 { vec!["even".into()] } else { vec![] },
                chunk_parts: vec![ChunkPart { guid, offset: 0, size: window }],
                ..FileManifest::default()
            });
    }
    b.custom_field("Channel", "live").build().unwrap()
}

#[test]
fn info_reports_header_and_totals() {
    let td = assert_fs::TempDir::new().unwrap();
    let m = random_manifest(1, 4);
    let file = td.child("build.manifest");
    file.write_binary(&m.to_bytes().unwrap()).unwrap();

    mfkit()
        .args(["info", file.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Format:        binary"))
        .stdout(predicate::str::contains("App1"))
        .stdout(predicate::str::contains(format!("Files:         4 ({} bytes installed)", m.files().total_size())))
        .stdout(predicate::str::contains("Custom:        Channel = live"));

    let out = mfkit().args(["info", "--json", file.path().to_str().unwrap()]).output().unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["format"], "binary");
    assert_eq!(v["feature_level"], 18);
    assert_eq!(v["chunks"], 4);
    assert_eq!(v["sha1"].as_str().unwrap().len(), 40);
}

#[test]
fn files_and_chunks_listings() {
    let td = assert_fs::TempDir::new().unwrap();
    let m = random_manifest(2, 5);
    let file = td.child("build.manifest");
    file.write_binary(&m.to_bytes().unwrap()).unwrap();
    let path = file.path().to_str().unwrap();

    let out = mfkit().args(["files", path]).output().unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap().lines().count(), 5);

    let out = mfkit().args(["files", "--tag", "even", path]).output().unwrap();
    let text = String::from_utf8(out.stdout).unwrap();
    // Untagged files always install.
    assert_eq!(text.lines().count(), 5);
    let out = mfkit().args(["files", "--tag", "missing", path]).output().unwrap();
    assert_eq!(String::from_utf8(out.stdout).unwrap().lines().count(), 2);

    let first = &m.chunks().elements()[0];
    mfkit()
        .args(["chunks", path])
        .assert()
        .success()
        .stdout(predicate::str::contains(first.path(18)))
        .stdout(predicate::str::contains("ChunksV4/"));
}

#[test]
fn files_under_root_flags_unsafe_names() {
    let td = assert_fs::TempDir::new().unwrap();
    let m = ManifestBuilder::new(18)
        .file(FileManifest { filename: "ok/a.txt".into(), ..FileManifest::default() })
        .file(FileManifest { filename: "../escape.txt".into(), ..FileManifest::default() })
        .build()
        .unwrap();
    let file = td.child("paths.manifest");
    file.write_binary(&m.to_bytes().unwrap()).unwrap();
    let install = td.child("install");
    install.create_dir_all().unwrap();

    mfkit()
        .args(["files", file.path().to_str().unwrap(), "--root", install.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("UNSAFE (parent traversal"))
        .stdout(predicate::str::contains("a.txt"));
}

#[test]
fn verify_walks_directories_and_flags_bad_manifests() {
    let td = assert_fs::TempDir::new().unwrap();
    let dir = td.child("manifests");
    dir.create_dir_all().unwrap();
    for seed in 0..4u64 {
        dir.child(format!("good_{seed}.manifest")).write_binary(&random_manifest(seed, 3).to_bytes().unwrap()).unwrap();
    }
    dir.child("notes.txt").write_str("ignored").unwrap();

    let out = mfkit().args(["verify", dir.path().to_str().unwrap()]).output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8(out.stdout).unwrap();
    assert_eq!(text.lines().filter(|l| l.starts_with("OK ")).count(), 4);
    assert_eq!(text.lines().filter(|l| l.starts_with("BAD ")).count(), 0);

    let mut bytes = random_manifest(9, 3).to_bytes().unwrap();
    bytes[20] ^= 0xFF;
    dir.child("flipped.manifest").write_binary(&bytes).unwrap();
    let unsafe_paths = ManifestBuilder::new(18)
        .file(FileManifest { filename: "/etc/passwd".into(), ..FileManifest::default() })
        .build()
        .unwrap();
    dir.child("unsafe.manifest").write_binary(&unsafe_paths.to_bytes().unwrap()).unwrap();

    let out = mfkit().args(["verify", dir.path().to_str().unwrap()]).output().unwrap();
    assert!(!out.status.success());
    let text = String::from_utf8(out.stdout).unwrap();
    let bad: Vec<_> = text.lines().filter(|l| l.starts_with("BAD ")).collect();
    assert_eq!(bad.len(), 2, "{text}");
    assert!(bad.iter().any(|l| l.contains("flipped.manifest") && l.contains("hash mismatch")));
    assert!(bad.iter().any(|l| l.contains("unsafe.manifest") && l.contains("absolute paths are not allowed")));
    assert_eq!(text.lines().filter(|l| l.starts_with("OK ")).count(), 4);
}

#[test]
fn repack_converts_legacy_json() {
    let td = assert_fs::TempDir::new().unwrap();
    let legacy = td.child("old.json");
    legacy
        .write_str(
            r#"{
                "ManifestFileVersion": "010000000000",
                "AppNameString": "Legacy",
                "FileManifestList": [
                    { "Filename": "a.bin",
                      "FileChunkParts": [ { "Guid": "0000000100000000000000000000000A", "Offset": "000000000000", "Size": "100000000000" } ] }
                ],
                "ChunkHashList": { "0000000100000000000000000000000A": "005000000000000000" }
            }"#,
        )
        .unwrap();
    let out = td.child("out/new.manifest");

    mfkit()
        .args(["repack", legacy.path().to_str().unwrap(), out.path().to_str().unwrap(), "--level", "9"])
        .assert()
        .success()
        .stderr(predicate::str::contains("1 files, 1 chunks"));

    let m = Manifest::from_bytes(&std::fs::read(out.path()).unwrap()).unwrap();
    assert!(m.header().is_some());
    assert_eq!(m.meta().app_name, "Legacy");
    assert_eq!(m.version(), 10);
    assert_eq!(m.files().get("a.bin").unwrap().file_size(), 100);

    mfkit().args(["info", out.path().to_str().unwrap()]).assert().success().stdout(predicate::str::contains("Legacy"));
}

#[test]
fn undecodable_input_fails_with_context() {
    let td = assert_fs::TempDir::new().unwrap();
    let junk = td.child("junk.manifest");
    junk.write_binary(b"\x00\x01\x02 definitely not a manifest").unwrap();
    mfkit()
        .args(["info", junk.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("decode"))
        .stderr(predicate::str::contains("not a manifest"));

    mfkit().args(["repack", "--level", "12", "a", "b"]).assert().failure();
}
