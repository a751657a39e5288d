//! End-to-end scenarios against a local session tree

use std::fs;

use serde_json::{json, Value};
use sha2::Digest;
use tempfile::TempDir;

use dreamlake::{Session, SessionOptions, TimeQuery};

fn open(tmp: &TempDir, name: &str) -> Session {
    SessionOptions::new("demo", name)
        .local_path(tmp.path())
        .open()
        .expect("session should open")
}

// Single append, read back with an auto-assigned timestamp
#[test]
fn test_single_append_read_back() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp, "s1");

    let before = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64();
    session
        .track("loss")
        .append(json!({"value": 0.5, "epoch": 1}))
        .unwrap();
    session.track("loss").flush().unwrap();
    let after = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64();

    let read = session.track("loss").read(0, 1).unwrap();
    assert_eq!(read.total, 1);
    let item = &read.items[0];
    assert_eq!(item.index, 0);
    assert_eq!(item.data["value"], json!(0.5));
    assert_eq!(item.data["epoch"], json!(1));
    let ts = item.data["_ts"].as_f64().unwrap();
    assert!(ts >= before && ts <= after + 1.0, "auto _ts should be about now");
    session.close().unwrap();
}

// `_ts = -1` inherits the most recent timestamp across tracks
#[test]
fn test_timestamp_inheritance_across_tracks() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp, "s2");

    session
        .track("robot/pose")
        .append(json!({"position": [1, 2, 3]}))
        .unwrap();
    session
        .track("camera")
        .append(json!({"width": 640, "_ts": -1}))
        .unwrap();
    session
        .track("velocity")
        .append(json!({"linear": [0.1, 0.0, 0.0], "_ts": -1}))
        .unwrap();
    session.flush().unwrap();

    let ts_of = |track: &str| {
        session.track(track).read(0, 1).unwrap().items[0].data["_ts"]
            .as_f64()
            .unwrap()
    };
    let t = ts_of("robot/pose");
    assert_eq!(ts_of("camera"), t);
    assert_eq!(ts_of("velocity"), t);
    session.close().unwrap();
}

// Appends sharing a timestamp merge into one point at flush
#[test]
fn test_merge_same_timestamp() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp, "s3");

    let track = session.track("robot/state");
    track.append(json!({"q": [0.1, 0.2], "_ts": 1.0})).unwrap();
    track.append(json!({"v": [0.01, 0.02], "_ts": 1.0})).unwrap();
    track
        .append(json!({"e": [0.5, 0.6, 0.7], "_ts": 1.0}))
        .unwrap();
    track.flush().unwrap();

    let read = track.read(0, 10).unwrap();
    assert_eq!(read.total, 1);
    let data = &read.items[0].data;
    assert_eq!(data["_ts"], json!(1.0));
    assert_eq!(data["q"], json!([0.1, 0.2]));
    assert_eq!(data["v"], json!([0.01, 0.02]));
    assert_eq!(data["e"], json!([0.5, 0.6, 0.7]));
    session.close().unwrap();
}

// A batch lands as one columnar block on disk but reads as rows
#[test]
fn test_batch_columnar_on_disk_rows_on_read() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp, "s4");

    session
        .track("m")
        .append_batch(vec![
            json!({"v": 10, "_ts": 1.0}),
            json!({"v": 20, "_ts": 2.0}),
            json!({"v": 30, "_ts": 3.0}),
        ])
        .unwrap();

    // Exactly one MessagePack record, columnar shaped
    let bytes = fs::read(tmp.path().join("demo/s4/tracks/m/data.msgpack")).unwrap();
    let stored: Value = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(stored["_ts"], json!([1.0, 2.0, 3.0]));
    assert_eq!(stored["v"], json!([10, 20, 30]));

    let read = session.track("m").read(0, 10).unwrap();
    assert_eq!(read.total, 3);
    for (i, item) in read.items.iter().enumerate() {
        assert_eq!(item.index, i as u64);
        assert_eq!(item.data["v"], json!((i as i64 + 1) * 10));
        assert_eq!(item.data["_ts"], json!(i as f64 + 1.0));
    }
    session.close().unwrap();
}

// Time-range reads honor the half-open window and reverse order
#[test]
fn test_time_range_and_reverse() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp, "s5");

    let track = session.track("m");
    for i in 0..10 {
        // i / 10.0 rounds to the same double as the 0.1-step literals below
        track
            .append(json!({"i": i, "_ts": f64::from(i) / 10.0}))
            .unwrap();
    }

    let forward = track
        .read_by_time(TimeQuery {
            start_ts: Some(0.3),
            end_ts: Some(0.6),
            limit: 1000,
            reverse: false,
        })
        .unwrap();
    let ts: Vec<f64> = forward
        .items
        .iter()
        .map(|p| p.data["_ts"].as_f64().unwrap())
        .collect();
    assert_eq!(ts, vec![0.3, 0.4, 0.5]);

    let reverse = track
        .read_by_time(TimeQuery {
            start_ts: Some(0.3),
            end_ts: Some(0.6),
            limit: 1000,
            reverse: true,
        })
        .unwrap();
    let ts: Vec<f64> = reverse
        .items
        .iter()
        .map(|p| p.data["_ts"].as_f64().unwrap())
        .collect();
    assert_eq!(ts, vec![0.5, 0.4, 0.3]);

    // Indices are non-decreasing forward, non-increasing in reverse
    let indices: Vec<u64> = forward.items.iter().map(|p| p.index).collect();
    assert!(indices.windows(2).all(|w| w[0] <= w[1]));
    let indices: Vec<u64> = reverse.items.iter().map(|p| p.index).collect();
    assert!(indices.windows(2).all(|w| w[0] >= w[1]));
    session.close().unwrap();
}

// File upload stores a checksummed byte-identical copy
#[test]
fn test_file_upload_round_trip() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp, "s6");

    let source = tmp.path().join("greeting.txt");
    fs::write(&source, b"hello-dreamlake!").unwrap();

    let artifact = session.files().upload(&source, "/models").unwrap();
    assert_eq!(artifact.size_bytes, 16);
    let expected = hex::encode(sha2::Sha256::digest(b"hello-dreamlake!"));
    assert_eq!(artifact.checksum, expected);

    let dest = tmp
        .path()
        .join("demo/s6/files/models")
        .join(&artifact.id)
        .join("greeting.txt");
    assert!(dest.exists());
    assert_eq!(fs::read(dest).unwrap(), fs::read(&source).unwrap());

    let listed = session.files().list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].checksum, artifact.checksum);
    session.close().unwrap();
}

// Encoding equivalence: rows, blocks, and mixed streams read identically
#[test]
fn test_encoding_equivalence_across_styles() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp, "mixed");

    let rows = session.track("rows");
    for i in 0..6 {
        rows.append(json!({"v": i, "_ts": f64::from(i)})).unwrap();
        rows.flush().unwrap();
    }

    let blocks = session.track("blocks");
    blocks
        .append_batch((0..6).map(|i| json!({"v": i, "_ts": f64::from(i)})).collect())
        .unwrap();

    let mixed = session.track("mixed");
    mixed.append(json!({"v": 0, "_ts": 0.0})).unwrap();
    mixed.flush().unwrap();
    mixed
        .append_batch(vec![
            json!({"v": 1, "_ts": 1.0}),
            json!({"v": 2, "_ts": 2.0}),
            json!({"v": 3, "_ts": 3.0}),
        ])
        .unwrap();
    mixed.append(json!({"v": 4, "_ts": 4.0})).unwrap();
    mixed.append(json!({"v": 5, "_ts": 5.0})).unwrap();
    mixed.flush().unwrap();

    let logical = |track: &str| -> Vec<(u64, i64, f64)> {
        session
            .track(track)
            .read(0, 100)
            .unwrap()
            .items
            .iter()
            .map(|p| {
                (
                    p.index,
                    p.data["v"].as_i64().unwrap(),
                    p.data["_ts"].as_f64().unwrap(),
                )
            })
            .collect()
    };
    let expected: Vec<(u64, i64, f64)> =
        (0..6i64).map(|i| (i as u64, i, i as f64)).collect();
    assert_eq!(logical("rows"), expected);
    assert_eq!(logical("blocks"), expected);
    assert_eq!(logical("mixed"), expected);
    session.close().unwrap();
}

// Index contiguity after many appends
#[test]
fn test_index_contiguity() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp, "contig");

    let track = session.track("m");
    for chunk in 0..5 {
        track
            .append_batch(
                (0..20)
                    .map(|i| json!({"n": chunk * 20 + i, "_ts": f64::from(chunk * 20 + i)}))
                    .collect(),
            )
            .unwrap();
    }
    let read = track.read(0, 200).unwrap();
    assert_eq!(read.total, 100);
    for (i, item) in read.items.iter().enumerate() {
        assert_eq!(item.index, i as u64);
        assert_eq!(item.data["n"], json!(i));
    }
    assert!(!read.has_more);
    session.close().unwrap();
}

// A full recording workflow touching every subsystem
#[test]
fn test_full_session_workflow() {
    let tmp = TempDir::new().unwrap();
    let session = SessionOptions::new("demo", "full")
        .local_path(tmp.path())
        .description("full workflow")
        .tag("e2e")
        .open()
        .unwrap();

    session.log("run started").unwrap();
    session
        .params()
        .set(json!({"model": {"lr": 0.001}, "epochs": 2}))
        .unwrap();

    for epoch in 0..2 {
        for step in 0..10 {
            let ts = f64::from(epoch * 10 + step);
            session
                .track("train/loss")
                .append(json!({"loss": 1.0 / (ts + 1.0), "_ts": ts}))
                .unwrap();
        }
        session
            .log_with(
                dreamlake::LogLevel::Info,
                &format!("epoch {epoch} done"),
                Some(json!({"epoch": epoch})),
            )
            .unwrap();
    }

    let checkpoint = tmp.path().join("weights.bin");
    fs::write(&checkpoint, vec![7u8; 128]).unwrap();
    session.files().upload(&checkpoint, "/checkpoints").unwrap();

    let tracks = session.tracks().list().unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].total_data_points, 20);

    let recent = session
        .track("train/loss")
        .read_by_time(TimeQuery {
            limit: 5,
            reverse: true,
            ..TimeQuery::default()
        })
        .unwrap();
    assert_eq!(recent.items.len(), 5);
    assert_eq!(recent.items[0].index, 19);

    session.close().unwrap();

    // Everything survived on disk
    let dir = tmp.path().join("demo/full");
    assert!(dir.join("session.json").exists());
    assert!(dir.join("parameters.json").exists());
    assert!(dir.join("logs/logs.jsonl").exists());
    assert!(dir.join("tracks/train__loss/data.msgpack").exists());
    assert!(dir.join("files/.files_metadata.json").exists());
}
