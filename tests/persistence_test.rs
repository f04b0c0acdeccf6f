use std::fs;
use tagtrail::*;

#[test]
fn test_tag_file_is_schema_checked_json() {
    let dir = tempfile::tempdir().unwrap();
    let mut tag = Tag::new(3, vec![0xca, 0xfe], Scheme::Baseline);
    tag.update_content(1, vec![0xba, 0xbe]);
    tag.save(dir.path()).unwrap();

    let raw = fs::read_to_string(dir.path().join("3.tag")).unwrap();
    assert!(raw.contains("\"babe\""));
    assert!(raw.contains("\"baseline\""));

    let restored = Tag::load(dir.path(), 3).unwrap();
    assert_eq!(restored.content, vec![0xba, 0xbe]);
    assert_eq!(restored.history, vec![vec![0xca, 0xfe]]);
}

#[test]
fn test_tag_file_rejects_unknown_fields() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("4.tag"),
        r#"{
            "id": 4,
            "content": "00",
            "history": [],
            "online_storage": {"events": [], "storage": {}},
            "mode": "tracker",
            "__reduce__": "os.system"
        }"#,
    )
    .unwrap();

    assert!(Tag::load(dir.path(), 4).is_err());
}

#[test]
fn test_tag_file_size_cap() {
    let dir = tempfile::tempdir().unwrap();
    let oversized = vec![b'x'; 2 * 1024 * 1024];
    fs::write(dir.path().join("5.tag"), oversized).unwrap();

    let err = Tag::load(dir.path(), 5).unwrap_err();
    assert!(err.to_string().contains("cap"));
}

#[test]
fn test_missing_tag_file_is_environmental() {
    let dir = tempfile::tempdir().unwrap();
    let err = Tag::load(dir.path(), 99).unwrap_err();
    assert!(!err.is_verification_failure());
}

#[test]
fn test_update_blocked_while_locked() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Baseline::new(Baseline::generate_reader_configs(2, &[], dir.path()).unwrap());
    let mut tag = engine.generate_tag_secret(8).unwrap();

    let lock = TagLock::acquire(dir.path(), 8).unwrap();
    let err = engine.update_tag(0, &mut tag).unwrap_err();
    assert!(matches!(err, TagTrailError::TagLocked(8)));

    drop(lock);
    engine.update_tag(0, &mut tag).unwrap();
}

#[test]
fn test_stepauth_keyfile_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let written = StepAuth::generate_reader_configs(3, &[], dir.path()).unwrap();
    let loaded = StepAuthConfig::load(dir.path()).unwrap();

    assert_eq!(loaded.master.public, written.master.public);
    assert_eq!(loaded.readers.len(), 3);
    assert_eq!(loaded.readers[2].private, written.readers[2].private);
    // uncompressed SEC1 points carry the 0x04 marker
    assert_eq!(loaded.master.public[0], 0x04);
    assert_eq!(loaded.master.public.len(), 65);
}

#[test]
fn test_tracker_keyfile_preserves_scalars() {
    let dir = tempfile::tempdir().unwrap();
    let written = Tracker::generate_reader_configs(4, &[vec![0, 1, 2, 3]], dir.path()).unwrap();
    let loaded = TrackerConfig::load(dir.path()).unwrap();

    assert_eq!(loaded.private, written.private);
    assert_eq!(loaded.x0, written.x0);
    assert_eq!(loaded.a0, written.a0);
    assert_eq!(loaded.curve.n, written.curve.n);
    assert_eq!(loaded.valid_paths.len(), 1);
    assert_eq!(loaded.valid_paths[0].label, "[0,1,2,3]");
    assert_eq!(loaded.k.len(), 40);

    // scalars travel as decimal strings, never JSON numbers
    let raw = fs::read_to_string(dir.path().join("keyfile.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(json["x0"].is_string());
    assert!(json["curve"]["n"].is_string());
}

#[test]
fn test_rfchain_keyfile_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = TagDb::in_memory().unwrap();
    let written = RfChain::generate_reader_configs(2, &[], dir.path(), &db).unwrap();
    let loaded = RfChainConfig::load(dir.path()).unwrap();

    assert_eq!(loaded.k, written.k);
    assert_eq!(loaded.curve, "p256");
    assert_eq!(loaded.curvebytes, 32);
    assert_eq!(loaded.readers[1].private_der, written.readers[1].private_der);

    let raw = fs::read_to_string(dir.path().join("keyfile.json")).unwrap();
    assert!(raw.contains("\"private-DER\""));
    assert!(raw.contains("\"hashBytes\""));
}

#[test]
fn test_scheme_dispatch_labels() {
    let mode: Scheme = "rfchain".parse().unwrap();
    assert_eq!(mode, Scheme::RfChain);
    assert!("mifare".parse::<Scheme>().is_err());

    let tag = Tag::new(1, vec![], Scheme::StepAuth);
    assert_eq!(tag.mode.to_string(), "stepauth");
}
