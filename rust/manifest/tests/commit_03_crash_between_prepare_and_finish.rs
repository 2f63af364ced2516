use vellum_directory::{IndexDirectory, InMemoryDirectory};
use vellum_manifest::{
    read_manifest, read_segments_gen, CommitEngine, Error, FinderConfig, SegmentSet,
};

#[tokio::test]
async fn commit_03_crash_between_prepare_and_finish() {
    // A writer that dies after prepare leaves a checksumless segments_2 and
    // a stale hint; readers reject the partial file and land on segments_1.
    let dir = InMemoryDirectory::new();
    let mut set = SegmentSet::new();
    let mut engine = CommitEngine::new();
    engine.commit(&mut set, &dir).await.unwrap();

    engine.prepare(&mut set, &dir).await.unwrap();
    assert_eq!(Some("segments_2"), engine.pending_segments_file());
    // Crash: the engine goes away without finish or rollback.
    drop(engine);

    // The partial manifest is on disk but invalid, and the hint still says 1.
    assert!(dir.file_exists("segments_2").await.unwrap());
    assert_eq!(Some(1), read_segments_gen(&dir).await.unwrap());
    match read_manifest(&dir, "segments_2").await {
        Err(Error::CorruptManifest(_)) => {}
        other => panic!("expected CorruptManifest, got {:?}", other.map(|_| ())),
    }

    let latest = SegmentSet::read_latest(&dir, &FinderConfig::default())
        .await
        .unwrap();
    assert_eq!(1, latest.generation());
    assert_eq!(1, latest.last_generation());
}
