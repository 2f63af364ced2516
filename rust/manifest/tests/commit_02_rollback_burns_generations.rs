use vellum_directory::{IndexDirectory, InMemoryDirectory};
use vellum_manifest::{CommitEngine, FinderConfig, SegmentSet};

#[tokio::test]
async fn commit_02_rollback_burns_generations() {
    // Two rolled-back attempts, then a real commit.  Generations are
    // write-once: the rolled-back file names are never written again, so
    // only segments_3 ever becomes valid.
    let dir = InMemoryDirectory::new();
    let mut set = SegmentSet::new();
    let mut engine = CommitEngine::new();

    engine.prepare(&mut set, &dir).await.unwrap();
    assert_eq!(1, set.generation());
    engine.rollback(&dir).await.unwrap();
    assert_eq!(1, set.generation());
    assert!(!dir.file_exists("segments_1").await.unwrap());

    engine.prepare(&mut set, &dir).await.unwrap();
    assert_eq!(2, set.generation());
    engine.rollback(&dir).await.unwrap();
    assert!(!dir.file_exists("segments_2").await.unwrap());

    engine.commit(&mut set, &dir).await.unwrap();
    assert_eq!(3, set.generation());
    assert_eq!(3, set.last_generation());
    assert!(dir.file_exists("segments_3").await.unwrap());
    assert!(!dir.file_exists("segments_1").await.unwrap());
    assert!(!dir.file_exists("segments_2").await.unwrap());
    assert!(!dir.file_exists("segments_4").await.unwrap());

    let latest = SegmentSet::read_latest(&dir, &FinderConfig::default())
        .await
        .unwrap();
    assert_eq!(3, latest.generation());
}
