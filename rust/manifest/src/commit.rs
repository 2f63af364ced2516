//! Two-phase manifest commit.
//!
//! `prepare` writes a brand-new `segments_N` and flushes its payload but
//! withholds the trailing checksum, so a concurrent reader that finds the
//! file rejects it as corrupt and falls back.  `finish` appends the
//! checksum, makes the file durable, and only then refreshes the advisory
//! `segments.gen` hint.  `rollback` abandons the attempt without ever
//! reusing its generation: the next attempt writes `generation + 1`, so no
//! manifest file name is written twice.

use vellum_directory::IndexDirectory;

use crate::checksum::ChecksumOutput;
use crate::{codec, Error, SegmentSet, NO_GENERATION};

//////////////////////////////////////// PendingManifest ///////////////////////////////////////////

struct PendingManifest {
    file_name: String,
    out: ChecksumOutput,
    /// Legacy sidecars created by this attempt, for failure cleanup.
    sidecars: Vec<String>,
}

////////////////////////////////////////// CommitEngine ////////////////////////////////////////////

/// Advances a [`SegmentSet`] bound to a directory from one committed
/// generation to the next.
///
/// ```text
///  IDLE ──prepare──▶ PENDING ──finish──▶ IDLE (advanced)
///                       │
///                       └─rollback──▶ IDLE (not advanced)
/// ```
///
/// A single engine performs at most one prepare/finish at a time; readers
/// run concurrently and are isolated by the checksum discipline.
#[derive(Default)]
pub struct CommitEngine {
    pending: Option<PendingManifest>,
}

impl CommitEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending_commit(&self) -> bool {
        self.pending.is_some()
    }

    /// The manifest file name of the in-flight commit, if one is pending.
    pub fn pending_segments_file(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.file_name.as_str())
    }

    /// Phase one: write the next `segments_N` and leave it invalid.
    ///
    /// On success the in-memory generation has advanced to the generation
    /// being written and the output stays open, checksum unwritten.  On
    /// failure every sidecar and the partial manifest written by this
    /// attempt are deleted and the engine is idle again.
    pub async fn prepare(
        &mut self,
        set: &mut SegmentSet,
        dir: &dyn IndexDirectory,
    ) -> Result<(), Error> {
        if self.pending.is_some() {
            return Err(Error::IllegalState(
                "prepare called while a commit is pending".to_string(),
            ));
        }
        let next_gen = if set.generation() == NO_GENERATION {
            1
        } else {
            set.generation() + 1
        };
        let file_name = codec::segments_file_name(next_gen);
        tracing::debug!(%file_name, next_gen, "preparing commit");
        // The generation bump waits until the pending output exists; a
        // failed create leaves the set untouched.
        let raw = dir.create_output(&file_name).await?;
        set.set_generation(next_gen);
        let mut out = ChecksumOutput::new(raw);
        let mut sidecars = Vec::new();
        let written = async {
            codec::write_manifest(set, dir, &mut out, &mut sidecars).await?;
            // Readers may now observe the payload; without the footer they
            // must reject it and fall back.
            out.flush().await
        }
        .await;
        if let Err(err) = written {
            let _ = out.close().await;
            Self::delete_attempt(dir, &file_name, &sidecars).await;
            return Err(err);
        }
        self.pending = Some(PendingManifest {
            file_name,
            out,
            sidecars,
        });
        Ok(())
    }

    /// Phase two: append the checksum, fsync the manifest (and any sidecars
    /// this attempt created), then refresh the advisory `segments.gen`.
    ///
    /// A failed `segments.gen` write does not fail the commit: the hint is
    /// deleted and the directory listing carries the truth.
    pub async fn finish(
        &mut self,
        set: &mut SegmentSet,
        dir: &dyn IndexDirectory,
    ) -> Result<(), Error> {
        let PendingManifest {
            file_name,
            out,
            sidecars,
        } = self.pending.take().ok_or_else(|| {
            Error::IllegalState("finish called without a pending commit".to_string())
        })?;
        let finished = async {
            out.finish().await?;
            let mut to_sync = sidecars.clone();
            to_sync.push(file_name.clone());
            dir.sync(&to_sync).await?;
            Ok::<(), Error>(())
        }
        .await;
        if let Err(err) = finished {
            Self::delete_attempt(dir, &file_name, &sidecars).await;
            return Err(err);
        }
        set.set_last_generation(set.generation());
        tracing::info!(%file_name, generation = set.generation(), "commit finished");
        if let Err(err) = codec::write_segments_gen(dir, set.generation()).await {
            tracing::warn!(error = %err, "failed to write {}; deleting the hint", codec::SEGMENTS_GEN_FILE);
            let _ = dir.delete_file(codec::SEGMENTS_GEN_FILE).await;
        }
        Ok(())
    }

    /// Abandon the pending commit.  The generation is deliberately not
    /// rewound: the burnt generation keeps every manifest file name
    /// write-once, even across rolled-back attempts.
    pub async fn rollback(&mut self, dir: &dyn IndexDirectory) -> Result<(), Error> {
        let PendingManifest {
            file_name, out, ..
        } = self.pending.take().ok_or_else(|| {
            Error::IllegalState("rollback called without a pending commit".to_string())
        })?;
        tracing::debug!(%file_name, "rolling back commit");
        let _ = out.close().await;
        let _ = dir.delete_file(&file_name).await;
        Ok(())
    }

    /// One-call commit: prepare then finish.  `finish` cleans up after
    /// itself, so a failure in either phase leaves the engine idle.
    pub async fn commit(
        &mut self,
        set: &mut SegmentSet,
        dir: &dyn IndexDirectory,
    ) -> Result<(), Error> {
        self.prepare(set, dir).await?;
        self.finish(set, dir).await
    }

    async fn delete_attempt(dir: &dyn IndexDirectory, file_name: &str, sidecars: &[String]) {
        for sidecar in sidecars {
            if let Err(err) = dir.delete_file(sidecar).await {
                tracing::warn!(%sidecar, error = %err, "failed to delete sidecar during cleanup");
            }
        }
        if let Err(err) = dir.delete_file(file_name).await {
            tracing::warn!(%file_name, error = %err, "failed to delete partial manifest during cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use vellum_directory::InMemoryDirectory;

    use super::*;

    #[tokio::test]
    async fn finish_without_prepare_is_illegal() {
        let dir = InMemoryDirectory::new();
        let mut set = SegmentSet::new();
        let mut engine = CommitEngine::new();
        match engine.finish(&mut set, &dir).await {
            Err(Error::IllegalState(_)) => {}
            other => panic!("expected IllegalState, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rollback_without_prepare_is_illegal() {
        let dir = InMemoryDirectory::new();
        let mut engine = CommitEngine::new();
        match engine.rollback(&dir).await {
            Err(Error::IllegalState(_)) => {}
            other => panic!("expected IllegalState, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn prepare_twice_is_illegal() {
        let dir = InMemoryDirectory::new();
        let mut set = SegmentSet::new();
        let mut engine = CommitEngine::new();
        engine.prepare(&mut set, &dir).await.unwrap();
        match engine.prepare(&mut set, &dir).await {
            Err(Error::IllegalState(_)) => {}
            other => panic!("expected IllegalState, got {:?}", other),
        }
        engine.rollback(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn prepared_manifest_is_visible_but_invalid() {
        let dir = InMemoryDirectory::new();
        let mut set = SegmentSet::new();
        let mut engine = CommitEngine::new();
        engine.prepare(&mut set, &dir).await.unwrap();
        assert_eq!(Some("segments_1"), engine.pending_segments_file());
        assert_eq!(1, set.generation());
        assert_eq!(NO_GENERATION, set.last_generation());
        // The payload is on disk, the checksum is not.
        match codec::read_manifest(&dir, "segments_1").await {
            Err(Error::CorruptManifest(_)) => {}
            other => panic!("expected CorruptManifest, got {:?}", other.map(|_| ())),
        }
        engine.finish(&mut set, &dir).await.unwrap();
        assert_eq!(1, set.last_generation());
        let read = codec::read_manifest(&dir, "segments_1").await.unwrap();
        assert!(read.is_empty());
    }
}
