//! Reader-side generation discovery.
//!
//! The manifest a reader wants is "the newest one that works", but on a
//! stale-caching filesystem neither the directory listing nor the advisory
//! `segments.gen` hint can be trusted alone: either may lag or lead the
//! other.  The finder consults both, takes the max, and retries through a
//! caller-supplied body, falling back one generation after a repeated
//! failure and probing ahead a bounded number of steps when both caches are
//! stuck hiding a newer commit.

use std::future::Future;

use vellum_directory::IndexDirectory;

use crate::{codec, Error, FinderConfig, NO_GENERATION};

//////////////////////////////////////// IndexCommitAnchor /////////////////////////////////////////

/// A caller-supplied reference to one specific commit, bypassing discovery.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexCommitAnchor {
    pub segments_file: String,
}

impl IndexCommitAnchor {
    pub fn new(segments_file: &str) -> Self {
        IndexCommitAnchor {
            segments_file: segments_file.to_string(),
        }
    }
}

///////////////////////////////////////// GenerationFinder /////////////////////////////////////////

/// The retrying discovery loop.  `do_body` is handed a candidate manifest
/// file name and must error on any I/O or corruption problem it hits; the
/// finder reads such an error as "possibly stale, try again" and remembers
/// only the first one for the final rethrow.
pub struct GenerationFinder<'a> {
    dir: &'a dyn IndexDirectory,
    config: FinderConfig,
}

impl<'a> GenerationFinder<'a> {
    pub fn new(dir: &'a dyn IndexDirectory, config: FinderConfig) -> Self {
        GenerationFinder { dir, config }
    }

    pub async fn run<T, F, Fut>(&self, do_body: F) -> Result<T, Error>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.run_anchored(None, do_body).await
    }

    pub async fn run_anchored<T, F, Fut>(
        &self,
        anchor: Option<&IndexCommitAnchor>,
        mut do_body: F,
    ) -> Result<T, Error>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if let Some(anchor) = anchor {
            // The anchor names its commit exactly; no discovery, no retries.
            return do_body(anchor.segments_file.clone()).await;
        }
        let mut gen: i64 = NO_GENERATION;
        let mut last_gen: i64 = NO_GENERATION;
        let mut retry_count: usize = 0;
        let mut use_caches = true;
        let mut ignore_hint = false;
        let mut hint_only_candidate = false;
        let mut lookahead = 0usize;
        let mut saved_exc: Option<Error> = None;
        loop {
            if use_caches {
                let files = self.dir.list_all().await?;
                let gen_a = codec::latest_generation(&files);
                let gen_b = if ignore_hint {
                    NO_GENERATION
                } else {
                    codec::read_segments_gen(self.dir)
                        .await?
                        .unwrap_or(NO_GENERATION)
                };
                tracing::debug!(gen_a, gen_b, "discovery consulted listing and hint");
                gen = std::cmp::max(gen_a, gen_b);
                // The hint is advisory; remember when it alone names this
                // generation so a failure can demote it.
                hint_only_candidate = gen_b > gen_a;
                if gen == NO_GENERATION {
                    return Err(Error::IndexNotFound(
                        "no segments file in the directory listing or the generation hint"
                            .to_string(),
                    ));
                }
            }
            if use_caches && last_gen == gen && retry_count >= 2 {
                // Both caches are stuck on a generation that does not work;
                // from here on, probe past them.
                use_caches = false;
            }
            if !use_caches {
                hint_only_candidate = false;
                if lookahead < self.config.gen_lookahead_count {
                    gen += 1;
                    lookahead += 1;
                    tracing::debug!(gen, lookahead, "probing ahead of the caches");
                } else {
                    return Err(saved_exc.unwrap_or_else(|| {
                        Error::IndexNotFound(
                            "look-ahead exhausted without a readable manifest".to_string(),
                        )
                    }));
                }
            }
            if last_gen == gen {
                retry_count += 1;
            } else {
                retry_count = 0;
            }
            last_gen = gen;
            let segments_file = codec::segments_file_name(gen);
            match do_body(segments_file.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.recoverable_in_discovery() => {
                    tracing::debug!(%segments_file, error = %err, "candidate failed; retrying");
                    let second_failure_at_gen = retry_count == 1;
                    if saved_exc.is_none() {
                        saved_exc = Some(err);
                    }
                    if hint_only_candidate {
                        // The hint named a generation the directory cannot
                        // deliver; the listing is authoritative from here on.
                        tracing::debug!(gen, "demoting the generation hint");
                        ignore_hint = true;
                    }
                    if gen > 1 && use_caches && second_failure_at_gen {
                        // The same generation failed twice; the one before it
                        // may still be intact.
                        let prev = codec::segments_file_name(gen - 1);
                        match do_body(prev.clone()).await {
                            Ok(value) => {
                                tracing::info!(%prev, "fell back to the previous generation");
                                return Ok(value);
                            }
                            Err(err) if err.recoverable_in_discovery() => {
                                tracing::debug!(%prev, error = %err, "previous generation also failed");
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
