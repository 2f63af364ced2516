use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, NO_GENERATION, SEGMENT_INFO_EXTENSION};

/////////////////////////////////////////// DocStoreSpec ///////////////////////////////////////////

/// Shared-doc-store coordinates carried by legacy segments.  Opaque to the
/// current format; round-tripped only through the legacy layout.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct DocStoreSpec {
    pub offset: i32,
    pub segment: String,
    pub compound: bool,
}

///////////////////////////////////////// SegmentDescriptor ////////////////////////////////////////

/// One indexed segment as the manifest sees it: a stable name, the codec that
/// can read its files, and the per-commit deletion bookkeeping.  Everything
/// else about the segment lives in its own files.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SegmentDescriptor {
    /// Stable identifier, unique within a segment set.
    pub name: String,
    /// Names the per-segment codec that reads and writes this segment.
    pub codec_name: String,
    /// Total documents in the segment, deletions included.
    pub doc_count: i32,
    /// Deletion generation: -1 until the first deletion is committed, then
    /// monotone non-decreasing.
    pub del_gen: i64,
    /// Deleted documents; always within [0, doc_count].
    pub del_count: i32,
    /// Version string of the writer that created the segment.  Absent or
    /// major-version-3 means the segment predates the current format.
    pub version: Option<String>,
    /// Free-form provenance recorded by the writer.
    pub diagnostics: HashMap<String, String>,
    pub doc_store: Option<DocStoreSpec>,
    pub norm_gens: Option<Vec<i64>>,
    pub is_compound_file: bool,
    pub has_prox: bool,
    pub has_vectors: bool,
}

impl SegmentDescriptor {
    pub fn new(name: &str, codec_name: &str, doc_count: i32) -> Self {
        SegmentDescriptor {
            name: name.to_string(),
            codec_name: codec_name.to_string(),
            doc_count,
            del_gen: NO_GENERATION,
            del_count: 0,
            version: None,
            diagnostics: HashMap::new(),
            doc_store: None,
            norm_gens: None,
            is_compound_file: false,
            has_prox: true,
            has_vectors: false,
        }
    }

    /// True for segments written before the current format: no version, or a
    /// version with the major-version-3 marker.
    pub fn is_legacy(&self) -> bool {
        match &self.version {
            None => true,
            Some(v) => v.starts_with("3."),
        }
    }

    pub fn si_file_name(&self) -> String {
        format!("{}.{}", self.name, SEGMENT_INFO_EXTENSION)
    }

    /// Files this descriptor contributes to a commit's reference set.
    pub fn files(&self) -> Vec<String> {
        vec![self.si_file_name()]
    }

    pub fn live_doc_count(&self) -> i32 {
        self.doc_count - self.del_count
    }

    /// Record a new deletion count, holding `0 <= del_count <= doc_count`.
    pub fn set_del_count(&mut self, del_count: i32) -> Result<(), Error> {
        if del_count < 0 || del_count > self.doc_count {
            return Err(Error::IllegalState(format!(
                "del_count {} out of range for segment {} with {} docs",
                del_count, self.name, self.doc_count
            )));
        }
        self.del_count = del_count;
        Ok(())
    }

    /// Advance the deletion generation for the next deletes commit.
    pub fn advance_del_gen(&mut self) {
        if self.del_gen == NO_GENERATION {
            self.del_gen = 1;
        } else {
            self.del_gen += 1;
        }
    }
}
