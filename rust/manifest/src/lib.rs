//! The segment-set commit manager of a vellum index.
//!
//! An index is a set of immutable segments plus one authoritative file, the
//! `segments_N` manifest, that enumerates the live segments for generation N.
//! This crate maintains that manifest: it serializes the in-memory
//! [`SegmentSet`] to the wire format, advances it from one generation to the
//! next with a two-phase commit ([`CommitEngine`]), and locates the most
//! recent committed generation on behalf of readers ([`GenerationFinder`])
//! even when the underlying directory serves stale listings.
//!
//! Commits never rename and never overwrite a manifest: every attempt writes
//! a brand-new `segments_N`, made valid only by its trailing checksum, and
//! generation numbers are never reused even across rolled-back attempts.

use serde::{Deserialize, Serialize};

use vellum_directory::DirectoryError;
use vellum_error::{ErrorCodes, VellumError};

mod checksum;
mod codec;
mod commit;
mod descriptor;
mod finder;
mod legacy;
mod segment_info;
mod segment_set;

pub use checksum::{ChecksumInput, ChecksumOutput};
pub use codec::{
    latest_generation, parse_generation, read_manifest, read_segments_gen, segments_file_name,
    to_base36, write_segments_gen, CODEC_MAGIC, FORMAT_CURRENT, FORMAT_SEGMENTS_GEN_CURRENT,
    SEGMENTS_BASE_NAME, SEGMENTS_GEN_FILE,
};
pub use commit::CommitEngine;
pub use descriptor::{DocStoreSpec, SegmentDescriptor};
pub use finder::{GenerationFinder, IndexCommitAnchor};
pub use legacy::{LEGACY_CODEC_NAME, LEGACY_FORMAT_3X};
pub use segment_info::{
    default_codec, lookup_codec, register_codec, SegmentCodec, CURRENT_CODEC_NAME,
    SEGMENT_INFO_EXTENSION,
};
pub use segment_set::{MergeSpec, SegmentSet};

/// A generation that does not exist yet: no manifest has been read or written.
pub const NO_GENERATION: i64 = -1;

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// Error captures the conditions that can occur while reading, writing, or
/// discovering manifests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("corrupt manifest: {0}")]
    CorruptManifest(String),
    #[error("format too new: {0}")]
    FormatTooNew(String),
    #[error("no segments file found: {0}")]
    IndexNotFound(String),
    #[error("no such directory: {0}")]
    NoSuchDirectory(String),
    #[error("duplicate segment: {0}")]
    DuplicateSegment(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("unknown segment codec: {0}")]
    UnknownCodec(String),
    #[error("i/o failure: {0}")]
    Io(DirectoryError),
}

impl Error {
    /// True iff generation discovery may recover from this error by trying
    /// another generation.  Everything else surfaces immediately.
    pub fn recoverable_in_discovery(&self) -> bool {
        matches!(self, Error::CorruptManifest(_) | Error::Io(_))
    }
}

impl From<DirectoryError> for Error {
    fn from(err: DirectoryError) -> Error {
        match err {
            DirectoryError::NoSuchDirectory(path) => Error::NoSuchDirectory(path),
            err => Error::Io(err),
        }
    }
}

impl VellumError for Error {
    fn code(&self) -> ErrorCodes {
        match self {
            Error::CorruptManifest(_) => ErrorCodes::DataLoss,
            Error::FormatTooNew(_) => ErrorCodes::VersionMismatch,
            Error::IndexNotFound(_) => ErrorCodes::NotFound,
            Error::NoSuchDirectory(_) => ErrorCodes::NotFound,
            Error::DuplicateSegment(_) => ErrorCodes::AlreadyExists,
            Error::IllegalState(_) => ErrorCodes::FailedPrecondition,
            Error::UnknownCodec(_) => ErrorCodes::InvalidArgument,
            Error::Io(_) => ErrorCodes::Internal,
        }
    }
}

/////////////////////////////////////////// FinderConfig ///////////////////////////////////////////

/// FinderConfig controls generation discovery.  Tests pass their own; there
/// is no process-wide state.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct FinderConfig {
    /// The maximum number of look-ahead probes past the newest generation the
    /// caches admit to, before discovery gives up.  Defaults to 10.
    #[serde(default = "FinderConfig::default_gen_lookahead_count")]
    pub gen_lookahead_count: usize,
}

impl FinderConfig {
    fn default_gen_lookahead_count() -> usize {
        10
    }
}

impl Default for FinderConfig {
    fn default() -> Self {
        FinderConfig {
            gen_lookahead_count: Self::default_gen_lookahead_count(),
        }
    }
}
