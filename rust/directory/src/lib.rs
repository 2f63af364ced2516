//! An index directory is the single shared resource of the commit manager: a
//! flat namespace of immutable-once-closed files.  Writers only ever append
//! new files; visibility is a matter of checksums and naming, never renames.

use async_trait::async_trait;
use thiserror::Error;

use vellum_error::{ErrorCodes, VellumError};

pub mod local;
pub mod memory;

pub use local::LocalDirectory;
pub use memory::InMemoryDirectory;

///////////////////////////////////////// DirectoryError ////////////////////////////////////////

/// DirectoryError distinguishes a missing directory from a missing file and
/// from every other I/O failure.  Callers rely on the distinction: a missing
/// directory is fatal, a missing file is often just a stale cache.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("no such directory: {0}")]
    NoSuchDirectory(String),
    #[error("no such file: {0}")]
    FileNotFound(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl VellumError for DirectoryError {
    fn code(&self) -> ErrorCodes {
        match self {
            DirectoryError::NoSuchDirectory(_) => ErrorCodes::NotFound,
            DirectoryError::FileNotFound(_) => ErrorCodes::NotFound,
            DirectoryError::Io(_) => ErrorCodes::Internal,
        }
    }
}

/////////////////////////////////////////// IndexInput //////////////////////////////////////////

/// A sequential reader over one file.  The contents are a snapshot taken at
/// open time; concurrent writers never mutate what an open input observes.
#[async_trait]
pub trait IndexInput: Send {
    /// Fill `buf` exactly, erroring on a short read.
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DirectoryError>;

    /// Total length of the file in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

////////////////////////////////////////// IndexOutput //////////////////////////////////////////

/// An append-only writer over one new file.
#[async_trait]
pub trait IndexOutput: Send {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), DirectoryError>;

    /// Make everything written so far observable by concurrent readers.
    async fn flush(&mut self) -> Result<(), DirectoryError>;

    /// Flush and finalize the file.  The output must not be used afterwards.
    async fn close(&mut self) -> Result<(), DirectoryError>;
}

///////////////////////////////////////// IndexDirectory ////////////////////////////////////////

/// The abstract directory the commit manager operates against.
///
/// Implementations may serve stale listings (classically NFS); the commit
/// protocol and generation discovery are designed to tolerate that.
#[async_trait]
pub trait IndexDirectory: Send + Sync {
    /// Every file name in the directory.  May be stale.
    async fn list_all(&self) -> Result<Vec<String>, DirectoryError>;

    async fn file_exists(&self, name: &str) -> Result<bool, DirectoryError>;

    async fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>, DirectoryError>;

    /// Create a new file.  Overwrites an existing file of the same name.
    async fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>, DirectoryError>;

    /// Best-effort idempotent delete: removing an absent file succeeds.
    async fn delete_file(&self, name: &str) -> Result<(), DirectoryError>;

    /// Make the named files durable.
    async fn sync(&self, names: &[String]) -> Result<(), DirectoryError>;
}

/// A throwaway directory rooted in a fresh temporary directory, for tests.
pub fn test_directory() -> LocalDirectory {
    LocalDirectory::new(
        tempfile::TempDir::new()
            .expect("Should be able to create a temporary directory.")
            .into_path()
            .to_str()
            .expect("Should be able to convert temporary directory path to string"),
    )
}
