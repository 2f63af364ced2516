use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{DirectoryError, IndexDirectory, IndexInput, IndexOutput};

/////////////////////////////////////// InMemoryDirectory ///////////////////////////////////////

/// An in-memory directory for tests.
///
/// Outputs publish their bytes on `flush`/`close`, so a test can observe the
/// exact on-disk state a crashed writer would leave behind: a flushed payload
/// with no trailing checksum.  Inputs snapshot the file at open time.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDirectory {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install raw bytes directly, bypassing the output path.
    pub fn put(&self, name: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(name.to_string(), bytes);
    }

    /// The current raw bytes of a file, if present.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl IndexDirectory for InMemoryDirectory {
    async fn list_all(&self) -> Result<Vec<String>, DirectoryError> {
        let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn file_exists(&self, name: &str) -> Result<bool, DirectoryError> {
        Ok(self.files.lock().unwrap().contains_key(name))
    }

    async fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>, DirectoryError> {
        let data = self
            .files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DirectoryError::FileNotFound(name.to_string()))?;
        Ok(Box::new(MemoryInput { data, pos: 0 }))
    }

    async fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>, DirectoryError> {
        // The file exists, empty, as soon as it is created.
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), Vec::new());
        Ok(Box::new(MemoryOutput {
            files: Arc::clone(&self.files),
            name: name.to_string(),
            buf: Vec::new(),
        }))
    }

    async fn delete_file(&self, name: &str) -> Result<(), DirectoryError> {
        self.files.lock().unwrap().remove(name);
        Ok(())
    }

    async fn sync(&self, _names: &[String]) -> Result<(), DirectoryError> {
        Ok(())
    }
}

///////////////////////////////////////// MemoryInput ///////////////////////////////////////////

struct MemoryInput {
    data: Vec<u8>,
    pos: usize,
}

#[async_trait]
impl IndexInput for MemoryInput {
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DirectoryError> {
        if self.pos + buf.len() > self.data.len() {
            return Err(DirectoryError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of file",
            )));
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

///////////////////////////////////////// MemoryOutput //////////////////////////////////////////

struct MemoryOutput {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    name: String,
    buf: Vec<u8>,
}

#[async_trait]
impl IndexOutput for MemoryOutput {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), DirectoryError> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DirectoryError> {
        self.files
            .lock()
            .unwrap()
            .insert(self.name.clone(), self.buf.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DirectoryError> {
        self.flush().await
    }
}
