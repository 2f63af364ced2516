use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{DirectoryError, IndexDirectory, IndexInput, IndexOutput};

//////////////////////////////////////// LocalDirectory /////////////////////////////////////////

/// A directory backed by the local filesystem, rooted at a path.
#[derive(Clone, Debug)]
pub struct LocalDirectory {
    root: PathBuf,
}

impl LocalDirectory {
    pub fn new<P: AsRef<Path>>(root: P) -> LocalDirectory {
        LocalDirectory {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Create the root on disk if it does not exist yet.
    pub fn create<P: AsRef<Path>>(root: P) -> Result<LocalDirectory, DirectoryError> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(LocalDirectory::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn classify_missing(&self, name: &str, err: std::io::Error) -> DirectoryError {
        if err.kind() == std::io::ErrorKind::NotFound {
            if self.root.is_dir() {
                DirectoryError::FileNotFound(name.to_string())
            } else {
                DirectoryError::NoSuchDirectory(self.root.display().to_string())
            }
        } else {
            DirectoryError::Io(err)
        }
    }
}

#[async_trait]
impl IndexDirectory for LocalDirectory {
    async fn list_all(&self) -> Result<Vec<String>, DirectoryError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DirectoryError::NoSuchDirectory(
                    self.root.display().to_string(),
                ));
            }
            Err(err) => return Err(DirectoryError::Io(err)),
        };
        let mut names = vec![];
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn file_exists(&self, name: &str) -> Result<bool, DirectoryError> {
        Ok(self.resolve(name).is_file())
    }

    async fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>, DirectoryError> {
        let path = self.resolve(name);
        let file = std::fs::File::open(&path).map_err(|err| self.classify_missing(name, err))?;
        let len = file.metadata()?.len();
        Ok(Box::new(LocalInput {
            name: name.to_string(),
            file,
            len,
        }))
    }

    async fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>, DirectoryError> {
        let path = self.resolve(name);
        tracing::debug!(path = %path.display(), "creating output");
        let file = std::fs::File::create(&path).map_err(|err| self.classify_missing(name, err))?;
        Ok(Box::new(LocalOutput { file }))
    }

    async fn delete_file(&self, name: &str) -> Result<(), DirectoryError> {
        match std::fs::remove_file(self.resolve(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(DirectoryError::Io(err)),
        }
    }

    async fn sync(&self, names: &[String]) -> Result<(), DirectoryError> {
        for name in names {
            let file = std::fs::File::open(self.resolve(name))
                .map_err(|err| self.classify_missing(name, err))?;
            file.sync_all()?;
        }
        // Newly created names are only durable once the directory itself is.
        let dir = std::fs::File::open(&self.root)
            .map_err(|_| DirectoryError::NoSuchDirectory(self.root.display().to_string()))?;
        dir.sync_all()?;
        Ok(())
    }
}

////////////////////////////////////////// LocalInput ///////////////////////////////////////////

struct LocalInput {
    name: String,
    file: std::fs::File,
    len: u64,
}

#[async_trait]
impl IndexInput for LocalInput {
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DirectoryError> {
        self.file.read_exact(buf).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                tracing::debug!(name = %self.name, "short read");
            }
            DirectoryError::Io(err)
        })
    }

    fn len(&self) -> u64 {
        self.len
    }
}

////////////////////////////////////////// LocalOutput //////////////////////////////////////////

struct LocalOutput {
    file: std::fs::File,
}

#[async_trait]
impl IndexOutput for LocalOutput {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), DirectoryError> {
        Write::write_all(&mut self.file, buf)?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DirectoryError> {
        Write::flush(&mut self.file)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DirectoryError> {
        Write::flush(&mut self.file)?;
        Ok(())
    }
}
