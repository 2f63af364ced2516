//! Checksummed streams over directory inputs and outputs.
//!
//! Every payload byte that passes through updates a running CRC-32; the file
//! ends with the checksum as a big-endian i64 (the 32-bit value
//! zero-extended, leaving the field room for a 64-bit polynomial without
//! reframing).  A manifest is only valid once its footer is; a reader that
//! hits a mismatched or missing footer treats the file as absent.

use std::collections::HashMap;

use vellum_directory::{IndexInput, IndexOutput};

use crate::Error;

/// Strings longer than this are assumed to be framing garbage, not data.
const MAX_STRING_LEN: usize = 1 << 24;

///////////////////////////////////////// ChecksumOutput ////////////////////////////////////////

pub struct ChecksumOutput {
    out: Box<dyn IndexOutput>,
    hasher: crc32fast::Hasher,
}

impl ChecksumOutput {
    pub fn new(out: Box<dyn IndexOutput>) -> Self {
        ChecksumOutput {
            out,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// The checksum over every payload byte written so far.
    pub fn checksum(&self) -> u64 {
        self.hasher.clone().finalize() as u64
    }

    pub async fn write_bytes(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.hasher.update(buf);
        self.out.write_all(buf).await?;
        Ok(())
    }

    pub async fn write_u8(&mut self, v: u8) -> Result<(), Error> {
        self.write_bytes(&[v]).await
    }

    pub async fn write_i32(&mut self, v: i32) -> Result<(), Error> {
        self.write_bytes(&v.to_be_bytes()).await
    }

    pub async fn write_i64(&mut self, v: i64) -> Result<(), Error> {
        self.write_bytes(&v.to_be_bytes()).await
    }

    /// Length-prefixed UTF-8.
    pub async fn write_string(&mut self, s: &str) -> Result<(), Error> {
        self.write_i32(s.len() as i32).await?;
        self.write_bytes(s.as_bytes()).await
    }

    /// Count-prefixed map, written in key order so equal maps serialize to
    /// equal bytes.
    pub async fn write_string_map(&mut self, map: &HashMap<String, String>) -> Result<(), Error> {
        self.write_i32(map.len() as i32).await?;
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            self.write_string(key).await?;
            self.write_string(&map[key]).await?;
        }
        Ok(())
    }

    /// Make the payload written so far observable without making it valid.
    pub async fn flush(&mut self) -> Result<(), Error> {
        self.out.flush().await?;
        Ok(())
    }

    /// Append the checksum footer, flush, and close.  Only now is the file
    /// valid to readers.
    pub async fn finish(mut self) -> Result<(), Error> {
        let checksum = self.checksum() as i64;
        self.out.write_all(&checksum.to_be_bytes()).await?;
        self.out.close().await?;
        Ok(())
    }

    /// Close without a footer.  Used for unchecksummed legacy layouts and for
    /// abandoning a stream whose file is about to be deleted.
    pub async fn close(mut self) -> Result<(), Error> {
        self.out.close().await?;
        Ok(())
    }
}

///////////////////////////////////////// ChecksumInput /////////////////////////////////////////

pub struct ChecksumInput {
    input: Box<dyn IndexInput>,
    hasher: crc32fast::Hasher,
}

impl ChecksumInput {
    pub fn new(input: Box<dyn IndexInput>) -> Self {
        ChecksumInput {
            input,
            hasher: crc32fast::Hasher::new(),
        }
    }

    pub fn file_len(&self) -> u64 {
        self.input.len()
    }

    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.input.read_exact(buf).await?;
        self.hasher.update(buf);
        Ok(())
    }

    pub async fn read_u8(&mut self) -> Result<u8, Error> {
        let mut buf = [0u8; 1];
        self.read_bytes(&mut buf).await?;
        Ok(buf[0])
    }

    pub async fn read_i32(&mut self) -> Result<i32, Error> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf).await?;
        Ok(i32::from_be_bytes(buf))
    }

    pub async fn read_i64(&mut self) -> Result<i64, Error> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf).await?;
        Ok(i64::from_be_bytes(buf))
    }

    pub async fn read_string(&mut self) -> Result<String, Error> {
        let len = self.read_i32().await?;
        if len < 0 || len as usize > MAX_STRING_LEN {
            return Err(Error::CorruptManifest(format!(
                "unreasonable string length: {}",
                len
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_bytes(&mut buf).await?;
        String::from_utf8(buf)
            .map_err(|err| Error::CorruptManifest(format!("invalid utf-8 in string: {}", err)))
    }

    pub async fn read_string_map(&mut self) -> Result<HashMap<String, String>, Error> {
        let count = self.read_i32().await?;
        if count < 0 {
            return Err(Error::CorruptManifest(format!(
                "negative map entry count: {}",
                count
            )));
        }
        let mut map = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = self.read_string().await?;
            let value = self.read_string().await?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Read the trailing checksum (excluded from the running sum) and compare
    /// it to everything read so far.
    pub async fn check_footer(&mut self) -> Result<(), Error> {
        let expected = self.hasher.clone().finalize() as u64;
        let mut buf = [0u8; 8];
        if self.input.read_exact(&mut buf).await.is_err() {
            return Err(Error::CorruptManifest(
                "truncated file: missing checksum footer".to_string(),
            ));
        }
        let actual = i64::from_be_bytes(buf) as u64;
        if actual != expected {
            return Err(Error::CorruptManifest(format!(
                "checksum mismatch: expected {:#x} actual {:#x}",
                expected, actual
            )));
        }
        Ok(())
    }
}
