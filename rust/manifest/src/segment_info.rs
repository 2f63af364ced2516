//! Per-segment codecs and the registration table that names them.
//!
//! The manifest stores four fields per segment; everything else lives in the
//! segment's `.si` file, owned by whichever codec the manifest names.  Codecs
//! are looked up by name in a process-wide table populated at initialization
//! with the two known entries — the current codec and the legacy one-time
//! upgrade codec.  Tests may register additional codecs.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;

use vellum_directory::IndexDirectory;

use crate::checksum::{ChecksumInput, ChecksumOutput};
use crate::codec::CODEC_MAGIC;
use crate::{legacy, Error, SegmentDescriptor};

pub const CURRENT_CODEC_NAME: &str = "vellum40";
pub const SEGMENT_INFO_CODEC: &str = "segmentinfo";
pub const SEGMENT_INFO_FORMAT_CURRENT: i32 = 0;
pub const SEGMENT_INFO_EXTENSION: &str = "si";

/////////////////////////////////////////// SegmentCodec ///////////////////////////////////////////

/// Reader/writer of one segment's own files.  The commit manager only ever
/// touches the `.si` descriptor file; postings, deletions, and norms are
/// other formats behind the same codec name and are opaque here.
#[async_trait]
pub trait SegmentCodec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fill `descriptor` from the segment's `.si` file.
    async fn read_segment_info(
        &self,
        dir: &dyn IndexDirectory,
        descriptor: &mut SegmentDescriptor,
    ) -> Result<(), Error>;

    /// Write the segment's `.si` file.
    async fn write_segment_info(
        &self,
        dir: &dyn IndexDirectory,
        descriptor: &SegmentDescriptor,
    ) -> Result<(), Error>;
}

//////////////////////////////////////// CurrentSegmentCodec ///////////////////////////////////////

/// The current `.si` layout: framed like the manifest (magic, codec id,
/// format), then version string, doc count, and diagnostics, with a trailing
/// checksum.
#[derive(Debug, Default)]
pub struct CurrentSegmentCodec;

#[async_trait]
impl SegmentCodec for CurrentSegmentCodec {
    fn name(&self) -> &'static str {
        CURRENT_CODEC_NAME
    }

    async fn read_segment_info(
        &self,
        dir: &dyn IndexDirectory,
        descriptor: &mut SegmentDescriptor,
    ) -> Result<(), Error> {
        let si_name = descriptor.si_file_name();
        let mut input = ChecksumInput::new(dir.open_input(&si_name).await?);
        let magic = input.read_i32().await?;
        if magic != CODEC_MAGIC as i32 {
            return Err(Error::CorruptManifest(format!(
                "bad magic in {}: {:#x}",
                si_name, magic
            )));
        }
        let codec_id = input.read_string().await?;
        if codec_id != SEGMENT_INFO_CODEC {
            return Err(Error::CorruptManifest(format!(
                "unexpected codec id in {}: {:?}",
                si_name, codec_id
            )));
        }
        let format = input.read_i32().await?;
        if format > SEGMENT_INFO_FORMAT_CURRENT {
            return Err(Error::FormatTooNew(format!(
                "{} uses format {} but this reader supports at most {}",
                si_name, format, SEGMENT_INFO_FORMAT_CURRENT
            )));
        }
        if format < 0 {
            return Err(Error::CorruptManifest(format!(
                "negative format in {}: {}",
                si_name, format
            )));
        }
        let version = input.read_string().await?;
        descriptor.version = if version.is_empty() {
            None
        } else {
            Some(version)
        };
        descriptor.doc_count = input.read_i32().await?;
        if descriptor.doc_count < 0 {
            return Err(Error::CorruptManifest(format!(
                "negative doc count in {}: {}",
                si_name, descriptor.doc_count
            )));
        }
        descriptor.diagnostics = input.read_string_map().await?;
        input.check_footer().await?;
        Ok(())
    }

    async fn write_segment_info(
        &self,
        dir: &dyn IndexDirectory,
        descriptor: &SegmentDescriptor,
    ) -> Result<(), Error> {
        let mut out = ChecksumOutput::new(dir.create_output(&descriptor.si_file_name()).await?);
        out.write_i32(CODEC_MAGIC as i32).await?;
        out.write_string(SEGMENT_INFO_CODEC).await?;
        out.write_i32(SEGMENT_INFO_FORMAT_CURRENT).await?;
        out.write_string(descriptor.version.as_deref().unwrap_or(""))
            .await?;
        out.write_i32(descriptor.doc_count).await?;
        out.write_string_map(&descriptor.diagnostics).await?;
        out.finish().await
    }
}

//////////////////////////////////////// LegacySegmentCodec ////////////////////////////////////////

/// The legacy codec: reads and writes the fixed legacy `.si` layout produced
/// by the one-time upgrade pass.
#[derive(Debug, Default)]
pub struct LegacySegmentCodec;

#[async_trait]
impl SegmentCodec for LegacySegmentCodec {
    fn name(&self) -> &'static str {
        legacy::LEGACY_CODEC_NAME
    }

    async fn read_segment_info(
        &self,
        dir: &dyn IndexDirectory,
        descriptor: &mut SegmentDescriptor,
    ) -> Result<(), Error> {
        legacy::read_legacy_segment_info(dir, descriptor).await
    }

    async fn write_segment_info(
        &self,
        dir: &dyn IndexDirectory,
        descriptor: &SegmentDescriptor,
    ) -> Result<(), Error> {
        legacy::write_legacy_segment_info(dir, descriptor).await
    }
}

///////////////////////////////////////////// registry /////////////////////////////////////////////

static CODEC_REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn SegmentCodec>>>> = Lazy::new(|| {
    let mut codecs: HashMap<String, Arc<dyn SegmentCodec>> = HashMap::new();
    let current: Arc<dyn SegmentCodec> = Arc::new(CurrentSegmentCodec);
    let legacy: Arc<dyn SegmentCodec> = Arc::new(LegacySegmentCodec);
    codecs.insert(current.name().to_string(), current);
    codecs.insert(legacy.name().to_string(), legacy);
    RwLock::new(codecs)
});

/// Install a codec under its name, replacing any previous entry.
pub fn register_codec(codec: Arc<dyn SegmentCodec>) {
    CODEC_REGISTRY
        .write()
        .unwrap()
        .insert(codec.name().to_string(), codec);
}

/// Look up a codec by the name a manifest recorded.
pub fn lookup_codec(name: &str) -> Result<Arc<dyn SegmentCodec>, Error> {
    CODEC_REGISTRY
        .read()
        .unwrap()
        .get(name)
        .cloned()
        .ok_or_else(|| Error::UnknownCodec(name.to_string()))
}

/// The codec new segments are written with.
pub fn default_codec() -> Arc<dyn SegmentCodec> {
    lookup_codec(CURRENT_CODEC_NAME).expect("the current codec is always registered")
}
