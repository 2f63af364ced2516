//! The `segments_N` wire codec and its advisory sidecar.
//!
//! A current-format manifest is framed as:
//!
//! ```text
//!   magic            i32   CODEC_MAGIC
//!   codec id         string "segments"
//!   format           i32   FORMAT_CURRENT
//!   commit version   i64
//!   counter          i32
//!   num segments     i32
//!   per segment:     name, codec name, del_gen i64, del_count i32
//!   user data        count-prefixed map<string, string>
//!   checksum         i64   covers everything above
//! ```
//!
//! All integers are big-endian; strings are i32-length-prefixed UTF-8.  A
//! file whose leading i32 is not the magic is handed to the legacy reader.
//! Per-segment attributes beyond the four fields above live in the segment's
//! own `.si` file, read through the codec the manifest names.

use vellum_directory::IndexDirectory;

use crate::checksum::{ChecksumInput, ChecksumOutput};
use crate::segment_info::lookup_codec;
use crate::{legacy, Error, SegmentDescriptor, SegmentSet, NO_GENERATION};

pub const CODEC_MAGIC: u32 = 0x564c4d31; // "VLM1"
pub const FORMAT_CURRENT: i32 = 0;
pub const SEGMENTS_CODEC: &str = "segments";
pub const SEGMENTS_BASE_NAME: &str = "segments";
pub const SEGMENTS_GEN_FILE: &str = "segments.gen";
pub const FORMAT_SEGMENTS_GEN_CURRENT: i32 = -2;

//////////////////////////////////////////// file names ////////////////////////////////////////////

/// Lower-case base-36, the radix the manifest file names are written in.
pub fn to_base36(mut n: i64) -> String {
    assert!(n >= 0, "base-36 encoding is for non-negative values");
    let digits = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(digits[(n % 36) as usize]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).expect("base-36 digits are ascii")
}

/// The manifest file name for a generation.  Generation 0 is the bare base
/// name with no suffix.
pub fn segments_file_name(generation: i64) -> String {
    if generation <= 0 {
        SEGMENTS_BASE_NAME.to_string()
    } else {
        format!("{}_{}", SEGMENTS_BASE_NAME, to_base36(generation))
    }
}

/// The generation encoded in a manifest file name, or None for names that are
/// not manifests (including the advisory `segments.gen`).
pub fn parse_generation(name: &str) -> Option<i64> {
    if name == SEGMENTS_GEN_FILE {
        return None;
    }
    if name == SEGMENTS_BASE_NAME {
        return Some(0);
    }
    let suffix = name.strip_prefix("segments_")?;
    match i64::from_str_radix(suffix, 36) {
        Ok(gen) if gen >= 0 => Some(gen),
        _ => {
            tracing::debug!(name, "unparseable generation suffix");
            None
        }
    }
}

/// The largest generation named by a directory listing, or -1 if the listing
/// names none.
pub fn latest_generation<S: AsRef<str>>(files: &[S]) -> i64 {
    files
        .iter()
        .filter_map(|f| parse_generation(f.as_ref()))
        .max()
        .unwrap_or(NO_GENERATION)
}

///////////////////////////////////////////// writing //////////////////////////////////////////////

/// Write the framed manifest payload for `set`, everything except the
/// trailing checksum.
///
/// Legacy descriptors without a `.si` on disk get one written here, in the
/// legacy layout, before the manifest that references them can ever become
/// valid; every sidecar created is recorded in `created_sidecars` so a failed
/// attempt can delete them.
pub async fn write_manifest(
    set: &SegmentSet,
    dir: &dyn IndexDirectory,
    out: &mut ChecksumOutput,
    created_sidecars: &mut Vec<String>,
) -> Result<(), Error> {
    out.write_i32(CODEC_MAGIC as i32).await?;
    out.write_string(SEGMENTS_CODEC).await?;
    out.write_i32(FORMAT_CURRENT).await?;
    out.write_i64(set.version()).await?;
    out.write_i32(set.counter).await?;
    out.write_i32(set.len() as i32).await?;
    for segment in set.iter() {
        out.write_string(&segment.name).await?;
        out.write_string(&segment.codec_name).await?;
        out.write_i64(segment.del_gen).await?;
        out.write_i32(segment.del_count).await?;
        if segment.is_legacy() && !dir.file_exists(&segment.si_file_name()).await? {
            legacy::write_legacy_segment_info(dir, segment).await?;
            created_sidecars.push(segment.si_file_name());
        }
    }
    out.write_string_map(&set.user_data).await?;
    Ok(())
}

///////////////////////////////////////////// reading //////////////////////////////////////////////

/// Read and verify the manifest named `name`, restoring the full segment set
/// (per-segment attributes come from each segment's `.si` via its codec).
pub async fn read_manifest(dir: &dyn IndexDirectory, name: &str) -> Result<SegmentSet, Error> {
    let generation = parse_generation(name)
        .ok_or_else(|| Error::CorruptManifest(format!("not a manifest file name: {}", name)))?;
    let mut input = ChecksumInput::new(dir.open_input(name).await?);
    let lead = input.read_i32().await?;
    if lead == CODEC_MAGIC as i32 {
        read_current(dir, name, generation, &mut input).await
    } else if lead < 0 {
        legacy::read_legacy_manifest(lead, generation, &mut input).await
    } else {
        Err(Error::CorruptManifest(format!(
            "bad magic in {}: {:#x}",
            name, lead
        )))
    }
}

async fn read_current(
    dir: &dyn IndexDirectory,
    name: &str,
    generation: i64,
    input: &mut ChecksumInput,
) -> Result<SegmentSet, Error> {
    let codec_id = input.read_string().await?;
    if codec_id != SEGMENTS_CODEC {
        return Err(Error::CorruptManifest(format!(
            "unexpected codec id in {}: {:?}",
            name, codec_id
        )));
    }
    let format = input.read_i32().await?;
    if format > FORMAT_CURRENT {
        return Err(Error::FormatTooNew(format!(
            "{} uses format {} but this reader supports at most {}",
            name, format, FORMAT_CURRENT
        )));
    }
    if format < 0 {
        return Err(Error::CorruptManifest(format!(
            "negative format in {}: {}",
            name, format
        )));
    }
    let version = input.read_i64().await?;
    let counter = input.read_i32().await?;
    let num_segments = input.read_i32().await?;
    // Each entry takes at least the four fixed-width fields.
    if num_segments < 0 || num_segments as u64 * 20 > input.file_len() {
        return Err(Error::CorruptManifest(format!(
            "implausible segment count in {}: {}",
            name, num_segments
        )));
    }
    let mut set = SegmentSet::new();
    set.counter = counter;
    set.set_version(version);
    for _ in 0..num_segments {
        let seg_name = input.read_string().await?;
        let codec_name = input.read_string().await?;
        let del_gen = input.read_i64().await?;
        let del_count = input.read_i32().await?;
        let mut descriptor = SegmentDescriptor::new(&seg_name, &codec_name, 0);
        descriptor.del_gen = del_gen;
        descriptor.del_count = del_count;
        let codec = lookup_codec(&codec_name)?;
        codec.read_segment_info(dir, &mut descriptor).await?;
        if del_count < 0 || del_count > descriptor.doc_count {
            return Err(Error::CorruptManifest(format!(
                "segment {} has {} deletions but {} docs",
                seg_name, del_count, descriptor.doc_count
            )));
        }
        set.add(descriptor)
            .map_err(|_| Error::CorruptManifest(format!("duplicate segment {} in {}", seg_name, name)))?;
    }
    set.user_data = input.read_string_map().await?;
    input.check_footer().await?;
    set.set_generation(generation);
    set.set_last_generation(generation);
    set.set_format(format);
    Ok(set)
}

//////////////////////////////////////////// segments.gen //////////////////////////////////////////

/// Write the advisory generation sidecar: the format tag and the generation
/// twice, so readers can detect a torn write.
pub async fn write_segments_gen(dir: &dyn IndexDirectory, generation: i64) -> Result<(), Error> {
    let mut payload = Vec::with_capacity(20);
    payload.extend_from_slice(&FORMAT_SEGMENTS_GEN_CURRENT.to_be_bytes());
    payload.extend_from_slice(&generation.to_be_bytes());
    payload.extend_from_slice(&generation.to_be_bytes());
    let mut out = dir.create_output(SEGMENTS_GEN_FILE).await?;
    out.write_all(&payload).await?;
    out.close().await?;
    dir.sync(&[SEGMENTS_GEN_FILE.to_string()]).await?;
    Ok(())
}

/// Read the advisory sidecar.  Absent, unreadable, or torn files are None —
/// the directory listing carries the truth either way.  A format tag this
/// reader does not know is the one condition that surfaces.
pub async fn read_segments_gen(dir: &dyn IndexDirectory) -> Result<Option<i64>, Error> {
    let input = match dir.open_input(SEGMENTS_GEN_FILE).await {
        Ok(input) => input,
        Err(_) => return Ok(None),
    };
    let mut input = ChecksumInput::new(input);
    let format = match input.read_i32().await {
        Ok(format) => format,
        Err(_) => return Ok(None),
    };
    if format != FORMAT_SEGMENTS_GEN_CURRENT {
        return Err(Error::FormatTooNew(format!(
            "{} uses format {} but this reader supports {}",
            SEGMENTS_GEN_FILE, format, FORMAT_SEGMENTS_GEN_CURRENT
        )));
    }
    let (gen0, gen1) = match (input.read_i64().await, input.read_i64().await) {
        (Ok(gen0), Ok(gen1)) => (gen0, gen1),
        _ => return Ok(None),
    };
    if gen0 == gen1 && gen0 >= 0 {
        Ok(Some(gen0))
    } else {
        tracing::warn!(gen0, gen1, "torn {}; ignoring it", SEGMENTS_GEN_FILE);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use vellum_directory::InMemoryDirectory;

    use super::*;

    #[test]
    fn base36() {
        assert_eq!("0", to_base36(0));
        assert_eq!("z", to_base36(35));
        assert_eq!("10", to_base36(36));
        assert_eq!("2s", to_base36(100));
    }

    #[test]
    fn file_names() {
        assert_eq!("segments", segments_file_name(0));
        assert_eq!("segments_1", segments_file_name(1));
        assert_eq!("segments_z", segments_file_name(35));
        assert_eq!("segments_10", segments_file_name(36));
    }

    #[test]
    fn generation_parsing() {
        assert_eq!(Some(0), parse_generation("segments"));
        assert_eq!(Some(1), parse_generation("segments_1"));
        assert_eq!(Some(36), parse_generation("segments_10"));
        assert_eq!(None, parse_generation("segments.gen"));
        assert_eq!(None, parse_generation("segments_"));
        assert_eq!(None, parse_generation("_0.si"));
        assert_eq!(None, parse_generation("segments_-1"));
    }

    #[test]
    fn latest_generation_scans_listing() {
        assert_eq!(NO_GENERATION, latest_generation::<&str>(&[]));
        assert_eq!(
            3,
            latest_generation(&["_0.si", "segments_1", "segments_3", "segments.gen"])
        );
        assert_eq!(0, latest_generation(&["segments"]));
    }

    #[tokio::test]
    async fn segments_gen_round_trip() {
        let dir = InMemoryDirectory::new();
        assert_eq!(None, read_segments_gen(&dir).await.unwrap());
        write_segments_gen(&dir, 42).await.unwrap();
        assert_eq!(Some(42), read_segments_gen(&dir).await.unwrap());
    }

    #[tokio::test]
    async fn torn_segments_gen_is_ignored() {
        let dir = InMemoryDirectory::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&FORMAT_SEGMENTS_GEN_CURRENT.to_be_bytes());
        payload.extend_from_slice(&7i64.to_be_bytes());
        payload.extend_from_slice(&6i64.to_be_bytes());
        dir.put(SEGMENTS_GEN_FILE, payload);
        assert_eq!(None, read_segments_gen(&dir).await.unwrap());
    }

    #[tokio::test]
    async fn truncated_segments_gen_is_ignored() {
        let dir = InMemoryDirectory::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&FORMAT_SEGMENTS_GEN_CURRENT.to_be_bytes());
        payload.extend_from_slice(&7i64.to_be_bytes()[..4]);
        dir.put(SEGMENTS_GEN_FILE, payload);
        assert_eq!(None, read_segments_gen(&dir).await.unwrap());
    }

    #[tokio::test]
    async fn newer_segments_gen_format_surfaces() {
        let dir = InMemoryDirectory::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&(-3i32).to_be_bytes());
        payload.extend_from_slice(&7i64.to_be_bytes());
        payload.extend_from_slice(&7i64.to_be_bytes());
        dir.put(SEGMENTS_GEN_FILE, payload);
        match read_segments_gen(&dir).await {
            Err(Error::FormatTooNew(_)) => {}
            other => panic!("expected FormatTooNew, got {:?}", other),
        }
    }
}
