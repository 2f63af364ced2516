//! The legacy (pre-current) on-disk layouts and the one-time upgrade path.
//!
//! A legacy manifest carries every per-segment attribute inline; the current
//! format moved those into per-segment `.si` files.  When a legacy set is
//! committed in the current format, each legacy segment that has no `.si`
//! yet gets one written in the legacy sidecar layout below.  The upgrade is
//! deliberately lossy: per-segment codec specifics collapse into this fixed
//! layout and do not round-trip beyond it.
//!
//! Legacy descriptor block (also the layout of a legacy `.si`):
//!
//! ```text
//!   version           string (empty = absent)
//!   name              string
//!   doc_count         i32
//!   del_gen           i64
//!   doc_store_offset  i32; when >= 0, followed by the doc-store segment
//!                     name (string) and a compound flag (u8)
//!   norm gens         i32 count (-1 = none), then count i64 values
//!   compound file     u8
//!   del_count         i32
//!   diagnostics       map<string, string>
//!   has_prox          u8
//!   has_vectors       u8
//! ```

use vellum_directory::IndexDirectory;

use crate::checksum::{ChecksumInput, ChecksumOutput};
use crate::{DocStoreSpec, Error, SegmentDescriptor, SegmentSet};

/// Name every legacy-read descriptor is stamped with.
pub const LEGACY_CODEC_NAME: &str = "vellum3x";

/// The one legacy manifest format this reader supports.
pub const LEGACY_FORMAT_3X: i32 = -11;

/// Norm-gen counts beyond this are framing garbage.
const MAX_NORM_GENS: i32 = 1 << 20;

////////////////////////////////////////// legacy manifest /////////////////////////////////////////

/// Parse a legacy manifest whose leading format tag has already been read.
/// Every descriptor is stamped with the legacy codec.
pub async fn read_legacy_manifest(
    format: i32,
    generation: i64,
    input: &mut ChecksumInput,
) -> Result<SegmentSet, Error> {
    if format < LEGACY_FORMAT_3X {
        return Err(Error::FormatTooNew(format!(
            "legacy manifest format {} is newer than supported {}",
            format, LEGACY_FORMAT_3X
        )));
    }
    if format != LEGACY_FORMAT_3X {
        return Err(Error::CorruptManifest(format!(
            "unsupported legacy manifest format: {}",
            format
        )));
    }
    let version = input.read_i64().await?;
    let counter = input.read_i32().await?;
    let num_segments = input.read_i32().await?;
    if num_segments < 0 || num_segments as u64 * 20 > input.file_len() {
        return Err(Error::CorruptManifest(format!(
            "implausible legacy segment count: {}",
            num_segments
        )));
    }
    let mut set = SegmentSet::new();
    set.counter = counter;
    set.set_version(version);
    for _ in 0..num_segments {
        let descriptor = read_legacy_descriptor(input).await?;
        if descriptor.del_count < 0 || descriptor.del_count > descriptor.doc_count {
            return Err(Error::CorruptManifest(format!(
                "legacy segment {} has {} deletions but {} docs",
                descriptor.name, descriptor.del_count, descriptor.doc_count
            )));
        }
        let name = descriptor.name.clone();
        set.add(descriptor)
            .map_err(|_| Error::CorruptManifest(format!("duplicate legacy segment {}", name)))?;
    }
    set.user_data = input.read_string_map().await?;
    input.check_footer().await?;
    set.set_generation(generation);
    set.set_last_generation(generation);
    set.set_format(format);
    Ok(set)
}

////////////////////////////////////////// legacy sidecar //////////////////////////////////////////

/// Write a legacy `.si` for `descriptor`.  The legacy layout carries no
/// checksum footer.
pub async fn write_legacy_segment_info(
    dir: &dyn IndexDirectory,
    descriptor: &SegmentDescriptor,
) -> Result<(), Error> {
    tracing::info!(segment = %descriptor.name, "upgrading legacy segment sidecar");
    let mut out = ChecksumOutput::new(dir.create_output(&descriptor.si_file_name()).await?);
    write_legacy_descriptor(&mut out, descriptor).await?;
    out.close().await
}

/// Read a legacy `.si` back into `descriptor`, filling the fields the
/// manifest does not carry.
pub async fn read_legacy_segment_info(
    dir: &dyn IndexDirectory,
    descriptor: &mut SegmentDescriptor,
) -> Result<(), Error> {
    let si_name = descriptor.si_file_name();
    let mut input = ChecksumInput::new(dir.open_input(&si_name).await?);
    let parsed = read_legacy_descriptor(&mut input).await?;
    if parsed.name != descriptor.name {
        return Err(Error::CorruptManifest(format!(
            "sidecar {} names segment {:?}",
            si_name, parsed.name
        )));
    }
    descriptor.version = parsed.version;
    descriptor.doc_count = parsed.doc_count;
    descriptor.doc_store = parsed.doc_store;
    descriptor.norm_gens = parsed.norm_gens;
    descriptor.is_compound_file = parsed.is_compound_file;
    descriptor.diagnostics = parsed.diagnostics;
    descriptor.has_prox = parsed.has_prox;
    descriptor.has_vectors = parsed.has_vectors;
    Ok(())
}

///////////////////////////////////////// descriptor block /////////////////////////////////////////

pub(crate) async fn write_legacy_descriptor(
    out: &mut ChecksumOutput,
    descriptor: &SegmentDescriptor,
) -> Result<(), Error> {
    out.write_string(descriptor.version.as_deref().unwrap_or(""))
        .await?;
    out.write_string(&descriptor.name).await?;
    out.write_i32(descriptor.doc_count).await?;
    out.write_i64(descriptor.del_gen).await?;
    match &descriptor.doc_store {
        Some(doc_store) => {
            out.write_i32(doc_store.offset).await?;
            out.write_string(&doc_store.segment).await?;
            out.write_u8(doc_store.compound as u8).await?;
        }
        None => out.write_i32(-1).await?,
    }
    match &descriptor.norm_gens {
        Some(norm_gens) => {
            out.write_i32(norm_gens.len() as i32).await?;
            for norm_gen in norm_gens {
                out.write_i64(*norm_gen).await?;
            }
        }
        None => out.write_i32(-1).await?,
    }
    out.write_u8(descriptor.is_compound_file as u8).await?;
    out.write_i32(descriptor.del_count).await?;
    out.write_string_map(&descriptor.diagnostics).await?;
    out.write_u8(descriptor.has_prox as u8).await?;
    out.write_u8(descriptor.has_vectors as u8).await?;
    Ok(())
}

pub(crate) async fn read_legacy_descriptor(
    input: &mut ChecksumInput,
) -> Result<SegmentDescriptor, Error> {
    let version = input.read_string().await?;
    let name = input.read_string().await?;
    let mut descriptor = SegmentDescriptor::new(&name, LEGACY_CODEC_NAME, 0);
    descriptor.version = if version.is_empty() {
        None
    } else {
        Some(version)
    };
    descriptor.doc_count = input.read_i32().await?;
    descriptor.del_gen = input.read_i64().await?;
    let doc_store_offset = input.read_i32().await?;
    if doc_store_offset >= 0 {
        let segment = input.read_string().await?;
        let compound = read_bool(input).await?;
        descriptor.doc_store = Some(DocStoreSpec {
            offset: doc_store_offset,
            segment,
            compound,
        });
    }
    let num_norm_gens = input.read_i32().await?;
    if num_norm_gens >= 0 {
        if num_norm_gens > MAX_NORM_GENS {
            return Err(Error::CorruptManifest(format!(
                "implausible norm gen count: {}",
                num_norm_gens
            )));
        }
        let mut norm_gens = Vec::with_capacity(num_norm_gens as usize);
        for _ in 0..num_norm_gens {
            norm_gens.push(input.read_i64().await?);
        }
        descriptor.norm_gens = Some(norm_gens);
    }
    descriptor.is_compound_file = read_bool(input).await?;
    descriptor.del_count = input.read_i32().await?;
    descriptor.diagnostics = input.read_string_map().await?;
    descriptor.has_prox = read_bool(input).await?;
    descriptor.has_vectors = read_bool(input).await?;
    Ok(descriptor)
}

async fn read_bool(input: &mut ChecksumInput) -> Result<bool, Error> {
    match input.read_u8().await? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::CorruptManifest(format!(
            "invalid boolean byte: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use vellum_directory::InMemoryDirectory;

    use super::*;

    fn legacy_descriptor() -> SegmentDescriptor {
        let mut d = SegmentDescriptor::new("_3", LEGACY_CODEC_NAME, 250);
        d.version = Some("3.6.0".to_string());
        d.del_gen = 4;
        d.del_count = 9;
        d.doc_store = Some(DocStoreSpec {
            offset: 100,
            segment: "_2".to_string(),
            compound: true,
        });
        d.norm_gens = Some(vec![1, 1, 2]);
        d.is_compound_file = true;
        d.has_prox = true;
        d.has_vectors = false;
        d.diagnostics = HashMap::from([("source".to_string(), "flush".to_string())]);
        d
    }

    #[tokio::test]
    async fn sidecar_round_trip() {
        let dir = InMemoryDirectory::new();
        let original = legacy_descriptor();
        write_legacy_segment_info(&dir, &original).await.unwrap();

        let mut restored = SegmentDescriptor::new("_3", LEGACY_CODEC_NAME, 0);
        restored.del_gen = original.del_gen;
        restored.del_count = original.del_count;
        read_legacy_segment_info(&dir, &mut restored).await.unwrap();
        assert_eq!(original, restored);
    }

    #[tokio::test]
    async fn sidecar_with_wrong_name_is_corrupt() {
        let dir = InMemoryDirectory::new();
        let original = legacy_descriptor();
        write_legacy_segment_info(&dir, &original).await.unwrap();
        dir.put("_9.si", dir.get("_3.si").unwrap());
        let mut restored = SegmentDescriptor::new("_9", LEGACY_CODEC_NAME, 0);
        match read_legacy_segment_info(&dir, &mut restored).await {
            Err(Error::CorruptManifest(_)) => {}
            other => panic!("expected CorruptManifest, got {:?}", other),
        }
    }
}
