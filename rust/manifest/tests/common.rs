#![allow(dead_code)]

use std::collections::HashMap;

use vellum_directory::{IndexDirectory, InMemoryDirectory};
use vellum_manifest::{
    default_codec, SegmentDescriptor, CURRENT_CODEC_NAME, LEGACY_CODEC_NAME, NO_GENERATION,
};

/// Build a current-codec segment and publish its `.si` so a manifest that
/// names it can be read back.
pub async fn published_segment(
    dir: &dyn IndexDirectory,
    name: &str,
    doc_count: i32,
) -> SegmentDescriptor {
    let mut descriptor = SegmentDescriptor::new(name, CURRENT_CODEC_NAME, doc_count);
    descriptor.version = Some("4.0".to_string());
    default_codec()
        .write_segment_info(dir, &descriptor)
        .await
        .unwrap();
    descriptor
}

/// A descriptor in the shape a legacy manifest would yield.
pub fn legacy_descriptor(name: &str, doc_count: i32) -> SegmentDescriptor {
    let mut descriptor = SegmentDescriptor::new(name, LEGACY_CODEC_NAME, doc_count);
    descriptor.version = Some("3.6.2".to_string());
    descriptor.del_gen = NO_GENERATION;
    descriptor
}

pub fn flip_byte(dir: &InMemoryDirectory, name: &str, index: usize) {
    let mut bytes = dir.get(name).unwrap();
    bytes[index] ^= 0xff;
    dir.put(name, bytes);
}

//////////////////////////////////////// legacy fixtures ///////////////////////////////////////////

/// Byte-level builder for legacy fixture files, independent of the
/// production writer so the documented layout is what the tests pin down.
#[derive(Default)]
pub struct LegacyBytes {
    buf: Vec<u8>,
}

impl LegacyBytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i64(mut self, v: i64) -> Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.push(v);
        self
    }

    pub fn string(mut self, s: &str) -> Self {
        self = self.i32(s.len() as i32);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn string_map(mut self, entries: &[(&str, &str)]) -> Self {
        self = self.i32(entries.len() as i32);
        let mut sorted: Vec<&(&str, &str)> = entries.iter().collect();
        sorted.sort();
        for (key, value) in sorted {
            self = self.string(key).string(value);
        }
        self
    }

    /// The legacy per-segment block for a descriptor.
    pub fn legacy_segment(mut self, d: &SegmentDescriptor) -> Self {
        self = self.string(d.version.as_deref().unwrap_or(""));
        self = self.string(&d.name);
        self = self.i32(d.doc_count);
        self = self.i64(d.del_gen);
        match &d.doc_store {
            Some(doc_store) => {
                self = self.i32(doc_store.offset);
                self = self.string(&doc_store.segment);
                self = self.u8(doc_store.compound as u8);
            }
            None => self = self.i32(-1),
        }
        match &d.norm_gens {
            Some(norm_gens) => {
                self = self.i32(norm_gens.len() as i32);
                for norm_gen in norm_gens {
                    self = self.i64(*norm_gen);
                }
            }
            None => self = self.i32(-1),
        }
        self = self.u8(d.is_compound_file as u8);
        self = self.i32(d.del_count);
        let diagnostics: Vec<(&str, &str)> = d
            .diagnostics
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self = self.string_map(&diagnostics);
        self = self.u8(d.has_prox as u8);
        self.u8(d.has_vectors as u8)
    }

    /// Append the trailing checksum over everything so far.
    pub fn checksummed(mut self) -> Vec<u8> {
        let checksum = crc32fast::hash(&self.buf) as u64 as i64;
        self.buf.extend_from_slice(&checksum.to_be_bytes());
        self.buf
    }

    pub fn bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Write a complete legacy-format manifest fixture into `dir`.
pub fn install_legacy_manifest(
    dir: &InMemoryDirectory,
    file_name: &str,
    version: i64,
    counter: i32,
    segments: &[SegmentDescriptor],
    user_data: &HashMap<String, String>,
) {
    let mut bytes = LegacyBytes::new()
        .i32(vellum_manifest::LEGACY_FORMAT_3X)
        .i64(version)
        .i32(counter)
        .i32(segments.len() as i32);
    for segment in segments {
        bytes = bytes.legacy_segment(segment);
    }
    let user_data: Vec<(&str, &str)> = user_data
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    bytes = bytes.string_map(&user_data);
    dir.put(file_name, bytes.checksummed());
}
