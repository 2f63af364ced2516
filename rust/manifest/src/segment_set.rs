use std::collections::{HashMap, HashSet};

use vellum_directory::IndexDirectory;

use crate::{
    codec, descriptor::SegmentDescriptor, finder::GenerationFinder, Error, FinderConfig,
    NO_GENERATION,
};

////////////////////////////////////////////// MergeSpec ///////////////////////////////////////////

/// A merge bundle: the segments a merge consumed and the segment it produced.
#[derive(Clone, Debug)]
pub struct MergeSpec {
    pub inputs: Vec<SegmentDescriptor>,
    pub output: SegmentDescriptor,
}

////////////////////////////////////////////// SegmentSet //////////////////////////////////////////

/// The in-memory model of one manifest: an ordered sequence of segment
/// descriptors, unique by segment name, plus the commit bookkeeping that
/// rides along with it.
///
/// The sequence and the membership view are kept the same size at every
/// observable point; inserting a name twice is a hard error, not a dedup.
#[derive(Clone, Debug)]
pub struct SegmentSet {
    segments: Vec<SegmentDescriptor>,
    names: HashSet<String>,
    /// Monotonic allocator for new segment names.
    pub counter: i32,
    /// Incremented on every logical change, via [`SegmentSet::changed`].
    version: i64,
    /// Generation of the next manifest to write (-1 before any commit).
    generation: i64,
    /// Generation of the last manifest successfully read or written.
    last_generation: i64,
    /// Opaque key/value payload the caller attaches to a commit.
    pub user_data: HashMap<String, String>,
    /// Format tag of the last manifest read, if any.
    format: Option<i32>,
}

impl Default for SegmentSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentSet {
    pub fn new() -> Self {
        SegmentSet {
            segments: vec![],
            names: HashSet::new(),
            counter: 0,
            version: 0,
            generation: NO_GENERATION,
            last_generation: NO_GENERATION,
            user_data: HashMap::new(),
            format: None,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SegmentDescriptor> {
        self.segments.iter()
    }

    pub fn get(&self, index: usize) -> Option<&SegmentDescriptor> {
        self.segments.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SegmentDescriptor> {
        self.segments.get_mut(index)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn last_generation(&self) -> i64 {
        self.last_generation
    }

    pub fn format(&self) -> Option<i32> {
        self.format
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    pub(crate) fn set_generation(&mut self, generation: i64) {
        self.generation = generation;
    }

    pub(crate) fn set_last_generation(&mut self, last_generation: i64) {
        self.last_generation = last_generation;
    }

    pub(crate) fn set_format(&mut self, format: i32) {
        self.format = Some(format);
    }

    /// Record a logical change to the set.
    pub fn changed(&mut self) {
        self.version += 1;
    }

    /// Allocate the next segment name from the counter.
    pub fn new_segment_name(&mut self) -> String {
        let name = format!("_{}", codec::to_base36(self.counter as i64));
        self.counter += 1;
        name
    }

    /// Append a descriptor.  Appending a name already in the set is a
    /// programming error, reported as `DuplicateSegment`.
    pub fn add(&mut self, descriptor: SegmentDescriptor) -> Result<(), Error> {
        if !self.names.insert(descriptor.name.clone()) {
            return Err(Error::DuplicateSegment(descriptor.name.clone()));
        }
        self.segments.push(descriptor);
        self.debug_check();
        Ok(())
    }

    /// Remove a descriptor by identity.  Removing an absent one is a no-op.
    pub fn remove(&mut self, descriptor: &SegmentDescriptor) {
        self.remove_by_name(&descriptor.name);
    }

    pub fn remove_by_name(&mut self, name: &str) {
        if self.names.remove(name) {
            self.segments.retain(|s| s.name != name);
        }
        self.debug_check();
    }

    /// Remove and return the descriptor at `index`.
    ///
    /// Panics if `index` is out of bounds.
    pub fn remove_at(&mut self, index: usize) -> SegmentDescriptor {
        let removed = self.segments.remove(index);
        self.names.remove(&removed.name);
        self.debug_check();
        removed
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.names.clear();
    }

    /// Replace this set's sequence with a deep copy of another set's.
    ///
    /// Only the sequence moves: `generation`, `last_generation`, `version`,
    /// `counter`, and `format` keep their values, which preserves write-once
    /// generation monotonicity when a caller rolls back to an older view.
    pub fn replace(&mut self, other: &SegmentSet) {
        self.segments = other.segments.clone();
        self.names = other.names.clone();
        self.debug_check();
    }

    /// Sum of `doc_count` across all members, deletions ignored.
    pub fn total_doc_count(&self) -> i64 {
        self.segments.iter().map(|s| s.doc_count as i64).sum()
    }

    /// Apply a finished merge: the first input still in the sequence is
    /// replaced by the merged segment (unless `drop_segment`), every other
    /// input is removed, and surviving segments keep their relative order.
    pub fn apply_merge(&mut self, merge: &MergeSpec, drop_segment: bool) {
        let merged_away: HashSet<&str> = merge.inputs.iter().map(|d| d.name.as_str()).collect();
        let mut inserted = false;
        let mut survivors = Vec::with_capacity(self.segments.len() + 1);
        for segment in self.segments.drain(..) {
            if merged_away.contains(segment.name.as_str()) {
                self.names.remove(&segment.name);
                if !inserted && !drop_segment {
                    survivors.push(merge.output.clone());
                    inserted = true;
                }
            } else {
                survivors.push(segment);
            }
        }
        // Every input was already gone; the merged segment still enters the
        // sequence, at position 0, if it should not be dropped.
        if !inserted && !drop_segment {
            survivors.insert(0, merge.output.clone());
        }
        if !drop_segment {
            self.names.insert(merge.output.name.clone());
        }
        self.segments = survivors;
        self.debug_check();
    }

    /// Every file a commit of this set references: the per-segment files
    /// plus, when requested, the manifest file of the last commit.
    pub fn files(&self, include_manifest: bool) -> Result<Vec<String>, Error> {
        let mut files = vec![];
        if include_manifest {
            if self.last_generation == NO_GENERATION {
                return Err(Error::IllegalState(
                    "no manifest has been committed yet".to_string(),
                ));
            }
            files.push(codec::segments_file_name(self.last_generation));
        }
        for segment in &self.segments {
            files.extend(segment.files());
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Locate and read the most recent committed manifest in `dir`.
    pub async fn read_latest(
        dir: &dyn IndexDirectory,
        config: &FinderConfig,
    ) -> Result<SegmentSet, Error> {
        let finder = GenerationFinder::new(dir, config.clone());
        finder
            .run(|name| async move { codec::read_manifest(dir, &name).await })
            .await
    }

    pub(crate) fn debug_check(&self) {
        debug_assert_eq!(
            self.segments.len(),
            self.names.len(),
            "sequence and membership views diverged"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(name: &str, docs: i32) -> SegmentDescriptor {
        SegmentDescriptor::new(name, "vellum40", docs)
    }

    fn set_of(names: &[&str]) -> SegmentSet {
        let mut set = SegmentSet::new();
        for name in names {
            set.add(seg(name, 10)).unwrap();
        }
        set
    }

    fn names(set: &SegmentSet) -> Vec<&str> {
        set.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn add_and_duplicate() {
        let mut set = SegmentSet::new();
        set.add(seg("_0", 5)).unwrap();
        set.add(seg("_1", 5)).unwrap();
        assert_eq!(2, set.len());
        match set.add(seg("_0", 5)) {
            Err(Error::DuplicateSegment(name)) => assert_eq!("_0", name),
            other => panic!("expected DuplicateSegment, got {:?}", other),
        }
        assert_eq!(2, set.len());
        set.debug_check();
    }

    #[test]
    fn remove_tolerates_absent() {
        let mut set = set_of(&["_0", "_1"]);
        let ghost = seg("_9", 1);
        set.remove(&ghost);
        assert_eq!(2, set.len());
        set.remove(&seg("_0", 10));
        assert_eq!(vec!["_1"], names(&set));
        let removed = set.remove_at(0);
        assert_eq!("_1", removed.name);
        assert!(set.is_empty());
    }

    #[test]
    fn replace_keeps_commit_bookkeeping() {
        let mut set = set_of(&["_0"]);
        set.counter = 7;
        set.set_generation(4);
        set.set_last_generation(3);
        set.set_version(9);
        let other = set_of(&["_5", "_6"]);
        set.replace(&other);
        assert_eq!(vec!["_5", "_6"], names(&set));
        assert_eq!(7, set.counter);
        assert_eq!(4, set.generation());
        assert_eq!(3, set.last_generation());
        assert_eq!(9, set.version());
    }

    #[test]
    fn changed_bumps_version() {
        let mut set = SegmentSet::new();
        assert_eq!(0, set.version());
        set.changed();
        set.changed();
        assert_eq!(2, set.version());
    }

    #[test]
    fn name_allocation() {
        let mut set = SegmentSet::new();
        assert_eq!("_0", set.new_segment_name());
        assert_eq!("_1", set.new_segment_name());
        set.counter = 36;
        assert_eq!("_10", set.new_segment_name());
        assert_eq!(37, set.counter);
    }

    #[test]
    fn total_doc_count_ignores_deletions() {
        let mut set = SegmentSet::new();
        let mut a = seg("_0", 100);
        a.set_del_count(40).unwrap();
        set.add(a).unwrap();
        set.add(seg("_1", 11)).unwrap();
        assert_eq!(111, set.total_doc_count());
    }

    #[test]
    fn merge_replaces_first_input_in_place() {
        let mut set = set_of(&["_0", "_1", "_2", "_4"]);
        let merge = MergeSpec {
            inputs: vec![seg("_1", 10), seg("_2", 10)],
            output: seg("_5", 20),
        };
        set.apply_merge(&merge, false);
        assert_eq!(vec!["_0", "_5", "_4"], names(&set));
        set.debug_check();
    }

    #[test]
    fn merge_with_drop_removes_inputs() {
        let mut set = set_of(&["_0", "_1", "_2"]);
        let merge = MergeSpec {
            inputs: vec![seg("_0", 10), seg("_2", 10)],
            output: seg("_3", 20),
        };
        set.apply_merge(&merge, true);
        assert_eq!(vec!["_1"], names(&set));
    }

    #[test]
    fn merge_with_all_inputs_gone_inserts_at_front() {
        let mut set = set_of(&["_3", "_4"]);
        let merge = MergeSpec {
            inputs: vec![seg("_0", 10), seg("_1", 10)],
            output: seg("_5", 20),
        };
        set.apply_merge(&merge, false);
        assert_eq!(vec!["_5", "_3", "_4"], names(&set));
        set.apply_merge(
            &MergeSpec {
                inputs: vec![seg("_9", 1)],
                output: seg("_a", 1),
            },
            true,
        );
        // Dropped output of a vanished merge changes nothing.
        assert_eq!(vec!["_5", "_3", "_4"], names(&set));
    }

    #[test]
    fn files_requires_a_commit_for_the_manifest_name() {
        let set = set_of(&["_0"]);
        match set.files(true) {
            Err(Error::IllegalState(_)) => {}
            other => panic!("expected IllegalState, got {:?}", other),
        }
        assert_eq!(vec!["_0.si".to_string()], set.files(false).unwrap());
        let mut set = set;
        set.set_last_generation(3);
        assert_eq!(
            vec!["_0.si".to_string(), "segments_3".to_string()],
            set.files(true).unwrap()
        );
    }

    #[test]
    fn clone_is_deep() {
        let mut set = set_of(&["_0"]);
        let snapshot = set.clone();
        set.get_mut(0).unwrap().set_del_count(5).unwrap();
        set.user_data.insert("k".to_string(), "v".to_string());
        assert_eq!(0, snapshot.get(0).unwrap().del_count);
        assert!(snapshot.user_data.is_empty());
    }
}
