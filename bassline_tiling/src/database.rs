// Pattern database: the shared, append-only library of pattern sources.
//
// Sources are indexed by (root profile, size). The database lives for the
// whole process and is read by every in-flight request; the only writer is
// the fallback synthesizer, which appends new sources while a request is
// running. Appends take the write lock and insert a fully built
// `Arc<PatternSource>`, so readers never see a half-constructed source.
//
// Malformed or duplicate sources are refused with a diagnostic, never an
// error: a bad entry in the library must not sink a generation request.
//
// `with_default_library` seeds a small set of hand-written walking lines
// over common jazz progressions so the CLI and tests have something to tile
// with.

use crate::sequence::ChordSequence;
use crate::source::{PatternSource, Phrase, SourceId, Transposability};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

#[derive(Default)]
struct Index {
    by_key: FxHashMap<(String, usize), Vec<Arc<PatternSource>>>,
    ids: FxHashMap<SourceId, Arc<PatternSource>>,
}

impl Index {
    fn find_equivalent(&self, source: &PatternSource) -> Option<Arc<PatternSource>> {
        self.by_key
            .get(&(source.root_profile.clone(), source.size))?
            .iter()
            .find(|s| s.is_equivalent(source))
            .cloned()
    }
}

/// Why `insert` refused a source.
enum Refusal {
    Malformed,
    DuplicateId,
    Equivalent(Arc<PatternSource>),
}

#[derive(Default)]
pub struct PatternDatabase {
    index: RwLock<Index>,
    next_id: AtomicU32,
}

impl PatternDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// A database holding the built-in walking-bass library.
    pub fn with_default_library() -> Self {
        let db = PatternDatabase::new();
        for (chart, pitches, target) in DEFAULT_LIBRARY {
            let chords = match ChordSequence::parse(chart, 4) {
                Ok(c) => c,
                Err(e) => {
                    warn!("skipping built-in pattern '{}': {}", chart, e);
                    continue;
                }
            };
            let source = PatternSource::new(
                db.allocate_id(),
                chords,
                Phrase::quarters(pitches),
                *target,
                Transposability::default(),
            );
            db.add_source(source);
        }
        db
    }

    /// Reserve a fresh source id. Ids handed out here never collide with
    /// ids of sources already added.
    pub fn allocate_id(&self) -> SourceId {
        SourceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// All sources filed under `root_profile` with `size` bars, in insertion
    /// order.
    pub fn get(&self, root_profile: &str, size: usize) -> Vec<Arc<PatternSource>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index
            .by_key
            .get(&(root_profile.to_string(), size))
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_by_id(&self, id: SourceId) -> Option<Arc<PatternSource>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.ids.get(&id).cloned()
    }

    /// Add a source. Returns false (with a diagnostic) if it is malformed,
    /// reuses an id, or an equivalent source is already present.
    pub fn add_source(&self, source: PatternSource) -> bool {
        self.insert(source).is_ok()
    }

    /// Add a source, or return the equivalent one already stored. Returns
    /// `None` only for malformed sources and id clashes.
    pub fn register(&self, source: PatternSource) -> Option<Arc<PatternSource>> {
        match self.insert(source) {
            Ok(stored) => Some(stored),
            Err(Refusal::Equivalent(existing)) => Some(existing),
            Err(_) => None,
        }
    }

    fn insert(&self, source: PatternSource) -> std::result::Result<Arc<PatternSource>, Refusal> {
        if let Err(reason) = source.validate() {
            warn!(id = %source.id, "refusing malformed pattern source: {}", reason);
            return Err(Refusal::Malformed);
        }
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        if index.ids.contains_key(&source.id) {
            warn!(id = %source.id, "refusing pattern source with duplicate id");
            return Err(Refusal::DuplicateId);
        }
        if let Some(existing) = index.find_equivalent(&source) {
            debug!(id = %source.id, existing = %existing.id, "pattern source already present");
            return Err(Refusal::Equivalent(existing));
        }

        self.next_id.fetch_max(source.id.0 + 1, Ordering::Relaxed);
        let source = Arc::new(source);
        index
            .by_key
            .entry((source.root_profile.clone(), source.size))
            .or_default()
            .push(Arc::clone(&source));
        index.ids.insert(source.id, Arc::clone(&source));
        debug!(
            id = %source.id,
            profile = %source.root_profile,
            size = source.size,
            "pattern source added"
        );
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Built-in library: chord chart (4/4), one quarter-note pitch per beat, and
/// the note the line leads into.
const DEFAULT_LIBRARY: &[(&str, &[u8], Option<u8>)] = &[
    // ii-V-I-I
    (
        "Dm7 | G7 | Cmaj7 | Cmaj7",
        &[38, 40, 41, 45, 43, 47, 50, 49, 48, 47, 45, 43, 40, 41, 42, 43],
        None,
    ),
    // I-vi-ii-V turnaround, resolving to C
    (
        "Cmaj7 | Am7 | Dm7 | G7",
        &[36, 40, 43, 45, 45, 43, 40, 38, 38, 41, 45, 44, 43, 41, 38, 37],
        Some(36),
    ),
    // ii-V
    ("Dm7 | G7", &[38, 41, 45, 44, 43, 47, 38, 37], Some(36)),
    // minor ii-V-i
    (
        "Bm7b5 | E7 | Am7",
        &[47, 50, 53, 52, 40, 44, 47, 50, 45, 48, 52, 44],
        None,
    ),
    // blues, first four bars
    (
        "C7 | F7 | C7 | C7",
        &[36, 40, 43, 46, 41, 45, 48, 51, 48, 46, 43, 40, 36, 38, 39, 40],
        Some(41),
    ),
    // two chords per bar
    ("Am7 D7 | Gmaj7", &[45, 48, 38, 42, 43, 47, 50, 42], None),
    ("Dm7 G7", &[38, 41, 43, 42], Some(36)),
    // single-bar walks
    ("Cmaj7", &[36, 40, 43, 47], None),
    ("C6", &[36, 40, 45, 43], None),
    ("C", &[36, 38, 40, 43], None),
    ("Cm7", &[36, 39, 43, 46], None),
    ("Cm", &[36, 38, 39, 43], None),
    ("C7", &[36, 40, 43, 46], None),
    ("C7", &[36, 38, 40, 42], None),
    ("Cm7b5", &[36, 39, 42, 46], None),
    ("Cdim7", &[36, 39, 42, 45], None),
    ("C7sus4", &[36, 41, 43, 46], None),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceOrigin;

    fn one_bar(db: &PatternDatabase, chart: &str, pitches: &[u8]) -> PatternSource {
        PatternSource::new(
            db.allocate_id(),
            ChordSequence::parse(chart, 4).unwrap(),
            Phrase::quarters(pitches),
            None,
            Transposability::default(),
        )
    }

    #[test]
    fn test_get_by_profile_and_size() {
        let db = PatternDatabase::new();
        assert!(db.add_source(one_bar(&db, "C", &[36, 40, 43, 40])));
        assert!(db.add_source(one_bar(&db, "Dm7 | G7", &[38, 41, 45, 44, 43, 47, 38, 37])));

        assert_eq!(db.get("0", 1).len(), 1);
        assert_eq!(db.get("0|5", 2).len(), 1);
        assert!(db.get("0|5", 1).is_empty());
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn test_equivalent_source_refused() {
        let db = PatternDatabase::new();
        assert!(db.add_source(one_bar(&db, "C", &[36, 40, 43, 40])));
        let twin = one_bar(&db, "C", &[36, 40, 43, 40]);
        assert!(!db.add_source(twin.clone()));
        let existing = db.register(twin).unwrap();
        assert_eq!(existing.id, SourceId(0));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_malformed_and_duplicate_id_refused() {
        let db = PatternDatabase::new();
        let empty = one_bar(&db, "C", &[]);
        assert!(!db.add_source(empty.clone()));
        assert!(db.register(empty).is_none());

        let first = one_bar(&db, "C", &[36, 40, 43, 40]);
        let mut clash = one_bar(&db, "F", &[41, 45, 48, 45]);
        clash.id = first.id;
        assert!(db.add_source(first));
        assert!(!db.add_source(clash));
    }

    #[test]
    fn test_allocate_id_skips_added_ids() {
        let db = PatternDatabase::new();
        let mut s = one_bar(&db, "C", &[36, 40, 43, 40]);
        s.id = SourceId(41);
        assert!(db.add_source(s.with_origin(SourceOrigin::Synthesized)));
        assert_eq!(db.allocate_id(), SourceId(42));
    }

    #[test]
    fn test_default_library_loads_every_entry() {
        let db = PatternDatabase::with_default_library();
        assert_eq!(db.len(), DEFAULT_LIBRARY.len());
        assert!(!db.get("0|5|10", 3).is_empty());
        assert!(db.get("0", 1).len() >= 10);
    }
}
