// Candidate store: bounded, ranked placements per (bar, size).
//
// Built once per request. For every usable bar and every size, the bar
// range is sliced out of the sequence, its root profile looked up in the
// database, and every returned source placed and scored without tiling
// context. Scores below the threshold (and rejected zero scores) are
// dropped; each (bar, size) list keeps at most `nb_best_max` entries in
// rank order (score descending, then source id, then bar).
//
// The engine feeds sources synthesized mid-request back in through
// `insert_source`, which only scans the windows of that source's size.

use crate::database::PatternDatabase;
use crate::error::{Result, TilingError};
use crate::placement::{PatternPlacement, Score};
use crate::scoring::Scorer;
use crate::sequence::{BarRange, ChordSequence};
use crate::source::{MAX_SOURCE_SIZE, PatternSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Bounds for building a store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreParams {
    pub min_size: usize,
    pub max_size: usize,
    pub nb_best_max: usize,
    pub min_threshold: f64,
}

impl Default for StoreParams {
    fn default() -> Self {
        StoreParams {
            min_size: 1,
            max_size: MAX_SOURCE_SIZE,
            nb_best_max: 8,
            min_threshold: 10.0,
        }
    }
}

impl StoreParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 || self.min_size > self.max_size || self.max_size > MAX_SOURCE_SIZE {
            return Err(TilingError::InvalidSizeBounds { min: self.min_size, max: self.max_size });
        }
        if self.nb_best_max == 0 {
            return Err(TilingError::InvalidParameter {
                name: "nb_best_max",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.min_threshold.is_finite() || !(0.0..=100.0).contains(&self.min_threshold) {
            return Err(TilingError::InvalidParameter {
                name: "min_threshold",
                reason: format!("{} is outside [0, 100]", self.min_threshold),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CandidateStore {
    params: StoreParams,
    lists: BTreeMap<(usize, usize), Vec<PatternPlacement>>,
}

impl CandidateStore {
    /// An empty store with validated bounds.
    pub fn new(params: StoreParams) -> Result<Self> {
        params.validate()?;
        Ok(CandidateStore { params, lists: BTreeMap::new() })
    }

    /// Score every database source against every usable window of `seq`.
    pub fn build(
        seq: &ChordSequence,
        database: &PatternDatabase,
        scorer: &Scorer,
        params: StoreParams,
    ) -> Result<Self> {
        let mut store = CandidateStore::new(params)?;
        for bar in seq.first_bar()..seq.end_bar() {
            if !seq.is_usable(bar) {
                continue;
            }
            for size in params.min_size..=params.max_size {
                let range = BarRange::sized(bar, size);
                if !seq.is_range_usable(range) {
                    continue;
                }
                let Some(profile) = seq.root_profile(range) else {
                    continue;
                };
                for source in database.get(&profile, size) {
                    store.consider(seq, range, source, scorer);
                }
            }
        }
        debug!(entries = store.len(), lists = store.lists.len(), "candidate store built");
        Ok(store)
    }

    /// Offer a newly registered source to every matching window. Returns
    /// how many placements were retained.
    pub fn insert_source(
        &mut self,
        seq: &ChordSequence,
        source: &Arc<PatternSource>,
        scorer: &Scorer,
    ) -> usize {
        let size = source.size;
        if size < self.params.min_size || size > self.params.max_size {
            return 0;
        }
        let mut retained = 0;
        for bar in seq.first_bar()..seq.end_bar() {
            let range = BarRange::sized(bar, size);
            if !seq.is_range_usable(range) {
                continue;
            }
            if seq.root_profile(range).as_deref() != Some(source.root_profile.as_str()) {
                continue;
            }
            let already = self
                .get(bar, size)
                .iter()
                .any(|p| p.source_id() == source.id);
            if !already && self.consider(seq, range, Arc::clone(source), scorer) {
                retained += 1;
            }
        }
        retained
    }

    /// Score one placement and insert it if it clears the threshold.
    fn consider(
        &mut self,
        seq: &ChordSequence,
        range: BarRange,
        source: Arc<PatternSource>,
        scorer: &Scorer,
    ) -> bool {
        let placement = PatternPlacement::new(source, range, seq);
        let score = scorer.score(&placement, None);
        if score.is_rejected() || score < Score::new(self.params.min_threshold) {
            return false;
        }
        self.insert(placement.with_score(score))
    }

    /// Ranked insert with eviction of the worst entry. Returns false if the
    /// new placement itself was the one evicted.
    fn insert(&mut self, placement: PatternPlacement) -> bool {
        let key = (placement.range.from, placement.size());
        let list = self.lists.entry(key).or_default();
        let at = list
            .iter()
            .position(|p| PatternPlacement::rank_order(&placement, p).is_lt())
            .unwrap_or(list.len());
        list.insert(at, placement);
        if list.len() > self.params.nb_best_max {
            list.pop();
            return at < self.params.nb_best_max;
        }
        true
    }

    pub fn params(&self) -> &StoreParams {
        &self.params
    }

    pub fn nb_best_max(&self) -> usize {
        self.params.nb_best_max
    }

    /// Ranked candidates for `(bar, size)`; empty if there are none.
    pub fn get(&self, bar: usize, size: usize) -> &[PatternPlacement] {
        self.lists.get(&(bar, size)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// One placement per bar at `rank` for the given size, in bar order.
    /// Bars with fewer candidates contribute their lowest-ranked one; bars
    /// with none are absent.
    pub fn get_ranked(&self, rank: usize, size: usize) -> Vec<&PatternPlacement> {
        self.lists
            .iter()
            .filter(|((_, s), _)| *s == size)
            .filter_map(|(_, list)| list.get(rank).or_else(|| list.last()))
            .collect()
    }

    /// Every candidate starting at `bar`, all sizes, in rank order.
    pub fn candidates_at(&self, bar: usize) -> Vec<&PatternPlacement> {
        let mut all: Vec<&PatternPlacement> = self
            .lists
            .range((bar, 0)..=(bar, usize::MAX))
            .flat_map(|(_, list)| list.iter())
            .collect();
        all.sort_by(|a, b| PatternPlacement::rank_order(a, b));
        all
    }

    /// Every candidate in the store, unordered.
    pub fn iter(&self) -> impl Iterator<Item = &PatternPlacement> {
        self.lists.values().flatten()
    }

    /// Total number of stored placements.
    pub fn len(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoringWeights;
    use crate::source::{Phrase, SourceId, Transposability};

    fn add(db: &PatternDatabase, chart: &str, transposability: u8) -> SourceId {
        let chords = ChordSequence::parse(chart, 4).unwrap();
        let id = db.allocate_id();
        let beats = chords.len() * 4;
        // Distinct contour per id so no two sources are equivalent.
        let pitches: Vec<u8> = (0..beats)
            .map(|i| 36 + (i % 4) as u8 * (id.0 % 5 + 1) as u8)
            .collect();
        let source = PatternSource::new(
            id,
            chords,
            Phrase::quarters(&pitches),
            None,
            Transposability::Table([transposability; 12]),
        );
        assert!(db.add_source(source));
        id
    }

    fn scorer() -> Scorer {
        Scorer::new(ScoringWeights { harmonic: 1.0, transposability: 1.0, continuity: 0.0 })
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let bad = StoreParams { min_size: 0, ..StoreParams::default() };
        assert!(matches!(CandidateStore::new(bad), Err(TilingError::InvalidSizeBounds { .. })));
        let bad = StoreParams { min_size: 3, max_size: 2, ..StoreParams::default() };
        assert!(CandidateStore::new(bad).is_err());
        let bad = StoreParams { max_size: 5, ..StoreParams::default() };
        assert!(CandidateStore::new(bad).is_err());
        let bad = StoreParams { nb_best_max: 0, ..StoreParams::default() };
        assert!(CandidateStore::new(bad).is_err());
    }

    #[test]
    fn test_lists_bounded_and_sorted() {
        let db = PatternDatabase::new();
        for t in [10, 90, 50, 70, 30] {
            add(&db, "C", t);
        }
        let seq = ChordSequence::parse("C | F | G", 4).unwrap();
        let params = StoreParams { nb_best_max: 3, min_threshold: 0.0, ..StoreParams::default() };
        let store = CandidateStore::build(&seq, &db, &scorer(), params).unwrap();

        for bar in 0..3 {
            let list = store.get(bar, 1);
            assert_eq!(list.len(), 3);
            let scores: Vec<f64> = list.iter().map(|p| p.score.value()).collect();
            assert_eq!(scores, vec![95.0, 85.0, 75.0]);
        }
    }

    #[test]
    fn test_threshold_drops_weak_candidates() {
        let db = PatternDatabase::new();
        add(&db, "C", 10);
        add(&db, "C", 90);
        let seq = ChordSequence::parse("C", 4).unwrap();
        let params = StoreParams { min_threshold: 60.0, ..StoreParams::default() };
        let store = CandidateStore::build(&seq, &db, &scorer(), params).unwrap();
        assert_eq!(store.get(0, 1).len(), 1);
        assert!(store.iter().all(|p| p.score.value() >= 60.0));
    }

    #[test]
    fn test_incompatible_sources_never_stored() {
        let db = PatternDatabase::new();
        add(&db, "Cm7", 100);
        let seq = ChordSequence::parse("C7 | F7", 4).unwrap();
        let params = StoreParams { min_threshold: 0.0, ..StoreParams::default() };
        let store = CandidateStore::build(&seq, &db, &scorer(), params).unwrap();
        assert!(store.is_empty());
        assert!(store.get(0, 1).is_empty());
    }

    #[test]
    fn test_unusable_windows_skipped() {
        let db = PatternDatabase::new();
        add(&db, "C | C", 100);
        add(&db, "C", 100);
        let seq = ChordSequence::parse("C | ? | C | C", 4).unwrap();
        let store = CandidateStore::build(&seq, &db, &scorer(), StoreParams::default()).unwrap();
        assert!(store.get(0, 2).is_empty());
        assert!(store.get(1, 1).is_empty());
        assert_eq!(store.get(2, 2).len(), 1);
        assert_eq!(store.get(0, 1).len(), 1);
    }

    #[test]
    fn test_get_ranked_falls_back_to_last() {
        let db = PatternDatabase::new();
        add(&db, "C", 90);
        add(&db, "C", 50);
        // Conflicting third: only fits bar 1.
        add(&db, "Cm7", 80);
        let seq = ChordSequence::parse("C | Cm7", 4).unwrap();
        let store = CandidateStore::build(&seq, &db, &scorer(), StoreParams::default()).unwrap();

        let first = store.get_ranked(0, 1);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].range.from, 0);
        assert_eq!(first[0].score.value(), 95.0);

        let second = store.get_ranked(1, 1);
        assert_eq!(second[0].score.value(), 75.0);
        // Bar 1 has a single candidate; rank 1 repeats it.
        assert_eq!(second[1].score.value(), 90.0);
        assert!(store.get_ranked(0, 2).is_empty());
    }

    #[test]
    fn test_insert_source_adds_matching_windows() {
        let db = PatternDatabase::new();
        let seq = ChordSequence::parse("Dm7 | G7 | Em7 | A7", 4).unwrap();
        let mut store =
            CandidateStore::build(&seq, &db, &scorer(), StoreParams::default()).unwrap();
        assert!(store.is_empty());

        add(&db, "Dm7 | G7", 80);
        let source = db.get("0|5", 2).remove(0);
        assert_eq!(store.insert_source(&seq, &source, &scorer()), 2);
        assert_eq!(store.get(0, 2).len(), 1);
        assert_eq!(store.get(2, 2).len(), 1);
        // Offering it again is a no-op.
        assert_eq!(store.insert_source(&seq, &source, &scorer()), 0);
    }

    #[test]
    fn test_candidates_at_mixes_sizes() {
        let db = PatternDatabase::new();
        add(&db, "C | F", 60);
        add(&db, "C", 90);
        let seq = ChordSequence::parse("C | F", 4).unwrap();
        let store = CandidateStore::build(&seq, &db, &scorer(), StoreParams::default()).unwrap();
        let at0 = store.candidates_at(0);
        assert_eq!(at0.len(), 2);
        assert_eq!(at0[0].size(), 1);
        assert_eq!(at0[1].size(), 2);
    }
}
