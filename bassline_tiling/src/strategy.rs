// Tiling strategies: greedy placement of candidates into a tiling.
//
// Every strategy implements `TilingStrategy::tile`, mutating the tiling in
// place from a candidate store. Strategies hold only their parameters; all
// per-request bookkeeping (placement counts, per-source coverage, usage
// history for the diversity caps) lives in `TilingState`, created by the
// engine for one request and threaded through every pass. A strategy object
// can therefore be shared between concurrent requests.
//
// Placement always goes through `commit`, which checks usable-and-free and
// the request's diversity limits, rescores the candidate with the tiling as
// context (so continuity bonuses reflect the neighbors actually placed) and
// adds it. `place_greedily` is the shared "rank-ordered placement with a
// no-repeat set" loop.
//
// Diversity limits are installed into `TilingState` by the capped pass
// (diversity.rs) and bind every later pass of the same request, so a
// refinement pass cannot fill the bars a cap left open with the capped
// source.
//
// Strategies here:
// - MostCompatibleFirst: rounds over ranks at one size, sizes large to small.
// - BestFirstNoRepeat: one global best-first pass, each source used once.
// - MaxDistance: refinement pass preferring sources unlike their neighbors.
// The diversity-capped single pass lives in diversity.rs.

use crate::candidates::CandidateStore;
use crate::placement::PatternPlacement;
use crate::scoring::Scorer;
use crate::source::SourceId;
use crate::tiling::Tiling;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;

/// Slack for float comparison of the coverage cap.
const COVERAGE_EPSILON: f64 = 1e-9;

/// Request-local state shared by the strategy passes of one request.
#[derive(Debug, Clone)]
pub struct TilingState {
    scorer: Scorer,
    total_usable_bars: usize,
    opportunity: usize,
    last_used: FxHashMap<SourceId, usize>,
    covered: FxHashMap<SourceId, usize>,
    placements_made: usize,
    /// Minimum number of bars between two placements of one source.
    spacing: usize,
    /// Largest share of the usable bars one source may cover.
    coverage: Option<f64>,
}

impl TilingState {
    pub fn new(tiling: &Tiling, scorer: Scorer) -> Self {
        TilingState {
            scorer,
            total_usable_bars: tiling.usable_bar_count(),
            opportunity: 0,
            last_used: FxHashMap::default(),
            covered: FxHashMap::default(),
            placements_made: 0,
            spacing: 0,
            coverage: None,
        }
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn total_usable_bars(&self) -> usize {
        self.total_usable_bars
    }

    /// Placements committed so far in this request.
    pub fn placements_made(&self) -> usize {
        self.placements_made
    }

    /// Bars covered so far by placements of `source`.
    pub fn bars_covered_by(&self, source: SourceId) -> usize {
        self.covered.get(&source).copied().unwrap_or(0)
    }

    /// Start a new placement opportunity and return its number.
    pub fn next_opportunity(&mut self) -> usize {
        self.opportunity += 1;
        self.opportunity
    }

    /// Opportunity at which `source` was last accepted by a usage-capped pass.
    pub fn last_use(&self, source: SourceId) -> Option<usize> {
        self.last_used.get(&source).copied()
    }

    pub fn record_use(&mut self, source: SourceId, opportunity: usize) {
        self.last_used.insert(source, opportunity);
    }

    /// Tighten the diversity limits for the rest of the request. Limits only
    /// ever get stricter.
    pub fn restrict(&mut self, spacing: usize, coverage: Option<f64>) {
        self.spacing = self.spacing.max(spacing);
        if let Some(fraction) = coverage {
            self.coverage = Some(self.coverage.map_or(fraction, |c| c.min(fraction)));
        }
    }

    pub fn spacing(&self) -> usize {
        self.spacing
    }

    pub fn coverage(&self) -> Option<f64> {
        self.coverage
    }

    /// Whether placing `candidate` keeps its source within the coverage cap
    /// and at least `spacing` bars away from its other placements.
    pub fn permits(&self, tiling: &Tiling, candidate: &PatternPlacement) -> bool {
        let id = candidate.source_id();
        if let Some(fraction) = self.coverage {
            let limit = fraction * self.total_usable_bars as f64;
            let would_cover = (self.bars_covered_by(id) + candidate.size()) as f64;
            if would_cover > limit + COVERAGE_EPSILON {
                return false;
            }
        }
        if self.spacing == 0 {
            return true;
        }
        let range = candidate.range;
        tiling.placements().filter(|p| p.source_id() == id).all(|p| {
            let gap = if p.range.to < range.from {
                range.from - p.range.to - 1
            } else {
                p.range.from.saturating_sub(range.to + 1)
            };
            gap >= self.spacing
        })
    }
}

/// A tiling pass.
pub trait TilingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Add placements from `store` to `tiling`. Never removes placements.
    fn tile(&self, tiling: &mut Tiling, store: &CandidateStore, state: &mut TilingState);
}

/// Place `candidate` if its bars are still usable and free and the request's
/// diversity limits allow it, rescored in the context of `tiling`. Returns
/// whether it was placed.
pub fn commit(tiling: &mut Tiling, candidate: &PatternPlacement, state: &mut TilingState) -> bool {
    if !tiling.is_usable_and_free(candidate.range) || !state.permits(tiling, candidate) {
        return false;
    }
    let score = state.scorer.score(candidate, Some(&*tiling));
    let placement = candidate.clone().with_score(score);
    *state.covered.entry(placement.source_id()).or_default() += placement.size();
    tiling.add(placement);
    state.placements_made += 1;
    true
}

/// Walk `candidates` in the given order, placing each one whose source is
/// not in `used` and whose bars are free. Returns the number placed.
pub fn place_greedily(
    tiling: &mut Tiling,
    candidates: &[&PatternPlacement],
    used: &mut FxHashSet<SourceId>,
    state: &mut TilingState,
) -> usize {
    let mut placed = 0;
    for candidate in candidates {
        if used.contains(&candidate.source_id()) {
            continue;
        }
        if commit(tiling, candidate, state) {
            used.insert(candidate.source_id());
            placed += 1;
        }
    }
    placed
}

/// Rounds of rank-by-rank greedy placement at each size in turn.
///
/// Within a round a source is placed at most once; rounds repeat at the same
/// size until one places nothing. Equal scores fall back to source id, then
/// bar.
#[derive(Debug, Clone)]
pub struct MostCompatibleFirst {
    sizes: Vec<usize>,
}

impl MostCompatibleFirst {
    pub fn single(size: usize) -> Self {
        MostCompatibleFirst { sizes: vec![size] }
    }

    /// Every size from `max` down to `min`.
    pub fn descending(min: usize, max: usize) -> Self {
        MostCompatibleFirst { sizes: (min..=max).rev().collect() }
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    fn tile_size(
        &self,
        size: usize,
        tiling: &mut Tiling,
        store: &CandidateStore,
        state: &mut TilingState,
    ) -> usize {
        let mut total = 0;
        loop {
            let mut used = FxHashSet::default();
            let mut round = 0;
            for rank in 0..store.nb_best_max() {
                let mut gathered = store.get_ranked(rank, size);
                gathered.retain(|p| tiling.is_usable_and_free(p.range));
                gathered.sort_by(|a, b| PatternPlacement::rank_order(a, b));
                round += place_greedily(tiling, &gathered, &mut used, state);
            }
            total += round;
            if round == 0 {
                return total;
            }
        }
    }
}

impl TilingStrategy for MostCompatibleFirst {
    fn name(&self) -> &'static str {
        "most-compatible-first"
    }

    fn tile(&self, tiling: &mut Tiling, store: &CandidateStore, state: &mut TilingState) {
        for &size in &self.sizes {
            let placed = self.tile_size(size, tiling, store, state);
            tracing::debug!(size, placed, "most-compatible-first pass");
        }
    }
}

/// Best candidates first across the whole sequence and every size; each
/// source placed at most once per pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestFirstNoRepeat;

impl TilingStrategy for BestFirstNoRepeat {
    fn name(&self) -> &'static str {
        "best-first-no-repeat"
    }

    fn tile(&self, tiling: &mut Tiling, store: &CandidateStore, state: &mut TilingState) {
        let mut all: Vec<&PatternPlacement> = store
            .iter()
            .filter(|p| tiling.is_usable_and_free(p.range))
            .collect();
        all.sort_by(|a, b| PatternPlacement::rank_order(a, b));
        let mut used = FxHashSet::default();
        let placed = place_greedily(tiling, &all, &mut used, state);
        tracing::debug!(placed, "best-first-no-repeat pass");
    }
}

/// Fills remaining gaps bar by bar, preferring the candidate whose source is
/// farthest from the placements on either side.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxDistance;

impl MaxDistance {
    /// Smallest distance from `candidate`'s source to its placed neighbors,
    /// or `None` with no neighbors.
    fn neighbor_distance(tiling: &Tiling, candidate: &PatternPlacement) -> Option<u32> {
        let before = candidate
            .range
            .from
            .checked_sub(1)
            .and_then(|bar| tiling.placement_ending_at(bar));
        let after = tiling.placement_starting_at(candidate.range.to + 1);
        [before, after]
            .into_iter()
            .flatten()
            .map(|n| candidate.source.distance(&n.source))
            .min()
    }
}

impl TilingStrategy for MaxDistance {
    fn name(&self) -> &'static str {
        "max-distance"
    }

    fn tile(&self, tiling: &mut Tiling, store: &CandidateStore, state: &mut TilingState) {
        let mut placed = 0;
        for bar in tiling.uncovered_bars() {
            if tiling.is_covered(bar) {
                continue;
            }
            let view: &Tiling = tiling;
            let mut options: Vec<(Reverse<u32>, &PatternPlacement, _)> = store
                .candidates_at(bar)
                .into_iter()
                .filter(|p| view.is_usable_and_free(p.range) && state.permits(view, p))
                .map(|p| {
                    let distance = Self::neighbor_distance(view, p).unwrap_or(u32::MAX);
                    (Reverse(distance), p, state.scorer().score(p, Some(view)))
                })
                .collect();
            options.sort_by(|(da, a, sa), (db, b, sb)| {
                da.cmp(db)
                    .then_with(|| sb.cmp(sa))
                    .then_with(|| PatternPlacement::rank_order(a, b))
            });
            let best = options.first().map(|(_, p, _)| (*p).clone());
            if best.is_some_and(|p| commit(tiling, &p, state)) {
                placed += 1;
            }
        }
        tracing::debug!(placed, "max-distance pass");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::StoreParams;
    use crate::database::PatternDatabase;
    use crate::scoring::ScoringWeights;
    use crate::sequence::{BarRange, ChordSequence};
    use crate::source::{PatternSource, Phrase, Transposability};
    use std::sync::Arc;

    fn add(db: &PatternDatabase, chart: &str, pitches: &[u8], table: u8) -> SourceId {
        let id = db.allocate_id();
        let source = PatternSource::new(
            id,
            ChordSequence::parse(chart, 4).unwrap(),
            Phrase::quarters(pitches),
            None,
            Transposability::Table([table; 12]),
        );
        assert!(db.add_source(source));
        id
    }

    fn setup(
        chart: &str,
        db: &PatternDatabase,
    ) -> (ChordSequence, CandidateStore, Tiling, TilingState) {
        let seq = ChordSequence::parse(chart, 4).unwrap();
        let scorer = Scorer::new(ScoringWeights { continuity: 0.0, ..ScoringWeights::default() });
        let store = CandidateStore::build(&seq, db, &scorer, StoreParams::default()).unwrap();
        let tiling = Tiling::new(&seq);
        let state = TilingState::new(&tiling, scorer);
        (seq, store, tiling, state)
    }

    #[test]
    fn test_commit_refuses_taken_bars() {
        let db = PatternDatabase::new();
        add(&db, "C", &[36, 40, 43, 40], 90);
        let (_, store, mut tiling, mut state) = setup("C | C", &db);
        let first = store.get(0, 1)[0].clone();
        assert!(commit(&mut tiling, &first, &mut state));
        assert!(!commit(&mut tiling, &first, &mut state));
        assert_eq!(state.placements_made(), 1);
        assert_eq!(state.bars_covered_by(first.source_id()), 1);
    }

    #[test]
    fn test_place_greedily_respects_used_set() {
        let db = PatternDatabase::new();
        let only = add(&db, "C", &[36, 40, 43, 40], 90);
        let (_, store, mut tiling, mut state) = setup("C | C | C", &db);
        let all: Vec<&PatternPlacement> = store.iter().collect();
        let mut used = FxHashSet::default();
        assert_eq!(place_greedily(&mut tiling, &all, &mut used, &mut state), 1);
        assert!(used.contains(&only));
    }

    #[test]
    fn test_most_compatible_first_repeats_rounds() {
        // One source only: each round places it once, so three rounds are
        // needed for three bars.
        let db = PatternDatabase::new();
        add(&db, "C", &[36, 40, 43, 40], 90);
        let (_, store, mut tiling, mut state) = setup("C | F | G", &db);
        MostCompatibleFirst::single(1).tile(&mut tiling, &store, &mut state);
        assert!(tiling.is_fully_tiled());
        assert_eq!(tiling.len(), 3);
    }

    #[test]
    fn test_most_compatible_first_prefers_larger_sizes() {
        let db = PatternDatabase::new();
        add(&db, "Dm7 | G7", &[38, 41, 45, 44, 43, 47, 38, 37], 50);
        add(&db, "Dm7", &[38, 41, 45, 48], 100);
        add(&db, "G7", &[43, 47, 50, 53], 100);
        let (_, store, mut tiling, mut state) = setup("Dm7 | G7", &db);
        let strategy = MostCompatibleFirst::descending(1, 4);
        assert_eq!(strategy.sizes(), &[4, 3, 2, 1]);
        strategy.tile(&mut tiling, &store, &mut state);
        assert_eq!(tiling.len(), 1);
        assert_eq!(tiling.placement_starting_at(0).unwrap().size(), 2);
    }

    #[test]
    fn test_best_first_uses_each_source_once() {
        let db = PatternDatabase::new();
        let strong = add(&db, "C", &[36, 40, 43, 40], 100);
        let weak = add(&db, "C", &[36, 38, 40, 43], 40);
        let (_, store, mut tiling, mut state) = setup("C | C | C", &db);
        BestFirstNoRepeat.tile(&mut tiling, &store, &mut state);
        assert_eq!(tiling.len(), 2);
        assert_eq!(tiling.placement_starting_at(0).unwrap().source_id(), strong);
        assert_eq!(tiling.placement_starting_at(1).unwrap().source_id(), weak);
        assert!(!tiling.is_covered(2));
    }

    #[test]
    fn test_max_distance_avoids_repeating_neighbor() {
        let db = PatternDatabase::new();
        // Same contour as `near` but a different source: distance 1.
        let near = add(&db, "C", &[36, 40, 43, 40], 100);
        let twin = add(&db, "C", &[38, 42, 45, 42], 100);
        let far = add(&db, "C", &[48, 36, 47, 37], 60);
        let (seq, store, mut tiling, mut state) = setup("C | C", &db);
        let first = PatternPlacement::new(db.get_by_id(near).unwrap(), BarRange::single(0), &seq);
        assert!(commit(&mut tiling, &first, &mut state));

        MaxDistance.tile(&mut tiling, &store, &mut state);
        let second = tiling.placement_starting_at(1).unwrap().source_id();
        assert_eq!(second, far);
        assert_ne!(second, twin);
    }

    #[test]
    fn test_state_tracks_opportunities() {
        let seq = ChordSequence::parse("C | ? | C", 4).unwrap();
        let tiling = Tiling::new(&seq);
        let mut state = TilingState::new(&tiling, Scorer::new(ScoringWeights::default()));
        assert_eq!(state.total_usable_bars(), 2);
        let first = state.next_opportunity();
        state.record_use(SourceId(4), first);
        assert_eq!(state.last_use(SourceId(4)), Some(1));
        assert_eq!(state.next_opportunity(), 2);
        assert_eq!(state.last_use(SourceId(5)), None);
    }

    #[test]
    fn test_commit_enforces_restricted_limits() {
        let db = PatternDatabase::new();
        let only = add(&db, "C", &[36, 40, 43, 40], 90);
        let (seq, _, mut tiling, mut state) = setup("C | C | C | C | C", &db);
        let source = db.get_by_id(only).unwrap();
        let at = |bar| PatternPlacement::new(Arc::clone(&source), BarRange::single(bar), &seq);

        state.restrict(1, Some(0.5));
        state.restrict(0, Some(0.8));
        assert_eq!(state.spacing(), 1);
        assert_eq!(state.coverage(), Some(0.5));

        assert!(commit(&mut tiling, &at(0), &mut state));
        assert!(!commit(&mut tiling, &at(1), &mut state));
        assert!(commit(&mut tiling, &at(2), &mut state));
        // Two of five bars covered; a third would exceed half.
        assert!(!commit(&mut tiling, &at(4), &mut state));
        assert_eq!(tiling.layout(), vec![(0, only, 1), (2, only, 1)]);
    }
}
