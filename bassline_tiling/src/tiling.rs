// The tiling: a sparse, non-overlapping assignment of bar ranges to
// placements.
//
// Two invariants hold at all times: every covered bar is usable in the
// sequence the tiling was created for, and no two placements share a bar.
// `add` enforces both and panics on violation (strategies must check
// `is_usable_and_free` first); `try_add` is the checked form.
//
// Besides placement lookup by start, end or covered bar (for the continuity
// bonus in scoring.rs and the neighbor test in the MaxDistance strategy),
// the tiling reports its untiled zones for the fallback synthesizer and
// renders itself into a flat phrase. Uncovered bars render as silence.

use crate::error::{Result, TilingError};
use crate::placement::PatternPlacement;
use crate::sequence::{BarRange, ChordSequence};
use crate::source::{Phrase, SourceId};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Tiling {
    first_bar: usize,
    beats_per_bar: u8,
    usable: Vec<bool>,
    /// For each bar, the start bar of the placement covering it.
    owner: Vec<Option<usize>>,
    placements: BTreeMap<usize, PatternPlacement>,
}

impl Tiling {
    /// An empty tiling over `seq`.
    pub fn new(seq: &ChordSequence) -> Self {
        let usable: Vec<bool> = seq.bars().iter().map(|b| b.usable).collect();
        Tiling {
            first_bar: seq.first_bar(),
            beats_per_bar: seq.beats_per_bar(),
            owner: vec![None; usable.len()],
            usable,
            placements: BTreeMap::new(),
        }
    }

    pub fn first_bar(&self) -> usize {
        self.first_bar
    }

    /// One past the last bar.
    pub fn end_bar(&self) -> usize {
        self.first_bar + self.usable.len()
    }

    fn slot(&self, bar: usize) -> Option<usize> {
        bar.checked_sub(self.first_bar).filter(|&i| i < self.usable.len())
    }

    pub fn is_usable(&self, bar: usize) -> bool {
        self.slot(bar).is_some_and(|i| self.usable[i])
    }

    pub fn is_covered(&self, bar: usize) -> bool {
        self.slot(bar).is_some_and(|i| self.owner[i].is_some())
    }

    /// True if every bar of `range` is usable and not yet covered.
    pub fn is_usable_and_free(&self, range: BarRange) -> bool {
        range.bars().all(|bar| match self.slot(bar) {
            Some(i) => self.usable[i] && self.owner[i].is_none(),
            None => false,
        })
    }

    /// Add a placement, or report the conflict.
    pub fn try_add(&mut self, placement: PatternPlacement) -> Result<()> {
        let range = placement.range;
        if !self.is_usable_and_free(range) {
            return Err(TilingError::PlacementConflict { from: range.from, to: range.to });
        }
        for bar in range.bars() {
            let i = bar - self.first_bar;
            self.owner[i] = Some(range.from);
        }
        self.placements.insert(range.from, placement);
        Ok(())
    }

    /// Add a placement.
    ///
    /// # Panics
    /// Panics if the placement's range is not usable-and-free. Callers must
    /// check `is_usable_and_free` first.
    pub fn add(&mut self, placement: PatternPlacement) {
        if let Err(e) = self.try_add(placement) {
            panic!("Tiling::add: {}", e);
        }
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Placements in bar order.
    pub fn placements(&self) -> impl Iterator<Item = &PatternPlacement> {
        self.placements.values()
    }

    pub fn placement_starting_at(&self, bar: usize) -> Option<&PatternPlacement> {
        self.placements.get(&bar)
    }

    pub fn placement_covering(&self, bar: usize) -> Option<&PatternPlacement> {
        let start = self.owner[self.slot(bar)?]?;
        self.placements.get(&start)
    }

    pub fn placement_ending_at(&self, bar: usize) -> Option<&PatternPlacement> {
        self.placement_covering(bar).filter(|p| p.range.to == bar)
    }

    pub fn usable_bar_count(&self) -> usize {
        self.usable.iter().filter(|&&u| u).count()
    }

    pub fn covered_bar_count(&self) -> usize {
        self.owner.iter().filter(|o| o.is_some()).count()
    }

    /// Bars covered by placements of `source`.
    pub fn bars_covered_by(&self, source: SourceId) -> usize {
        self.placements
            .values()
            .filter(|p| p.source_id() == source)
            .map(|p| p.size())
            .sum()
    }

    /// True once every usable bar is covered.
    pub fn is_fully_tiled(&self) -> bool {
        self.usable
            .iter()
            .zip(&self.owner)
            .all(|(&usable, owner)| !usable || owner.is_some())
    }

    /// Usable bars no placement covers, ascending.
    pub fn uncovered_bars(&self) -> Vec<usize> {
        (self.first_bar..self.end_bar())
            .filter(|&bar| self.is_usable_and_free(BarRange::single(bar)))
            .collect()
    }

    /// Maximal runs of consecutive uncovered usable bars, longest first
    /// (ties in bar order).
    pub fn untiled_zones(&self) -> Vec<BarRange> {
        let mut zones = Vec::new();
        let mut start: Option<usize> = None;
        for bar in self.first_bar..self.end_bar() {
            let free = self.is_usable_and_free(BarRange::single(bar));
            match (free, start) {
                (true, None) => start = Some(bar),
                (false, Some(s)) => {
                    zones.push(BarRange::new(s, bar - 1));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            zones.push(BarRange::new(s, self.end_bar() - 1));
        }
        zones.sort_by(|a, b| b.len().cmp(&a.len()).then(a.from.cmp(&b.from)));
        zones
    }

    /// `(start bar, source, size)` for every placement, in bar order.
    pub fn layout(&self) -> Vec<(usize, SourceId, usize)> {
        self.placements
            .values()
            .map(|p| (p.range.from, p.source_id(), p.size()))
            .collect()
    }

    /// Concatenate every placement's transposed phrase at its bar offset
    /// (relative to the first bar). Uncovered bars stay silent.
    pub fn render(&self) -> Phrase {
        let mut phrase = Phrase::default();
        for placement in self.placements.values() {
            placement.render_into(&mut phrase, self.first_bar, self.beats_per_bar);
        }
        phrase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::Score;
    use crate::source::{PatternSource, Transposability, TICKS_PER_BEAT};
    use std::sync::Arc;

    fn seq() -> ChordSequence {
        ChordSequence::parse("C | F | ? | G | C | C", 4).unwrap()
    }

    fn placement(seq: &ChordSequence, id: u32, range: BarRange) -> PatternPlacement {
        let source = PatternSource::new(
            SourceId(id),
            seq.sub_sequence(range, true),
            Phrase::quarters(&vec![36; range.len() * 4]),
            None,
            Transposability::default(),
        );
        PatternPlacement::new(Arc::new(source), range, seq).with_score(Score::new(50.0))
    }

    #[test]
    fn test_add_and_lookup() {
        let seq = seq();
        let mut tiling = Tiling::new(&seq);
        tiling.add(placement(&seq, 1, BarRange::new(0, 1)));

        assert!(tiling.is_covered(1));
        assert_eq!(tiling.placement_covering(1).unwrap().range.from, 0);
        assert!(tiling.placement_ending_at(1).is_some());
        assert!(tiling.placement_ending_at(0).is_none());
        assert!(tiling.placement_starting_at(0).is_some());
        assert_eq!(tiling.bars_covered_by(SourceId(1)), 2);
    }

    #[test]
    fn test_overlap_and_unusable_refused() {
        let seq = seq();
        let mut tiling = Tiling::new(&seq);
        tiling.add(placement(&seq, 1, BarRange::new(0, 1)));
        assert!(tiling.try_add(placement(&seq, 2, BarRange::new(1, 1))).is_err());
        // Bar 2 is unusable.
        assert!(!tiling.is_usable_and_free(BarRange::new(1, 3)));
        assert!(!tiling.is_usable_and_free(BarRange::new(5, 6)));
    }

    #[test]
    #[should_panic(expected = "not usable-and-free")]
    fn test_add_panics_on_conflict() {
        let seq = seq();
        let mut tiling = Tiling::new(&seq);
        tiling.add(placement(&seq, 1, BarRange::new(3, 4)));
        tiling.add(placement(&seq, 2, BarRange::new(4, 5)));
    }

    #[test]
    fn test_untiled_zones_longest_first() {
        let seq = seq();
        let mut tiling = Tiling::new(&seq);
        tiling.add(placement(&seq, 1, BarRange::single(0)));
        assert_eq!(
            tiling.untiled_zones(),
            vec![BarRange::new(3, 5), BarRange::single(1)]
        );
        assert_eq!(tiling.uncovered_bars(), vec![1, 3, 4, 5]);
        assert!(!tiling.is_fully_tiled());
    }

    #[test]
    fn test_fully_tiled_ignores_unusable_bars() {
        let seq = seq();
        let mut tiling = Tiling::new(&seq);
        tiling.add(placement(&seq, 1, BarRange::new(0, 1)));
        tiling.add(placement(&seq, 2, BarRange::new(3, 5)));
        assert!(tiling.is_fully_tiled());
        assert_eq!(tiling.covered_bar_count(), 5);
        assert_eq!(tiling.usable_bar_count(), 5);
    }

    #[test]
    fn test_render_leaves_gaps_silent() {
        let seq = seq();
        let mut tiling = Tiling::new(&seq);
        tiling.add(placement(&seq, 1, BarRange::single(3)));
        let phrase = tiling.render();
        assert_eq!(phrase.len(), 4);
        assert_eq!(phrase.notes[0].position, 3 * 4 * TICKS_PER_BEAT);
    }
}
