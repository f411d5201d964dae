// Scores and pattern placements.
//
// A placement binds a shared pattern source to a bar range of the target
// sequence, together with the target chords it covers and the transposition
// that takes the source onto them. Placements are built and scored in
// candidates.rs, then cloned into a Tiling when a strategy accepts them.

use crate::chord::PitchClass;
use crate::sequence::{BarRange, ChordSequence};
use crate::source::{PatternSource, Phrase, SourceId, TICKS_PER_BEAT};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Compatibility score in [0, 100]. Zero means rejected.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Score(f64);

impl Score {
    pub const ZERO: Score = Score(0.0);
    pub const MAX: Score = Score(100.0);

    /// Clamp into [0, 100]. NaN and negative zero become 0.
    pub fn new(value: f64) -> Self {
        if value.is_nan() || value <= 0.0 {
            Score(0.0)
        } else {
            Score(value.min(100.0))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_rejected(self) -> bool {
        self.0 == 0.0
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// A scored binding of a source to a bar range.
#[derive(Debug, Clone)]
pub struct PatternPlacement {
    pub source: Arc<PatternSource>,
    pub range: BarRange,
    /// Target chords under `range`, re-indexed from bar 0.
    pub chord_slice: ChordSequence,
    /// Semitones added to every note of the source phrase.
    pub transposition: i8,
    pub score: Score,
}

impl PatternPlacement {
    /// An unscored placement of `source` over `range` of `target`.
    pub fn new(source: Arc<PatternSource>, range: BarRange, target: &ChordSequence) -> Self {
        let chord_slice = target.sub_sequence(range, true);
        let root = chord_slice
            .first_chord(0)
            .map(|c| c.root)
            .unwrap_or(PitchClass::C);
        let transposition = source.transposition_to(root);
        PatternPlacement {
            source,
            range,
            chord_slice,
            transposition,
            score: Score::ZERO,
        }
    }

    pub fn with_score(mut self, score: Score) -> Self {
        self.score = score;
        self
    }

    pub fn size(&self) -> usize {
        self.range.len()
    }

    pub fn source_id(&self) -> SourceId {
        self.source.id
    }

    /// Root of the first target chord.
    pub fn target_root(&self) -> PitchClass {
        self.chord_slice
            .first_chord(0)
            .map(|c| c.root)
            .unwrap_or(PitchClass::C)
    }

    fn shifted(&self, pitch: u8) -> u8 {
        (pitch as i16 + self.transposition as i16).clamp(0, 127) as u8
    }

    /// Sounding pitch of the first note after transposition.
    pub fn first_pitch(&self) -> Option<u8> {
        self.source.phrase.first_pitch().map(|p| self.shifted(p))
    }

    pub fn last_pitch(&self) -> Option<u8> {
        self.source.phrase.last_pitch().map(|p| self.shifted(p))
    }

    /// Sounding pitch the phrase leads into, after transposition.
    pub fn target_pitch(&self) -> Option<u8> {
        self.source.target_note.map(|p| self.shifted(p))
    }

    /// Append the transposed phrase at this placement's bar offset, counted
    /// from `origin_bar`.
    pub fn render_into(&self, out: &mut Phrase, origin_bar: usize, beats_per_bar: u8) {
        let bar_ticks = beats_per_bar as u32 * TICKS_PER_BEAT;
        let offset = (self.range.from - origin_bar) as u32 * bar_ticks;
        for note in &self.source.phrase.notes {
            out.push(note.moved(self.transposition as i16, offset));
        }
    }

    /// Candidate order used everywhere: best score first, then lower source
    /// id, then earlier bar.
    pub fn rank_order(a: &PatternPlacement, b: &PatternPlacement) -> Ordering {
        b.score
            .cmp(&a.score)
            .then_with(|| a.source.id.cmp(&b.source.id))
            .then_with(|| a.range.from.cmp(&b.range.from))
    }
}

impl fmt::Display for PatternPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({:+} st) score {}",
            self.range, self.source.id, self.transposition, self.score
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{PatternSource, Transposability};

    fn dm7_source() -> Arc<PatternSource> {
        Arc::new(PatternSource::new(
            SourceId(3),
            ChordSequence::parse("Dm7", 4).unwrap(),
            Phrase::quarters(&[38, 41, 45, 48]),
            Some(43),
            Transposability::default(),
        ))
    }

    #[test]
    fn test_score_clamps() {
        assert_eq!(Score::new(140.0), Score::MAX);
        assert_eq!(Score::new(-3.0), Score::ZERO);
        assert_eq!(Score::new(f64::NAN), Score::ZERO);
        assert!(Score::new(-0.0).is_rejected());
        assert!(Score::new(30.0) > Score::new(20.0));
    }

    #[test]
    fn test_placement_transposes_to_target_root() {
        let target = ChordSequence::parse("C | Em7 | A7", 4).unwrap();
        let p = PatternPlacement::new(dm7_source(), BarRange::single(1), &target);
        // D -> E is +2
        assert_eq!(p.transposition, 2);
        assert_eq!(p.first_pitch(), Some(40));
        assert_eq!(p.last_pitch(), Some(50));
        assert_eq!(p.target_pitch(), Some(45));
        assert_eq!(p.chord_slice.len(), 1);
    }

    #[test]
    fn test_render_into_offsets_by_bar() {
        let target = ChordSequence::parse("C | Dm7", 4).unwrap();
        let p = PatternPlacement::new(dm7_source(), BarRange::single(1), &target);
        let mut out = Phrase::default();
        p.render_into(&mut out, 0, 4);
        assert_eq!(out.len(), 4);
        assert_eq!(out.notes[0].position, 4 * TICKS_PER_BEAT);
        assert_eq!(out.notes[0].pitch, 38);
    }

    #[test]
    fn test_rank_order_breaks_ties_by_source_id() {
        let target = ChordSequence::parse("Dm7 | Dm7", 4).unwrap();
        let a = PatternPlacement::new(dm7_source(), BarRange::single(1), &target)
            .with_score(Score::new(50.0));
        let mut other = (*dm7_source()).clone();
        other.id = SourceId(1);
        let b = PatternPlacement::new(Arc::new(other), BarRange::single(0), &target)
            .with_score(Score::new(50.0));
        assert_eq!(PatternPlacement::rank_order(&a, &b), Ordering::Greater);
    }
}
