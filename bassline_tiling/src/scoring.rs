// Scoring: how well a pattern placement fits its target bars.
//
// A placement is evaluated in up to four components:
//
// Harmonic (weight `harmonic`): the source's chords are paired with the
//   target slice's chords position by position and compared through
//   chord::harmonic_compatibility. Any pair at or below zero rejects the
//   placement outright; otherwise the pair values are averaged.
// Transposability (weight `transposability`): the source's own willingness
//   to be moved onto the target's first root.
// Pre/post continuity (weight `continuity`, only with a tiling): +100 each
//   when the placement ending just before this one stops on this phrase's
//   first pitch, and when the placement starting just after begins on this
//   phrase's target note.
//
// Composition: weighted mean of harmonic and transposability, plus
// `continuity` times each earned bonus, clamped to [0, 100]. A rejected
// harmonic test forces 0 whatever the other components say.
//
// Consumed by candidates.rs (context-free scores) and by the strategies,
// which rescore with the tiling as context at the moment they commit.

use crate::chord::{Chord, harmonic_compatibility};
use crate::error::{Result, TilingError};
use crate::placement::{PatternPlacement, Score};
use crate::tiling::Tiling;
use serde::{Deserialize, Serialize};

/// Value of each continuity bonus before weighting.
pub const CONTINUITY_BONUS: f64 = 100.0;

/// Weights for the score components. Tunable parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub harmonic: f64,
    pub transposability: f64,
    /// Multiplier applied to each continuity bonus.
    pub continuity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        ScoringWeights {
            harmonic: 2.0,
            transposability: 1.0,
            continuity: 0.1,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<()> {
        let all = [self.harmonic, self.transposability, self.continuity];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(TilingError::Config(format!(
                "scoring weights must be finite and non-negative: {:?}",
                self
            )));
        }
        if self.harmonic + self.transposability <= 0.0 {
            return Err(TilingError::Config(
                "harmonic and transposability weights cannot both be zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// The four components of a placement's score, before composition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub harmonic: f64,
    pub transposability: f64,
    pub pre_bonus: f64,
    pub post_bonus: f64,
}

impl ScoreBreakdown {
    pub fn combine(&self, weights: &ScoringWeights) -> Score {
        let mean = (weights.harmonic * self.harmonic
            + weights.transposability * self.transposability)
            / (weights.harmonic + weights.transposability);
        Score::new(mean + weights.continuity * (self.pre_bonus + self.post_bonus))
    }
}

#[derive(Debug, Clone)]
pub struct Scorer {
    weights: ScoringWeights,
    use_continuity: bool,
}

impl Scorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Scorer { weights, use_continuity: true }
    }

    /// Ignore the tiling context (no continuity bonuses).
    pub fn without_continuity(mut self) -> Self {
        self.use_continuity = false;
        self
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Final score of `placement`, optionally in the context of `tiling`.
    pub fn score(&self, placement: &PatternPlacement, tiling: Option<&Tiling>) -> Score {
        match self.breakdown(placement, tiling) {
            Some(parts) => parts.combine(&self.weights),
            None => Score::ZERO,
        }
    }

    /// Score components, or `None` if the harmonic test rejects.
    pub fn breakdown(
        &self,
        placement: &PatternPlacement,
        tiling: Option<&Tiling>,
    ) -> Option<ScoreBreakdown> {
        let source_chords = placement
            .source
            .chords
            .full_range()
            .map(|r| placement.source.chords.chords_in(r))
            .unwrap_or_default();
        let target_chords = placement
            .chord_slice
            .full_range()
            .map(|r| placement.chord_slice.chords_in(r))
            .unwrap_or_default();
        let harmonic = harmonic_score(&source_chords, &target_chords)?;
        let transposability = placement.source.transposability(placement.target_root());

        let (pre_bonus, post_bonus) = match tiling {
            Some(tiling) if self.use_continuity => continuity_bonuses(placement, tiling),
            _ => (0.0, 0.0),
        };

        Some(ScoreBreakdown { harmonic, transposability, pre_bonus, post_bonus })
    }
}

/// Average pairwise compatibility, or `None` if the slices differ in length
/// or any pair is incompatible.
pub fn harmonic_score(source: &[Chord], target: &[Chord]) -> Option<f64> {
    if source.is_empty() || source.len() != target.len() {
        return None;
    }
    let mut total = 0.0;
    for (s, t) in source.iter().zip(target) {
        let value = harmonic_compatibility(s, t);
        if value <= 0.0 {
            return None;
        }
        total += value;
    }
    Some(total / source.len() as f64)
}

fn continuity_bonuses(placement: &PatternPlacement, tiling: &Tiling) -> (f64, f64) {
    let range = placement.range;

    let pre = range
        .from
        .checked_sub(1)
        .and_then(|bar| tiling.placement_ending_at(bar))
        .filter(|prev| prev.last_pitch().is_some() && prev.last_pitch() == placement.first_pitch())
        .map_or(0.0, |_| CONTINUITY_BONUS);

    let post = tiling
        .placement_starting_at(range.to + 1)
        .filter(|next| {
            placement.target_pitch().is_some() && next.first_pitch() == placement.target_pitch()
        })
        .map_or(0.0, |_| CONTINUITY_BONUS);

    (pre, post)
}
