// Diversity-capped single-pass tiling.
//
// Walks the usable bars in ascending order. At each uncovered bar (one
// "opportunity") the bar's candidates are examined in rank order and the
// first one whose source passes both caps is placed; the cursor then jumps
// past the placement, or moves on by one bar if nothing was accepted.
//
// Usage rate: `OneOutOf(x)` accepts a source only if at least `x`
// opportunities have passed since it was last accepted by this kind of pass
// (`OneOutOf(2)` is "not at the immediately preceding opportunity").
// Coverage: a source may cover at most `fraction * total usable bars` bars
// across the whole tiling.
//
// Both counters are request-local, kept in `TilingState` (strategy.rs). The
// pass also installs its caps into that state: the coverage cap as is, the
// usage rate as a minimum bar spacing of `x - 1` between two placements of
// one source. `commit` enforces them for every later pass of the request.

use crate::candidates::CandidateStore;
use crate::error::{Result, TilingError};
use crate::placement::PatternPlacement;
use crate::sequence::BarRange;
use crate::strategy::{TilingState, TilingStrategy, commit};
use crate::tiling::Tiling;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UsageRate {
    Unlimited,
    /// At most one use per this many opportunities.
    OneOutOf(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiversityCapped {
    usage: UsageRate,
    coverage: Option<f64>,
}

impl DiversityCapped {
    /// Never the same source at two consecutive opportunities.
    pub fn one_out_of_two() -> Self {
        DiversityCapped { usage: UsageRate::OneOutOf(2), coverage: None }
    }

    pub fn one_out_of_x(x: usize) -> Result<Self> {
        if x == 0 {
            return Err(TilingError::InvalidParameter {
                name: "x",
                reason: "usage rate must be at least one opportunity".to_string(),
            });
        }
        Ok(DiversityCapped { usage: UsageRate::OneOutOf(x), coverage: None })
    }

    /// At most `fraction` of the usable bars per source, no usage rate.
    pub fn max_coverage_percentage(fraction: f64) -> Result<Self> {
        DiversityCapped { usage: UsageRate::Unlimited, coverage: None }.with_coverage(fraction)
    }

    /// Add a coverage cap to this strategy.
    pub fn with_coverage(mut self, fraction: f64) -> Result<Self> {
        if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
            return Err(TilingError::InvalidParameter {
                name: "coverage",
                reason: format!("{} is outside (0, 1]", fraction),
            });
        }
        self.coverage = Some(fraction);
        Ok(self)
    }

    pub fn usage(&self) -> UsageRate {
        self.usage
    }

    pub fn coverage(&self) -> Option<f64> {
        self.coverage
    }

    /// Bars required between two placements of one source.
    fn spacing(&self) -> usize {
        match self.usage {
            UsageRate::Unlimited => 0,
            UsageRate::OneOutOf(x) => x.saturating_sub(1),
        }
    }

    /// Usage-rate test against the opportunity the source was last accepted at.
    fn allows(
        &self,
        candidate: &PatternPlacement,
        state: &TilingState,
        opportunity: usize,
    ) -> bool {
        match (self.usage, state.last_use(candidate.source_id())) {
            (UsageRate::OneOutOf(x), Some(last)) => opportunity - last >= x,
            _ => true,
        }
    }
}

impl TilingStrategy for DiversityCapped {
    fn name(&self) -> &'static str {
        match (self.usage, self.coverage) {
            (UsageRate::OneOutOf(2), None) => "one-out-of-two",
            (UsageRate::OneOutOf(_), None) => "one-out-of-x",
            (UsageRate::Unlimited, Some(_)) => "max-coverage-percentage",
            (UsageRate::Unlimited, None) => "unconstrained",
            (UsageRate::OneOutOf(_), Some(_)) => "capped-usage-and-coverage",
        }
    }

    fn tile(&self, tiling: &mut Tiling, store: &CandidateStore, state: &mut TilingState) {
        state.restrict(self.spacing(), self.coverage);
        let mut bar = tiling.first_bar();
        let mut placed = 0;
        while bar < tiling.end_bar() {
            if !tiling.is_usable_and_free(BarRange::single(bar)) {
                bar += 1;
                continue;
            }
            let opportunity = state.next_opportunity();
            let accepted = store
                .candidates_at(bar)
                .into_iter()
                .filter(|p| tiling.is_usable_and_free(p.range))
                .find(|p| self.allows(p, state, opportunity) && state.permits(&*tiling, p))
                .cloned();
            match accepted {
                Some(placement) if commit(tiling, &placement, state) => {
                    state.record_use(placement.source_id(), opportunity);
                    placed += 1;
                    bar += placement.size();
                }
                _ => bar += 1,
            }
        }
        tracing::debug!(strategy = self.name(), placed, "diversity-capped pass");
    }
}
