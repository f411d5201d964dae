// Tiling engine: the per-request orchestration loop.
//
// `generate` builds a candidate store for the sequence, then runs outer
// iterations bounded by `robustness`:
//
//   1. run the strategy pipeline (primary pass, then optional refinement);
//   2. if bars remain uncovered and fallback is enabled, synthesize a source
//      for every untiled zone (longest first, split into chunks of at most
//      `max_size` bars), register it in the shared database and offer it to
//      the store so the next iteration can place it;
//   3. decrement robustness.
//
// Status moves Unresolved -> PartiallyTiled -> FullyTiled | Exhausted, or
// Cancelled when the caller's token fires (checked at the top of every
// iteration). The intermediate states are logged after each iteration; the
// outcome carries the terminal state. Exhaustion is not an error: the
// partial tiling is returned and its uncovered bars render as silence.
//
// The engine itself is immutable and can serve concurrent requests; all
// per-request state (store, tiling, TilingState) lives on the stack of
// `generate_with_cancel`. The only shared write is the database append.

use crate::candidates::CandidateStore;
use crate::config::EngineConfig;
use crate::database::PatternDatabase;
use crate::error::Result;
use crate::fallback::{split_zone, synthesize};
use crate::scoring::Scorer;
use crate::sequence::ChordSequence;
use crate::source::{Phrase, SourceId};
use crate::strategy::{TilingState, TilingStrategy};
use crate::tiling::Tiling;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TilingStatus {
    /// Nothing placed yet.
    Unresolved,
    /// Some usable bars covered, more iterations to go.
    PartiallyTiled,
    /// Every usable bar covered.
    FullyTiled,
    /// Robustness spent with usable bars still uncovered.
    Exhausted,
    /// Stopped by a cancellation token.
    Cancelled,
}

impl fmt::Display for TilingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TilingStatus::Unresolved => "unresolved",
            TilingStatus::PartiallyTiled => "partially tiled",
            TilingStatus::FullyTiled => "fully tiled",
            TilingStatus::Exhausted => "exhausted",
            TilingStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Cooperative cancellation for a running request: an explicit flag plus an
/// optional wall-clock deadline. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also fires once `budget` has elapsed from now.
    pub fn with_deadline(budget: Duration) -> Self {
        CancellationToken {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + budget),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Result of one generation request.
#[derive(Debug, Clone)]
pub struct TilingOutcome {
    pub tiling: Tiling,
    /// Terminal state: FullyTiled, Exhausted or Cancelled.
    pub status: TilingStatus,
    /// Outer iterations actually run.
    pub iterations: usize,
    /// Sources synthesized (or reused from an earlier synthesis) for this
    /// request, in registration order.
    pub synthesized: Vec<SourceId>,
    /// Usable bars left uncovered, ascending.
    pub uncovered: Vec<usize>,
}

impl TilingOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == TilingStatus::FullyTiled
    }

    /// The bass line: every placement's transposed phrase at its bar offset.
    /// Uncovered bars are silent.
    pub fn render(&self) -> Phrase {
        self.tiling.render()
    }
}

pub struct TilingEngine {
    database: Arc<PatternDatabase>,
    config: EngineConfig,
    pipeline: Vec<Box<dyn TilingStrategy>>,
}

impl TilingEngine {
    /// Validate `config` and build the strategy pipeline.
    pub fn new(database: Arc<PatternDatabase>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pipeline = config.pipeline()?;
        Ok(TilingEngine { database, config, pipeline })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<PatternDatabase> {
        &self.database
    }

    fn scorer(&self) -> Scorer {
        let scorer = Scorer::new(self.config.weights.clone());
        if self.config.use_continuity {
            scorer
        } else {
            scorer.without_continuity()
        }
    }

    pub fn generate(&self, seq: &ChordSequence) -> Result<TilingOutcome> {
        self.generate_with_cancel(seq, &CancellationToken::new())
    }

    pub fn generate_with_cancel(
        &self,
        seq: &ChordSequence,
        cancel: &CancellationToken,
    ) -> Result<TilingOutcome> {
        let scorer = self.scorer();
        let mut store =
            CandidateStore::build(seq, &self.database, &scorer, self.config.store_params())?;
        let mut tiling = Tiling::new(seq);
        let mut state = TilingState::new(&tiling, scorer.clone());
        let mut synthesized = Vec::new();
        let mut status = TilingStatus::Unresolved;
        let mut robustness = self.config.robustness;
        let mut iterations = 0;

        info!(
            bars = seq.len(),
            usable = tiling.usable_bar_count(),
            candidates = store.len(),
            "tiling started"
        );

        while !tiling.is_fully_tiled() && robustness > 0 {
            if cancel.is_cancelled() {
                status = TilingStatus::Cancelled;
                break;
            }
            iterations += 1;

            for pass in &self.pipeline {
                let before = tiling.len();
                pass.tile(&mut tiling, &store, &mut state);
                debug!(
                    iteration = iterations,
                    strategy = pass.name(),
                    placed = tiling.len() - before,
                    covered = tiling.covered_bar_count(),
                    "strategy pass"
                );
            }

            if !tiling.is_fully_tiled() && self.config.fallback_enabled {
                self.fill_gaps(seq, &tiling, &mut store, &scorer, &mut synthesized);
            }

            robustness -= 1;
            status = if tiling.is_fully_tiled() {
                TilingStatus::FullyTiled
            } else if tiling.is_empty() {
                TilingStatus::Unresolved
            } else {
                TilingStatus::PartiallyTiled
            };
            info!(
                iteration = iterations,
                %status,
                covered = tiling.covered_bar_count(),
                robustness,
                "iteration finished"
            );
        }

        if status != TilingStatus::Cancelled {
            status = if tiling.is_fully_tiled() {
                TilingStatus::FullyTiled
            } else {
                TilingStatus::Exhausted
            };
        }
        let uncovered = tiling.uncovered_bars();
        if status == TilingStatus::Exhausted {
            warn!(
                uncovered = uncovered.len(),
                iterations,
                "robustness exhausted, leaving gaps silent"
            );
        }
        info!(
            %status,
            iterations,
            placements = tiling.len(),
            synthesized = synthesized.len(),
            "tiling finished"
        );

        Ok(TilingOutcome { tiling, status, iterations, synthesized, uncovered })
    }

    /// Synthesize, register and offer a source for every untiled zone.
    fn fill_gaps(
        &self,
        seq: &ChordSequence,
        tiling: &Tiling,
        store: &mut CandidateStore,
        scorer: &Scorer,
        synthesized: &mut Vec<SourceId>,
    ) {
        for zone in tiling.untiled_zones() {
            for chunk in split_zone(zone, self.config.min_size, self.config.max_size) {
                let chords = seq.sub_sequence(chunk, true);
                let next_root = seq.first_chord(chunk.to + 1).map(|c| c.root);
                let id = self.database.allocate_id();
                let source = synthesize(&chords, id, next_root, self.config.bass_range);
                let Some(stored) = self.database.register(source) else {
                    continue;
                };
                if synthesized.contains(&stored.id) {
                    continue;
                }
                let offered = store.insert_source(seq, &stored, scorer);
                debug!(
                    source = %stored.id,
                    bars = %chunk,
                    offered,
                    "fallback source registered"
                );
                synthesized.push(stored.id);
            }
        }
    }
}
