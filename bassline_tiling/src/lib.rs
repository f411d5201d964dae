// Bassline Tiling
//
// Generates a walking-bass line for a chord sequence by covering its bars
// with recorded bass fragments ("pattern sources", 1-4 bars each). Every
// usable bar window is matched against a shared pattern database by its
// root profile; matches are scored for harmonic fit, transposability and
// continuity with their neighbors, then greedy strategies tile the sequence
// with non-overlapping placements. Gaps no recorded source fits are filled
// by a synthesized line that is added to the database for later requests.
//
// Architecture:
// - chord.rs: Chord symbols, qualities and the degree compatibility oracle
// - sequence.rs: ChordSequence (bars, usable flags, root profiles, slicing)
// - source.rs: PatternSource, phrases, note events, transposability
// - database.rs: Shared append-only PatternDatabase + built-in library
// - placement.rs: Score and PatternPlacement (source bound to a bar range)
// - scoring.rs: Scorer (harmonic + transposability + continuity bonuses)
// - candidates.rs: CandidateStore, bounded top-K placements per (bar, size)
// - tiling.rs: Tiling (non-overlapping placements) and rendering
// - strategy.rs: TilingStrategy trait, shared greedy loop, MostCompatibleFirst,
//   BestFirstNoRepeat, MaxDistance
// - diversity.rs: Single pass with usage-rate and coverage caps
// - fallback.rs: Synthesized lines for untiled zones
// - config.rs: EngineConfig (JSON loadable) and strategy selection
// - engine.rs: TilingEngine orchestration loop, status, cancellation
// - error.rs: TilingError
//
// Generation is deterministic: the same sequence, database contents and
// configuration always produce the same tiling.

pub mod candidates;
pub mod chord;
pub mod config;
pub mod database;
pub mod diversity;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod placement;
pub mod scoring;
pub mod sequence;
pub mod source;
pub mod strategy;
pub mod tiling;

pub use config::EngineConfig;
pub use database::PatternDatabase;
pub use engine::{CancellationToken, TilingEngine, TilingOutcome, TilingStatus};
pub use error::{Result, TilingError};
pub use sequence::ChordSequence;
