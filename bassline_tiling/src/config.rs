// Engine configuration.
//
// One `EngineConfig` value carries every tunable of a generation request:
// the robustness bound, candidate store bounds, scoring weights, the
// strategy pipeline and the fallback switch. It is built once (defaults,
// a JSON file, or CLI overrides) and handed to `TilingEngine::new`, which
// validates it. Missing JSON fields take their defaults.
//
// Strategy selection is data: `PrimaryStrategy` / `SecondaryStrategy` are
// plain enums that build the corresponding `TilingStrategy` objects.

use crate::candidates::StoreParams;
use crate::diversity::DiversityCapped;
use crate::error::{Result, TilingError};
use crate::scoring::ScoringWeights;
use crate::source::{MAX_SOURCE_SIZE, PitchRange};
use crate::strategy::{BestFirstNoRepeat, MaxDistance, MostCompatibleFirst, TilingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The main pass of each engine iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrimaryStrategy {
    MostCompatibleFirst,
    BestFirstNoRepeat,
    OneOutOfTwo,
    OneOutOfX { x: usize },
    /// `fraction` of the usable bars, in (0, 1].
    MaxCoveragePercentage { fraction: f64 },
}

impl PrimaryStrategy {
    pub fn build(&self, params: &StoreParams) -> Result<Box<dyn TilingStrategy>> {
        Ok(match self {
            PrimaryStrategy::MostCompatibleFirst => {
                Box::new(MostCompatibleFirst::descending(params.min_size, params.max_size))
            }
            PrimaryStrategy::BestFirstNoRepeat => Box::new(BestFirstNoRepeat),
            PrimaryStrategy::OneOutOfTwo => Box::new(DiversityCapped::one_out_of_two()),
            PrimaryStrategy::OneOutOfX { x } => Box::new(DiversityCapped::one_out_of_x(*x)?),
            PrimaryStrategy::MaxCoveragePercentage { fraction } => {
                Box::new(DiversityCapped::max_coverage_percentage(*fraction)?)
            }
        })
    }
}

impl fmt::Display for PrimaryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryStrategy::MostCompatibleFirst => write!(f, "most-compatible-first"),
            PrimaryStrategy::BestFirstNoRepeat => write!(f, "best-first"),
            PrimaryStrategy::OneOutOfTwo => write!(f, "one-out-of-two"),
            PrimaryStrategy::OneOutOfX { x } => write!(f, "one-out-of-{}", x),
            PrimaryStrategy::MaxCoveragePercentage { fraction } => {
                write!(f, "max-coverage={}", fraction)
            }
        }
    }
}

/// Parses the forms printed by `Display`: `most-compatible-first`,
/// `best-first`, `one-out-of-two`, `one-out-of-N`, `max-coverage=F`.
impl FromStr for PrimaryStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(fraction) = s.strip_prefix("max-coverage=") {
            let fraction: f64 = fraction
                .parse()
                .map_err(|_| format!("bad coverage fraction '{}'", fraction))?;
            return Ok(PrimaryStrategy::MaxCoveragePercentage { fraction });
        }
        match s {
            "most-compatible-first" => Ok(PrimaryStrategy::MostCompatibleFirst),
            "best-first" | "best-first-no-repeat" => Ok(PrimaryStrategy::BestFirstNoRepeat),
            "one-out-of-two" => Ok(PrimaryStrategy::OneOutOfTwo),
            _ => match s.strip_prefix("one-out-of-").map(str::parse::<usize>) {
                Some(Ok(x)) => Ok(PrimaryStrategy::OneOutOfX { x }),
                _ => Err(format!("unknown strategy '{}'", s)),
            },
        }
    }
}

/// Refinement pass run after the primary one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryStrategy {
    MaxDistance,
}

impl SecondaryStrategy {
    pub fn build(&self) -> Box<dyn TilingStrategy> {
        match self {
            SecondaryStrategy::MaxDistance => Box::new(MaxDistance),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on outer engine iterations.
    pub robustness: usize,
    /// Candidates kept per (bar, size).
    pub nb_best_max: usize,
    /// Candidates scoring below this are never stored.
    pub min_threshold: f64,
    pub min_size: usize,
    pub max_size: usize,
    pub weights: ScoringWeights,
    pub primary: PrimaryStrategy,
    pub secondary: Option<SecondaryStrategy>,
    /// Synthesize sources for zones no pass could cover.
    pub fallback_enabled: bool,
    /// Award continuity bonuses when committing placements.
    pub use_continuity: bool,
    /// Register of synthesized lines.
    pub bass_range: PitchRange,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            robustness: 20,
            nb_best_max: 8,
            min_threshold: 10.0,
            min_size: 1,
            max_size: MAX_SOURCE_SIZE,
            weights: ScoringWeights::default(),
            primary: PrimaryStrategy::MostCompatibleFirst,
            secondary: Some(SecondaryStrategy::MaxDistance),
            fallback_enabled: true,
            use_continuity: true,
            bass_range: PitchRange::BASS,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&data)?;
        Ok(config)
    }

    pub fn store_params(&self) -> StoreParams {
        StoreParams {
            min_size: self.min_size,
            max_size: self.max_size,
            nb_best_max: self.nb_best_max,
            min_threshold: self.min_threshold,
        }
    }

    /// Check every field; the first problem found is reported.
    pub fn validate(&self) -> Result<()> {
        if self.robustness == 0 {
            return Err(TilingError::Config("robustness must be at least 1".to_string()));
        }
        if self.bass_range.low >= self.bass_range.high || self.bass_range.high > 127 {
            return Err(TilingError::Config(format!(
                "bass range {}..={} is empty or beyond MIDI",
                self.bass_range.low, self.bass_range.high
            )));
        }
        if self.bass_range.high - self.bass_range.low < 11 {
            return Err(TilingError::Config(
                "bass range must span at least an octave".to_string(),
            ));
        }
        self.store_params().validate()?;
        self.weights.validate()?;
        self.primary.build(&self.store_params())?;
        Ok(())
    }

    /// The strategy passes of one engine iteration, in order.
    pub fn pipeline(&self) -> Result<Vec<Box<dyn TilingStrategy>>> {
        let mut passes = vec![self.primary.build(&self.store_params())?];
        if let Some(secondary) = self.secondary {
            passes.push(secondary.build());
        }
        Ok(passes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        let names: Vec<&str> = config.pipeline().unwrap().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["most-compatible-first", "max-distance"]);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let text = r#"{
            "robustness": 3,
            "primary": { "kind": "one_out_of_x", "x": 3 },
            "secondary": null
        }"#;
        let config: EngineConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.robustness, 3);
        assert_eq!(config.primary, PrimaryStrategy::OneOutOfX { x: 3 });
        assert_eq!(config.secondary, None);
        assert_eq!(config.nb_best_max, 8);
        assert_eq!(config.weights, ScoringWeights::default());
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig {
            primary: PrimaryStrategy::MaxCoveragePercentage { fraction: 0.25 },
            ..EngineConfig::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let zero = EngineConfig { robustness: 0, ..EngineConfig::default() };
        assert!(matches!(zero.validate(), Err(TilingError::Config(_))));

        let sizes = EngineConfig { min_size: 3, max_size: 2, ..EngineConfig::default() };
        assert!(matches!(
            sizes.validate(),
            Err(TilingError::InvalidSizeBounds { min: 3, max: 2 })
        ));

        let x = EngineConfig {
            primary: PrimaryStrategy::OneOutOfX { x: 0 },
            ..EngineConfig::default()
        };
        assert!(matches!(x.validate(), Err(TilingError::InvalidParameter { .. })));

        let narrow = EngineConfig {
            bass_range: PitchRange { low: 40, high: 45 },
            ..EngineConfig::default()
        };
        assert!(narrow.validate().is_err());
    }

    #[test]
    fn test_strategy_from_str() {
        let names = [
            "most-compatible-first",
            "best-first",
            "one-out-of-two",
            "one-out-of-4",
            "max-coverage=0.5",
        ];
        for text in names {
            let parsed: PrimaryStrategy = text.parse().unwrap();
            assert_eq!(parsed.to_string(), text);
        }
        assert!("sideways".parse::<PrimaryStrategy>().is_err());
        assert!("one-out-of-many".parse::<PrimaryStrategy>().is_err());
    }
}
