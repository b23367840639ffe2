//! Multiplier Generator (4.A) — draws a crash multiplier from a piecewise
//! weighted distribution.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CrashCoreError;

/// One band of the weighted distribution: a half-open multiplier range and
/// the probability mass assigned to it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MultiplierBand {
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub probability: f64,
}

/// Full weighted-band configuration, loaded read-only at startup from
/// `multiplierConfig.json` (§6). Absent file ⇒ uniform `[1.0, 10.0)`
/// fallback (§4.A) — modeled here as `MultiplierGenerator::fallback()`
/// rather than a sentinel `Option` threaded through every caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiplierConfig {
    pub bands: Vec<MultiplierBand>,
}

const PROBABILITY_TOLERANCE: f64 = 1e-6;

impl MultiplierConfig {
    /// Validates that every band is `≥ 1.0` and that probabilities sum to
    /// ~1.0. A config failing this is a startup `Fatal` error (§7).
    pub fn validate(&self) -> Result<(), CrashCoreError> {
        if self.bands.is_empty() {
            return Err(CrashCoreError::fatal("multiplier config has no bands"));
        }
        let mut sum = 0.0;
        for band in &self.bands {
            if band.min_multiplier < 1.0 {
                return Err(CrashCoreError::fatal(format!(
                    "band min_multiplier {} below 1.0",
                    band.min_multiplier
                )));
            }
            if band.max_multiplier <= band.min_multiplier {
                return Err(CrashCoreError::fatal("band max_multiplier must exceed min_multiplier"));
            }
            if band.probability < 0.0 {
                return Err(CrashCoreError::fatal("band probability must be non-negative"));
            }
            sum += band.probability;
        }
        if (sum - 1.0).abs() > 1e-3 {
            return Err(CrashCoreError::fatal(format!(
                "band probabilities sum to {sum}, expected ~1.0"
            )));
        }
        Ok(())
    }
}

/// Draws crash multipliers from a `MultiplierConfig`, or from the uniform
/// `[1.0, 10.0)` fallback when none is configured.
pub struct MultiplierGenerator {
    config: Option<MultiplierConfig>,
}

impl MultiplierGenerator {
    /// Construct from a validated config. Callers load/validate at startup
    /// and treat a validation failure as fatal (§7); this constructor does
    /// not re-validate.
    pub fn new(config: MultiplierConfig) -> Self {
        Self { config: Some(config) }
    }

    /// No configuration on disk — fall back to uniform `[1.0, 10.0)`.
    pub fn fallback() -> Self {
        Self { config: None }
    }

    /// Select a band by inverse-CDF on a uniform `u ∈ [0,1)`, then draw
    /// uniformly within the chosen band, rounded to two decimals. Values
    /// are strictly `≥ 1.0`.
    pub fn draw(&self) -> f64 {
        let mut rng = rand::thread_rng();
        let u: f64 = rng.gen_range(0.0..1.0);

        let value = match &self.config {
            None => rng.gen_range(1.0..10.0),
            Some(cfg) => {
                let mut cumulative = 0.0;
                let mut chosen = cfg.bands.last().expect("validated: at least one band");
                for band in &cfg.bands {
                    cumulative += band.probability;
                    if u < cumulative {
                        chosen = band;
                        break;
                    }
                }
                rng.gen_range(chosen.min_multiplier..chosen.max_multiplier)
            }
        };

        round_to_two_decimals(value.max(1.0))
    }
}

fn round_to_two_decimals(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> MultiplierConfig {
        MultiplierConfig {
            bands: vec![
                MultiplierBand { min_multiplier: 1.0, max_multiplier: 3.0, probability: 0.5 },
                MultiplierBand { min_multiplier: 3.0, max_multiplier: 5.0, probability: 0.3 },
                MultiplierBand { min_multiplier: 5.0, max_multiplier: 10.0, probability: 0.15 },
                MultiplierBand { min_multiplier: 10.0, max_multiplier: 100.0, probability: 0.05 },
            ],
        }
    }

    #[test]
    fn validates_sample_config() {
        sample_config().validate().unwrap();
    }

    #[test]
    fn rejects_bad_probabilities() {
        let mut cfg = sample_config();
        cfg.bands[0].probability = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_sub_one_band() {
        let mut cfg = sample_config();
        cfg.bands[0].min_multiplier = 0.5;
        assert!(cfg.validate().is_err());
    }

    // S1: 10,000 draws land in [1.0, 100.0) with band frequency within ±3%.
    #[test]
    fn s1_random_draw_distribution() {
        let gen = MultiplierGenerator::new(sample_config());
        let mut band_counts = [0u32; 4];
        const N: u32 = 10_000;
        for _ in 0..N {
            let v = gen.draw();
            assert!((1.0..100.0).contains(&v), "value {v} out of range");
            if v < 3.0 {
                band_counts[0] += 1;
            } else if v < 5.0 {
                band_counts[1] += 1;
            } else if v < 10.0 {
                band_counts[2] += 1;
            } else {
                band_counts[3] += 1;
            }
        }
        let expected = [0.5, 0.3, 0.15, 0.05];
        for (count, expected_p) in band_counts.iter().zip(expected.iter()) {
            let observed = *count as f64 / N as f64;
            assert!(
                (observed - expected_p).abs() < 0.03,
                "observed {observed} vs expected {expected_p}"
            );
        }
    }

    #[test]
    fn fallback_draws_in_one_to_ten() {
        let gen = MultiplierGenerator::fallback();
        for _ in 0..1000 {
            let v = gen.draw();
            assert!((1.0..10.0).contains(&v));
        }
    }

    #[test]
    fn draws_are_rounded_to_two_decimals() {
        let gen = MultiplierGenerator::new(sample_config());
        for _ in 0..100 {
            let v = gen.draw();
            let scaled = (v * 100.0).round();
            assert!((scaled - v * 100.0).abs() < 1e-9);
        }
    }
}
