use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Source of uniformly distributed integers, injected wherever the pipeline needs
/// randomness so tests can pin the sequence.
pub trait VariationSource {
    /// Returns a value in `low..=high`.
    fn draw(&mut self, low: i64, high: i64) -> i64;
}

#[derive(Debug, Clone)]
pub struct RandomVariation<R> {
    rng: R,
}

impl RandomVariation<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl<R: Rng> VariationSource for RandomVariation<R> {
    fn draw(&mut self, low: i64, high: i64) -> i64 {
        if low >= high {
            return low;
        }
        self.rng.gen_range(low..=high)
    }
}

/// Replays a fixed list of values, clamped to the requested range, cycling when
/// exhausted. An empty list always yields `low`.
#[derive(Debug, Clone, Default)]
pub struct FixedVariation {
    values: Vec<i64>,
    next: usize,
}

impl FixedVariation {
    pub fn new(values: impl Into<Vec<i64>>) -> Self {
        Self {
            values: values.into(),
            next: 0,
        }
    }
}

impl VariationSource for FixedVariation {
    fn draw(&mut self, low: i64, high: i64) -> i64 {
        if self.values.is_empty() {
            return low;
        }
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value.clamp(low, high.max(low))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceMode {
    /// `area * base_rate`, rounded to the nearest 1,000.
    Fixed,
    /// `area * (base_rate + draw)`, rounded to the nearest 10,000.
    Variable,
}

impl PriceMode {
    pub fn granularity(self) -> f64 {
        match self {
            PriceMode::Fixed => 1_000.0,
            PriceMode::Variable => 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Currency units per square meter.
    pub base_rate: i64,
    pub variation_low: i64,
    pub variation_high: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_rate: 1500,
            variation_low: -200,
            variation_high: 500,
        }
    }
}

/// Rounds `value / granularity` half away from zero and scales back.
pub fn round_to(value: f64, granularity: f64) -> i64 {
    if !value.is_finite() || granularity <= 0.0 {
        return 0;
    }
    ((value / granularity).round() * granularity) as i64
}

/// Estimated price for `area_value` square meters. Variable mode draws one unit-rate
/// variation per call.
pub fn estimate(
    area_value: f64,
    mode: PriceMode,
    config: &PricingConfig,
    variation: &mut dyn VariationSource,
) -> i64 {
    let unit_rate = match mode {
        PriceMode::Fixed => config.base_rate,
        PriceMode::Variable => {
            config.base_rate + variation.draw(config.variation_low, config.variation_high)
        }
    };
    round_to(area_value * unit_rate as f64, mode.granularity())
}
