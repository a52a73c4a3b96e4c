//! Numeric reductions over matching records.

use serde::{Deserialize, Serialize};

/// Kind of reduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregate {
    Sum,
    Average,
    Min,
    Max,
    Count,
    StandardDeviationSample,
    StandardDeviationPopulation,
}

impl Aggregate {
    /// Fresh incremental reducer for this kind.
    pub fn aggregator(self) -> Box<dyn Aggregator> {
        match self {
            Aggregate::Sum => Box::new(SumAggregator::default()),
            Aggregate::Average => Box::new(AverageAggregator::default()),
            Aggregate::Min => Box::new(ExtremeAggregator::min()),
            Aggregate::Max => Box::new(ExtremeAggregator::max()),
            Aggregate::Count => Box::new(CountAggregator::default()),
            Aggregate::StandardDeviationSample => Box::new(DeviationAggregator::sample()),
            Aggregate::StandardDeviationPopulation => Box::new(DeviationAggregator::population()),
        }
    }

    /// Reduce a sequence in one go.
    pub fn reduce(self, values: impl IntoIterator<Item = f64>) -> Option<f64> {
        let mut aggregator = self.aggregator();
        for value in values {
            aggregator.consume(value);
        }
        aggregator.complete()
    }
}

/// Incremental reducer. `complete` may be called at any point.
pub trait Aggregator: Send {
    fn consume(&mut self, value: f64);
    fn complete(&self) -> Option<f64>;
}

#[derive(Default)]
struct SumAggregator {
    total: f64,
    seen: bool,
}

impl Aggregator for SumAggregator {
    fn consume(&mut self, value: f64) {
        self.total += value;
        self.seen = true;
    }

    fn complete(&self) -> Option<f64> {
        self.seen.then_some(self.total)
    }
}

#[derive(Default)]
struct AverageAggregator {
    count: u64,
    mean: f64,
}

impl Aggregator for AverageAggregator {
    fn consume(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }

    fn complete(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }
}

struct ExtremeAggregator {
    current: Option<f64>,
    keep_larger: bool,
}

impl ExtremeAggregator {
    fn min() -> Self {
        Self { current: None, keep_larger: false }
    }

    fn max() -> Self {
        Self { current: None, keep_larger: true }
    }
}

impl Aggregator for ExtremeAggregator {
    fn consume(&mut self, value: f64) {
        self.current = Some(match self.current {
            None => value,
            Some(c) if self.keep_larger => c.max(value),
            Some(c) => c.min(value),
        });
    }

    fn complete(&self) -> Option<f64> {
        self.current
    }
}

#[derive(Default)]
struct CountAggregator {
    count: u64,
}

impl Aggregator for CountAggregator {
    fn consume(&mut self, _value: f64) {
        self.count += 1;
    }

    fn complete(&self) -> Option<f64> {
        Some(self.count as f64)
    }
}

/// Welford's running variance.
struct DeviationAggregator {
    count: u64,
    mean: f64,
    m2: f64,
    sample: bool,
}

impl DeviationAggregator {
    fn sample() -> Self {
        Self { count: 0, mean: 0.0, m2: 0.0, sample: true }
    }

    fn population() -> Self {
        Self { count: 0, mean: 0.0, m2: 0.0, sample: false }
    }
}

impl Aggregator for DeviationAggregator {
    fn consume(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn complete(&self) -> Option<f64> {
        let divisor = if self.sample { self.count.checked_sub(1)? } else { self.count };
        if divisor == 0 {
            return None;
        }
        Some((self.m2 / divisor as f64).sqrt())
    }
}
