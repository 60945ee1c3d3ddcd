//! Parallel strategy variants.
//!
//! This module runs one backtest per parameter set on a thread pool. Every
//! run gets its own enriched bars and its own orders, so no state is shared
//! between variants; the bars themselves are shared read-only.
//! The `ParameterCombination` trait defines how to generate a parameter grid.

use std::sync::Arc;

use crate::engine::{Bar, GapPolicy, Run};
use crate::errors::Result;
use crate::strategy::{SignalGenerator, backtest};

use rayon::prelude::*;

/// Trait defining how to generate parameter combinations for optimization.
///
/// The associated type `Output` represents a single parameter combination (e.g., a tuple of values).
pub trait ParameterCombination: Sync {
    /// Type representing a single parameter combination (e.g., `(u32, f64)`).
    type Output: Clone + Send + Sync;

    /// Generates all possible parameter combinations to test.
    fn generate() -> Vec<Self::Output>;
}

/// Runs a strategy once per parameter combination, in parallel.
#[derive(Debug, Clone)]
pub struct Optimizer {
    data: Arc<[Bar]>,
    gap_policy: GapPolicy,
}

impl Optimizer {
    /// Creates a new `Optimizer` over the given bars.
    pub fn new(data: Arc<[Bar]>, gap_policy: GapPolicy) -> Self {
        Self { data, gap_policy }
    }

    /// Runs every combination of `PC`.
    ///
    /// # Arguments
    /// * `combinator` - Builds the signal generator of one parameter combination.
    ///
    /// # Returns
    /// Each parameter combination with its run, in the order `PC::generate` yields them.
    pub fn with<PC, G, C>(&self, combinator: C) -> Result<Vec<(PC::Output, Run)>>
    where
        PC: ParameterCombination,
        G: SignalGenerator,
        C: Fn(&PC::Output) -> Result<G> + Sync,
    {
        self.with_parameters(&PC::generate(), combinator)
    }

    /// Runs the given parameter sets.
    ///
    /// # Errors
    /// Returns the first error raised by a combinator or a backtest.
    pub fn with_parameters<P, G, C>(&self, parameters: &[P], combinator: C) -> Result<Vec<(P, Run)>>
    where
        P: Clone + Send + Sync,
        G: SignalGenerator,
        C: Fn(&P) -> Result<G> + Sync,
    {
        let num_cpus = num_cpus::get();
        let chunk_size = parameters.len().div_ceil(num_cpus).max(1);

        parameters
            .par_chunks(chunk_size)
            .map::<_, Result<_>>(|par_parameters| {
                let mut local_results = Vec::with_capacity(par_parameters.len());
                for param_set in par_parameters {
                    let generator = combinator(param_set)?;
                    let run = backtest(&generator, &self.data, self.gap_policy)?;
                    local_results.push((param_set.clone(), run));
                }
                Ok(local_results)
            })
            .collect::<Result<Vec<_>>>()
            .map(|chunks| chunks.into_iter().flatten().collect())
    }
}

#[cfg(test)]
struct TpAdjustments;

#[cfg(test)]
impl ParameterCombination for TpAdjustments {
    type Output = f64;

    fn generate() -> Vec<Self::Output> {
        vec![0.0, 0.0005, 0.0010]
    }
}

#[cfg(test)]
fn get_data() -> Arc<[Bar]> {
    use crate::engine::BarBuilder;
    use chrono::{Duration, TimeZone, Utc};

    let start = Utc.with_ymd_and_hms(2020, 3, 2, 0, 0, 0).unwrap();
    let bars = (0..72)
        .map(|i| {
            let mid = 1.1000 + 0.0040 * ((i as f64) * 0.35).sin();
            BarBuilder::builder()
                .time(start + Duration::hours(i))
                .open(mid)
                .high(mid + 0.0012)
                .low(mid - 0.0012)
                .close(mid + 0.0003)
                .build()
                .unwrap()
        })
        .collect::<Vec<_>>();
    Arc::from(bars)
}

#[cfg(test)]
#[test]
fn optimizer_with_tp_adjustments() {
    use crate::strategy::Breakout;

    let data = get_data();
    let opt = Optimizer::new(data.clone(), GapPolicy::Independent);
    let results = opt
        .with::<TpAdjustments, _, _>(|adj| Ok(Breakout::default().tp_adjustment(*adj)))
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().map(|(adj, _)| *adj).collect::<Vec<_>>(), TpAdjustments::generate());

    // one reset hour a day over three days, two orders each
    for (_, run) in &results {
        assert_eq!(run.orders().len(), 6);
        assert_eq!(run.equity().len(), data.len());
    }

    // matches a sequential run
    let sequential = backtest(&Breakout::default().tp_adjustment(0.0005), &data, GapPolicy::Independent).unwrap();
    let parallel = &results[1].1;
    let statuses = |run: &Run| run.orders().map(|o| (o.status(), o.fill_date(), o.pnl())).collect::<Vec<_>>();
    assert_eq!(statuses(parallel), statuses(&sequential));
}
