//! Reporting hooks.
//!
//! The simulator and the live trader never print or notify on their own:
//! they hand what they produced to a [`Reporter`].

use crate::live::{BreakoutInstructions, Submission};
use crate::performance::Summary;

/// Receives the results worth telling someone about.
pub trait Reporter {
    /// The day's trading instructions and the position size they were computed with.
    fn instructions(&self, instructions: &BreakoutInstructions, lots: f64);

    /// Summary statistics of one backtested variant.
    fn summary(&self, label: &str, summary: &Summary);

    /// What the live trader actually sent to the broker.
    fn submission(&self, submission: &Submission);
}

/// Writes every report as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn instructions(&self, instructions: &BreakoutInstructions, lots: f64) {
        tracing::info!(
            time = %instructions.time,
            instrument = %instructions.instrument,
            trend = %instructions.trend,
            high = instructions.high,
            low = instructions.low,
            lots,
            "trading instructions\n{instructions}"
        );
    }

    fn summary(&self, label: &str, summary: &Summary) {
        tracing::info!(
            variant = label,
            closed = summary.closed(),
            pnl = summary.pnl(),
            win_rate = summary.win_rate(),
            "\n{summary}"
        );
    }

    fn submission(&self, submission: &Submission) {
        tracing::info!(
            risk_pct = submission.risk_pct,
            lots = submission.lots,
            placed = submission.placed.len(),
            failed = submission.failed.len(),
            "orders submitted"
        );
    }
}
