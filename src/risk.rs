//! Position sizing.

use crate::errors::{Error, Result};

/// Stake sequence applied after a loss, indexed by how many trades ago it happened.
const STAKES: [f64; 4] = [0.01, 0.03, 0.02, 0.04];

/// Risk percentage of the next trade, following the 1-3-2-4 stake sequence.
///
/// Only the last four closed trades count, latest last. The most recent loss
/// resets the sequence: a loss on the latest trade gives 1%, one trade back 3%,
/// two back 2% and three back 4%. Without any loss the sequence advances with
/// the number of trades seen, and an empty history (or four wins) starts over at 1%.
///
/// ### Arguments
/// * `closed_pnls` - Realized pnl of closed trades, in chronological order.
///
/// ### Returns
/// The fraction of the balance to risk (e.g. `0.03` for 3%).
pub fn risk_pct(closed_pnls: &[f64]) -> f64 {
    let last = &closed_pnls[closed_pnls.len().saturating_sub(STAKES.len())..];

    if let Some(trades_ago) = last.iter().rev().position(|pnl| *pnl < 0.0) {
        return STAKES[trades_ago];
    }
    STAKES[last.len() % STAKES.len()]
}

/// Money moved by one pip on one lot.
pub fn pip_value_per_lot(units_per_lot: f64, pip_size: f64) -> f64 {
    units_per_lot * pip_size
}

/// Number of lots risking `risk_pct` of `balance` over a stop of `stop_pips`.
///
/// ### Arguments
/// * `balance` - Account balance.
/// * `risk_pct` - Fraction of the balance to risk.
/// * `stop_pips` - Distance between entry and stop-loss, in pips.
/// * `pip_value_per_lot` - See [`pip_value_per_lot`].
///
/// ### Returns
/// The size in lots, rounded down to the micro lot (0.01).
pub fn position_size(balance: f64, risk_pct: f64, stop_pips: f64, pip_value_per_lot: f64) -> Result<f64> {
    if !(balance > 0.0) || !(risk_pct > 0.0) || !(stop_pips > 0.0) || !(pip_value_per_lot > 0.0) {
        return Err(Error::InvalidParameter(format!(
            "cannot size a position (balance {balance}, risk {risk_pct}, stop {stop_pips} pips, pip value {pip_value_per_lot})"
        )));
    }
    let lots = balance * risk_pct / (stop_pips * pip_value_per_lot);
    Ok((lots * 100.0 + 1e-9).floor() / 100.0)
}

#[cfg(test)]
#[test]
fn stake_sequence() {
    assert_eq!(risk_pct(&[]), 0.01);
    assert_eq!(risk_pct(&[10.0]), 0.03);
    assert_eq!(risk_pct(&[10.0, 5.0]), 0.02);
    assert_eq!(risk_pct(&[10.0, 5.0, 7.0]), 0.04);
    assert_eq!(risk_pct(&[10.0, 5.0, 7.0, 1.0]), 0.01);
}

#[cfg(test)]
#[test]
fn stake_after_loss() {
    // win, win, lost, win
    assert_eq!(risk_pct(&[10.0, 12.0, -8.0, 9.0]), 0.03);
    // win, win, lost, lost
    assert_eq!(risk_pct(&[10.0, 12.0, -8.0, -9.0]), 0.01);
    assert_eq!(risk_pct(&[-3.0, 10.0, 12.0]), 0.02);
    assert_eq!(risk_pct(&[-3.0, 1.0, 10.0, 12.0]), 0.04);
    // older trades are ignored
    assert_eq!(risk_pct(&[-3.0, 1.0, 1.0, 10.0, 12.0]), 0.01);
}

#[cfg(test)]
#[test]
fn lots_from_risk() {
    let pip_value = pip_value_per_lot(100_000.0, 0.0001);
    assert!((pip_value - 10.0).abs() < 1e-9);

    // 2.5% of 10k over 50 pips is 250 / 500
    assert_eq!(position_size(10_000.0, 0.025, 50.0, pip_value).unwrap(), 0.5);
    // rounded down
    assert_eq!(position_size(10_000.0, 0.01, 33.0, pip_value).unwrap(), 0.3);
    assert!(position_size(10_000.0, 0.01, 0.0, pip_value).is_err());
    assert!(position_size(0.0, 0.01, 10.0, pip_value).is_err());
}
