use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::errors::Error;
use crate::strategy::{Breakout, SignalGenerator};

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 3, day, hour, 0, 0).unwrap()
}

fn bar(time: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Bar {
    BarBuilder::builder()
        .time(time)
        .open(open)
        .high(high)
        .low(low)
        .close(close)
        .build()
        .unwrap()
}

fn with_range(bar: Bar, high: f64, low: f64) -> Bar {
    bar.with_indicators(Indicators {
        rolling_high: Some(high),
        rolling_low: Some(low),
        ..Default::default()
    })
}

fn long() -> Order {
    Order::new(at(2, 8), OrderSide::Long, 1.1050, 1.1000, 1.1100).unwrap()
}

fn short() -> Order {
    Order::new(at(2, 8), OrderSide::Short, 1.1000, 1.1050, 1.0950).unwrap()
}

fn backtester(bars: Vec<Bar>) -> Backtester {
    Backtester::new(Arc::from(bars)).unwrap()
}

/// Pseudo-random walk of hourly bars with a rolling range attached.
fn random_bars(seed: u64, count: usize) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut close: f64 = 1.1000;
    let bars = (0..count)
        .map(|i| {
            let open = close;
            close = (open + rng.random_range(-0.0030..0.0030)).max(0.5);
            let high = open.max(close) + rng.random_range(0.0..0.0015);
            let low = open.min(close) - rng.random_range(0.0..0.0015);
            bar(at(2, 0) + Duration::hours(i as i64), open, high, low, close)
        })
        .collect::<Vec<_>>();
    crate::indicators::enrich(
        &bars,
        &crate::indicators::IndicatorSet {
            lookback: Some(8),
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn new_rejects_bad_data() {
    assert!(matches!(Backtester::new(Arc::from(Vec::<Bar>::new())), Err(Error::BarDataEmpty)));

    let bars = vec![
        bar(at(2, 9), 1.1, 1.2, 1.0, 1.1),
        bar(at(2, 8), 1.1, 1.2, 1.0, 1.1),
    ];
    assert!(matches!(
        Backtester::new(Arc::from(bars)),
        Err(Error::UnsortedBars { index: 1, .. })
    ));
}

#[test]
fn breakout_end_to_end() {
    let bars = vec![
        with_range(bar(at(2, 8), 1.1020, 1.1040, 1.1010, 1.1030), 1.1050, 1.1000),
        bar(at(2, 9), 1.1030, 1.1060, 1.1020, 1.1055),
        bar(at(2, 10), 1.1055, 1.1100, 1.1040, 1.1090),
    ];
    let orders = Breakout::default().generate(&bars);
    assert_eq!(orders.len(), 2);

    let run = backtester(bars.clone()).run(orders).unwrap();
    let orders = run.orders().collect::<Vec<_>>();
    let (long, short) = (orders[0], orders[1]);

    assert_eq!((long.entry(), long.stop_loss(), long.take_profit()), (1.1050, 1.1000, 1.1100));
    assert_eq!((short.entry(), short.stop_loss(), short.take_profit()), (1.1000, 1.1050, 1.0950));

    assert_eq!(long.status(), OrderStatus::Closed);
    assert_eq!(long.fill_date(), Some(bars[1].time()));
    assert_eq!(long.close_date(), Some(bars[2].time()));
    assert_eq!(long.exit_price(), Some(1.1100));
    assert!((long.pnl() - 0.0050).abs() < 1e-9);

    assert_eq!(short.status(), OrderStatus::Pending);
    assert_eq!(short.pnl(), 0.0);

    let equity = run.equity().iter().map(|p| p.pnl).collect::<Vec<_>>();
    assert_eq!(equity[..2], [0.0, 0.0]);
    assert!((equity[2] - 0.0050).abs() < 1e-9);
    assert!((run.realized_pnl() - 0.0050).abs() < 1e-9);
}

#[test]
fn stop_loss_wins_tie() {
    // the fill bar reaches the entry, then a bar spans both exits
    let bars = vec![
        bar(at(2, 9), 1.1030, 1.1060, 1.1020, 1.1055),
        bar(at(2, 10), 1.1055, 1.1110, 1.0990, 1.1050),
    ];
    let run = backtester(bars).run(vec![long(), short()]).unwrap();
    let orders = run.orders().collect::<Vec<_>>();

    assert_eq!(orders[0].status(), OrderStatus::Closed);
    assert_eq!(orders[0].exit_price(), Some(1.1000));
    assert!((orders[0].pnl() + 0.0050).abs() < 1e-9);

    // the short filled on the second bar and its stop was reached there too
    assert_eq!(orders[1].status(), OrderStatus::Closed);
    assert_eq!(orders[1].exit_price(), Some(1.1050));
    assert!((orders[1].pnl() + 0.0050).abs() < 1e-9);
}

#[test]
fn fill_and_close_on_same_bar() {
    let bars = vec![bar(at(2, 9), 1.1040, 1.1120, 1.1030, 1.1110)];
    let run = backtester(bars).run(vec![long()]).unwrap();
    let order = run.orders().next().unwrap();

    assert_eq!(order.status(), OrderStatus::Closed);
    assert_eq!(order.fill_date(), order.close_date());
    assert_eq!(order.exit_price(), Some(1.1100));
}

#[test]
fn fill_needs_price_through_entry() {
    // touching the entry is not enough for a stop order
    let bars = vec![bar(at(2, 9), 1.1030, 1.1050, 1.1000, 1.1040)];
    let run = backtester(bars).run(vec![long(), short()]).unwrap();
    assert!(run.orders().all(|o| o.status() == OrderStatus::Pending));
}

#[test]
fn order_waits_for_its_date() {
    let bars = vec![
        bar(at(2, 7), 1.1030, 1.1080, 1.1020, 1.1040),
        bar(at(2, 8), 1.1030, 1.1045, 1.1020, 1.1040),
    ];
    let run = backtester(bars).run(vec![long()]).unwrap();
    assert_eq!(run.orders().next().unwrap().status(), OrderStatus::Pending);
}

#[test]
fn breakout_expiry_before_fill() {
    let bars = vec![
        with_range(bar(at(2, 8), 1.1020, 1.1040, 1.1010, 1.1030), 1.1050, 1.1000),
        bar(at(2, 9), 1.1030, 1.1040, 1.1010, 1.1030),
        bar(at(3, 7), 1.1030, 1.1045, 1.1010, 1.1040),
        // would fill the long, but the reset comes first
        with_range(bar(at(3, 8), 1.1040, 1.1070, 1.1035, 1.1065), 1.1070, 1.1010),
        bar(at(3, 9), 1.1065, 1.1090, 1.1060, 1.1080),
    ];
    let orders = Breakout::default().generate(&bars);
    assert_eq!(orders.len(), 4);

    let run = backtester(bars.clone()).run(orders).unwrap();
    let orders = run.orders().collect::<Vec<_>>();

    // first day
    assert_eq!(orders[0].status(), OrderStatus::Cancelled);
    assert_eq!(orders[1].status(), OrderStatus::Cancelled);
    assert!(orders[0].fill_date().is_none());

    // second day: long at 1.1070 fills on the 09:00 bar
    assert_eq!(orders[2].order_date(), bars[3].time());
    assert_eq!(orders[2].status(), OrderStatus::Filled);
    assert_eq!(orders[2].fill_date(), Some(bars[4].time()));
    assert_eq!(orders[3].status(), OrderStatus::Pending);
}

#[test]
fn filled_orders_do_not_expire() {
    let bars = vec![
        bar(at(2, 9), 1.1040, 1.1060, 1.1030, 1.1055),
        bar(at(3, 8), 1.1055, 1.1070, 1.1040, 1.1060),
    ];
    let order = long().with_expiry(Expiry::AtHour(8));
    let run = backtester(bars).run(vec![order]).unwrap();
    assert_eq!(run.orders().next().unwrap().status(), OrderStatus::Filled);
}

#[test]
fn no_force_close_at_end() {
    let bars = vec![
        bar(at(2, 9), 1.1040, 1.1060, 1.1030, 1.1055),
        bar(at(2, 10), 1.1055, 1.1080, 1.1040, 1.1075),
    ];
    let run = backtester(bars).run(vec![long()]).unwrap();
    let order = run.orders().next().unwrap();

    assert_eq!(order.status(), OrderStatus::Filled);
    assert!(order.close_date().is_none());
    assert_eq!(order.pnl(), 0.0);
    assert_eq!(run.realized_pnl(), 0.0);
}

#[test]
fn gap_through_both_levels() {
    // one bar spans both entries but neither stop
    let long = Order::new(at(2, 8), OrderSide::Long, 1.1050, 1.0980, 1.1200).unwrap();
    let short = Order::new(at(2, 8), OrderSide::Short, 1.1000, 1.1070, 1.0850).unwrap();
    let bars = vec![bar(at(2, 9), 1.1040, 1.1060, 1.0990, 1.1000)];

    let independent = backtester(bars.clone())
        .run(vec![long.clone(), short.clone()])
        .unwrap();
    assert!(independent.orders().all(|o| o.status() == OrderStatus::Filled));

    let first_touched = backtester(bars)
        .with_gap_policy(GapPolicy::FirstTouched)
        .run(vec![long, short])
        .unwrap();
    let orders = first_touched.orders().collect::<Vec<_>>();
    // the open is 0.0010 from the long entry and 0.0040 from the short one
    assert_eq!(orders[0].status(), OrderStatus::Filled);
    assert_eq!(orders[1].status(), OrderStatus::Pending);
}

#[test]
fn closed_long_pnl_matches_close_bar() {
    for seed in 0..20 {
        let bars = random_bars(seed, 24 * 10);
        let orders = Breakout::default().generate(&bars);
        let run = backtester(bars.clone()).run(orders).unwrap();

        for order in run.closed().filter(|o| o.is_long()) {
            let close_bar = bars.iter().find(|b| Some(b.time()) == order.close_date()).unwrap();
            let stopped = close_bar.low() <= order.stop_loss();
            if stopped {
                assert_eq!(order.pnl(), order.stop_loss() - order.entry());
            } else {
                assert!(close_bar.high() >= order.take_profit());
                assert_eq!(order.pnl(), order.take_profit() - order.entry());
            }
        }
    }
}

#[test]
fn transitions_follow_state_machine() {
    for seed in 0..20 {
        let bars = random_bars(seed, 24 * 10);
        let orders = Breakout::default().generate(&bars);
        let run = backtester(bars).run(orders).unwrap();

        for order in run.orders() {
            match order.status() {
                OrderStatus::Pending | OrderStatus::Cancelled => {
                    assert!(order.fill_date().is_none());
                    assert!(order.close_date().is_none());
                    assert_eq!(order.pnl(), 0.0);
                }
                OrderStatus::Filled => {
                    assert!(order.fill_date().is_some());
                    assert!(order.close_date().is_none());
                }
                OrderStatus::Closed => {
                    let (fill, close) = (order.fill_date().unwrap(), order.close_date().unwrap());
                    assert!(order.order_date() <= fill && fill <= close);
                }
            }
        }
    }
}

#[test]
fn run_is_idempotent() {
    let bars = random_bars(7, 24 * 15);
    let orders = Breakout::default().tp_adjustment(0.0005).generate(&bars);
    let backtester = backtester(bars).with_gap_policy(GapPolicy::FirstTouched);

    let first = backtester.run(orders.clone()).unwrap();
    let second = backtester.run(orders).unwrap();

    let state = |run: &Run| {
        run.orders()
            .map(|o| (o.id(), o.status(), o.fill_date(), o.close_date(), o.exit_price(), o.pnl()))
            .collect::<Vec<_>>()
    };
    assert_eq!(state(&first), state(&second));
    assert_eq!(first.equity(), second.equity());
}
