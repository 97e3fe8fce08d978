use chrono::{DateTime, Duration, TimeZone, Utc};
use std::cell::{Cell, RefCell};
use std::sync::Once;
use stratlab::engine::StateView;
use stratlab::models::{Bar, ExitReason, Signal};
use stratlab::strategy::from_fn;
use stratlab::{BacktestConfig, BacktestEngine};

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn day(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 3, 1, 0, 0, 0).unwrap() + Duration::days(offset)
}

fn bar(offset: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        date: day(offset),
        symbol: "AAA".to_string(),
        open,
        high,
        low,
        close,
        volume: 50_000.0,
        indicators: Default::default(),
    }
}

fn flat_bars(count: usize, price: f64) -> Vec<Bar> {
    (0..count)
        .map(|i| bar(i as i64, price, price, price, price))
        .collect()
}

fn wave_bars(count: usize) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let close = 50.0 + (i as f64 * 0.25).sin() * 8.0;
            bar(i as i64, close, close + 0.5, close - 0.5, close)
        })
        .collect()
}

fn no_costs() -> BacktestConfig {
    BacktestConfig {
        commission: 0.0,
        slippage: 0.0,
        ..BacktestConfig::default()
    }
}

/// Risk levels far enough away that the wave series never reaches them.
fn wide_risk_levels() -> BacktestConfig {
    BacktestConfig {
        stop_loss: 0.9,
        take_profit: 10.0,
        ..BacktestConfig::default()
    }
}

#[test]
fn silent_strategy_produces_zeroed_summary() {
    ensure_test_env();
    let bars = wave_bars(60);
    let mut engine = BacktestEngine::new(BacktestConfig::default());
    let result = engine
        .run(&bars, &from_fn(|_h: &[Bar], _s: &StateView<'_>| Ok(Vec::new())))
        .unwrap();

    assert_eq!(result.total_trades, 0);
    assert_eq!(result.winning_trades, 0);
    assert_eq!(result.losing_trades, 0);
    assert_eq!(result.win_rate, 0.0);
    assert_eq!(result.profit_factor, 0.0);
    assert_eq!(result.sharpe_ratio, 0.0);
    assert_eq!(result.max_drawdown, 0.0);
    assert_eq!(result.total_return, 0.0);
    assert_eq!(result.final_capital, 100_000.0);
    assert_eq!(result.equity_curve.len(), bars.len());
    assert!(result.equity_curve.iter().all(|p| p.equity == 100_000.0));
}

#[test]
fn flat_market_round_trip_without_costs_is_break_even() {
    ensure_test_env();
    let bars = flat_bars(100, 25.0);
    let strategy = from_fn(|history: &[Bar], _s: &StateView<'_>| {
        Ok(match history.len() - 1 {
            10 => vec![Signal::enter_long("AAA")],
            20 => vec![Signal::exit("AAA")],
            _ => Vec::new(),
        })
    });
    let mut engine = BacktestEngine::new(no_costs());
    let result = engine.run(&bars, &strategy).unwrap();

    assert_eq!(result.total_trades, 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry_date, day(10));
    assert_eq!(trade.exit_date, Some(day(20)));
    assert_eq!(trade.exit_reason, Some(ExitReason::Signal));
    assert_eq!(trade.pnl, Some(0.0));
    assert_eq!(result.total_return, 0.0);
    assert_eq!(result.final_capital, 100_000.0);
}

#[test]
fn stop_loss_fills_at_the_stop_level() {
    ensure_test_env();
    let bars = vec![
        bar(0, 100.0, 100.0, 100.0, 100.0),
        bar(1, 99.0, 100.0, 97.0, 99.0),
        bar(2, 99.0, 99.0, 99.0, 99.0),
    ];
    let strategy = from_fn(|history: &[Bar], _s: &StateView<'_>| {
        Ok(if history.len() == 1 {
            vec![Signal::enter_long("AAA")]
        } else {
            Vec::new()
        })
    });
    let config = BacktestConfig {
        stop_loss: 0.02,
        ..no_costs()
    };
    let mut engine = BacktestEngine::new(config);
    let result = engine.run(&bars, &strategy).unwrap();

    assert_eq!(result.total_trades, 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry_price, 100.0);
    assert!((trade.exit_price.unwrap() - 98.0).abs() < 1e-9);
    assert_eq!(trade.exit_reason, Some(ExitReason::StopLoss));
    assert_eq!(trade.exit_date, Some(day(1)));
}

#[test]
fn position_cap_admits_only_the_first_same_bar_entry() {
    ensure_test_env();
    let bars = flat_bars(5, 40.0);
    let strategy = from_fn(|history: &[Bar], _s: &StateView<'_>| {
        Ok(if history.len() == 2 {
            vec![Signal::enter_long("AAA"), Signal::enter_long("BBB")]
        } else {
            Vec::new()
        })
    });
    let config = BacktestConfig {
        max_positions: 1,
        ..no_costs()
    };
    let mut engine = BacktestEngine::new(config);
    let result = engine.run(&bars, &strategy).unwrap();

    assert_eq!(result.total_trades, 1);
    assert_eq!(result.trades[0].symbol, "AAA");
    assert_eq!(result.trades[0].exit_reason, Some(ExitReason::EndOfTest));
}

#[test]
fn open_positions_never_exceed_the_cap() {
    ensure_test_env();
    let bars = wave_bars(80);
    let most_open = Cell::new(0usize);
    let strategy = from_fn(|history: &[Bar], state: &StateView<'_>| {
        most_open.set(most_open.get().max(state.open_positions.len()));
        let i = history.len();
        Ok(if i % 15 == 0 {
            vec![Signal::exit("AAA"), Signal::exit("BBB")]
        } else {
            vec![
                Signal::enter_long("AAA"),
                Signal::enter_short("BBB"),
                Signal::enter_long("CCC"),
            ]
        })
    });
    let config = BacktestConfig {
        max_positions: 3,
        ..wide_risk_levels()
    };
    let mut engine = BacktestEngine::new(config);
    engine.run(&bars, &strategy).unwrap();

    assert!(most_open.get() <= 3);
    assert_eq!(most_open.get(), 3);
}

#[test]
fn trade_pnl_recomputes_from_prices_size_and_fees() {
    ensure_test_env();
    let bars = wave_bars(120);
    let strategy = from_fn(|history: &[Bar], state: &StateView<'_>| {
        let i = history.len() - 1;
        Ok(if !state.has_open_position("AAA") && i % 7 == 0 {
            if i % 2 == 0 {
                vec![Signal::enter_long("AAA")]
            } else {
                vec![Signal::enter_short("AAA")]
            }
        } else if state.has_open_position("AAA") && i % 7 == 4 {
            vec![Signal::exit("AAA")]
        } else {
            Vec::new()
        })
    });
    let mut engine = BacktestEngine::new(BacktestConfig::default());
    let result = engine.run(&bars, &strategy).unwrap();

    assert!(result.total_trades > 5);
    for trade in &result.trades {
        assert!(trade.exit_date.unwrap() >= trade.entry_date);
        let exit_price = trade.exit_price.unwrap();
        let expected = (exit_price - trade.entry_price) * trade.size * trade.position_type.sign()
            - trade.fees.unwrap();
        assert!((trade.pnl.unwrap() - expected).abs() < 1e-9);
    }
    let realized: f64 = result.trades.iter().filter_map(|t| t.pnl).sum();
    assert!((result.final_capital - 100_000.0 - realized).abs() < 1e-6);
}

#[test]
fn each_equity_point_is_capital_plus_unrealized() {
    ensure_test_env();
    let bars = wave_bars(90);
    // (capital, unrealized at the previous close) seen at the start of each bar
    let observed: RefCell<Vec<f64>> = RefCell::new(Vec::new());
    let strategy = from_fn(|history: &[Bar], state: &StateView<'_>| {
        let i = history.len() - 1;
        if i > 0 {
            let previous_close = history[i - 1].close;
            let unrealized: f64 = state
                .open_positions
                .iter()
                .map(|t| t.unrealized_pnl(previous_close))
                .sum();
            observed.borrow_mut().push(state.capital + unrealized);
        }
        Ok(match i % 10 {
            2 => vec![Signal::enter_long("AAA")],
            5 => vec![Signal::enter_short("AAA")],
            8 => vec![Signal::exit("AAA")],
            _ => Vec::new(),
        })
    });
    let mut engine = BacktestEngine::new(wide_risk_levels());
    let result = engine.run(&bars, &strategy).unwrap();

    let observed = observed.into_inner();
    assert_eq!(observed.len(), bars.len() - 1);
    for (point, expected) in result.equity_curve.iter().zip(&observed) {
        assert!((point.equity - expected).abs() < 1e-6);
    }
    // nothing is open after the run, so the last point is realized capital
    assert!(engine.state().open_positions().is_empty());
    assert_eq!(result.equity_curve.last().unwrap().equity, engine.state().capital());
}
