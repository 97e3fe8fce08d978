use chrono::{Duration, TimeZone, Utc};
use std::sync::Once;
use stratlab::engine::StateView;
use stratlab::models::{Bar, Metric, Signal};
use stratlab::strategy::{template_fn, SmaCrossoverTemplate};
use stratlab::{
    BacktestConfig, CrossValidationConfig, CrossValidator, Error, FoldParameters,
    IndicatorConfig, OptimizationConfig, OptimizerStatus, ParameterBounds, ParameterGrid,
    ParameterSet, SearchSpace, StrategyOptimizer,
};

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn market(count: usize) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let t = i as f64;
            let close = 80.0 + (t * 0.07).sin() * 12.0 + (t * 0.31).cos() * 2.0 + t * 0.02;
            Bar {
                date: start + Duration::days(i as i64),
                symbol: "SPY".to_string(),
                open: close - 0.2,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 2_000_000.0,
                indicators: Default::default(),
            }
        })
        .collect()
}

fn crossover_optimizer(config: OptimizationConfig) -> StrategyOptimizer {
    StrategyOptimizer::new(config, BacktestConfig::default(), IndicatorConfig::default())
}

#[test]
fn single_value_grid_returns_its_only_combination() {
    ensure_test_env();
    let data = market(200);
    let grid = ParameterGrid::new()
        .with("fast_period", vec![5.0])
        .with("slow_period", vec![20.0]);
    let expected = ParameterSet::new()
        .with("fast_period", 5.0)
        .with("slow_period", 20.0);

    for maximize in [true, false] {
        let optimizer = crossover_optimizer(OptimizationConfig {
            metric: Metric::TotalReturn,
            maximize,
            ..OptimizationConfig::default()
        });
        let result = optimizer
            .grid_search(&data, &SmaCrossoverTemplate, &grid)
            .unwrap();
        assert_eq!(result.best_params, expected);
        assert_eq!(result.results.len(), 1);
    }
}

#[test]
fn maximizing_never_scores_below_minimizing() {
    ensure_test_env();
    let data = market(250);
    let grid = ParameterGrid::new()
        .with("fast_period", vec![3.0, 8.0, 15.0])
        .with("slow_period", vec![30.0, 60.0]);
    let search = |maximize| {
        crossover_optimizer(OptimizationConfig {
            metric: Metric::TotalReturn,
            maximize,
            ..OptimizationConfig::default()
        })
        .optimize("grid", &data, &SmaCrossoverTemplate, &SearchSpace::Grid(grid.clone()))
        .unwrap()
    };
    let best = search(true);
    let worst = search(false);
    assert!(best.best_score() >= worst.best_score());
}

#[test]
fn genetic_fitness_history_is_monotone() {
    ensure_test_env();
    let data = market(220);
    let bounds = ParameterBounds::new()
        .with("fast_period", 3.0, 15.0)
        .with("slow_period", 20.0, 60.0);

    for maximize in [true, false] {
        let optimizer = crossover_optimizer(OptimizationConfig {
            metric: Metric::TotalReturn,
            maximize,
            population_size: 12,
            generations: 5,
            seed: Some(42),
            ..OptimizationConfig::default()
        });
        let result = optimizer
            .genetic_optimize(&data, &SmaCrossoverTemplate, &bounds)
            .unwrap();

        assert_eq!(result.fitness_history.len(), 5);
        assert_eq!(result.fitness_history.last(), Some(&result.best_fitness));
        assert!(bounds.contains(&result.best_params));
        for pair in result.fitness_history.windows(2) {
            if maximize {
                assert!(pair[1] >= pair[0]);
            } else {
                assert!(pair[1] <= pair[0]);
            }
        }
    }
}

#[test]
fn walk_forward_windows_are_disjoint_and_step_forward() {
    ensure_test_env();
    let data = market(300);
    let config = OptimizationConfig {
        metric: Metric::TotalReturn,
        train_size: 100,
        test_size: 40,
        step_size: 30,
        ..OptimizationConfig::default()
    };
    let optimizer = crossover_optimizer(config.clone());
    let inner = StrategyOptimizer::new(config, BacktestConfig::default(), IndicatorConfig::none());
    let grid = ParameterGrid::new()
        .with("fast_period", vec![5.0, 10.0])
        .with("slow_period", vec![25.0, 40.0]);

    let windows = optimizer
        .walk_forward_analysis(&data, &SmaCrossoverTemplate, |train| {
            Ok(inner.grid_search(train, &SmaCrossoverTemplate, &grid)?.best_params)
        })
        .unwrap();

    // (300 - 140) / 30 + 1
    assert_eq!(windows.len(), 6);
    for window in &windows {
        assert_eq!(window.train.len(), 100);
        assert_eq!(window.test.len(), 40);
        assert_eq!(window.train.end, window.test.start);
        assert!(window.train_end < window.test_start);
    }
    for pair in windows.windows(2) {
        assert_eq!(pair[1].train.start - pair[0].train.start, 30);
        assert_eq!(pair[1].test.start - pair[0].test.start, 30);
    }
}

#[test]
fn walk_forward_skips_windows_whose_fit_reports_bad_data() {
    ensure_test_env();
    let data = market(200);
    let optimizer = crossover_optimizer(OptimizationConfig {
        train_size: 80,
        test_size: 40,
        step_size: 40,
        ..OptimizationConfig::default()
    });
    let mut calls = 0;
    let windows = optimizer
        .walk_forward_analysis(&data, &SmaCrossoverTemplate, |_train| {
            calls += 1;
            if calls == 1 {
                Err(Error::data("train window too noisy"))
            } else {
                Ok(ParameterSet::new())
            }
        })
        .unwrap();

    assert_eq!(calls, 3);
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0].train.start, 40);
}

#[test]
fn strategy_failures_abort_the_search() {
    ensure_test_env();
    let failing = template_fn(|history: &[Bar], _s: &StateView<'_>, _p: &ParameterSet| {
        if history.len() > 10 {
            anyhow::bail!("indicator feed went stale");
        }
        Ok(Vec::<Signal>::new())
    });
    let grid = ParameterGrid::new().with("x", vec![1.0, 2.0]);
    let err = crossover_optimizer(OptimizationConfig::default())
        .grid_search(&market(40), &failing, &grid)
        .unwrap_err();
    assert!(matches!(err, Error::Strategy(_)));
}

#[test]
fn expired_deadline_cancels_genetic_search() {
    ensure_test_env();
    let status = OptimizerStatus::new().with_timeout(std::time::Duration::ZERO);
    let optimizer = crossover_optimizer(OptimizationConfig {
        population_size: 4,
        generations: 3,
        seed: Some(1),
        ..OptimizationConfig::default()
    })
    .with_status(status.clone());
    let err = optimizer
        .genetic_optimize(
            &market(120),
            &SmaCrossoverTemplate,
            &ParameterBounds::new().with("fast_period", 3.0, 9.0),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(status.snapshot().phase, "Cancelled");
}

#[test]
fn cross_validation_scores_every_expanding_fold() {
    ensure_test_env();
    let data = market(400);
    let config = CrossValidationConfig {
        metrics: vec![
            "total_return".to_string(),
            "max_drawdown".to_string(),
            "volatility".to_string(),
        ],
        min_train_size: 200,
        test_size: 50,
        step_size: 50,
        gap_size: 5,
        seed: Some(9),
        ..CrossValidationConfig::default()
    };
    let params = ParameterSet::new()
        .with("fast_period", 5.0)
        .with("slow_period", 20.0);
    let validator = CrossValidator::new(
        &data,
        &SmaCrossoverTemplate,
        BacktestConfig::default(),
        IndicatorConfig::default(),
        config,
    )
    .unwrap();
    let result = validator
        .validate("expanding", &FoldParameters::Single(params.clone()), 0, None)
        .unwrap();

    // train_end = 200, 250, 300; 350 + 5 + 50 > 400
    assert_eq!(result.folds.len(), 3);
    assert_eq!(result.train_scores.len(), 3);
    assert_eq!(result.test_scores.len(), 3);
    assert!(result.parameters.iter().all(|p| p == &params));
    for (fold, (train_start, test_end)) in result.folds.iter().zip(&result.fold_dates) {
        assert_eq!(fold.train.start, 0);
        assert_eq!(fold.test.start, fold.train.end + 5);
        assert_eq!(*train_start, data[0].date);
        assert_eq!(*test_end, data[fold.test.end - 1].date);
    }
    for metric in ["total_return", "max_drawdown", "volatility"] {
        assert!(result.test_mean.contains_key(metric));
        assert!(result.test_std[metric] >= 0.0);
        let mean = result.train_scores.iter().map(|s| s[metric]).sum::<f64>() / 3.0;
        assert!((result.train_mean[metric] - mean).abs() < 1e-9);
    }
}

#[test]
fn cross_validation_accepts_per_fold_parameters() {
    ensure_test_env();
    let data = market(300);
    let config = CrossValidationConfig {
        min_train_size: 100,
        test_size: 50,
        step_size: 50,
        ..CrossValidationConfig::default()
    };
    let validator = CrossValidator::new(
        &data,
        &SmaCrossoverTemplate,
        BacktestConfig::default(),
        IndicatorConfig::default(),
        config,
    )
    .unwrap();
    let per_fold: Vec<ParameterSet> = [5.0, 8.0, 12.0, 15.0]
        .iter()
        .map(|&fast| ParameterSet::new().with("fast_period", fast))
        .collect();
    let result = validator
        .validate("sliding", &FoldParameters::PerFold(per_fold.clone()), 0, None)
        .unwrap();

    // starts 0, 50, 100, 150
    assert_eq!(result.folds.len(), 4);
    assert_eq!(result.parameters, per_fold);
    assert_eq!(result.folds[3].train, 150..250);
}
