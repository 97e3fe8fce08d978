use crate::config::{BacktestConfig, CrossValidationConfig, IndicatorConfig};
use crate::engine::BacktestEngine;
use crate::error::{Error, Result};
use crate::models::Bar;
use crate::param_utils::ParameterSet;
use crate::performance::{MetricsReport, PerformanceMetrics};
use crate::strategy::{bind, StrategyTemplate};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::ops::Range;

/// Index ranges of one train/test pair. `test` starts `gap_size` bars after `train`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fold {
    pub train: Range<usize>,
    pub test: Range<usize>,
}

#[derive(Debug, Clone)]
pub enum FoldParameters {
    /// Same parameters for every fold.
    Single(ParameterSet),
    /// One entry per fold, in fold order.
    PerFold(Vec<ParameterSet>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMethod {
    Expanding,
    Sliding,
    MonteCarlo,
}

impl ValidationMethod {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "expanding" => Ok(Self::Expanding),
            "sliding" => Ok(Self::Sliding),
            "monte_carlo" | "montecarlo" => Ok(Self::MonteCarlo),
            other => Err(Error::configuration(format!(
                "Unknown validation method: {}",
                other
            ))),
        }
    }
}

pub type MetricScores = BTreeMap<String, f64>;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub train_scores: Vec<MetricScores>,
    pub test_scores: Vec<MetricScores>,
    pub train_mean: MetricScores,
    pub train_std: MetricScores,
    pub test_mean: MetricScores,
    pub test_std: MetricScores,
    /// `(train_start, test_end)` per fold.
    pub fold_dates: Vec<(DateTime<Utc>, DateTime<Utc>)>,
    pub parameters: Vec<ParameterSet>,
    pub folds: Vec<Fold>,
}

struct FoldScores {
    train: MetricScores,
    test: MetricScores,
}

/// Scores fixed parameters over time-series folds. No fitting happens here.
pub struct CrossValidator<'a, T: ?Sized> {
    data: Vec<Bar>,
    template: &'a T,
    backtest_config: BacktestConfig,
    config: CrossValidationConfig,
}

impl<'a, T: StrategyTemplate + ?Sized> CrossValidator<'a, T> {
    pub fn new(
        data: &[Bar],
        template: &'a T,
        backtest_config: BacktestConfig,
        indicator_config: IndicatorConfig,
        config: CrossValidationConfig,
    ) -> Result<Self> {
        config.validate()?;
        backtest_config.validate()?;
        indicator_config.validate()?;
        if let Some(unknown) = config.metrics.iter().find(|m| !MetricsReport::supports(m)) {
            return Err(Error::configuration(format!(
                "Unknown validation metric: {}",
                unknown
            )));
        }
        let data = BacktestEngine::with_indicators(backtest_config.clone(), indicator_config)
            .prepare_data(data)?;

        Ok(Self {
            data,
            template,
            backtest_config,
            config,
        })
    }

    /// Train is always `[0, train_end)`; `train_end` grows by `step_size`.
    pub fn expanding_window_split(&self, min_train_size: Option<usize>) -> Result<Vec<Fold>> {
        let min_train = min_train_size.unwrap_or(self.config.min_train_size);
        if min_train == 0 {
            return Err(Error::configuration("min_train_size must be >= 1"));
        }

        let mut folds = Vec::new();
        let mut train_end = min_train;
        while train_end + self.config.gap_size + self.config.test_size <= self.data.len() {
            folds.push(self.fold_at(0, train_end));
            train_end += self.config.step_size;
        }
        self.require_folds(folds, min_train)
    }

    /// Fixed-size train window sliding by `step_size`.
    pub fn sliding_window_split(&self, train_size: Option<usize>) -> Result<Vec<Fold>> {
        let train_size = train_size.unwrap_or(self.config.min_train_size);
        if train_size == 0 {
            return Err(Error::configuration("train_size must be >= 1"));
        }

        let mut folds = Vec::new();
        let mut start = 0;
        while start + train_size + self.config.gap_size + self.config.test_size <= self.data.len()
        {
            folds.push(self.fold_at(start, start + train_size));
            start += self.config.step_size;
        }
        self.require_folds(folds, train_size)
    }

    /// `n_splits` uniformly drawn windows; they may overlap.
    pub fn monte_carlo_split(&self, n_splits: usize, train_size: Option<usize>) -> Result<Vec<Fold>> {
        if n_splits == 0 {
            return Err(Error::configuration("n_splits must be >= 1"));
        }
        let train_size = train_size.unwrap_or(self.config.min_train_size);
        if train_size == 0 {
            return Err(Error::configuration("train_size must be >= 1"));
        }
        let span = train_size + self.config.gap_size + self.config.test_size;
        if span > self.data.len() {
            return self.require_folds(Vec::new(), train_size);
        }

        let max_start = self.data.len() - span;
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok((0..n_splits)
            .map(|_| {
                let start = rng.gen_range(0..=max_start);
                self.fold_at(start, start + train_size)
            })
            .collect())
    }

    pub fn validate(
        &self,
        method: &str,
        parameters: &FoldParameters,
        n_splits: usize,
        train_size: Option<usize>,
    ) -> Result<ValidationResult> {
        let method = ValidationMethod::parse(method)?;
        let folds = match method {
            ValidationMethod::Expanding => self.expanding_window_split(train_size)?,
            ValidationMethod::Sliding => self.sliding_window_split(train_size)?,
            ValidationMethod::MonteCarlo => self.monte_carlo_split(n_splits, train_size)?,
        };

        let fold_params: Vec<ParameterSet> = match parameters {
            FoldParameters::Single(params) => vec![params.clone(); folds.len()],
            FoldParameters::PerFold(list) => {
                if list.len() < folds.len() {
                    return Err(Error::configuration(format!(
                        "{} parameter sets supplied for {} folds",
                        list.len(),
                        folds.len()
                    )));
                }
                list[..folds.len()].to_vec()
            }
        };

        info!(
            "Cross-validating {} folds ({:?}) on metrics {}",
            folds.len(),
            method,
            self.config.metrics.join(", ")
        );

        let outcomes = folds
            .par_iter()
            .zip(fold_params.par_iter())
            .enumerate()
            .map(|(i, (fold, params))| -> Result<Option<FoldScores>> {
                match self.score_fold(fold, params) {
                    Ok(scores) => Ok(Some(scores)),
                    Err(e) if e.is_data() => {
                        warn!("Skipping fold {}: {}", i, e);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut result = ValidationResult {
            train_scores: Vec::new(),
            test_scores: Vec::new(),
            train_mean: BTreeMap::new(),
            train_std: BTreeMap::new(),
            test_mean: BTreeMap::new(),
            test_std: BTreeMap::new(),
            fold_dates: Vec::new(),
            parameters: Vec::new(),
            folds: Vec::new(),
        };
        for ((fold, params), outcome) in folds.into_iter().zip(fold_params).zip(outcomes) {
            let Some(scores) = outcome else {
                continue;
            };
            result
                .fold_dates
                .push((self.data[fold.train.start].date, self.data[fold.test.end - 1].date));
            result.train_scores.push(scores.train);
            result.test_scores.push(scores.test);
            result.parameters.push(params);
            result.folds.push(fold);
        }
        if result.folds.is_empty() {
            return Err(Error::data("every cross-validation fold was skipped"));
        }

        for metric in &self.config.metrics {
            let (mean, std) = mean_and_std(&result.train_scores, metric);
            result.train_mean.insert(metric.clone(), mean);
            result.train_std.insert(metric.clone(), std);
            let (mean, std) = mean_and_std(&result.test_scores, metric);
            result.test_mean.insert(metric.clone(), mean);
            result.test_std.insert(metric.clone(), std);
        }

        Ok(result)
    }

    fn fold_at(&self, train_start: usize, train_end: usize) -> Fold {
        let test_start = train_end + self.config.gap_size;
        Fold {
            train: train_start..train_end,
            test: test_start..test_start + self.config.test_size,
        }
    }

    fn require_folds(&self, folds: Vec<Fold>, train_size: usize) -> Result<Vec<Fold>> {
        if folds.is_empty() {
            return Err(Error::data(format!(
                "series of {} bars cannot hold train {} + gap {} + test {}",
                self.data.len(),
                train_size,
                self.config.gap_size,
                self.config.test_size
            )));
        }
        Ok(folds)
    }

    fn score_fold(&self, fold: &Fold, params: &ParameterSet) -> Result<FoldScores> {
        Ok(FoldScores {
            train: self.score_slice(&self.data[fold.train.clone()], params)?,
            test: self.score_slice(&self.data[fold.test.clone()], params)?,
        })
    }

    fn score_slice(&self, bars: &[Bar], params: &ParameterSet) -> Result<MetricScores> {
        let mut engine =
            BacktestEngine::with_indicators(self.backtest_config.clone(), IndicatorConfig::none());
        let result = engine.run(bars, &bind(self.template, params.clone()))?;
        let report = PerformanceMetrics::new(result.equity_returns())
            .with_risk_free_rate(self.config.risk_free_rate)
            .with_trading_days(self.config.trading_days)
            .calculate_all(Some(result.trades.as_slice()));

        Ok(self
            .config
            .metrics
            .iter()
            .map(|name| (name.clone(), report.value(name).unwrap_or(f64::NAN)))
            .collect())
    }
}

fn mean_and_std(scores: &[MetricScores], metric: &str) -> (f64, f64) {
    let values: Vec<f64> = scores
        .iter()
        .map(|s| s.get(metric).copied().unwrap_or(f64::NAN))
        .collect();
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    (values.iter().mean(), values.iter().population_std_dev())
}
