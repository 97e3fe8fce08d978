use crate::error::{Error, Result};
use crate::models::{EquityPoint, Trade};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

pub const TRADING_DAYS: usize = 252;
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.03;

/// Every name `MetricsReport::value` resolves.
pub const METRIC_NAMES: &[&str] = &[
    "var_95",
    "var_99",
    "cvar_95",
    "beta",
    "volatility",
    "downside_risk",
    "correlation",
    "total_return",
    "annual_return",
    "cagr",
    "risk_free_return",
    "excess_return",
    "risk_adjusted_return",
    "sharpe_ratio",
    "max_drawdown",
    "avg_drawdown",
    "max_drawdown_duration",
    "avg_drawdown_duration",
    "recovery_factor",
    "ulcer_index",
    "stability_score",
    "consistency_score",
    "parameter_sensitivity",
    "data_sensitivity",
    "total_trades",
    "winning_trades",
    "losing_trades",
    "win_rate",
    "profit_factor",
    "avg_win",
    "avg_loss",
    "largest_win",
    "largest_loss",
    "avg_holding_period",
    "expectancy",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub var_95: f64,
    pub var_99: f64,
    pub cvar_95: f64,
    pub beta: f64,
    pub volatility: f64,
    pub downside_risk: f64,
    pub correlation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnMetrics {
    pub total_return: f64,
    pub annual_return: f64,
    pub cagr: f64,
    pub risk_free_return: f64,
    pub excess_return: f64,
    pub risk_adjusted_return: f64,
    pub sharpe_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownMetrics {
    pub max_drawdown: f64,
    pub avg_drawdown: f64,
    /// In bars.
    pub max_drawdown_duration: usize,
    pub avg_drawdown_duration: f64,
    pub recovery_factor: f64,
    pub ulcer_index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessMetrics {
    pub stability_score: f64,
    pub consistency_score: f64,
    pub regime_performance: BTreeMap<String, f64>,
    pub parameter_sensitivity: f64,
    pub data_sensitivity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_holding_period: f64,
    pub expectancy: f64,
}

impl TradeMetrics {
    /// Trade statistics over closed trades. A trade with pnl <= 0 counts as a loss.
    pub fn from_trades(trades: &[Trade]) -> Self {
        if trades.is_empty() {
            return Self {
                total_trades: 0,
                winning_trades: 0,
                losing_trades: 0,
                win_rate: 0.0,
                profit_factor: 0.0,
                avg_win: 0.0,
                avg_loss: 0.0,
                largest_win: 0.0,
                largest_loss: 0.0,
                avg_holding_period: 0.0,
                expectancy: 0.0,
            };
        }

        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl.unwrap_or(0.0)).collect();
        let winning: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losing: Vec<f64> = pnls.iter().copied().filter(|p| *p <= 0.0).collect();

        let total_trades = trades.len();
        let win_rate = winning.len() as f64 / total_trades as f64;
        let gross_profit: f64 = winning.iter().sum();
        let gross_loss: f64 = losing.iter().sum::<f64>().abs();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            f64::INFINITY
        };

        let avg_win = average(&winning);
        let avg_loss = average(&losing);
        let largest_win = winning.iter().copied().fold(0.0, f64::max);
        let largest_loss = losing.iter().copied().fold(0.0, f64::min);

        let holding_periods: Vec<f64> = trades.iter().filter_map(Trade::holding_days).collect();
        let avg_holding_period = average(&holding_periods);

        let expectancy = win_rate * avg_win - (1.0 - win_rate) * avg_loss.abs();

        Self {
            total_trades,
            winning_trades: winning.len(),
            losing_trades: losing.len(),
            win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_holding_period,
            expectancy,
        }
    }
}

/// All metric bundles for one return series, addressable by flat metric name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub risk: RiskMetrics,
    pub returns: ReturnMetrics,
    pub drawdown: DrawdownMetrics,
    pub robustness: RobustnessMetrics,
    pub trade: Option<TradeMetrics>,
}

impl MetricsReport {
    pub fn supports(name: &str) -> bool {
        METRIC_NAMES.contains(&name)
    }

    /// Looks a metric up by name. Trade metrics are `None` when no trades were supplied.
    pub fn value(&self, name: &str) -> Option<f64> {
        let value = match name {
            "var_95" => self.risk.var_95,
            "var_99" => self.risk.var_99,
            "cvar_95" => self.risk.cvar_95,
            "beta" => self.risk.beta,
            "volatility" => self.risk.volatility,
            "downside_risk" => self.risk.downside_risk,
            "correlation" => self.risk.correlation,
            "total_return" => self.returns.total_return,
            "annual_return" => self.returns.annual_return,
            "cagr" => self.returns.cagr,
            "risk_free_return" => self.returns.risk_free_return,
            "excess_return" => self.returns.excess_return,
            "risk_adjusted_return" => self.returns.risk_adjusted_return,
            "sharpe_ratio" => self.returns.sharpe_ratio,
            "max_drawdown" => self.drawdown.max_drawdown,
            "avg_drawdown" => self.drawdown.avg_drawdown,
            "max_drawdown_duration" => self.drawdown.max_drawdown_duration as f64,
            "avg_drawdown_duration" => self.drawdown.avg_drawdown_duration,
            "recovery_factor" => self.drawdown.recovery_factor,
            "ulcer_index" => self.drawdown.ulcer_index,
            "stability_score" => self.robustness.stability_score,
            "consistency_score" => self.robustness.consistency_score,
            "parameter_sensitivity" => self.robustness.parameter_sensitivity,
            "data_sensitivity" => self.robustness.data_sensitivity,
            _ => {
                let trade = self.trade.as_ref()?;
                match name {
                    "total_trades" => trade.total_trades as f64,
                    "winning_trades" => trade.winning_trades as f64,
                    "losing_trades" => trade.losing_trades as f64,
                    "win_rate" => trade.win_rate,
                    "profit_factor" => trade.profit_factor,
                    "avg_win" => trade.avg_win,
                    "avg_loss" => trade.avg_loss,
                    "largest_win" => trade.largest_win,
                    "largest_loss" => trade.largest_loss,
                    "avg_holding_period" => trade.avg_holding_period,
                    "expectancy" => trade.expectancy,
                    _ => return None,
                }
            }
        };
        Some(value)
    }
}

/// Statistics over a per-bar return series, with an optional benchmark series.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    returns: Vec<f64>,
    benchmark: Option<Vec<f64>>,
    risk_free_rate: f64,
    trading_days: usize,
}

impl PerformanceMetrics {
    pub fn new(returns: Vec<f64>) -> Self {
        Self {
            returns,
            benchmark: None,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            trading_days: TRADING_DAYS,
        }
    }

    pub fn with_benchmark(mut self, benchmark: Vec<f64>) -> Result<Self> {
        if benchmark.len() != self.returns.len() {
            return Err(Error::data(format!(
                "benchmark has {} returns but the strategy has {}",
                benchmark.len(),
                self.returns.len()
            )));
        }
        self.benchmark = Some(benchmark);
        Ok(self)
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn with_trading_days(mut self, days: usize) -> Self {
        self.trading_days = days.max(1);
        self
    }

    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    fn daily_risk_free_rate(&self) -> f64 {
        (1.0 + self.risk_free_rate).powf(1.0 / self.trading_days as f64) - 1.0
    }

    fn annualizer(&self) -> f64 {
        (self.trading_days as f64).sqrt()
    }

    pub fn calculate_risk_metrics(&self) -> RiskMetrics {
        let returns = &self.returns;
        let mut sorted = returns.clone();
        sorted.sort_by(f64::total_cmp);

        let var_95 = percentile(&sorted, 5.0);
        let var_99 = percentile(&sorted, 1.0);
        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var_95).collect();
        let cvar_95 = average(&tail);

        let (beta, correlation) = match &self.benchmark {
            Some(benchmark) if returns.len() >= 2 => {
                let covariance = returns.iter().covariance(benchmark.iter());
                let benchmark_variance = benchmark.iter().variance();
                let beta = covariance / benchmark_variance;
                let correlation =
                    covariance / (returns.iter().std_dev() * benchmark.iter().std_dev());
                (beta, correlation)
            }
            Some(_) => (f64::NAN, f64::NAN),
            None => (1.0, 1.0),
        };

        let volatility = sample_std(returns) * self.annualizer();
        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let downside_risk = if downside.len() < 2 {
            0.0
        } else {
            downside.iter().std_dev() * self.annualizer()
        };

        RiskMetrics {
            var_95,
            var_99,
            cvar_95,
            beta,
            volatility,
            downside_risk,
            correlation,
        }
    }

    pub fn calculate_return_metrics(&self) -> ReturnMetrics {
        let returns = &self.returns;
        let n = returns.len();
        let total_return = returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0;

        let annual_return = if n == 0 {
            0.0
        } else {
            let years = n as f64 / self.trading_days as f64;
            let growth = 1.0 + total_return;
            if growth <= 0.0 {
                -1.0
            } else {
                growth.powf(1.0 / years) - 1.0
            }
        };

        let daily_rf = self.daily_risk_free_rate();
        let risk_free_return = (1.0 + daily_rf).powi(n as i32) - 1.0;
        let excess_return = total_return - risk_free_return;

        let volatility = sample_std(returns) * self.annualizer();
        let risk_adjusted_return = ratio_or_nan(annual_return - self.risk_free_rate, volatility);

        let excess_daily: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
        let sharpe_ratio = if n < 2 {
            f64::NAN
        } else {
            ratio_or_nan(excess_daily.iter().mean(), sample_std(returns)) * self.annualizer()
        };

        ReturnMetrics {
            total_return,
            annual_return,
            cagr: annual_return,
            risk_free_return,
            excess_return,
            risk_adjusted_return,
            sharpe_ratio,
        }
    }

    pub fn calculate_drawdown_metrics(&self) -> DrawdownMetrics {
        let mut growth = 1.0;
        let mut peak = 1.0;
        let mut drawdowns = Vec::with_capacity(self.returns.len());
        for r in &self.returns {
            growth *= 1.0 + r;
            if growth > peak {
                peak = growth;
            }
            drawdowns.push(growth / peak - 1.0);
        }

        let max_drawdown = drawdowns.iter().copied().fold(0.0, f64::min).abs();
        let underwater: Vec<f64> = drawdowns.iter().copied().filter(|d| *d < 0.0).collect();
        let avg_drawdown = average(&underwater).abs();

        // an episode still underwater at the last bar has no recovery and is left out
        let mut durations = Vec::new();
        let mut started_at: Option<usize> = None;
        for (i, dd) in drawdowns.iter().enumerate() {
            match (started_at, *dd < 0.0) {
                (None, true) => started_at = Some(i),
                (Some(start), false) => {
                    durations.push(i - start);
                    started_at = None;
                }
                _ => {}
            }
        }
        let max_drawdown_duration = durations.iter().copied().max().unwrap_or(0);
        let avg_drawdown_duration = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<usize>() as f64 / durations.len() as f64
        };

        let total_return = growth - 1.0;
        let recovery_factor = if max_drawdown == 0.0 {
            f64::INFINITY
        } else {
            (total_return / max_drawdown).abs()
        };
        let ulcer_index = if drawdowns.is_empty() {
            0.0
        } else {
            (drawdowns.iter().map(|d| d * d).sum::<f64>() / drawdowns.len() as f64).sqrt()
        };

        DrawdownMetrics {
            max_drawdown,
            avg_drawdown,
            max_drawdown_duration,
            avg_drawdown_duration,
            recovery_factor,
            ulcer_index,
        }
    }

    /// `regime_returns` maps a regime label to the returns observed in it;
    /// `param_results` and `data_results` are scores from perturbed reruns.
    pub fn calculate_robustness_metrics(
        &self,
        regime_returns: Option<&BTreeMap<String, Vec<f64>>>,
        param_results: Option<&[f64]>,
        data_results: Option<&[f64]>,
    ) -> RobustnessMetrics {
        let returns = &self.returns;

        let stability_score = if returns.len() < 3 {
            0.0
        } else {
            let lead = &returns[1..];
            let lag = &returns[..returns.len() - 1];
            let correlation =
                lead.iter().covariance(lag.iter()) / (lead.iter().std_dev() * lag.iter().std_dev());
            correlation.abs()
        };

        let consistency_score = if returns.len() < 2 {
            0.0
        } else {
            let same_sign = returns
                .windows(2)
                .filter(|w| sign(w[0]) == sign(w[1]))
                .count();
            same_sign as f64 / (returns.len() - 1) as f64
        };

        let regime_performance = regime_returns
            .map(|regimes| {
                regimes
                    .iter()
                    .map(|(regime, values)| (regime.clone(), average(values)))
                    .collect()
            })
            .unwrap_or_default();

        RobustnessMetrics {
            stability_score,
            consistency_score,
            regime_performance,
            parameter_sensitivity: param_results.map(coefficient_of_variation).unwrap_or(0.0),
            data_sensitivity: data_results.map(coefficient_of_variation).unwrap_or(0.0),
        }
    }

    pub fn calculate_all(&self, trades: Option<&[Trade]>) -> MetricsReport {
        MetricsReport {
            risk: self.calculate_risk_metrics(),
            returns: self.calculate_return_metrics(),
            drawdown: self.calculate_drawdown_metrics(),
            robustness: self.calculate_robustness_metrics(None, None, None),
            trade: trades.map(TradeMetrics::from_trades),
        }
    }
}

/// Bar-over-bar fractional equity changes. A non-positive prior equity yields 0.
pub fn returns_from_equity(curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            if prev > 0.0 {
                (w[1].equity - prev) / prev
            } else {
                0.0
            }
        })
        .collect()
}

/// `sqrt(252) * mean / sample std`, NaN when undefined.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return f64::NAN;
    }
    let std_dev = sample_std(returns);
    ratio_or_nan(returns.iter().mean(), std_dev) * (TRADING_DAYS as f64).sqrt()
}

/// Largest peak-to-trough decline of the equity curve, as a positive fraction.
pub fn max_drawdown(curve: &[EquityPoint]) -> f64 {
    let Some(first) = curve.first() else {
        return 0.0;
    };

    let mut peak = first.equity;
    let mut deepest = 0.0_f64;
    for point in curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > 0.0 {
            deepest = deepest.min((point.equity - peak) / peak);
        }
    }
    deepest.abs()
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().mean()
    }
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        f64::NAN
    } else {
        values.iter().std_dev()
    }
}

fn ratio_or_nan(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        f64::NAN
    } else {
        numerator / denominator
    }
}

fn sign(value: f64) -> i8 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    ratio_or_nan(values.iter().population_std_dev(), values.iter().mean())
}

/// Percentile with linear interpolation between closest ranks; `sorted` must be ascending.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = pct / 100.0 * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionType;
    use chrono::{Duration, TimeZone, Utc};

    fn closed_trade(pnl: f64, days: i64) -> Trade {
        let entry = Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap();
        Trade {
            symbol: "AAA".to_string(),
            entry_date: entry,
            entry_price: 100.0,
            position_type: PositionType::Long,
            size: 1.0,
            stop_loss: 98.0,
            take_profit: 105.0,
            exit_date: Some(entry + Duration::days(days)),
            exit_price: Some(100.0 + pnl),
            exit_reason: None,
            fees: Some(0.0),
            pnl: Some(pnl),
        }
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let sorted: Vec<f64> = (1..=5).map(f64::from).collect();
        assert!((percentile(&sorted, 50.0) - 3.0).abs() < 1e-12);
        assert!((percentile(&sorted, 5.0) - 1.2).abs() < 1e-12);
    }

    #[test]
    fn drawdown_excludes_episode_open_at_end() {
        // down, recover, down again without recovery
        let metrics = PerformanceMetrics::new(vec![-0.1, 0.2, -0.05, -0.05]);
        let drawdown = metrics.calculate_drawdown_metrics();
        assert_eq!(drawdown.max_drawdown_duration, 1);
        assert!((drawdown.avg_drawdown_duration - 1.0).abs() < 1e-12);
        assert!((drawdown.max_drawdown - 0.1).abs() < 1e-12);
    }

    #[test]
    fn flat_series_has_infinite_recovery_and_nan_sharpe() {
        let metrics = PerformanceMetrics::new(vec![0.0; 10]);
        let drawdown = metrics.calculate_drawdown_metrics();
        assert_eq!(drawdown.max_drawdown, 0.0);
        assert!(drawdown.recovery_factor.is_infinite());
        assert!(sharpe_ratio(metrics.returns()).is_nan());
    }

    #[test]
    fn total_return_compounds() {
        let metrics = PerformanceMetrics::new(vec![0.1, -0.1]);
        let returns = metrics.calculate_return_metrics();
        assert!((returns.total_return - (-0.01)).abs() < 1e-12);
        assert_eq!(returns.cagr, returns.annual_return);
    }

    #[test]
    fn trade_metrics_follow_expectancy_formula() {
        let trades = vec![
            closed_trade(10.0, 2),
            closed_trade(-5.0, 4),
            closed_trade(0.0, 6),
        ];
        let stats = TradeMetrics::from_trades(&trades);
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 2);
        assert!((stats.profit_factor - 2.0).abs() < 1e-12);
        assert!((stats.avg_loss + 2.5).abs() < 1e-12);
        assert!((stats.largest_loss + 5.0).abs() < 1e-12);
        assert!((stats.avg_holding_period - 4.0).abs() < 1e-12);
        let expected = (1.0 / 3.0) * 10.0 - (2.0 / 3.0) * 2.5;
        assert!((stats.expectancy - expected).abs() < 1e-12);
    }

    #[test]
    fn no_losses_means_infinite_profit_factor_and_no_trades_means_zero() {
        assert!(TradeMetrics::from_trades(&[closed_trade(3.0, 1)])
            .profit_factor
            .is_infinite());
        assert_eq!(TradeMetrics::from_trades(&[]).profit_factor, 0.0);
    }

    #[test]
    fn benchmark_length_mismatch_is_a_data_error() {
        let err = PerformanceMetrics::new(vec![0.01, 0.02])
            .with_benchmark(vec![0.01])
            .unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn identical_benchmark_has_unit_beta_and_correlation() {
        let returns = vec![0.01, -0.02, 0.015, 0.003, -0.007];
        let risk = PerformanceMetrics::new(returns.clone())
            .with_benchmark(returns)
            .unwrap()
            .calculate_risk_metrics();
        assert!((risk.beta - 1.0).abs() < 1e-9);
        assert!((risk.correlation - 1.0).abs() < 1e-9);
    }

    #[test]
    fn report_resolves_every_catalogued_name() {
        let trades = vec![closed_trade(1.0, 1)];
        let report =
            PerformanceMetrics::new(vec![0.01, -0.02, 0.03]).calculate_all(Some(trades.as_slice()));
        for name in METRIC_NAMES {
            assert!(report.value(name).is_some(), "missing {}", name);
        }
        assert!(report.value("sortino").is_none());
        assert!(!MetricsReport::supports("sortino"));
    }

    #[test]
    fn max_drawdown_is_a_magnitude() {
        let start = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
        let curve: Vec<EquityPoint> = [100.0, 120.0, 90.0, 130.0]
            .iter()
            .enumerate()
            .map(|(i, equity)| EquityPoint {
                date: start + Duration::days(i as i64),
                equity: *equity,
            })
            .collect();
        assert!((max_drawdown(&curve) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn tail_risk_averages_returns_below_var() {
        let risk = PerformanceMetrics::new(vec![0.04, -0.05, 0.01, -0.03, 0.02])
            .calculate_risk_metrics();
        assert!((risk.var_95 + 0.046).abs() < 1e-12);
        assert!((risk.var_99 + 0.0492).abs() < 1e-12);
        assert!((risk.cvar_95 + 0.05).abs() < 1e-12);
        let expected_downside = 0.02 / 2f64.sqrt() * (TRADING_DAYS as f64).sqrt();
        assert!((risk.downside_risk - expected_downside).abs() < 1e-12);
    }

    #[test]
    fn single_negative_return_has_no_downside_risk() {
        let risk = PerformanceMetrics::new(vec![0.01, -0.02, 0.03]).calculate_risk_metrics();
        assert_eq!(risk.downside_risk, 0.0);
    }

    #[test]
    fn ulcer_index_is_root_mean_square_drawdown() {
        let drawdown = PerformanceMetrics::new(vec![-0.1, 0.0]).calculate_drawdown_metrics();
        assert!((drawdown.ulcer_index - 0.1).abs() < 1e-12);
        let empty = PerformanceMetrics::new(Vec::new()).calculate_drawdown_metrics();
        assert_eq!(empty.ulcer_index, 0.0);
    }

    #[test]
    fn robustness_scores() {
        let trending = PerformanceMetrics::new(vec![0.01, 0.02, 0.03, 0.04]);
        let robustness = trending.calculate_robustness_metrics(None, None, None);
        assert!((robustness.stability_score - 1.0).abs() < 1e-9);
        assert_eq!(robustness.consistency_score, 1.0);
        assert!(robustness.regime_performance.is_empty());
        assert_eq!(robustness.parameter_sensitivity, 0.0);
        assert_eq!(robustness.data_sensitivity, 0.0);

        let mixed = PerformanceMetrics::new(vec![0.01, 0.02, -0.01, -0.02, 0.0]);
        let mut regimes = BTreeMap::new();
        regimes.insert("bull".to_string(), vec![0.01, 0.03]);
        regimes.insert("bear".to_string(), vec![-0.02]);
        let robustness = mixed.calculate_robustness_metrics(
            Some(&regimes),
            Some(&[1.0, 2.0, 3.0][..]),
            Some(&[4.0, 4.0][..]),
        );
        assert!((robustness.consistency_score - 0.5).abs() < 1e-12);
        assert!((robustness.regime_performance["bull"] - 0.02).abs() < 1e-12);
        assert!((robustness.regime_performance["bear"] + 0.02).abs() < 1e-12);
        let expected_cv = (2.0f64 / 3.0).sqrt() / 2.0;
        assert!((robustness.parameter_sensitivity - expected_cv).abs() < 1e-12);
        assert_eq!(robustness.data_sensitivity, 0.0);

        let short = PerformanceMetrics::new(vec![0.01, 0.02]);
        assert_eq!(
            short.calculate_robustness_metrics(None, None, None).stability_score,
            0.0
        );
    }
}
