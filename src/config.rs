use crate::error::{Error, Result};
use crate::models::Metric;
use crate::performance::{DEFAULT_RISK_FREE_RATE, TRADING_DAYS};
use std::collections::HashMap;

/// Per-run simulation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Fraction of realized capital committed per entry.
    pub position_size: f64,
    pub max_positions: usize,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub commission: f64,
    pub slippage: f64,
    pub use_fractional: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            position_size: 0.1,
            max_positions: 5,
            stop_loss: 0.02,
            take_profit: 0.05,
            commission: 0.001,
            slippage: 0.001,
            use_fractional: true,
        }
    }
}

impl BacktestConfig {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            initial_capital: setting_f64(
                settings,
                "INITIAL_CAPITAL",
                defaults.initial_capital,
                Some(0.0),
                None,
            )?,
            position_size: setting_f64(
                settings,
                "POSITION_SIZE",
                defaults.position_size,
                Some(0.0),
                Some(1.0),
            )?,
            max_positions: setting_usize(settings, "MAX_POSITIONS", defaults.max_positions, 1)?,
            stop_loss: setting_f64(settings, "STOP_LOSS", defaults.stop_loss, Some(0.0), None)?,
            take_profit: setting_f64(
                settings,
                "TAKE_PROFIT",
                defaults.take_profit,
                Some(0.0),
                None,
            )?,
            commission: setting_f64(
                settings,
                "COMMISSION",
                defaults.commission,
                Some(0.0),
                Some(1.0),
            )?,
            slippage: setting_f64(
                settings,
                "SLIPPAGE",
                defaults.slippage,
                Some(0.0),
                Some(1.0),
            )?,
            use_fractional: setting_bool(settings, "USE_FRACTIONAL", defaults.use_fractional)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(Error::configuration(format!(
                "initial_capital must be positive (value: {})",
                self.initial_capital
            )));
        }
        if !(self.position_size > 0.0 && self.position_size <= 1.0) {
            return Err(Error::configuration(format!(
                "position_size must be in (0, 1] (value: {})",
                self.position_size
            )));
        }
        if self.max_positions == 0 {
            return Err(Error::configuration("max_positions must be >= 1"));
        }
        for (name, value) in [
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
            ("commission", self.commission),
            ("slippage", self.slippage),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::configuration(format!(
                    "{} must be a non-negative number (value: {})",
                    name, value
                )));
            }
        }
        if self.slippage >= 1.0 {
            return Err(Error::configuration(format!(
                "slippage must be < 1 (value: {})",
                self.slippage
            )));
        }
        Ok(())
    }
}

/// Indicator columns attached to every bar by `BacktestEngine::prepare_data`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorConfig {
    pub ma_windows: Vec<usize>,
    pub ema_windows: Vec<usize>,
    pub rsi_period: Option<usize>,
    pub atr_period: Option<usize>,
    pub volatility_window: Option<usize>,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ma_windows: vec![20, 50, 200],
            ema_windows: vec![12, 26],
            rsi_period: Some(14),
            atr_period: Some(14),
            volatility_window: Some(20),
        }
    }
}

impl IndicatorConfig {
    /// Leaves bars untouched apart from sorting and validation.
    pub fn none() -> Self {
        Self {
            ma_windows: Vec::new(),
            ema_windows: Vec::new(),
            rsi_period: None,
            atr_period: None,
            volatility_window: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let zero_window = self
            .ma_windows
            .iter()
            .chain(self.ema_windows.iter())
            .chain(self.rsi_period.iter())
            .chain(self.atr_period.iter())
            .chain(self.volatility_window.iter())
            .any(|&window| window == 0);
        if zero_window {
            return Err(Error::configuration("indicator windows must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationConfig {
    pub metric: Metric,
    pub maximize: bool,
    pub population_size: usize,
    pub generations: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub train_size: usize,
    pub test_size: usize,
    pub step_size: usize,
    pub seed: Option<u64>,
    pub show_progress: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            metric: Metric::SharpeRatio,
            maximize: true,
            population_size: 50,
            generations: 30,
            mutation_rate: 0.1,
            crossover_rate: 0.8,
            train_size: 252,
            test_size: 126,
            step_size: 21,
            seed: None,
            show_progress: false,
        }
    }
}

impl OptimizationConfig {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let metric = match optional_setting(settings, "OPTIMIZATION_METRIC") {
            Some(raw) => Metric::parse(raw)?,
            None => defaults.metric,
        };
        let seed = match optional_setting(settings, "OPTIMIZATION_SEED") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                Error::configuration(format!(
                    "Setting OPTIMIZATION_SEED must be an unsigned integer (value: {})",
                    raw
                ))
            })?),
            None => defaults.seed,
        };
        let config = Self {
            metric,
            maximize: setting_bool(settings, "OPTIMIZATION_MAXIMIZE", defaults.maximize)?,
            population_size: setting_usize(
                settings,
                "POPULATION_SIZE",
                defaults.population_size,
                1,
            )?,
            generations: setting_usize(settings, "GENERATIONS", defaults.generations, 1)?,
            mutation_rate: setting_f64(
                settings,
                "MUTATION_RATE",
                defaults.mutation_rate,
                Some(0.0),
                Some(1.0),
            )?,
            crossover_rate: setting_f64(
                settings,
                "CROSSOVER_RATE",
                defaults.crossover_rate,
                Some(0.0),
                Some(1.0),
            )?,
            train_size: setting_usize(settings, "TRAIN_SIZE", defaults.train_size, 1)?,
            test_size: setting_usize(settings, "TEST_SIZE", defaults.test_size, 1)?,
            step_size: setting_usize(settings, "STEP_SIZE", defaults.step_size, 1)?,
            seed,
            show_progress: setting_bool(settings, "SHOW_PROGRESS", defaults.show_progress)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.population_size == 0 || self.generations == 0 {
            return Err(Error::configuration(
                "population_size and generations must be >= 1",
            ));
        }
        for (name, rate) in [
            ("mutation_rate", self.mutation_rate),
            ("crossover_rate", self.crossover_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::configuration(format!(
                    "{} must be within [0, 1] (value: {})",
                    name, rate
                )));
            }
        }
        if self.train_size == 0 || self.test_size == 0 || self.step_size == 0 {
            return Err(Error::configuration(
                "train_size, test_size and step_size must be >= 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidationConfig {
    /// Metric names resolved against `MetricsReport`.
    pub metrics: Vec<String>,
    pub min_train_size: usize,
    pub test_size: usize,
    pub step_size: usize,
    /// Bars skipped between train and test windows.
    pub gap_size: usize,
    pub seed: Option<u64>,
    /// Annual rate used by the return metrics.
    pub risk_free_rate: f64,
    pub trading_days: usize,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            metrics: vec![
                "sharpe_ratio".to_string(),
                "max_drawdown".to_string(),
                "total_return".to_string(),
            ],
            min_train_size: 252,
            test_size: 126,
            step_size: 21,
            gap_size: 0,
            seed: None,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            trading_days: TRADING_DAYS,
        }
    }
}

impl CrossValidationConfig {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let metrics = match optional_setting(settings, "VALIDATION_METRICS") {
            Some(raw) => raw
                .split(|c: char| c == ',' || c.is_whitespace())
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.metrics,
        };
        let seed = match optional_setting(settings, "VALIDATION_SEED") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                Error::configuration(format!(
                    "Setting VALIDATION_SEED must be an unsigned integer (value: {})",
                    raw
                ))
            })?),
            None => defaults.seed,
        };
        let config = Self {
            metrics,
            min_train_size: setting_usize(
                settings,
                "MIN_TRAIN_SIZE",
                defaults.min_train_size,
                1,
            )?,
            test_size: setting_usize(settings, "TEST_SIZE", defaults.test_size, 1)?,
            step_size: setting_usize(settings, "STEP_SIZE", defaults.step_size, 1)?,
            gap_size: setting_usize(settings, "GAP_SIZE", defaults.gap_size, 0)?,
            seed,
            risk_free_rate: setting_f64(
                settings,
                "RISK_FREE_RATE",
                defaults.risk_free_rate,
                Some(0.0),
                Some(1.0),
            )?,
            trading_days: setting_usize(settings, "TRADING_DAYS", defaults.trading_days, 1)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_train_size == 0 || self.test_size == 0 || self.step_size == 0 {
            return Err(Error::configuration(
                "min_train_size, test_size and step_size must be >= 1",
            ));
        }
        if self.metrics.is_empty() {
            return Err(Error::configuration(
                "at least one validation metric is required",
            ));
        }
        if self.trading_days == 0 {
            return Err(Error::configuration("trading_days must be >= 1"));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(Error::configuration(format!(
                "risk_free_rate must be a number (value: {})",
                self.risk_free_rate
            )));
        }
        Ok(())
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw.parse::<f64>().map_err(|_| {
        Error::configuration(format!("Setting {} must be a number (value: {})", key, raw))
    })?;
    if !value.is_finite() {
        return Err(Error::configuration(format!(
            "Setting {} must be finite (value: {})",
            key, raw
        )));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(Error::configuration(format!(
                "Setting {} must be >= {} (value: {})",
                key, min_value, raw
            )));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(Error::configuration(format!(
                "Setting {} must be <= {} (value: {})",
                key, max_value, raw
            )));
        }
    }
    Ok(value)
}

fn setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw.parse::<f64>().map_err(|_| {
        Error::configuration(format!("Setting {} must be a number (value: {})", key, raw))
    })?;
    if !value.is_finite() {
        return Err(Error::configuration(format!(
            "Setting {} must be finite (value: {})",
            key, raw
        )));
    }
    if value.fract() != 0.0 {
        return Err(Error::configuration(format!(
            "Setting {} must be an integer (value: {})",
            key, raw
        )));
    }
    if value < min as f64 {
        return Err(Error::configuration(format!(
            "Setting {} must be >= {} (value: {})",
            key, min, raw
        )));
    }
    Ok(value as usize)
}

fn setting_bool(settings: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::configuration(format!(
            "Setting {} must be a boolean (value: {})",
            key, raw
        ))),
    }
}
