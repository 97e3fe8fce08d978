use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}

impl Bar {
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied().filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PositionType {
    Long,
    Short,
}

impl PositionType {
    /// +1 for longs, -1 for shorts.
    pub fn sign(self) -> f64 {
        match self {
            PositionType::Long => 1.0,
            PositionType::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionType::Long => "long",
            PositionType::Short => "short",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub symbol: String,
    #[serde(default)]
    pub position_type: Option<PositionType>,
}

impl Signal {
    pub fn enter_long<S: Into<String>>(symbol: S) -> Self {
        Self {
            kind: SignalKind::Entry,
            symbol: symbol.into(),
            position_type: Some(PositionType::Long),
        }
    }

    pub fn enter_short<S: Into<String>>(symbol: S) -> Self {
        Self {
            kind: SignalKind::Entry,
            symbol: symbol.into(),
            position_type: Some(PositionType::Short),
        }
    }

    pub fn exit<S: Into<String>>(symbol: S) -> Self {
        Self {
            kind: SignalKind::Exit,
            symbol: symbol.into(),
            position_type: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
    EndOfTest,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Signal => "signal",
            ExitReason::EndOfTest => "end_of_test",
        }
    }
}

/// An open position, or a closed trade once the exit fields are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub position_type: PositionType,
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub exit_date: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub fees: Option<f64>,
    pub pnl: Option<f64>,
}

impl Trade {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.size * self.position_type.sign()
    }

    pub fn holding_days(&self) -> Option<f64> {
        self.exit_date
            .map(|exit| (exit - self.entry_date).num_days() as f64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EquityPoint {
    pub date: DateTime<Utc>,
    pub equity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub total_return: f64,
    pub final_capital: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
}

impl BacktestResult {
    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::SharpeRatio => self.sharpe_ratio,
            Metric::TotalReturn => self.total_return,
            Metric::MaxDrawdown => self.max_drawdown,
            Metric::WinRate => self.win_rate,
            Metric::ProfitFactor => self.profit_factor,
            Metric::TotalTrades => self.total_trades as f64,
            Metric::WinningTrades => self.winning_trades as f64,
            Metric::LosingTrades => self.losing_trades as f64,
        }
    }

    /// Bar-over-bar fractional changes of the equity curve.
    pub fn equity_returns(&self) -> Vec<f64> {
        crate::performance::returns_from_equity(&self.equity_curve)
    }
}

/// Scalar read from a backtest summary when scoring candidates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    SharpeRatio,
    TotalReturn,
    MaxDrawdown,
    WinRate,
    ProfitFactor,
    TotalTrades,
    WinningTrades,
    LosingTrades,
}

impl Metric {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sharpe" | "sharpe_ratio" => Ok(Self::SharpeRatio),
            "return" | "total_return" => Ok(Self::TotalReturn),
            "drawdown" | "max_drawdown" => Ok(Self::MaxDrawdown),
            "win_rate" => Ok(Self::WinRate),
            "profit_factor" => Ok(Self::ProfitFactor),
            "total_trades" => Ok(Self::TotalTrades),
            "winning_trades" => Ok(Self::WinningTrades),
            "losing_trades" => Ok(Self::LosingTrades),
            other => Err(Error::configuration(format!(
                "unknown optimization metric: {}",
                other
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SharpeRatio => "sharpe_ratio",
            Self::TotalReturn => "total_return",
            Self::MaxDrawdown => "max_drawdown",
            Self::WinRate => "win_rate",
            Self::ProfitFactor => "profit_factor",
            Self::TotalTrades => "total_trades",
            Self::WinningTrades => "winning_trades",
            Self::LosingTrades => "losing_trades",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
