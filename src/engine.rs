use crate::config::{BacktestConfig, IndicatorConfig};
use crate::error::{Error, Result};
use crate::indicators::apply_indicators;
use crate::models::*;
use crate::performance::{max_drawdown, returns_from_equity, sharpe_ratio, TradeMetrics};
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};
use log::debug;

/// Read-only snapshot handed to the strategy on every bar.
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    pub capital: f64,
    pub open_positions: &'a [Trade],
    pub closed_trades: &'a [Trade],
}

impl StateView<'_> {
    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.open_positions.iter().any(|t| t.symbol == symbol)
    }
}

/// Mutable bookkeeping of a single run. Owned by one engine; never shared.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    capital: f64,
    open_positions: Vec<Trade>,
    closed_trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
}

impl SimulationState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            capital: initial_capital,
            open_positions: Vec::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn open_positions(&self) -> &[Trade] {
        &self.open_positions
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed_trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn view(&self) -> StateView<'_> {
        StateView {
            capital: self.capital,
            open_positions: &self.open_positions,
            closed_trades: &self.closed_trades,
        }
    }

    /// Realized capital plus open positions marked at `price`.
    pub fn equity_at(&self, price: f64) -> f64 {
        self.capital
            + self
                .open_positions
                .iter()
                .map(|t| t.unrealized_pnl(price))
                .sum::<f64>()
    }

    fn close_position(
        &mut self,
        index: usize,
        exit_price: f64,
        exit_date: DateTime<Utc>,
        reason: ExitReason,
        commission_rate: f64,
    ) {
        let mut trade = self.open_positions.remove(index);
        let entry_fee = trade.fees.unwrap_or(0.0);
        let exit_fee = exit_price * trade.size * commission_rate;
        let fees = entry_fee + exit_fee;
        let pnl = (exit_price - trade.entry_price) * trade.size * trade.position_type.sign() - fees;

        trade.exit_date = Some(exit_date);
        trade.exit_price = Some(exit_price);
        trade.exit_reason = Some(reason);
        trade.fees = Some(fees);
        trade.pnl = Some(pnl);

        self.capital += pnl;
        debug!(
            "Closed {} {} at {:.4} ({}), pnl {:.2}",
            trade.position_type.as_str(),
            trade.symbol,
            exit_price,
            reason.as_str(),
            pnl
        );
        self.closed_trades.push(trade);
    }
}

/// Replays a bar series through a strategy, one bar at a time.
pub struct BacktestEngine {
    config: BacktestConfig,
    indicator_config: IndicatorConfig,
    state: SimulationState,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self::with_indicators(config, IndicatorConfig::default())
    }

    pub fn with_indicators(config: BacktestConfig, indicator_config: IndicatorConfig) -> Self {
        let state = SimulationState::new(config.initial_capital);
        Self {
            config,
            indicator_config,
            state,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// State left behind by the most recent run.
    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = SimulationState::new(self.config.initial_capital);
    }

    /// Validates, sorts ascending by date (stable) and attaches indicator columns.
    pub fn prepare_data(&self, bars: &[Bar]) -> Result<Vec<Bar>> {
        if bars.is_empty() {
            return Err(Error::data("bar series is empty"));
        }
        self.indicator_config.validate()?;

        for bar in bars {
            let ohlc = [bar.open, bar.high, bar.low, bar.close];
            if ohlc.iter().any(|v| !v.is_finite()) {
                return Err(Error::data(format!(
                    "bar at {} is missing an OHLC value",
                    bar.date
                )));
            }
            if !bar.volume.is_finite() || bar.volume < 0.0 {
                return Err(Error::data(format!(
                    "bar at {} has invalid volume {}",
                    bar.date, bar.volume
                )));
            }
            if bar.high < bar.low {
                return Err(Error::data(format!(
                    "bar at {} has high {} below low {}",
                    bar.date, bar.high, bar.low
                )));
            }
        }

        let mut prepared = bars.to_vec();
        prepared.sort_by(|a, b| a.date.cmp(&b.date));
        apply_indicators(&mut prepared, &self.indicator_config);
        Ok(prepared)
    }

    pub fn run<S: Strategy + ?Sized>(&mut self, bars: &[Bar], strategy: &S) -> Result<BacktestResult> {
        self.config.validate()?;
        let bars = self.prepare_data(bars)?;
        self.reset();

        for i in 0..bars.len() {
            let bar = &bars[i];

            self.process_risk_exits(bar);

            let signals = strategy.generate_signals(&bars[..=i], &self.state.view())?;
            for signal in signals {
                match signal.kind {
                    SignalKind::Entry => self.open_position(&signal, bar),
                    SignalKind::Exit => self.close_symbol(&signal.symbol, bar),
                }
            }

            let equity = self.state.equity_at(bar.close);
            self.state.equity_curve.push(EquityPoint {
                date: bar.date,
                equity,
            });
        }

        if let Some(last_bar) = bars.last() {
            while !self.state.open_positions.is_empty() {
                let side = self.state.open_positions[0].position_type;
                let exit_price = self.exit_execution_price(last_bar.close, side);
                self.state.close_position(
                    0,
                    exit_price,
                    last_bar.date,
                    ExitReason::EndOfTest,
                    self.config.commission,
                );
            }
            // last point reflects the end-of-test exit costs
            if let Some(last_point) = self.state.equity_curve.last_mut() {
                last_point.equity = self.state.capital;
            }
        }

        Ok(self.summarize())
    }

    fn process_risk_exits(&mut self, bar: &Bar) {
        let mut i = 0;
        while i < self.state.open_positions.len() {
            let trade = &self.state.open_positions[i];
            let exit = match trade.position_type {
                PositionType::Long => {
                    if bar.low <= trade.stop_loss {
                        Some((trade.stop_loss, ExitReason::StopLoss))
                    } else if bar.high >= trade.take_profit {
                        Some((trade.take_profit, ExitReason::TakeProfit))
                    } else {
                        None
                    }
                }
                PositionType::Short => {
                    if bar.high >= trade.stop_loss {
                        Some((trade.stop_loss, ExitReason::StopLoss))
                    } else if bar.low <= trade.take_profit {
                        Some((trade.take_profit, ExitReason::TakeProfit))
                    } else {
                        None
                    }
                }
            };

            match exit {
                Some((price, reason)) => {
                    self.state
                        .close_position(i, price, bar.date, reason, self.config.commission);
                }
                None => i += 1,
            }
        }
    }

    fn open_position(&mut self, signal: &Signal, bar: &Bar) {
        if self.state.open_positions.len() >= self.config.max_positions {
            debug!(
                "Skipping entry for {} on {}: {} positions already open",
                signal.symbol,
                bar.date,
                self.state.open_positions.len()
            );
            return;
        }

        // untyped entries open long on both price and risk levels
        let position_type = signal.position_type.unwrap_or(PositionType::Long);
        let execution_price = self.entry_execution_price(bar.close, position_type);
        if !execution_price.is_finite() || execution_price <= 0.0 {
            debug!(
                "Skipping entry for {} on {}: non-positive price",
                signal.symbol, bar.date
            );
            return;
        }

        let position_value = self.state.capital * self.config.position_size;
        let mut size = position_value / execution_price;
        if !self.config.use_fractional {
            size = size.floor();
        }
        if !size.is_finite() || size <= 0.0 {
            debug!(
                "Skipping entry for {} on {}: position size rounds to zero",
                signal.symbol, bar.date
            );
            return;
        }

        let (stop_loss, take_profit) = match position_type {
            PositionType::Long => (
                execution_price * (1.0 - self.config.stop_loss),
                execution_price * (1.0 + self.config.take_profit),
            ),
            PositionType::Short => (
                execution_price * (1.0 + self.config.stop_loss),
                execution_price * (1.0 - self.config.take_profit),
            ),
        };

        self.state.open_positions.push(Trade {
            symbol: signal.symbol.clone(),
            entry_date: bar.date,
            entry_price: execution_price,
            position_type,
            size,
            stop_loss,
            take_profit,
            exit_date: None,
            exit_price: None,
            exit_reason: None,
            fees: Some(execution_price * size * self.config.commission),
            pnl: None,
        });
    }

    fn close_symbol(&mut self, symbol: &str, bar: &Bar) {
        let mut i = 0;
        while i < self.state.open_positions.len() {
            if self.state.open_positions[i].symbol != symbol {
                i += 1;
                continue;
            }
            let side = self.state.open_positions[i].position_type;
            let exit_price = self.exit_execution_price(bar.close, side);
            self.state.close_position(
                i,
                exit_price,
                bar.date,
                ExitReason::Signal,
                self.config.commission,
            );
        }
    }

    fn entry_execution_price(&self, price: f64, position_type: PositionType) -> f64 {
        match position_type {
            PositionType::Long => price * (1.0 + self.config.slippage),
            PositionType::Short => price * (1.0 - self.config.slippage),
        }
    }

    fn exit_execution_price(&self, price: f64, position_type: PositionType) -> f64 {
        match position_type {
            PositionType::Long => price * (1.0 - self.config.slippage),
            PositionType::Short => price * (1.0 + self.config.slippage),
        }
    }

    fn summarize(&self) -> BacktestResult {
        let trades = self.state.closed_trades.clone();
        let equity_curve = self.state.equity_curve.clone();
        let final_capital = self.state.capital;

        if trades.is_empty() {
            return BacktestResult {
                total_trades: 0,
                winning_trades: 0,
                losing_trades: 0,
                win_rate: 0.0,
                profit_factor: 0.0,
                sharpe_ratio: 0.0,
                max_drawdown: 0.0,
                total_return: 0.0,
                final_capital,
                equity_curve,
                trades,
            };
        }

        let trade_stats = TradeMetrics::from_trades(&trades);
        let initial_capital = self.config.initial_capital;
        BacktestResult {
            total_trades: trade_stats.total_trades,
            winning_trades: trade_stats.winning_trades,
            losing_trades: trade_stats.losing_trades,
            win_rate: trade_stats.win_rate,
            profit_factor: trade_stats.profit_factor,
            sharpe_ratio: sharpe_ratio(&returns_from_equity(&equity_curve)),
            max_drawdown: max_drawdown(&equity_curve),
            total_return: (final_capital - initial_capital) / initial_capital,
            final_capital,
            equity_curve,
            trades,
        }
    }
}
