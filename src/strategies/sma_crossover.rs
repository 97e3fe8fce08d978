use crate::engine::StateView;
use crate::models::{Bar, PositionType, Signal};
use crate::param_utils::{get_param_f64, get_param_usize, ParameterSet};
use anyhow::Result;

/// Long-only moving-average crossover.
///
/// Enters when the fast average crosses above the slow one and the bar's `rsi`
/// column (when present) is below `rsi_threshold`; exits on the opposite cross.
pub struct SmaCrossoverTemplate;

struct CrossoverParams {
    fast_period: usize,
    slow_period: usize,
    rsi_threshold: f64,
}

impl CrossoverParams {
    fn from_params(params: &ParameterSet) -> Self {
        let fast_period = get_param_usize(params, "fast_period", 20).max(1);
        let slow_period =
            get_param_usize(params, "slow_period", 50).max(fast_period.saturating_add(1));
        let rsi_threshold = get_param_f64(params, "rsi_threshold", 70.0);
        Self {
            fast_period,
            slow_period,
            rsi_threshold,
        }
    }
}

fn average_close(bars: &[Bar]) -> f64 {
    bars.iter().map(|b| b.close).sum::<f64>() / bars.len() as f64
}

/// Fast and slow averages ending at `end` (exclusive).
fn averages_at(history: &[Bar], end: usize, params: &CrossoverParams) -> (f64, f64) {
    (
        average_close(&history[end - params.fast_period..end]),
        average_close(&history[end - params.slow_period..end]),
    )
}

impl super::StrategyTemplate for SmaCrossoverTemplate {
    fn generate_signals(
        &self,
        history: &[Bar],
        state: &StateView<'_>,
        params: &ParameterSet,
    ) -> Result<Vec<Signal>> {
        let params = CrossoverParams::from_params(params);
        let n = history.len();
        if n <= params.slow_period {
            return Ok(Vec::new());
        }

        let current = &history[n - 1];
        let (prev_fast, prev_slow) = averages_at(history, n - 1, &params);
        let (fast, slow) = averages_at(history, n, &params);
        let holding_long = state
            .open_positions
            .iter()
            .any(|t| t.symbol == current.symbol && t.position_type == PositionType::Long);

        if prev_fast <= prev_slow && fast > slow && !holding_long {
            let rsi_allows = current
                .indicator("rsi")
                .map(|rsi| rsi < params.rsi_threshold)
                .unwrap_or(true);
            if rsi_allows {
                return Ok(vec![Signal::enter_long(current.symbol.clone())]);
            }
        } else if prev_fast >= prev_slow && fast < slow && holding_long {
            return Ok(vec![Signal::exit(current.symbol.clone())]);
        }

        Ok(Vec::new())
    }
}
