use crate::config::IndicatorConfig;
use crate::models::Bar;
use statrs::statistics::Statistics;

/// Rolling simple moving average; `None` until the window is full.
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; prices.len()];
    }

    let mut sma_values = Vec::with_capacity(prices.len());
    let mut window_sum = 0.0;
    for i in 0..prices.len() {
        window_sum += prices[i];
        if i >= period {
            window_sum -= prices[i - period];
        }
        if i + 1 >= period {
            sma_values.push(Some(window_sum / period as f64));
        } else {
            sma_values.push(None);
        }
    }

    sma_values
}

/// Exponential moving average seeded with the first price (no warmup gap).
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

/// RSI from rolling average gains and losses over `period` deltas.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut rsi_values = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return rsi_values;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    for end in period..=deltas.len() {
        let window = &deltas[end - period..end];
        let gain = window.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
        let loss = -window.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;
        let rsi = if loss == 0.0 {
            if gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        };
        rsi_values[end] = Some(rsi);
    }

    rsi_values
}

/// Average true range as a rolling mean of true ranges.
pub fn calculate_atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = highs.len().min(lows.len()).min(closes.len());
    let mut true_ranges = Vec::with_capacity(n);
    for i in 0..n {
        let range = highs[i] - lows[i];
        let tr = if i == 0 {
            range
        } else {
            range
                .max((highs[i] - closes[i - 1]).abs())
                .max((lows[i] - closes[i - 1]).abs())
        };
        true_ranges.push(tr);
    }
    calculate_sma(&true_ranges, period)
}

/// Sample standard deviation of close-to-close returns over a rolling window.
pub fn calculate_rolling_volatility(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; closes.len()];
    if window < 2 || closes.len() <= window {
        return values;
    }

    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect();
    for end in window..=returns.len() {
        let slice = &returns[end - window..end];
        values[end] = Some(slice.std_dev());
    }

    values
}

/// Writes the configured indicator columns into each bar's indicator map.
/// Warmup bars simply lack the column.
pub fn apply_indicators(bars: &mut [Bar], config: &IndicatorConfig) {
    if bars.is_empty() {
        return;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    for &window in &config.ma_windows {
        let column = format!("sma_{}", window);
        write_column(bars, &column, calculate_sma(&closes, window));
    }

    for &window in &config.ema_windows {
        let column = format!("ema_{}", window);
        let ema = calculate_ema(&closes, window).into_iter().map(Some).collect();
        write_column(bars, &column, ema);
    }

    if let Some(period) = config.rsi_period {
        write_column(bars, "rsi", calculate_rsi(&closes, period));
    }

    if let Some(period) = config.atr_period {
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
        write_column(bars, "atr", calculate_atr(&highs, &lows, &closes, period));
    }

    if let Some(window) = config.volatility_window {
        write_column(
            bars,
            "volatility",
            calculate_rolling_volatility(&closes, window),
        );
    }
}

fn write_column(bars: &mut [Bar], column: &str, values: Vec<Option<f64>>) {
    for (bar, value) in bars.iter_mut().zip(values) {
        if let Some(v) = value {
            bar.indicators.insert(column.to_string(), v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_waits_for_full_window() {
        let sma = calculate_sma(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(sma[0], None);
        assert_eq!(sma[1], None);
        assert!((sma[2].unwrap() - 2.0).abs() < 1e-12);
        assert!((sma[3].unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let ema = calculate_ema(&[5.0; 10], 4);
        assert!(ema.iter().all(|v| (*v - 5.0).abs() < 1e-12));
    }

    #[test]
    fn rsi_is_100_for_monotonic_gains_and_50_when_flat() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let rsi = calculate_rsi(&rising, 14);
        assert_eq!(rsi[13], None);
        assert_eq!(rsi[14], Some(100.0));

        let flat = calculate_rsi(&[10.0; 20], 14);
        assert_eq!(flat[19], Some(50.0));
    }

    #[test]
    fn atr_uses_previous_close_gaps() {
        let highs = [10.0, 12.0];
        let lows = [9.0, 11.5];
        let closes = [9.5, 12.0];
        let atr = calculate_atr(&highs, &lows, &closes, 1);
        // second bar gaps up: |12 - 9.5| dominates the 0.5 range
        assert!((atr[1].unwrap() - 2.5).abs() < 1e-12);
    }
}
