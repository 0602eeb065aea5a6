//! Stateless indicator functions
//!
//! Every function takes an ordered (oldest first) series and returns `None`
//! when there is not enough data, so callers treat "unavailable" as a value
//! instead of a failure.

/// Exponential moving average of the whole series, seeded with the SMA of the
/// first `period` values. Multiplier `k = 2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Every EMA value from the seed onwards (`values.len() - period + 1` entries)
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);

    let mut prev = seed;
    for &v in &values[period..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }

    out
}

/// Relative Strength Index with Wilder's smoothing (factor `1/period`)
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;

    let p = period as f64;
    for &c in &changes[period..] {
        avg_gain = (avg_gain * (p - 1.0) + c.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-c).max(0.0)) / p;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// True range for every bar after the first
pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    if n < 2 {
        return Vec::new();
    }

    (1..n)
        .map(|i| {
            (highs[i] - lows[i])
                .max((highs[i] - closes[i - 1]).abs())
                .max((lows[i] - closes[i - 1]).abs())
        })
        .collect()
}

/// Average True Range: simple mean of the last `period` true ranges
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let tr = true_range(highs, lows, closes);
    if period == 0 || tr.len() < period {
        return None;
    }
    Some(tr[tr.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Directional index over the last `period` bars.
///
/// Single-window form: +DI / -DI are the summed directional movement over the
/// window divided by ATR, and the result is `|+DI - -DI| / (+DI + -DI) * 100`.
/// No second smoothing pass, so it reacts within one window.
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    if period == 0 || n < period + 1 {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    for i in 1..n {
        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    let atr_value = atr(&highs[..n], &lows[..n], &closes[..n], period)?;
    if atr_value == 0.0 {
        return None;
    }

    let plus_di = plus_dm[plus_dm.len() - period..].iter().sum::<f64>() / atr_value * 100.0;
    let minus_di = minus_dm[minus_dm.len() - period..].iter().sum::<f64>() / atr_value * 100.0;

    if plus_di + minus_di == 0.0 {
        return Some(0.0);
    }

    Some((plus_di - minus_di).abs() / (plus_di + minus_di) * 100.0)
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
