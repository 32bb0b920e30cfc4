use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("no available balance ({0:.4} USDT)")]
    NoBalance(f64),
    #[error("invalid price {0}")]
    InvalidPrice(f64),
    #[error("quantity rounds to zero (raw {raw:.8}, step {step})")]
    BelowLotStep { raw: f64, step: f64 },
}

/// Round `qty` down to a multiple of `step`. A non-positive step leaves `qty` as is.
pub fn floor_to_step(qty: f64, step: f64) -> f64 {
    if !(step > 0.0) || !qty.is_finite() {
        return qty;
    }

    // Work in whole steps; the nudge keeps 0.3 / 0.1 from landing on 2.9999
    let steps = (qty / step + 1e-9).floor();
    let decimals = step_decimals(step);
    let factor = 10f64.powi(decimals as i32);
    (steps * step * factor).round() / factor
}

fn step_decimals(step: f64) -> usize {
    let text = format!("{}", step);
    text.split_once('.').map_or(0, |(_, frac)| frac.len())
}

/// Contract quantity for committing `trade_pct` of `balance` as margin at `leverage`.
pub fn size_order(balance: f64, trade_pct: f64, leverage: u32, price: f64, step: f64) -> Result<f64, SizingError> {
    if !(balance > 0.0) {
        return Err(SizingError::NoBalance(balance));
    }
    if !(price > 0.0) {
        return Err(SizingError::InvalidPrice(price));
    }

    let raw = balance * trade_pct * leverage as f64 / price;
    let qty = floor_to_step(raw, step);
    if !(qty > 0.0) {
        return Err(SizingError::BelowLotStep { raw, step });
    }
    Ok(qty)
}
