pub mod atr;
pub mod bollinger;
pub mod moving_average;
pub mod obv;
pub mod stc;

pub use atr::{calculate_atr, calculate_atr_series};
pub use bollinger::{bollinger_bands, bollinger_bandwidth_pct, BollingerBands};
pub use moving_average::{calculate_ema, calculate_sma, ema_or_last, ema_series};
pub use obv::{obv_rising, obv_series, obv_trend};
pub use stc::{calculate_stc, macd_line, stochastic_k, StcParams};
