//! Signal detection: STC cycle turns, supporting price/volume patterns, the
//! alert detectors the scanner runs, and the CID signal pipeline the trader
//! consumes (parse, hold as pending, confirm).

pub mod alerts;
pub mod cid;
pub mod confirmation;
pub mod cycle;
pub mod patterns;
pub mod pending;

pub use alerts::{obv_pressure_alert, Alert, AlertKind, AlertScanner, CandleSet};
pub use cid::{parse_cid, CidSignal};
pub use confirmation::{ConfirmationReport, FilterOutcome, SignalConfirmer};
pub use cycle::{ema_confirms, stc_cycle_shift};
pub use pending::{PendingSignal, PendingSignals};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::execution::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    /// Order side that trades this direction.
    pub fn side(&self) -> OrderSide {
        match self {
            Direction::Bullish => OrderSide::Buy,
            Direction::Bearish => OrderSide::Sell,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
        }
    }

    pub fn as_upper(&self) -> &'static str {
        match self {
            Direction::Bullish => "BULLISH",
            Direction::Bearish => "BEARISH",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Bullish => "Bullish",
            Direction::Bearish => "Bearish",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Direction::Bullish => "🟢",
            Direction::Bearish => "🔴",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_upper())
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BULLISH" | "LONG" | "BUY" => Ok(Direction::Bullish),
            "BEARISH" | "SHORT" | "SELL" => Ok(Direction::Bearish),
            other => anyhow::bail!("unknown direction: {}", other),
        }
    }
}
