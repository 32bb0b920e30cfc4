pub mod book;
pub mod exit;
pub mod position;

pub use book::{BookError, PositionBook, PositionKey};
pub use exit::{ExitPolicy, ExitReason, MomentumRule};
pub use position::{Pnl, Position};
