use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

use super::position::Position;

/// `(symbol, user_id)`
pub type PositionKey = (String, String);

#[derive(Debug, Error, PartialEq)]
pub enum BookError {
    #[error("{symbol} already open for user {user_id}")]
    AlreadyOpen { symbol: String, user_id: String },
}

/// In-memory record of the positions the bot opened.
///
/// At most one record per `(symbol, user)`. Closing goes through [`take`](Self::take):
/// whoever removes the record owns the close, so a position is closed at most once
/// even when the monitor and an admin command race.
#[derive(Default)]
pub struct PositionBook {
    positions: Mutex<HashMap<PositionKey, Position>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, position: Position) -> Result<(), BookError> {
        let mut positions = self.positions.lock();
        let key = (position.symbol.clone(), position.user_id.clone());
        if positions.contains_key(&key) {
            return Err(BookError::AlreadyOpen {
                symbol: key.0,
                user_id: key.1,
            });
        }
        positions.insert(key, position);
        Ok(())
    }

    pub fn contains(&self, symbol: &str, user_id: &str) -> bool {
        self.positions
            .lock()
            .contains_key(&(symbol.to_string(), user_id.to_string()))
    }

    pub fn get(&self, symbol: &str, user_id: &str) -> Option<Position> {
        self.positions
            .lock()
            .get(&(symbol.to_string(), user_id.to_string()))
            .cloned()
    }

    /// Copies of all records, ordered by symbol then user.
    pub fn snapshot(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.lock().values().cloned().collect();
        all.sort_by(|a, b| (&a.symbol, &a.user_id).cmp(&(&b.symbol, &b.user_id)));
        all
    }

    pub fn keys(&self) -> Vec<PositionKey> {
        let mut keys: Vec<PositionKey> = self.positions.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Mutate a record in place. Returns `None` if it was claimed in the meantime.
    pub fn update<R>(&self, symbol: &str, user_id: &str, f: impl FnOnce(&mut Position) -> R) -> Option<R> {
        self.positions
            .lock()
            .get_mut(&(symbol.to_string(), user_id.to_string()))
            .map(f)
    }

    /// Claim a record for closing. Only one caller ever receives `Some`.
    pub fn take(&self, symbol: &str, user_id: &str) -> Option<Position> {
        self.positions
            .lock()
            .remove(&(symbol.to_string(), user_id.to_string()))
    }

    /// Put back a claimed record whose close order was rejected.
    pub fn restore(&self, position: Position) -> Result<(), BookError> {
        self.open(position)
    }

    pub fn len(&self) -> usize {
        self.positions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::OrderSide;
    use chrono::Utc;
    use std::sync::Arc;

    fn position(symbol: &str, user: &str) -> Position {
        Position::new(symbol, user, OrderSide::Buy, 100.0, 1.0, Utc::now())
    }

    #[test]
    fn test_duplicate_open_rejected() {
        let book = PositionBook::new();
        book.open(position("BTCUSDT", "1")).unwrap();
        assert_eq!(
            book.open(position("BTCUSDT", "1")),
            Err(BookError::AlreadyOpen {
                symbol: "BTCUSDT".to_string(),
                user_id: "1".to_string()
            })
        );
        // Same symbol, other user is fine
        book.open(position("BTCUSDT", "2")).unwrap();
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_take_is_exclusive() {
        let book = Arc::new(PositionBook::new());
        book.open(position("ETHUSDT", "7")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let book = book.clone();
                std::thread::spawn(move || book.take("ETHUSDT", "7").is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|claimed| *claimed)
            .count();
        assert_eq!(winners, 1);
        assert!(book.is_empty());
    }

    #[test]
    fn test_restore_after_failed_close() {
        let book = PositionBook::new();
        book.open(position("SOLUSDT", "3")).unwrap();
        let claimed = book.take("SOLUSDT", "3").unwrap();
        assert!(!book.contains("SOLUSDT", "3"));
        book.restore(claimed).unwrap();
        assert!(book.contains("SOLUSDT", "3"));
    }

    #[test]
    fn test_update_after_take_is_none() {
        let book = PositionBook::new();
        book.open(position("XRPUSDT", "1")).unwrap();
        assert_eq!(book.update("XRPUSDT", "1", |p| { p.highest = 120.0; p.highest }), Some(120.0));
        book.take("XRPUSDT", "1");
        assert_eq!(book.update("XRPUSDT", "1", |p| p.highest), None);
    }
}
