use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::Direction;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingSignal {
    pub direction: Direction,
    pub received_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingSignal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// CID signals waiting for their confirmation filters, one per symbol.
#[derive(Default)]
pub struct PendingSignals {
    signals: DashMap<String, PendingSignal>,
}

impl PendingSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a signal unless a live one is already pending for `symbol`.
    /// An expired leftover is replaced.
    pub fn try_register(&self, symbol: &str, direction: Direction, now: DateTime<Utc>, ttl: Duration) -> bool {
        let signal = PendingSignal {
            direction,
            received_at: now,
            expires_at: now + ttl,
        };

        match self.signals.entry(symbol.to_string()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_expired(now) {
                    return false;
                }
                existing.insert(signal);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(signal);
                true
            }
        }
    }

    /// Remove and return every expired signal.
    pub fn take_expired(&self, now: DateTime<Utc>) -> Vec<(String, PendingSignal)> {
        let expired: Vec<String> = self
            .signals
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|symbol| self.signals.remove_if(&symbol, |_, s| s.is_expired(now)))
            .collect()
    }

    /// Live signals, ordered by symbol.
    pub fn live(&self, now: DateTime<Utc>) -> Vec<(String, PendingSignal)> {
        let mut live: Vec<(String, PendingSignal)> = self
            .signals
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live
    }

    pub fn get(&self, symbol: &str) -> Option<PendingSignal> {
        self.signals.get(symbol).map(|s| *s)
    }

    /// Claim a signal for execution; `None` if it already left the map.
    pub fn remove(&self, symbol: &str) -> Option<PendingSignal> {
        self.signals.remove(symbol).map(|(_, s)| s)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.signals.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}
