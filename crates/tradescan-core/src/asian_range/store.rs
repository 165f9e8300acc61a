use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::AsianRangeReference;
use crate::{Symbol, UtcDateTime};

#[derive(Debug, Clone)]
struct Slot {
    reference: Option<AsianRangeReference>,
    last_attempt: UtcDateTime,
}

/// Latest Asian-range reference per symbol.
///
/// Readers get clones; each write takes the lock for a single symbol update, so a
/// batch refresh publishes results one symbol at a time.
#[derive(Debug, Clone, Default)]
pub struct AsianRangeStore {
    slots: Arc<RwLock<HashMap<Symbol, Slot>>>,
}

impl AsianRangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &Symbol) -> Option<AsianRangeReference> {
        self.slots
            .read()
            .get(symbol)
            .and_then(|slot| slot.reference.clone())
    }

    pub fn record_success(&self, reference: AsianRangeReference, attempted_at: UtcDateTime) {
        self.slots.write().insert(
            reference.symbol.clone(),
            Slot {
                reference: Some(reference),
                last_attempt: attempted_at,
            },
        );
    }

    /// Note a failed attempt. A previously stored reference is kept.
    pub fn record_failure(&self, symbol: &Symbol, attempted_at: UtcDateTime) {
        let mut slots = self.slots.write();
        slots
            .entry(symbol.clone())
            .and_modify(|slot| slot.last_attempt = attempted_at)
            .or_insert(Slot {
                reference: None,
                last_attempt: attempted_at,
            });
    }

    /// Whether `symbol` should be recomputed at `now`.
    ///
    /// Unknown symbols are stale. A missing or expired reference is stale once
    /// `retry_failed_after` has passed since the last attempt.
    pub fn is_stale(
        &self,
        symbol: &Symbol,
        now: UtcDateTime,
        max_age: time::Duration,
        retry_failed_after: time::Duration,
    ) -> bool {
        let slots = self.slots.read();
        let Some(slot) = slots.get(symbol) else {
            return true;
        };

        let fresh = slot
            .reference
            .as_ref()
            .is_some_and(|reference| reference.computed_at.elapsed_until(now) < max_age);
        if fresh {
            return false;
        }

        slot.last_attempt.elapsed_until(now) >= retry_failed_after
    }

    pub fn stale_symbols(
        &self,
        symbols: &[Symbol],
        now: UtcDateTime,
        max_age: time::Duration,
        retry_failed_after: time::Duration,
    ) -> Vec<Symbol> {
        let mut seen = std::collections::HashSet::new();
        symbols
            .iter()
            .filter(|symbol| seen.insert(*symbol))
            .filter(|symbol| self.is_stale(symbol, now, max_age, retry_failed_after))
            .cloned()
            .collect()
    }

    /// Symbols with any recorded attempt.
    pub fn tracked(&self) -> usize {
        self.slots.read().len()
    }

    /// Symbols with a stored reference.
    pub fn resolved(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.reference.is_some())
            .count()
    }

    pub fn clear(&self) {
        self.slots.write().clear();
    }
}
