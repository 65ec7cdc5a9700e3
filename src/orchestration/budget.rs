//! Shared token and cost budget for a swarm run.
//!
//! Every in-flight dispatch holds a reservation carved from the pool. All
//! reserve and release calls serialize on one mutex so the pool can never be
//! over-allocated.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::SwarmConfig;

/// A token ceiling held by one dispatch until it is released.
///
/// Releasing consumes the reservation.
#[derive(Debug, PartialEq, Eq)]
pub struct BudgetReservation {
    pub id: u64,
    pub tokens: u64,
}

/// Point-in-time budget figures, also stored in checkpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub total_tokens: u64,
    pub max_cost_usd: f64,
    pub tokens_used: u64,
    pub tokens_reserved: u64,
    pub cost_usd: f64,
    pub active_reservations: usize,
}

impl BudgetSnapshot {
    pub fn tokens_remaining(&self) -> u64 {
        self.total_tokens
            .saturating_sub(self.tokens_used)
            .saturating_sub(self.tokens_reserved)
    }
}

#[derive(Debug, Default)]
struct Ledger {
    tokens_used: u64,
    cost_usd: f64,
    reservations: HashMap<u64, u64>,
    next_id: u64,
}

impl Ledger {
    fn reserved(&self) -> u64 {
        self.reservations.values().sum()
    }
}

/// Shared token/cost pool.
#[derive(Debug)]
pub struct BudgetPool {
    total_tokens: u64,
    max_cost_usd: f64,
    ledger: Mutex<Ledger>,
}

impl BudgetPool {
    pub fn new(total_tokens: u64, max_cost_usd: f64) -> Self {
        Self {
            total_tokens,
            max_cost_usd,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn from_config(config: &SwarmConfig) -> Self {
        Self::new(config.total_token_budget, config.max_cost_usd)
    }

    fn available(&self, ledger: &Ledger) -> u64 {
        if ledger.cost_usd >= self.max_cost_usd {
            return 0;
        }
        self.total_tokens
            .saturating_sub(ledger.tokens_used)
            .saturating_sub(ledger.reserved())
    }

    /// Whether a reservation of at least `min_tokens` would currently succeed.
    pub fn has_capacity(&self, min_tokens: u64) -> bool {
        let ledger = self.ledger.lock();
        let available = self.available(&ledger);
        available > 0 && available >= min_tokens
    }

    /// Reserve up to `max_tokens`, but no less than `min_tokens`.
    ///
    /// Returns `None` when the pool cannot cover the minimum.
    pub fn reserve(&self, min_tokens: u64, max_tokens: u64) -> Option<BudgetReservation> {
        let mut ledger = self.ledger.lock();
        let available = self.available(&ledger);
        if available == 0 || available < min_tokens {
            return None;
        }
        let tokens = max_tokens.max(min_tokens).min(available);
        ledger.next_id += 1;
        let id = ledger.next_id;
        ledger.reservations.insert(id, tokens);
        Some(BudgetReservation { id, tokens })
    }

    /// Return a reservation to the pool and account for what was actually spent.
    pub fn release(&self, reservation: BudgetReservation, tokens_used: u64, cost_usd: f64) {
        let mut ledger = self.ledger.lock();
        ledger.reservations.remove(&reservation.id);
        ledger.tokens_used = ledger.tokens_used.saturating_add(tokens_used);
        ledger.cost_usd += cost_usd.max(0.0);
    }

    /// Tokens neither spent nor reserved.
    pub fn remaining(&self) -> u64 {
        let ledger = self.ledger.lock();
        self.total_tokens
            .saturating_sub(ledger.tokens_used)
            .saturating_sub(ledger.reserved())
    }

    pub fn reserved(&self) -> u64 {
        self.ledger.lock().reserved()
    }

    pub fn is_exhausted(&self) -> bool {
        let ledger = self.ledger.lock();
        self.available(&ledger) == 0
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let ledger = self.ledger.lock();
        BudgetSnapshot {
            total_tokens: self.total_tokens,
            max_cost_usd: self.max_cost_usd,
            tokens_used: ledger.tokens_used,
            tokens_reserved: ledger.reserved(),
            cost_usd: ledger.cost_usd,
            active_reservations: ledger.reservations.len(),
        }
    }

    /// Restore spent figures from a checkpoint. Reservations from the old
    /// run belong to abandoned dispatches and are dropped.
    pub fn restore(&self, snapshot: &BudgetSnapshot) {
        let mut ledger = self.ledger.lock();
        ledger.tokens_used = snapshot.tokens_used;
        ledger.cost_usd = snapshot.cost_usd;
        ledger.reservations.clear();
    }
}
