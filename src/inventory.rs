//! Inventory ledger
//!
//! Read side of event capacity. The count returned here is a snapshot used
//! to fail fast with a friendly message; enforcement happens in the store
//! when the reservation commits.

use std::sync::Arc;
use uuid::Uuid;

use crate::store::{StoreError, TicketStore};

/// Tickets still available for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Unlimited,
    Remaining(u32),
}

impl Capacity {
    /// From a limit and the number of capacity-holding tickets.
    pub fn from_limit(limit: Option<u32>, held: u64) -> Self {
        match limit {
            None => Capacity::Unlimited,
            Some(limit) => {
                let held = u32::try_from(held).unwrap_or(u32::MAX);
                Capacity::Remaining(limit.saturating_sub(held))
            }
        }
    }

    /// From the nullable result of `check_tickets_remaining`; negative
    /// values (oversold rows from before the constraint existed) clamp to 0.
    pub fn from_remaining(remaining: Option<i64>) -> Self {
        match remaining {
            None => Capacity::Unlimited,
            Some(n) => Capacity::Remaining(u32::try_from(n.max(0)).unwrap_or(u32::MAX)),
        }
    }

    pub fn admits(&self, ticket_count: u32) -> bool {
        match self {
            Capacity::Unlimited => true,
            Capacity::Remaining(n) => ticket_count <= *n,
        }
    }

    /// `None` when unlimited
    pub fn remaining(&self) -> Option<u32> {
        match self {
            Capacity::Unlimited => None,
            Capacity::Remaining(n) => Some(*n),
        }
    }
}

/// Capacity lookups over a [`TicketStore`]
#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn TicketStore>,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Remaining capacity of `event_id`
    pub async fn remaining_capacity(&self, event_id: Uuid) -> Result<Capacity, StoreError> {
        let capacity = self.store.remaining_capacity(event_id).await?;
        tracing::debug!(event_id = %event_id, remaining = ?capacity.remaining(), "Capacity read");
        Ok(capacity)
    }
}
