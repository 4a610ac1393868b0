//! In-memory ticket store
//!
//! Every method takes the state lock for its whole body, which plays the
//! role of a serializable transaction. Capacity is checked against the
//! state as it would be after the write, before anything is applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{
    plan_settlement, ActionKind, ActionRecord, BuyerRecord, CompanyRecord, EventRecord,
    SettlementAttempt, SettlementBlocked, SettlementOutcome, SettlementPlan, TicketRecord,
    TicketStatus, UserRole,
};
use crate::inventory::Capacity;

use super::{
    CommittedReservation, ReservationDraft, SettlementCheckpoint, SettlementCompletion,
    SettlementStart, StoreError, TicketStore,
};

#[derive(Debug, Default)]
struct State {
    companies: HashMap<Uuid, CompanyRecord>,
    users: HashMap<Uuid, BuyerRecord>,
    events: HashMap<Uuid, EventRecord>,
    actions: HashMap<Uuid, ActionRecord>,
    /// Insertion order
    tickets: Vec<TicketRecord>,
    /// Number of upcoming reservation commits that fail with a conflict
    injected_conflicts: u32,
}

impl State {
    fn held_count(&self, event_id: Uuid) -> u64 {
        self.tickets
            .iter()
            .filter(|t| t.event_id == event_id && t.status.holds_capacity())
            .count() as u64
    }

    fn capacity(&self, event_id: Uuid) -> Capacity {
        let limit = self.events.get(&event_id).and_then(|e| e.ticket_limit);
        Capacity::from_limit(limit, self.held_count(event_id))
    }

    fn settlement_attempt(&self, action_id: Uuid) -> Result<Option<SettlementAttempt>, StoreError> {
        match self.actions.get(&action_id) {
            Some(action) if action.kind == ActionKind::BuyTickets => {
                serde_json::from_value(action.extra.clone())
                    .map(Some)
                    .map_err(|e| StoreError::Corrupt(format!("action {}: {}", action_id, e)))
            }
            _ => Ok(None),
        }
    }

    /// Find a guest by email, filling missing names; create when absent.
    fn upsert_guest(
        &mut self,
        company_id: Uuid,
        email: &str,
        first_name: &Option<String>,
        last_name: &Option<String>,
    ) -> Uuid {
        let existing = self
            .users
            .values_mut()
            .find(|u| u.company_id == company_id && u.email.as_deref() == Some(email));

        match existing {
            Some(user) => {
                if user.first_name.is_none() {
                    user.first_name = first_name.clone();
                }
                if user.last_name.is_none() {
                    user.last_name = last_name.clone();
                }
                user.id
            }
            None => {
                let id = Uuid::new_v4();
                self.users.insert(
                    id,
                    BuyerRecord {
                        id,
                        company_id,
                        role: UserRole::Guest,
                        first_name: first_name.clone(),
                        last_name: last_name.clone(),
                        email: Some(email.to_string()),
                        gateway_customer_id: None,
                    },
                );
                id
            }
        }
    }
}

/// Mutex-backed [`TicketStore`]
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    state: Mutex<State>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_company(&self, company: CompanyRecord) {
        self.state.lock().companies.insert(company.id, company);
    }

    pub fn insert_user(&self, user: BuyerRecord) {
        self.state.lock().users.insert(user.id, user);
    }

    pub fn insert_event(&self, event: EventRecord) {
        self.state.lock().events.insert(event.id, event);
    }

    /// Make the next `count` reservation commits fail with
    /// [`StoreError::SerializationConflict`].
    pub fn inject_conflicts(&self, count: u32) {
        self.state.lock().injected_conflicts = count;
    }

    /// Shift a reservation's action timestamp, as if it had been made earlier.
    pub fn backdate_action(&self, action_id: Uuid, by: chrono::Duration) {
        if let Some(action) = self.state.lock().actions.get_mut(&action_id) {
            action.created_at -= by;
        }
    }

    pub fn event_tickets(&self, event_id: Uuid) -> Vec<TicketRecord> {
        self.state
            .lock()
            .tickets
            .iter()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect()
    }

    pub fn action(&self, action_id: Uuid) -> Option<ActionRecord> {
        self.state.lock().actions.get(&action_id).cloned()
    }

    pub fn user(&self, user_id: Uuid) -> Option<BuyerRecord> {
        self.state.lock().users.get(&user_id).cloned()
    }

    pub fn user_by_email(&self, company_id: Uuid, email: &str) -> Option<BuyerRecord> {
        self.state
            .lock()
            .users
            .values()
            .find(|u| u.company_id == company_id && u.email.as_deref() == Some(email))
            .cloned()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn find_event(
        &self,
        company_id: Uuid,
        event_id: Uuid,
    ) -> Result<Option<EventRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .events
            .get(&event_id)
            .filter(|e| e.company_id == company_id)
            .cloned())
    }

    async fn find_company(&self, company_id: Uuid) -> Result<Option<CompanyRecord>, StoreError> {
        Ok(self.state.lock().companies.get(&company_id).cloned())
    }

    async fn find_buyer(
        &self,
        company_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BuyerRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .users
            .get(&user_id)
            .filter(|u| u.company_id == company_id)
            .cloned())
    }

    async fn remaining_capacity(&self, event_id: Uuid) -> Result<Capacity, StoreError> {
        Ok(self.state.lock().capacity(event_id))
    }

    async fn commit_reservation(
        &self,
        draft: &ReservationDraft,
    ) -> Result<CommittedReservation, StoreError> {
        let mut state = self.state.lock();

        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            return Err(StoreError::SerializationConflict);
        }

        let requested = draft.tickets.len() as u32;
        if !state.capacity(draft.event_id).admits(requested) {
            return Err(StoreError::CapacityExceeded);
        }

        let guest_ids: Vec<Uuid> = draft
            .guests
            .iter()
            .map(|g| state.upsert_guest(draft.company_id, &g.email, &g.first_name, &g.last_name))
            .collect();

        let reservation_action_id = Uuid::new_v4();
        let reserved_at = Utc::now();
        state.actions.insert(
            reservation_action_id,
            ActionRecord {
                id: reservation_action_id,
                company_id: draft.company_id,
                user_id: draft.acting_user_id,
                kind: ActionKind::ReserveTickets,
                created_at: reserved_at,
                extra: serde_json::json!({ "event_id": draft.event_id, "ticket_count": requested }),
            },
        );

        let mut ticket_ids = Vec::with_capacity(draft.tickets.len());
        for ticket in &draft.tickets {
            let id = Uuid::new_v4();
            state.tickets.push(TicketRecord {
                id,
                event_id: draft.event_id,
                user_id: ticket.guest.and_then(|i| guest_ids.get(i).copied()),
                status: TicketStatus::Reserved,
                reserve_action_id: reservation_action_id,
                paid_action_id: None,
                extra: ticket.extra.clone(),
            });
            ticket_ids.push(id);
        }

        Ok(CommittedReservation {
            reservation_action_id,
            reserved_at,
            ticket_ids,
        })
    }

    async fn reservation_tickets(
        &self,
        reservation_action_id: Uuid,
    ) -> Result<Vec<TicketRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .tickets
            .iter()
            .filter(|t| t.reserve_action_id == reservation_action_id)
            .cloned()
            .collect())
    }

    async fn find_settlement_attempt(
        &self,
        settlement_action_id: Uuid,
    ) -> Result<Option<SettlementAttempt>, StoreError> {
        self.state.lock().settlement_attempt(settlement_action_id)
    }

    async fn begin_settlement(
        &self,
        start: &SettlementStart,
    ) -> Result<SettlementCheckpoint, StoreError> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let (statuses, current_id): (Vec<TicketStatus>, Option<Uuid>) = {
            let tickets: Vec<&TicketRecord> = state
                .tickets
                .iter()
                .filter(|t| t.reserve_action_id == start.reservation_action_id)
                .collect();
            (
                tickets.iter().map(|t| t.status).collect(),
                tickets.first().and_then(|t| t.paid_action_id),
            )
        };

        let current = match current_id {
            Some(id) => state.settlement_attempt(id)?.map(|a| (id, a)),
            None => None,
        };

        let plan = plan_settlement(
            &statuses,
            current.as_ref().map(|(id, a)| (*id, a)),
            now,
            start.stale_after,
        )?;

        match plan {
            SettlementPlan::AlreadySettled => Ok(SettlementCheckpoint::AlreadySettled {
                charge_id: current.and_then(|(_, a)| a.charge_id),
            }),
            SettlementPlan::Start { attempt } => {
                let source = start.source.clone().ok_or(SettlementBlocked::InProgress)?;
                let settlement_action_id = Uuid::new_v4();
                let body = SettlementAttempt::pending(
                    start.reservation_action_id,
                    attempt,
                    source.clone(),
                    start.new_customer,
                    start.new_card,
                    now,
                );
                let extra = serde_json::to_value(&body)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;

                for ticket in state
                    .tickets
                    .iter_mut()
                    .filter(|t| t.reserve_action_id == start.reservation_action_id)
                {
                    ticket.status = ticket.status.transition(TicketStatus::PaymentPending)?;
                    ticket.paid_action_id = Some(settlement_action_id);
                }

                state.actions.insert(
                    settlement_action_id,
                    ActionRecord {
                        id: settlement_action_id,
                        company_id: start.company_id,
                        user_id: Some(start.buyer_id),
                        kind: ActionKind::BuyTickets,
                        created_at: now,
                        extra,
                    },
                );

                Ok(SettlementCheckpoint::Claimed {
                    settlement_action_id,
                    attempt,
                    source,
                    resumed: false,
                })
            }
            SettlementPlan::Resume {
                settlement_action_id,
                attempt,
            } => {
                let source = current
                    .map(|(_, a)| a.source)
                    .ok_or(SettlementBlocked::Inconsistent)?;
                let action = state
                    .actions
                    .get_mut(&settlement_action_id)
                    .ok_or(SettlementBlocked::Inconsistent)?;
                action.extra["outcome"] = serde_json::json!(SettlementOutcome::Pending);
                action.extra["started_at"] = serde_json::json!(now);

                Ok(SettlementCheckpoint::Claimed {
                    settlement_action_id,
                    attempt,
                    source,
                    resumed: true,
                })
            }
        }
    }

    async fn complete_settlement(
        &self,
        completion: &SettlementCompletion,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();

        let target = match completion.outcome {
            SettlementOutcome::Succeeded => Some(TicketStatus::Paid),
            SettlementOutcome::Failed => Some(TicketStatus::PaymentFailed),
            SettlementOutcome::Unresolved => None,
            SettlementOutcome::Pending => {
                return Err(StoreError::Corrupt(
                    "settlement cannot complete as pending".to_string(),
                ))
            }
        };

        let indices: Vec<usize> = state
            .tickets
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.reserve_action_id == completion.reservation_action_id
                    && t.paid_action_id == Some(completion.settlement_action_id)
            })
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Err(StoreError::Blocked(SettlementBlocked::Inconsistent));
        }

        if let Some(target) = target {
            // Validate every ticket before changing any of them
            for &i in &indices {
                let status = state.tickets[i].status;
                if status != target {
                    status.transition(target)?;
                }
            }
            for &i in &indices {
                state.tickets[i].status = target;
            }
        }

        let patch = completion.extra_patch();
        if let Some(action) = state.actions.get_mut(&completion.settlement_action_id) {
            if let (Some(extra), Some(patch)) = (action.extra.as_object_mut(), patch.as_object()) {
                for (k, v) in patch {
                    extra.insert(k.clone(), v.clone());
                }
            }
        }

        if let Some(customer_id) = &completion.customer_id {
            if let Some(user) = state.users.get_mut(&completion.buyer_id) {
                user.gateway_customer_id = Some(customer_id.clone());
            }
        }

        Ok(())
    }

    async fn expire_reservations(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock();

        let stale_reservations: Vec<Uuid> = state
            .actions
            .values()
            .filter(|a| a.kind == ActionKind::ReserveTickets && a.created_at < cutoff)
            .map(|a| a.id)
            .collect();

        let mut expired = 0;
        for ticket in state.tickets.iter_mut().filter(|t| {
            stale_reservations.contains(&t.reserve_action_id)
                && t.status.can_transition_to(TicketStatus::Expired)
        }) {
            ticket.status = TicketStatus::Expired;
            expired += 1;
        }

        Ok(expired)
    }

    async fn cancel_reservation(&self, reservation_action_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.state.lock();

        let tickets: Vec<&mut TicketRecord> = state
            .tickets
            .iter_mut()
            .filter(|t| t.reserve_action_id == reservation_action_id)
            .collect();

        for ticket in &tickets {
            if ticket.status != TicketStatus::Cancelled {
                ticket.status.transition(TicketStatus::Cancelled)?;
            }
        }

        let mut cancelled = 0;
        for ticket in tickets {
            if ticket.status != TicketStatus::Cancelled {
                ticket.status = TicketStatus::Cancelled;
                cancelled += 1;
            }
        }

        Ok(cancelled)
    }
}
