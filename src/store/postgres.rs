//! PostgreSQL ticket store
//!
//! Reservation and settlement transactions run at SERIALIZABLE. Capacity is
//! enforced by the `ticket_capacity` constraint trigger (see
//! `migrations/0001_init.sql`), which is deferred to commit so it sees every
//! row the transaction inserted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{
    plan_settlement, ActionKind, BuyerRecord, CompanyRecord, EventRecord, EventStatus,
    SettlementAttempt, SettlementBlocked, SettlementOutcome, SettlementPlan, TicketExtra,
    TicketRecord, TicketStatus, UserRole,
};
use crate::inventory::Capacity;

use super::{
    CommittedReservation, ReservationDraft, SettlementCheckpoint, SettlementCompletion,
    SettlementStart, StoreError, TicketStore,
};

/// Name of the capacity constraint trigger
const CAPACITY_CONSTRAINT: &str = "ticket_capacity";

type TicketRow = (
    Uuid,
    Uuid,
    Option<Uuid>,
    String,
    Uuid,
    Option<Uuid>,
    serde_json::Value,
);

/// Map driver errors onto store errors the callers can act on.
fn classify(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => return StoreError::SerializationConflict,
            // check_violation
            Some("23514") if db.constraint() == Some(CAPACITY_CONSTRAINT) => {
                return StoreError::CapacityExceeded
            }
            _ => {}
        }
    }
    StoreError::Database(e)
}

fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

fn ticket_from_row(row: TicketRow) -> Result<TicketRecord, StoreError> {
    let (id, event_id, user_id, status, reserve_action_id, paid_action_id, extra) = row;
    Ok(TicketRecord {
        id,
        event_id,
        user_id,
        status: parse(&status)?,
        reserve_action_id,
        paid_action_id,
        extra: serde_json::from_value::<TicketExtra>(extra)
            .map_err(|e| StoreError::Corrupt(format!("ticket {} extra: {}", id, e)))?,
    })
}

async fn begin_serializable(pool: &PgPool) -> Result<Transaction<'static, Postgres>, StoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Tickets of a reservation, locked for update
async fn lock_reservation_tickets(
    conn: &mut PgConnection,
    reservation_action_id: Uuid,
) -> Result<Vec<TicketRecord>, StoreError> {
    let rows: Vec<TicketRow> = sqlx::query_as(
        r#"
        SELECT id, event, user_id, status, reserve_action, paid_action, extra
        FROM tickets
        WHERE reserve_action = $1
        ORDER BY id
        FOR UPDATE
        "#,
    )
    .bind(reservation_action_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(classify)?;

    rows.into_iter().map(ticket_from_row).collect()
}

async fn settlement_attempt(
    conn: &mut PgConnection,
    action_id: Uuid,
) -> Result<Option<SettlementAttempt>, StoreError> {
    let extra: Option<serde_json::Value> = sqlx::query_scalar(
        "SELECT extra FROM actions WHERE id = $1 AND type = $2",
    )
    .bind(action_id)
    .bind(ActionKind::BuyTickets.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(classify)?;

    extra
        .map(|extra| {
            serde_json::from_value(extra)
                .map_err(|e| StoreError::Corrupt(format!("action {}: {}", action_id, e)))
        })
        .transpose()
}

/// Expire `reserved` and `payment_failed` tickets whose reservation action
/// is older than `cutoff`. Shared by the sweep job and the control-plane tool.
pub async fn expire_tickets(
    conn: &mut PgConnection,
    cutoff: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let expirable: Vec<String> = [TicketStatus::Reserved, TicketStatus::PaymentFailed]
        .iter()
        .filter(|s| s.can_transition_to(TicketStatus::Expired))
        .map(|s| s.as_str().to_string())
        .collect();

    let result = sqlx::query(
        r#"
        UPDATE tickets AS t
        SET status = $1
        FROM actions AS a
        WHERE t.reserve_action = a.id
          AND a.ts < $2
          AND t.status = ANY($3)
        "#,
    )
    .bind(TicketStatus::Expired.as_str())
    .bind(cutoff)
    .bind(&expirable)
    .execute(&mut *conn)
    .await
    .map_err(classify)?;

    Ok(result.rows_affected())
}

/// Cancel every ticket of an unpaid reservation.
pub async fn cancel_tickets(
    conn: &mut PgConnection,
    reservation_action_id: Uuid,
) -> Result<u64, StoreError> {
    let tickets = lock_reservation_tickets(conn, reservation_action_id).await?;

    let mut to_cancel = Vec::new();
    for ticket in &tickets {
        if ticket.status != TicketStatus::Cancelled {
            ticket.status.transition(TicketStatus::Cancelled)?;
            to_cancel.push(ticket.id);
        }
    }

    if to_cancel.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query("UPDATE tickets SET status = $1 WHERE id = ANY($2)")
        .bind(TicketStatus::Cancelled.as_str())
        .bind(&to_cancel)
        .execute(&mut *conn)
        .await
        .map_err(classify)?;

    Ok(result.rows_affected())
}

/// PostgreSQL-backed [`TicketStore`]
#[derive(Debug, Clone)]
pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn try_commit_reservation(
        &self,
        draft: &ReservationDraft,
    ) -> Result<CommittedReservation, StoreError> {
        let mut tx = begin_serializable(&self.pool).await?;

        let mut guest_ids = Vec::with_capacity(draft.guests.len());
        for guest in &draft.guests {
            let id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO users AS u (company, role, first_name, last_name, email)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (company, email) DO UPDATE SET
                  first_name = coalesce(u.first_name, EXCLUDED.first_name),
                  last_name = coalesce(u.last_name, EXCLUDED.last_name)
                RETURNING id
                "#,
            )
            .bind(draft.company_id)
            .bind(UserRole::Guest.as_str())
            .bind(&guest.first_name)
            .bind(&guest.last_name)
            .bind(&guest.email)
            .fetch_one(&mut *tx)
            .await
            .map_err(classify)?;
            guest_ids.push(id);
        }

        let (reservation_action_id, reserved_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO actions (company, user_id, type, extra)
            VALUES ($1, $2, $3, $4)
            RETURNING id, ts
            "#,
        )
        .bind(draft.company_id)
        .bind(draft.acting_user_id)
        .bind(ActionKind::ReserveTickets.as_str())
        .bind(serde_json::json!({
            "event_id": draft.event_id,
            "ticket_count": draft.tickets.len(),
        }))
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;

        let mut ticket_ids = Vec::with_capacity(draft.tickets.len());
        for ticket in &draft.tickets {
            let user_id = ticket.guest.and_then(|i| guest_ids.get(i).copied());
            let extra = serde_json::to_value(&ticket.extra)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;

            let id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO tickets (event, user_id, status, reserve_action, extra)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(draft.event_id)
            .bind(user_id)
            .bind(TicketStatus::Reserved.as_str())
            .bind(reservation_action_id)
            .bind(extra)
            .fetch_one(&mut *tx)
            .await
            .map_err(classify)?;
            ticket_ids.push(id);
        }

        // The deferred capacity trigger fires here
        tx.commit().await.map_err(classify)?;

        Ok(CommittedReservation {
            reservation_action_id,
            reserved_at,
            ticket_ids,
        })
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn find_event(
        &self,
        company_id: Uuid,
        event_id: Uuid,
    ) -> Result<Option<EventRecord>, StoreError> {
        let row: Option<(Uuid, Uuid, String, i64, Option<i32>, String)> = sqlx::query_as(
            r#"
            SELECT id, company, name, price_cents, ticket_limit, status
            FROM events
            WHERE id = $1 AND company = $2
            "#,
        )
        .bind(event_id)
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, company_id, name, price_cents, ticket_limit, status)| {
            Ok(EventRecord {
                id,
                company_id,
                name,
                price_cents,
                ticket_limit: ticket_limit.map(|l| l.max(0) as u32),
                status: parse::<EventStatus>(&status)?,
            })
        })
        .transpose()
    }

    async fn find_company(&self, company_id: Uuid) -> Result<Option<CompanyRecord>, StoreError> {
        let row: Option<(Uuid, String, String, String)> = sqlx::query_as(
            "SELECT id, name, currency, gateway_secret_key FROM companies WHERE id = $1",
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, currency, gateway_secret_key)| CompanyRecord {
            id,
            name,
            currency,
            gateway_secret_key,
        }))
    }

    async fn find_buyer(
        &self,
        company_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BuyerRecord>, StoreError> {
        let row: Option<(
            Uuid,
            Uuid,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        )> = sqlx::query_as(
            r#"
            SELECT id, company, role, first_name, last_name, email, gateway_customer_id
            FROM users
            WHERE id = $1 AND company = $2
            "#,
        )
        .bind(user_id)
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(id, company_id, role, first_name, last_name, email, gateway_customer_id)| {
                Ok(BuyerRecord {
                    id,
                    company_id,
                    role: parse::<UserRole>(&role)?,
                    first_name,
                    last_name,
                    email,
                    gateway_customer_id,
                })
            },
        )
        .transpose()
    }

    async fn remaining_capacity(&self, event_id: Uuid) -> Result<Capacity, StoreError> {
        let remaining: Option<i64> =
            sqlx::query_scalar("SELECT check_tickets_remaining($1)::bigint")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(Capacity::from_remaining(remaining))
    }

    async fn commit_reservation(
        &self,
        draft: &ReservationDraft,
    ) -> Result<CommittedReservation, StoreError> {
        let result = self.try_commit_reservation(draft).await;
        if let Err(StoreError::CapacityExceeded) = &result {
            tracing::warn!(event_id = %draft.event_id, "Capacity constraint rejected reservation");
        }
        result
    }

    async fn reservation_tickets(
        &self,
        reservation_action_id: Uuid,
    ) -> Result<Vec<TicketRecord>, StoreError> {
        let rows: Vec<TicketRow> = sqlx::query_as(
            r#"
            SELECT id, event, user_id, status, reserve_action, paid_action, extra
            FROM tickets
            WHERE reserve_action = $1
            ORDER BY id
            "#,
        )
        .bind(reservation_action_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ticket_from_row).collect()
    }

    async fn find_settlement_attempt(
        &self,
        settlement_action_id: Uuid,
    ) -> Result<Option<SettlementAttempt>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        settlement_attempt(&mut *conn, settlement_action_id).await
    }

    async fn begin_settlement(
        &self,
        start: &SettlementStart,
    ) -> Result<SettlementCheckpoint, StoreError> {
        let mut tx = begin_serializable(&self.pool).await?;
        let now = Utc::now();

        let tickets = lock_reservation_tickets(&mut *tx, start.reservation_action_id).await?;
        let statuses: Vec<TicketStatus> = tickets.iter().map(|t| t.status).collect();

        let current = match tickets.first().and_then(|t| t.paid_action_id) {
            Some(id) => settlement_attempt(&mut *tx, id).await?.map(|a| (id, a)),
            None => None,
        };

        let plan = plan_settlement(
            &statuses,
            current.as_ref().map(|(id, a)| (*id, a)),
            now,
            start.stale_after,
        )?;

        let checkpoint = match plan {
            SettlementPlan::AlreadySettled => {
                return Ok(SettlementCheckpoint::AlreadySettled {
                    charge_id: current.and_then(|(_, a)| a.charge_id),
                })
            }
            SettlementPlan::Start { attempt } => {
                let source = start.source.clone().ok_or(SettlementBlocked::InProgress)?;
                for ticket in &tickets {
                    ticket.status.transition(TicketStatus::PaymentPending)?;
                }

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

                let settlement_action_id: Uuid = sqlx::query_scalar(
                    r#"
                    INSERT INTO actions (company, user_id, type, extra)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id
                    "#,
                )
                .bind(start.company_id)
                .bind(start.buyer_id)
                .bind(ActionKind::BuyTickets.as_str())
                .bind(extra)
                .fetch_one(&mut *tx)
                .await
                .map_err(classify)?;

                sqlx::query(
                    "UPDATE tickets SET status = $1, paid_action = $2 WHERE reserve_action = $3",
                )
                .bind(TicketStatus::PaymentPending.as_str())
                .bind(settlement_action_id)
                .bind(start.reservation_action_id)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;

                SettlementCheckpoint::Claimed {
                    settlement_action_id,
                    attempt,
                    source,
                    resumed: false,
                }
            }
            SettlementPlan::Resume {
                settlement_action_id,
                attempt,
            } => {
                let source = current
                    .map(|(_, a)| a.source)
                    .ok_or(SettlementBlocked::Inconsistent)?;
                sqlx::query("UPDATE actions SET extra = extra || $1 WHERE id = $2")
                    .bind(serde_json::json!({
                        "outcome": SettlementOutcome::Pending,
                        "started_at": now,
                    }))
                    .bind(settlement_action_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(classify)?;

                SettlementCheckpoint::Claimed {
                    settlement_action_id,
                    attempt,
                    source,
                    resumed: true,
                }
            }
        };

        tx.commit().await.map_err(classify)?;
        Ok(checkpoint)
    }

    async fn complete_settlement(
        &self,
        completion: &SettlementCompletion,
    ) -> Result<(), StoreError> {
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

        let mut tx = begin_serializable(&self.pool).await?;

        let tickets: Vec<TicketRecord> =
            lock_reservation_tickets(&mut *tx, completion.reservation_action_id)
                .await?
                .into_iter()
                .filter(|t| t.paid_action_id == Some(completion.settlement_action_id))
                .collect();
        if tickets.is_empty() {
            return Err(StoreError::Blocked(SettlementBlocked::Inconsistent));
        }

        if let Some(target) = target {
            for ticket in &tickets {
                if ticket.status != target {
                    ticket.status.transition(target)?;
                }
            }

            sqlx::query(
                "UPDATE tickets SET status = $1 WHERE reserve_action = $2 AND paid_action = $3",
            )
            .bind(target.as_str())
            .bind(completion.reservation_action_id)
            .bind(completion.settlement_action_id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        sqlx::query("UPDATE actions SET extra = extra || $1 WHERE id = $2")
            .bind(completion.extra_patch())
            .bind(completion.settlement_action_id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        if let Some(customer_id) = &completion.customer_id {
            sqlx::query("UPDATE users SET gateway_customer_id = $1 WHERE id = $2")
                .bind(customer_id)
                .bind(completion.buyer_id)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn expire_reservations(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let expired = expire_tickets(&mut *tx, cutoff).await?;
        tx.commit().await?;
        Ok(expired)
    }

    async fn cancel_reservation(&self, reservation_action_id: Uuid) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let cancelled = cancel_tickets(&mut *tx, reservation_action_id).await?;
        tx.commit().await?;
        Ok(cancelled)
    }
}
