//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance tasks.
//! These run on a schedule, out of band from reservation and settlement.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::store::{StoreError, TicketStore};

// =========================================================================
// Reservation expiry sweep
// =========================================================================

/// Expire unpaid reservations older than `hold`, returning capacity to
/// their events. Settled and in-flight tickets are never touched.
pub async fn expire_unpaid_reservations(
    store: &dyn TicketStore,
    hold: chrono::Duration,
) -> Result<u64, JobError> {
    let cutoff = Utc::now() - hold;
    let expired = store.expire_reservations(cutoff).await?;

    if expired > 0 {
        tracing::info!(
            tickets_expired = expired,
            cutoff = %cutoff,
            "Expired unpaid reservations"
        );
    }

    Ok(expired)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for the expiry sweep (default: 1 minute)
    pub expiry_sweep_interval: Duration,
    /// Reservation age after which unpaid tickets expire (default: 15 minutes)
    pub reservation_hold: chrono::Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            expiry_sweep_interval: Duration::from_secs(60),
            reservation_hold: chrono::Duration::minutes(15),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    store: Arc<dyn TicketStore>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self {
            store,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(store: Arc<dyn TicketStore>, config: JobSchedulerConfig) -> Self {
        Self { store, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!(
            interval_secs = self.config.expiry_sweep_interval.as_secs(),
            hold_secs = self.config.reservation_hold.num_seconds(),
            "Job scheduler started"
        );

        let mut expiry_interval = interval(self.config.expiry_sweep_interval);

        loop {
            expiry_interval.tick().await;
            if let Err(e) =
                expire_unpaid_reservations(self.store.as_ref(), self.config.reservation_hold).await
            {
                tracing::error!(error = %e, "Reservation expiry sweep failed");
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match expire_unpaid_reservations(self.store.as_ref(), self.config.reservation_hold).await {
            Ok(count) => report.tickets_expired = count,
            Err(e) => report.errors.push(format!("Reservation expiry: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub tickets_expired: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =========================================================================
// Tests
// =========================================================================
