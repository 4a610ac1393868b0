//! ticket_settlement Library
//!
//! Re-exports modules for integration testing and the `ticketctl` binary.

pub mod api;
pub mod capability;
pub mod domain;
pub mod gateway;
pub mod handlers;
pub mod idempotency;
pub mod inventory;
pub mod jobs;
pub mod maintenance;
pub mod retry;
pub mod store;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use error::{AppError, AppResult, ErrorResponse};
pub use domain::{DomainError, OperationContext};
