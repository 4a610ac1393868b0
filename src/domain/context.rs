//! Who is asking
//!
//! The upstream auth layer authenticates callers and forwards the company
//! (tenant) and the acting user as headers. Reservations may be anonymous;
//! settlement always needs a buyer.

use serde::Serialize;
use std::net::IpAddr;
use uuid::Uuid;

use crate::error::AppError;

pub const COMPANY_HEADER: &str = "X-Company-Id";
pub const REQUEST_USER_HEADER: &str = "X-Request-User-Id";
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

/// Caller identity and tracing data for one request
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<Uuid>,

    /// The buyer on settlement; the acting host, if any, on reservation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_user_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Only logged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_company(mut self, company_id: Uuid) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn with_request_user(mut self, user_id: Uuid) -> Self {
        self.request_user_id = Some(user_id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Every ticket operation is scoped to a company.
    pub fn company(&self) -> Result<Uuid, AppError> {
        self.company_id
            .ok_or_else(|| AppError::MissingHeader(COMPANY_HEADER.to_string()))
    }

    /// The user paying for a reservation.
    pub fn buyer(&self) -> Result<Uuid, AppError> {
        self.request_user_id
            .ok_or_else(|| AppError::MissingHeader(REQUEST_USER_HEADER.to_string()))
    }
}
