//! Tenants and buyers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant with its payment gateway credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct CompanyRecord {
    pub id: Uuid,
    pub name: String,
    /// ISO currency code used for charges, lower case
    pub currency: String,
    pub gateway_secret_key: String,
}

impl fmt::Debug for CompanyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompanyRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("currency", &self.currency)
            .field("gateway_secret_key", &"[REDACTED]")
            .finish()
    }
}

/// User role within a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Host,
    Guest,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Host => "host",
            UserRole::Guest => "guest",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "host" => Ok(UserRole::Host),
            "guest" => Ok(UserRole::Guest),
            other => Err(format!("unknown user role '{}'", other)),
        }
    }
}

/// The paying user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyerRecord {
    pub id: Uuid,
    pub company_id: Uuid,
    pub role: UserRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub gateway_customer_id: Option<String>,
}

impl BuyerRecord {
    /// "First Last", or whichever half is known.
    pub fn full_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(only), None) | (None, Some(only)) => Some(only.clone()),
            (None, None) => None,
        }
    }
}

/// A guest name split into first and last parts.
///
/// The raw string is split at the first space; a single word is taken as
/// the last name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestName {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl GuestName {
    pub fn parse(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Self::default(),
        };

        match raw.split_once(' ') {
            Some((first, last)) => Self {
                first_name: Some(first.trim().to_string()),
                last_name: Some(last.trim().to_string()),
            },
            None => Self {
                first_name: None,
                last_name: Some(raw.to_string()),
            },
        }
    }
}
